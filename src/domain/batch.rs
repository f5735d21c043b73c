// Time-series batch domain model
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Token that the backend may send either as a JSON string or as an integer.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawToken {
    Text(String),
    Integer(u64),
}

impl From<RawToken> for String {
    fn from(raw: RawToken) -> Self {
        match raw {
            RawToken::Text(s) => s,
            RawToken::Integer(n) => n.to_string(),
        }
    }
}

/// Opaque timestamp token. Only equality and ordering are meaningful here.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(String);

impl Timestamp {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stable identifier of a grid cell.
///
/// Numeric ids order numerically ("2" < "10"), anything else falls back to
/// string order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "RawToken", into = "String")]
pub struct LocationId(String);

impl LocationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn numeric(&self) -> Option<u64> {
        self.0.parse().ok()
    }
}

impl From<RawToken> for LocationId {
    fn from(raw: RawToken) -> Self {
        Self(raw.into())
    }
}

impl From<LocationId> for String {
    fn from(id: LocationId) -> Self {
        id.0
    }
}

impl Ord for LocationId {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.numeric(), other.numeric()) {
            (Some(a), Some(b)) => a.cmp(&b).then_with(|| self.0.cmp(&other.0)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for LocationId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for LocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Session token handed out by the live endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "RawToken", into = "String")]
pub struct ClientId(String);

impl ClientId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<RawToken> for ClientId {
    fn from(raw: RawToken) -> Self {
        Self(raw.into())
    }
}

impl From<ClientId> for String {
    fn from(id: ClientId) -> Self {
        id.0
    }
}

/// One measurement at one location and timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Sample {
    Scalar(f64),
    /// Uncertainty band Q0..Q4
    Quantiles([f64; 5]),
}

impl Sample {
    /// Scalar value, or the median of a quantile band.
    pub fn central(&self) -> f64 {
        match self {
            Sample::Scalar(v) => *v,
            Sample::Quantiles(q) => q[2],
        }
    }
}

/// Per-location sample slots of one series. `None` is a gap, not a zero.
pub type SeriesValues = BTreeMap<LocationId, Vec<Option<Sample>>>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BatchError {
    #[error("timestamp {token} at position {position} does not increase on its predecessor")]
    UnorderedTimestamps { position: usize, token: Timestamp },

    #[error("series {measurement} at location {location} has {actual} samples, expected {expected}")]
    LengthMismatch {
        measurement: String,
        location: LocationId,
        expected: usize,
        actual: usize,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesBatch {
    #[serde(default)]
    pub timestamps: Vec<Timestamp>,
    #[serde(default)]
    pub values: BTreeMap<String, SeriesValues>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<ClientId>,
}

impl TimeSeriesBatch {
    pub fn new(timestamps: Vec<Timestamp>, values: BTreeMap<String, SeriesValues>) -> Self {
        Self {
            timestamps,
            values,
            client_id: None,
        }
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn last_index(&self) -> Option<usize> {
        self.len().checked_sub(1)
    }

    pub fn series(&self, measurement: &str) -> Option<&SeriesValues> {
        self.values.get(measurement)
    }

    pub fn measurements(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn sample_at(&self, measurement: &str, location: &LocationId, index: usize) -> Option<Sample> {
        self.series(measurement)?
            .get(location)?
            .get(index)
            .copied()
            .flatten()
    }

    /// Checks the ordering and length invariants a transport response must
    /// satisfy before it may reach the buffer.
    pub fn validate(&self) -> Result<(), BatchError> {
        for (position, pair) in self.timestamps.windows(2).enumerate() {
            if pair[1] <= pair[0] {
                return Err(BatchError::UnorderedTimestamps {
                    position: position + 1,
                    token: pair[1].clone(),
                });
            }
        }

        let expected = self.len();
        for (measurement, series) in &self.values {
            for (location, samples) in series {
                if samples.len() != expected {
                    return Err(BatchError::LengthMismatch {
                        measurement: measurement.clone(),
                        location: location.clone(),
                        expected,
                        actual: samples.len(),
                    });
                }
            }
        }

        Ok(())
    }
}
