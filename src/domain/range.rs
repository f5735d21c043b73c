// History request range domain model
use super::batch::LocationId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntervalUnit {
    Minute,
    Hour,
    Day,
    Week,
    Month,
}

impl IntervalUnit {
    fn suffix(&self) -> &'static str {
        match self {
            IntervalUnit::Minute => "m",
            IntervalUnit::Hour => "h",
            IntervalUnit::Day => "d",
            IntervalUnit::Week => "w",
            IntervalUnit::Month => "mo",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid aggregation interval {0:?}, expected <count><m|h|d|w|mo>")]
pub struct IntervalParseError(String);

/// Aggregation window used by the backend to average samples, e.g. `1h`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Interval {
    pub count: u32,
    pub unit: IntervalUnit,
}

impl Interval {
    pub fn new(count: u32, unit: IntervalUnit) -> Self {
        Self { count, unit }
    }
}

impl Default for Interval {
    fn default() -> Self {
        Self::new(1, IntervalUnit::Hour)
    }
}

impl FromStr for Interval {
    type Err = IntervalParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
        let (count, suffix) = s.split_at(split);
        let unit = match suffix {
            "m" => IntervalUnit::Minute,
            "h" => IntervalUnit::Hour,
            "d" => IntervalUnit::Day,
            "w" => IntervalUnit::Week,
            "mo" => IntervalUnit::Month,
            _ => return Err(IntervalParseError(s.to_string())),
        };
        let count = count
            .parse::<u32>()
            .ok()
            .filter(|c| *c > 0)
            .ok_or_else(|| IntervalParseError(s.to_string()))?;
        Ok(Self { count, unit })
    }
}

impl TryFrom<String> for Interval {
    type Error = IntervalParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Interval> for String {
    fn from(interval: Interval) -> Self {
        interval.to_string()
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.count, self.unit.suffix())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub every: Interval,
    /// Restrict the query to these cells; empty means all.
    #[serde(default)]
    pub locations: Vec<LocationId>,
}

impl HistoryRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>, every: Interval) -> Self {
        Self {
            start,
            end,
            every,
            locations: Vec::new(),
        }
    }

    /// Backend wire format for range bounds.
    pub fn format_instant(instant: &DateTime<Utc>) -> String {
        instant.format("%Y-%m-%dT%H:%M:%SZ").to_string()
    }
}
