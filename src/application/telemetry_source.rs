// Source trait for the telemetry backend
use crate::domain::batch::{BatchError, ClientId, TimeSeriesBatch};
use crate::domain::location::Location;
use crate::domain::range::HistoryRange;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    /// The backend wants the user to log in again.
    #[error("request to {endpoint} was rejected as unauthorized")]
    Unauthorized { endpoint: String },

    #[error("request to {endpoint} failed with status {status}")]
    Status { endpoint: String, status: u16 },

    #[error("request to {endpoint} failed: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("malformed batch from {endpoint}: {source}")]
    Malformed {
        endpoint: String,
        #[source]
        source: BatchError,
    },

    #[error("prediction not available after {attempts} attempts")]
    PredictionUnavailable { attempts: u32 },
}

impl FetchError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, FetchError::Unauthorized { .. })
    }
}

#[async_trait]
pub trait TelemetrySource: Send + Sync {
    /// Static spatial grid, sorted by location id
    async fn fetch_locations(&self) -> Result<Vec<Location>, FetchError>;

    /// Wholesale history batch for a time range
    async fn fetch_history(&self, range: &HistoryRange) -> Result<TimeSeriesBatch, FetchError>;

    /// Live batch. Without a client id this opens a new session and the
    /// returned batch carries its id; with one it returns only what is new,
    /// possibly nothing.
    async fn fetch_live(&self, client_id: Option<&ClientId>) -> Result<TimeSeriesBatch, FetchError>;

    /// Latest prediction batch, waiting for the backend to produce one.
    async fn fetch_prediction(&self) -> Result<TimeSeriesBatch, FetchError>;
}
