// Dashboard view snapshot domain model
use super::batch::{LocationId, TimeSeriesBatch, Timestamp};
use super::status::ViewStatus;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Everything the render layer reads, captured atomically after each update.
#[derive(Debug, Clone, Serialize)]
pub struct ViewSnapshot {
    pub status: ViewStatus,
    pub caption: &'static str,
    pub loading: bool,
    pub selected_index: Option<usize>,
    pub selected_timestamp: Option<Timestamp>,
    pub measurement: Option<String>,
    pub selected_locations: Vec<LocationId>,
    /// Central value per location at the selected timestamp, for the map
    pub selected_values: BTreeMap<LocationId, Option<f64>>,
    pub buffer: Arc<TimeSeriesBatch>,
    pub cumulative: Vec<f64>,
    pub cumulative_density: Vec<f64>,
    pub last_error: Option<String>,
    pub auth_required: bool,
}

impl Default for ViewSnapshot {
    fn default() -> Self {
        let status = ViewStatus::NoData;
        Self {
            status,
            caption: status.caption(),
            loading: status.is_loading(),
            selected_index: None,
            selected_timestamp: None,
            measurement: None,
            selected_locations: Vec::new(),
            selected_values: BTreeMap::new(),
            buffer: Arc::new(TimeSeriesBatch::default()),
            cumulative: Vec::new(),
            cumulative_density: Vec::new(),
            last_error: None,
            auth_required: false,
        }
    }
}
