// Spatial grid cell domain model
use super::batch::LocationId;
use serde::{Deserialize, Serialize};

/// Grid cells are 200 m squares.
pub const CELL_AREA_M2: f64 = 200.0 * 200.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub id: LocationId,
    /// Area inside the cell that cannot hold people (water, buildings), m²
    #[serde(default)]
    pub unusable_area: f64,
    #[serde(default)]
    pub geometry: serde_json::Value,
}

impl Location {
    pub fn new(id: LocationId, unusable_area: f64) -> Self {
        Self {
            id,
            unusable_area,
            geometry: serde_json::Value::Null,
        }
    }

    pub fn usable_area(&self) -> f64 {
        (CELL_AREA_M2 - self.unusable_area).max(0.0)
    }
}

/// Orders the grid by its stable id so index-based consumers line up.
pub fn sort_locations(locations: &mut [Location]) {
    locations.sort_by(|a, b| a.id.cmp(&b.id));
}
