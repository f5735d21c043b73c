// Cumulative series over a selection of grid cells
use super::batch::{LocationId, TimeSeriesBatch};
use super::location::{CELL_AREA_M2, Location};
use std::collections::BTreeSet;

/// Per-timestamp sum of one measurement over the selected locations.
///
/// An empty selection means every location present in the series. Gaps count
/// as zero here; this is a display aggregate, the buffer itself never fills.
pub fn cumulative_totals(
    batch: &TimeSeriesBatch,
    measurement: &str,
    selection: &BTreeSet<LocationId>,
) -> Vec<f64> {
    let mut totals = vec![0.0; batch.len()];
    let Some(series) = batch.series(measurement) else {
        return totals;
    };

    for (location, samples) in series {
        if !selection.is_empty() && !selection.contains(location) {
            continue;
        }
        for (total, sample) in totals.iter_mut().zip(samples) {
            if let Some(sample) = sample {
                *total += sample.central();
            }
        }
    }

    totals
}

/// Totals divided by the usable area of the selected cells (per m²).
pub fn cumulative_density(
    batch: &TimeSeriesBatch,
    measurement: &str,
    selection: &BTreeSet<LocationId>,
    grid: &[Location],
) -> Vec<f64> {
    let area: f64 = match batch.series(measurement) {
        Some(series) => series
            .keys()
            .filter(|id| selection.is_empty() || selection.contains(*id))
            .map(|id| {
                grid.iter()
                    .find(|l| &l.id == id)
                    .map_or(CELL_AREA_M2, Location::usable_area)
            })
            .sum(),
        None => 0.0,
    };

    let totals = cumulative_totals(batch, measurement, selection);
    if area <= 0.0 {
        return vec![0.0; totals.len()];
    }
    totals.into_iter().map(|total| total / area).collect()
}
