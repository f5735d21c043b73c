// Bounded time-series buffer: dedup, capacity trimming and merging
use super::batch::{SeriesValues, TimeSeriesBatch, Timestamp};
use std::collections::{BTreeMap, BTreeSet, HashSet};

pub const DEFAULT_CAPACITY: usize = 20;

/// Leading entries to drop from the old buffer and the incoming batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrimIndexes {
    pub first_old: usize,
    pub first_new: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    /// Every incoming timestamp was already buffered.
    NoNewData,
    /// The merge would push data out from under a user who is not tracking
    /// the live edge. Nothing was merged.
    Overflow,
    Merged(TimeSeriesBatch),
}

/// Position of the first token in `new` that is not present in `old`.
///
/// Returns `None` when the incoming batch carries nothing new, which includes
/// an empty batch. Polls commonly re-send a trailing window, so any number of
/// leading overlaps is tolerated.
pub fn dedup_offset(old: &[Timestamp], new: &[Timestamp]) -> Option<usize> {
    let seen: HashSet<&Timestamp> = old.iter().collect();
    new.iter().position(|t| !seen.contains(t))
}

/// Decide how much to drop so that the kept suffixes fit in `capacity`,
/// preferring the most recent data from both sides.
pub fn trim_for_capacity(old_len: usize, new_len: usize, capacity: usize) -> TrimIndexes {
    if old_len + new_len <= capacity {
        TrimIndexes { first_old: 0, first_new: 0 }
    } else if new_len >= capacity {
        TrimIndexes {
            first_old: old_len,
            first_new: new_len - capacity,
        }
    } else if old_len >= capacity {
        TrimIndexes {
            first_old: old_len - (capacity - new_len),
            first_new: 0,
        }
    } else {
        TrimIndexes {
            first_old: old_len + new_len - capacity,
            first_new: 0,
        }
    }
}

pub fn merge(
    old: &TimeSeriesBatch,
    new: &TimeSeriesBatch,
    capacity: usize,
    tracking_latest: bool,
) -> MergeOutcome {
    let Some(first_fresh) = dedup_offset(&old.timestamps, &new.timestamps) else {
        return MergeOutcome::NoNewData;
    };
    // Tokens at or before the buffered tail cannot be appended without
    // breaking the order, so a late gap filler is dropped with the overlap.
    let offset = first_fresh
        + new.timestamps[first_fresh..]
            .iter()
            .take_while(|t| old.timestamps.last().is_some_and(|last| *t <= last))
            .count();
    if offset == new.len() {
        return MergeOutcome::NoNewData;
    }

    let effective_new_len = new.len() - offset;
    if old.len() + effective_new_len > capacity && !tracking_latest {
        return MergeOutcome::Overflow;
    }

    let trim = trim_for_capacity(old.len(), effective_new_len, capacity);
    let new_start = offset + trim.first_new;

    let timestamps: Vec<Timestamp> = old.timestamps[trim.first_old..]
        .iter()
        .chain(&new.timestamps[new_start..])
        .cloned()
        .collect();

    let kept_old = old.len() - trim.first_old;
    let kept_new = new.len() - new_start;

    let measurements: BTreeSet<&String> = old.values.keys().chain(new.values.keys()).collect();
    let mut values = BTreeMap::new();
    for measurement in measurements {
        let old_series = old.values.get(measurement);
        let new_series = new.values.get(measurement);
        let locations: BTreeSet<_> = old_series
            .into_iter()
            .flat_map(|s| s.keys())
            .chain(new_series.into_iter().flat_map(|s| s.keys()))
            .collect();

        let mut merged = SeriesValues::new();
        for location in locations {
            let mut slots = Vec::with_capacity(timestamps.len());
            match old_series.and_then(|s| s.get(location)) {
                Some(samples) => slots.extend_from_slice(&samples[trim.first_old..]),
                None => slots.resize(kept_old, None),
            }
            match new_series.and_then(|s| s.get(location)) {
                Some(samples) => slots.extend_from_slice(&samples[new_start..]),
                None => slots.resize(kept_old + kept_new, None),
            }
            if slots.iter().any(Option::is_some) {
                merged.insert(location.clone(), slots);
            }
        }
        if !merged.is_empty() {
            values.insert(measurement.clone(), merged);
        }
    }

    MergeOutcome::Merged(TimeSeriesBatch {
        timestamps,
        values,
        client_id: new.client_id.clone().or_else(|| old.client_id.clone()),
    })
}
