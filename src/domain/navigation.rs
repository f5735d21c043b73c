// Critical point navigation over cumulative series
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Forward,
    Backward,
}

/// Strict local maximum; the series edges only need to beat their one neighbour.
fn is_local_max(series: &[f64], i: usize) -> bool {
    let rises = i == 0 || series[i] > series[i - 1];
    let falls = i + 1 == series.len() || series[i] > series[i + 1];
    rises && falls
}

/// First strict local maximum after `after`, or the first one at all when
/// `after` is `None`.
pub fn next_local_max_index(series: &[f64], after: Option<usize>) -> Option<usize> {
    (0..series.len()).find(|&i| after.is_none_or(|a| i > a) && is_local_max(series, i))
}

/// Rightmost strict local maximum before `before`, or the last one at all
/// when `before` is `None`.
pub fn prev_local_max_index(series: &[f64], before: Option<usize>) -> Option<usize> {
    (0..series.len())
        .rev()
        .find(|&i| before.is_none_or(|b| i < b) && is_local_max(series, i))
}

pub fn local_max_index(series: &[f64], from: Option<usize>, direction: Direction) -> Option<usize> {
    match direction {
        Direction::Forward => next_local_max_index(series, from),
        Direction::Backward => prev_local_max_index(series, from),
    }
}
