// View status domain model
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewStatus {
    NoData,
    LoadingHistory,
    ViewingHistory,
    LoadingLive,
    ViewingLive,
    ViewingLiveNotTracking,
    ViewingLivePaused,
    LoadingPrediction,
    ViewingPrediction,
    Animating,
}

impl ViewStatus {
    pub fn caption(&self) -> &'static str {
        match self {
            ViewStatus::NoData => "No data loaded",
            ViewStatus::LoadingHistory => "Loading historical data...",
            ViewStatus::ViewingHistory => "Viewing historical data",
            ViewStatus::LoadingLive => "Loading live data...",
            ViewStatus::ViewingLive => "Viewing live data",
            ViewStatus::ViewingLiveNotTracking => "Not automatically tracking latest moment",
            ViewStatus::ViewingLivePaused => "Live update paused (buffer limit reached)",
            ViewStatus::LoadingPrediction => "Loading prediction data...",
            ViewStatus::ViewingPrediction => "Viewing prediction data",
            ViewStatus::Animating => "Playing animation",
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(
            self,
            ViewStatus::LoadingHistory | ViewStatus::LoadingLive | ViewStatus::LoadingPrediction
        )
    }

    /// Whether the live poll timer may run in this status.
    pub fn permits_polling(&self) -> bool {
        matches!(self, ViewStatus::ViewingLive | ViewStatus::ViewingLiveNotTracking)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_live_viewing_polls() {
        let polling: Vec<ViewStatus> = [
            ViewStatus::NoData,
            ViewStatus::LoadingLive,
            ViewStatus::ViewingLive,
            ViewStatus::ViewingLiveNotTracking,
            ViewStatus::ViewingLivePaused,
            ViewStatus::Animating,
        ]
        .into_iter()
        .filter(ViewStatus::permits_polling)
        .collect();

        assert_eq!(polling, vec![ViewStatus::ViewingLive, ViewStatus::ViewingLiveNotTracking]);
    }

    #[test]
    fn test_serializes_as_snake_case() {
        let json = serde_json::to_string(&ViewStatus::ViewingLiveNotTracking).unwrap();
        assert_eq!(json, "\"viewing_live_not_tracking\"");
        assert!(ViewStatus::LoadingPrediction.is_loading());
        assert!(!ViewStatus::Animating.is_loading());
    }
}
