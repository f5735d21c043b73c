// Playback controller - Timestamp animation over the buffer
use crate::domain::navigation::Direction;
use crate::domain::status::ViewStatus;
use std::time::Duration;

/// Result of advancing the animation cursor by one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Frame(usize),
    Finished,
}

/// State of one running animation. Dropped when the animation ends.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackSession {
    pub direction: Direction,
    pub tick_interval: Duration,
    pub saved_index: Option<usize>,
    pub saved_status: ViewStatus,
    pub cursor: usize,
    len: usize,
}

impl PlaybackSession {
    /// Begin an animation over `len` frames.
    ///
    /// Returns `None` when there is nothing to animate or the view is not in
    /// a settled viewing status.
    pub fn start(
        direction: Direction,
        tick_interval: Duration,
        status: ViewStatus,
        index: Option<usize>,
        len: usize,
    ) -> Option<Self> {
        if len == 0
            || status == ViewStatus::NoData
            || status == ViewStatus::Animating
            || status.is_loading()
        {
            return None;
        }

        let cursor = match direction {
            Direction::Forward => 0,
            Direction::Backward => len - 1,
        };

        Some(Self {
            direction,
            tick_interval,
            saved_index: index,
            saved_status: status,
            cursor,
            len,
        })
    }

    pub fn advance(&mut self) -> Tick {
        let next = match self.direction {
            Direction::Forward => self.cursor.checked_add(1).filter(|c| *c < self.len),
            Direction::Backward => self.cursor.checked_sub(1),
        };

        match next {
            Some(cursor) => {
                self.cursor = cursor;
                Tick::Frame(cursor)
            }
            None => Tick::Finished,
        }
    }

    /// Status to restore when the animation ran off the end of the buffer.
    /// The selection returns to the saved index, so a live view keeps
    /// tracking only if that index is still the last one.
    pub fn status_on_completion(&self) -> ViewStatus {
        let on_edge = self.saved_index == self.len.checked_sub(1);
        match self.saved_status {
            ViewStatus::ViewingLive if !on_edge => ViewStatus::ViewingLiveNotTracking,
            status => status,
        }
    }

    /// Status to restore when the user cancels mid-animation. The selection
    /// stays on the cursor.
    pub fn status_on_cancel(&self) -> ViewStatus {
        if self.saved_status == ViewStatus::ViewingLive && self.cursor + 1 < self.len {
            ViewStatus::ViewingLiveNotTracking
        } else {
            self.saved_status
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TICK: Duration = Duration::from_millis(100);

    #[test]
    fn test_forward_runs_to_completion() {
        let mut session =
            PlaybackSession::start(Direction::Forward, TICK, ViewStatus::ViewingHistory, Some(2), 3).unwrap();
        assert_eq!(session.cursor, 0);
        assert_eq!(session.advance(), Tick::Frame(1));
        assert_eq!(session.advance(), Tick::Frame(2));
        assert_eq!(session.advance(), Tick::Finished);
        assert_eq!(session.status_on_completion(), ViewStatus::ViewingHistory);
        assert_eq!(session.saved_index, Some(2));
    }

    #[test]
    fn test_backward_starts_at_end() {
        let mut session =
            PlaybackSession::start(Direction::Backward, TICK, ViewStatus::ViewingLive, Some(1), 2).unwrap();
        assert_eq!(session.cursor, 1);
        assert_eq!(session.advance(), Tick::Frame(0));
        assert_eq!(session.advance(), Tick::Finished);
        assert_eq!(session.status_on_completion(), ViewStatus::ViewingLive);
    }

    #[test]
    fn test_guard_refuses_unsettled_views() {
        for status in [
            ViewStatus::NoData,
            ViewStatus::LoadingHistory,
            ViewStatus::LoadingLive,
            ViewStatus::LoadingPrediction,
            ViewStatus::Animating,
        ] {
            assert!(PlaybackSession::start(Direction::Forward, TICK, status, Some(0), 5).is_none());
        }
        assert!(PlaybackSession::start(Direction::Forward, TICK, ViewStatus::ViewingHistory, None, 0).is_none());
    }

    #[test]
    fn test_cancel_behind_live_edge_stops_tracking() {
        let mut session =
            PlaybackSession::start(Direction::Forward, TICK, ViewStatus::ViewingLive, Some(3), 4).unwrap();
        session.advance();
        assert_eq!(session.status_on_cancel(), ViewStatus::ViewingLiveNotTracking);
        session.advance();
        session.advance();
        assert_eq!(session.cursor, 3);
        assert_eq!(session.status_on_cancel(), ViewStatus::ViewingLive);
    }

    #[test]
    fn test_completion_on_live_edge_keeps_tracking() {
        let mut session =
            PlaybackSession::start(Direction::Forward, TICK, ViewStatus::ViewingLive, Some(2), 3).unwrap();
        session.advance();
        session.advance();
        assert_eq!(session.advance(), Tick::Finished);
        assert_eq!(session.status_on_completion(), ViewStatus::ViewingLive);
    }

    #[test]
    fn test_completion_behind_live_edge_stops_tracking() {
        let mut session =
            PlaybackSession::start(Direction::Forward, TICK, ViewStatus::ViewingLive, Some(1), 3).unwrap();
        while session.advance() != Tick::Finished {}
        assert_eq!(session.status_on_completion(), ViewStatus::ViewingLiveNotTracking);
    }
}
