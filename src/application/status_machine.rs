// Stream status machine - Explicit view state and its transition function
use crate::application::playback::{PlaybackSession, Tick};
use crate::domain::batch::{ClientId, LocationId, TimeSeriesBatch};
use crate::domain::buffer::{MergeOutcome, merge};
use crate::domain::cumulative::cumulative_totals;
use crate::domain::navigation::{Direction, local_max_index};
use crate::domain::range::HistoryRange;
use crate::domain::status::ViewStatus;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

pub type RequestId = u64;

#[derive(Debug, Clone, PartialEq)]
pub enum FetchKind {
    History(HistoryRange),
    Live { client_id: Option<ClientId> },
    Prediction,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub id: RequestId,
    pub kind: FetchKind,
}

/// Side effects requested by a transition. The caller executes them in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Fetch(FetchRequest),
    ArmPollTimer,
    CancelPollTimer,
    ArmAnimationTimer(Duration),
    CancelAnimationTimer,
}

#[derive(Debug, Clone)]
pub enum Event {
    RequestHistory(HistoryRange),
    RequestLive,
    RequestPrediction,
    SeekTo(usize),
    StartAnimation { direction: Direction, interval: Duration },
    StopAnimation,
    SelectCriticalPoint(Direction),
    SelectMeasurement(String),
    ToggleLocation(LocationId),
    ClearSelection,
    PollTick,
    AnimationTick,
    BatchArrived { request: RequestId, batch: TimeSeriesBatch },
    FetchFailed { request: RequestId, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingMode {
    History,
    LiveStart,
    LivePoll,
    Prediction,
}

#[derive(Debug, Clone, Copy)]
struct PendingFetch {
    id: RequestId,
    mode: PendingMode,
}

/// Measurement and cells the user is looking at.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewSelection {
    pub measurement: Option<String>,
    pub locations: BTreeSet<LocationId>,
}

#[derive(Debug, Clone)]
pub struct StreamState {
    status: ViewStatus,
    buffer: Arc<TimeSeriesBatch>,
    selected_index: Option<usize>,
    capacity: usize,
    client_id: Option<ClientId>,
    pending: Option<PendingFetch>,
    next_request: RequestId,
    poll_armed: bool,
    playback: Option<PlaybackSession>,
    selection: ViewSelection,
    last_error: Option<String>,
}

impl StreamState {
    pub fn new(capacity: usize) -> Self {
        Self {
            status: ViewStatus::NoData,
            buffer: Arc::new(TimeSeriesBatch::default()),
            selected_index: None,
            capacity,
            client_id: None,
            pending: None,
            next_request: 1,
            poll_armed: false,
            playback: None,
            selection: ViewSelection::default(),
            last_error: None,
        }
    }

    pub fn status(&self) -> ViewStatus {
        self.status
    }

    pub fn buffer(&self) -> &Arc<TimeSeriesBatch> {
        &self.buffer
    }

    pub fn selected_index(&self) -> Option<usize> {
        self.selected_index
    }

    pub fn selection(&self) -> &ViewSelection {
        &self.selection
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn playback(&self) -> Option<&PlaybackSession> {
        self.playback.as_ref()
    }

    pub fn pending_request(&self) -> Option<RequestId> {
        self.pending.map(|p| p.id)
    }

    pub fn is_poll_armed(&self) -> bool {
        self.poll_armed
    }

    /// Chosen measurement, or the first one the buffer carries.
    pub fn active_measurement(&self) -> Option<&str> {
        self.selection
            .measurement
            .as_deref()
            .or_else(|| self.buffer.measurements().next())
    }

    pub fn apply(&mut self, event: Event) -> Vec<Effect> {
        let mut effects = Vec::new();
        match event {
            Event::RequestHistory(range) => {
                self.cancel_playback(&mut effects);
                self.set_status(ViewStatus::LoadingHistory, &mut effects);
                self.issue(PendingMode::History, FetchKind::History(range), &mut effects);
            }
            Event::RequestPrediction => {
                self.cancel_playback(&mut effects);
                self.set_status(ViewStatus::LoadingPrediction, &mut effects);
                self.issue(PendingMode::Prediction, FetchKind::Prediction, &mut effects);
            }
            Event::RequestLive => self.request_live(&mut effects),
            Event::SeekTo(index) => self.seek(index, &mut effects),
            Event::StartAnimation { direction, interval } => {
                self.start_animation(direction, interval, &mut effects)
            }
            Event::StopAnimation => {
                if let Some(session) = self.cancel_playback(&mut effects) {
                    self.set_status(session.status_on_cancel(), &mut effects);
                }
            }
            Event::AnimationTick => self.animation_tick(&mut effects),
            Event::SelectCriticalPoint(direction) => self.select_critical_point(direction, &mut effects),
            Event::SelectMeasurement(name) => self.selection.measurement = Some(name),
            Event::ToggleLocation(id) => {
                if !self.selection.locations.remove(&id) {
                    self.selection.locations.insert(id);
                }
            }
            Event::ClearSelection => self.selection.locations.clear(),
            Event::PollTick => self.poll_tick(&mut effects),
            Event::BatchArrived { request, batch } => self.batch_arrived(request, batch, &mut effects),
            Event::FetchFailed { request, message } => self.fetch_failed(request, message),
        }
        self.enforce_selection_bounds();
        effects
    }

    fn set_status(&mut self, next: ViewStatus, effects: &mut Vec<Effect>) {
        if self.status == next {
            return;
        }
        tracing::debug!(from = ?self.status, to = ?next, "status transition");
        self.status = next;

        if next.permits_polling() {
            if !self.poll_armed && self.pending.is_none() {
                self.arm_poll(effects);
            }
        } else {
            if self.poll_armed {
                self.poll_armed = false;
                effects.push(Effect::CancelPollTimer);
            }
            if matches!(self.pending, Some(PendingFetch { mode: PendingMode::LivePoll, .. })) {
                self.pending = None;
            }
        }
    }

    fn arm_poll(&mut self, effects: &mut Vec<Effect>) {
        self.poll_armed = true;
        effects.push(Effect::ArmPollTimer);
    }

    fn issue(&mut self, mode: PendingMode, kind: FetchKind, effects: &mut Vec<Effect>) {
        let id = self.next_request;
        self.next_request += 1;
        self.pending = Some(PendingFetch { id, mode });
        self.last_error = None;
        effects.push(Effect::Fetch(FetchRequest { id, kind }));
    }

    fn cancel_playback(&mut self, effects: &mut Vec<Effect>) -> Option<PlaybackSession> {
        let session = self.playback.take()?;
        effects.push(Effect::CancelAnimationTimer);
        Some(session)
    }

    /// A live view whose last poll failed: no timer and nothing in flight.
    fn poll_stalled(&self) -> bool {
        self.status.permits_polling() && !self.poll_armed && self.pending.is_none()
    }

    fn can_request_live(&self) -> bool {
        match self.status {
            ViewStatus::NoData
            | ViewStatus::ViewingHistory
            | ViewStatus::ViewingPrediction
            | ViewStatus::ViewingLivePaused => true,
            ViewStatus::LoadingHistory | ViewStatus::LoadingLive | ViewStatus::LoadingPrediction => {
                self.pending.is_none()
            }
            ViewStatus::ViewingLive | ViewStatus::ViewingLiveNotTracking => self.poll_stalled(),
            ViewStatus::Animating => false,
        }
    }

    fn request_live(&mut self, effects: &mut Vec<Effect>) {
        // A healthy session that only stopped following the edge jumps back to it.
        if self.status == ViewStatus::ViewingLiveNotTracking && !self.poll_stalled() {
            self.selected_index = self.buffer.last_index();
            self.set_status(ViewStatus::ViewingLive, effects);
            return;
        }
        if !self.can_request_live() {
            tracing::debug!(status = ?self.status, "live request ignored");
            return;
        }
        // Paused or stalled data is stale; the new session starts from scratch.
        self.client_id = None;
        self.set_status(ViewStatus::LoadingLive, effects);
        self.issue(PendingMode::LiveStart, FetchKind::Live { client_id: None }, effects);
    }

    fn seek(&mut self, index: usize, effects: &mut Vec<Effect>) {
        let Some(last) = self.buffer.last_index().filter(|last| index <= *last) else {
            tracing::warn!(index, len = self.buffer.len(), "seek outside the buffer ignored");
            return;
        };

        if let Some(session) = self.cancel_playback(effects) {
            self.set_status(session.status_on_cancel(), effects);
        }

        self.selected_index = Some(index);
        match self.status {
            ViewStatus::ViewingLive if index != last => {
                self.set_status(ViewStatus::ViewingLiveNotTracking, effects)
            }
            ViewStatus::ViewingLiveNotTracking if index == last => {
                self.set_status(ViewStatus::ViewingLive, effects)
            }
            _ => {}
        }
    }

    fn start_animation(&mut self, direction: Direction, interval: Duration, effects: &mut Vec<Effect>) {
        let Some(session) = PlaybackSession::start(
            direction,
            interval,
            self.status,
            self.selected_index,
            self.buffer.len(),
        ) else {
            tracing::debug!(status = ?self.status, "animation start ignored");
            return;
        };

        self.selected_index = Some(session.cursor);
        let tick = session.tick_interval;
        self.playback = Some(session);
        self.set_status(ViewStatus::Animating, effects);
        effects.push(Effect::ArmAnimationTimer(tick));
    }

    fn animation_tick(&mut self, effects: &mut Vec<Effect>) {
        let tick = match self.playback.as_mut() {
            Some(session) => session.advance(),
            None => return,
        };

        match tick {
            Tick::Frame(cursor) => self.selected_index = Some(cursor),
            Tick::Finished => {
                if let Some(session) = self.cancel_playback(effects) {
                    self.selected_index = session.saved_index;
                    self.set_status(session.status_on_completion(), effects);
                }
            }
        }
    }

    fn select_critical_point(&mut self, direction: Direction, effects: &mut Vec<Effect>) {
        let Some(measurement) = self.active_measurement() else {
            return;
        };
        let series = cumulative_totals(&self.buffer, measurement, &self.selection.locations);
        match local_max_index(&series, self.selected_index, direction) {
            Some(index) => self.seek(index, effects),
            None => tracing::debug!(?direction, "no critical point in that direction"),
        }
    }

    fn poll_tick(&mut self, effects: &mut Vec<Effect>) {
        if !self.poll_armed || !self.status.permits_polling() {
            tracing::debug!(status = ?self.status, "stale poll tick ignored");
            return;
        }
        self.poll_armed = false;
        let client_id = self.client_id.clone();
        self.issue(PendingMode::LivePoll, FetchKind::Live { client_id }, effects);
    }

    fn batch_arrived(&mut self, request: RequestId, batch: TimeSeriesBatch, effects: &mut Vec<Effect>) {
        let Some(pending) = self.pending.take_if(|p| p.id == request) else {
            tracing::debug!(request, "discarding response to a superseded request");
            return;
        };

        match (pending.mode, self.status) {
            (PendingMode::History, ViewStatus::LoadingHistory) => {
                self.replace(batch, ViewStatus::ViewingHistory, effects)
            }
            (PendingMode::Prediction, ViewStatus::LoadingPrediction) => {
                self.replace(batch, ViewStatus::ViewingPrediction, effects)
            }
            (PendingMode::LiveStart, ViewStatus::LoadingLive) => self.start_live(batch, effects),
            (PendingMode::LivePoll, ViewStatus::ViewingLive | ViewStatus::ViewingLiveNotTracking) => {
                self.merge_poll(batch, effects)
            }
            (mode, status) => {
                tracing::debug!(?mode, ?status, "discarding response for a mode no longer shown")
            }
        }
    }

    fn replace(&mut self, batch: TimeSeriesBatch, status: ViewStatus, effects: &mut Vec<Effect>) {
        tracing::info!(timestamps = batch.len(), ?status, "buffer replaced");
        self.buffer = Arc::new(batch);
        self.selected_index = if self.buffer.is_empty() { None } else { Some(0) };
        self.set_status(status, effects);
    }

    fn start_live(&mut self, batch: TimeSeriesBatch, effects: &mut Vec<Effect>) {
        self.client_id = batch.client_id.clone();
        let buffer = match merge(&TimeSeriesBatch::default(), &batch, self.capacity, true) {
            MergeOutcome::Merged(buffer) => buffer,
            MergeOutcome::NoNewData | MergeOutcome::Overflow => TimeSeriesBatch {
                client_id: batch.client_id,
                ..TimeSeriesBatch::default()
            },
        };
        tracing::info!(timestamps = buffer.len(), client_id = ?self.client_id, "live session started");
        self.buffer = Arc::new(buffer);
        self.selected_index = self.buffer.last_index();
        self.set_status(ViewStatus::ViewingLive, effects);
    }

    fn merge_poll(&mut self, batch: TimeSeriesBatch, effects: &mut Vec<Effect>) {
        let tracking = self.status == ViewStatus::ViewingLive;
        if let Some(client_id) = &batch.client_id {
            self.client_id = Some(client_id.clone());
        }

        match merge(&self.buffer, &batch, self.capacity, tracking) {
            MergeOutcome::NoNewData => self.arm_poll(effects),
            MergeOutcome::Overflow => {
                tracing::info!(capacity = self.capacity, "buffer limit reached, pausing live updates");
                self.set_status(ViewStatus::ViewingLivePaused, effects);
            }
            MergeOutcome::Merged(next) => {
                tracing::debug!(timestamps = next.len(), tracking, "live batch merged");
                self.buffer = Arc::new(next);
                if tracking {
                    self.selected_index = self.buffer.last_index();
                }
                self.arm_poll(effects);
            }
        }
    }

    fn fetch_failed(&mut self, request: RequestId, message: String) {
        if self.pending.take_if(|p| p.id == request).is_none() {
            tracing::debug!(request, "ignoring failure of a superseded request");
            return;
        }
        tracing::warn!(request, status = ?self.status, error = %message, "fetch failed");
        self.last_error = Some(message);
    }

    fn enforce_selection_bounds(&mut self) {
        self.selected_index = match (self.selected_index, self.buffer.last_index()) {
            (_, None) => None,
            (Some(index), Some(last)) => Some(index.min(last)),
            (None, Some(_)) => Some(0),
        };
    }
}
