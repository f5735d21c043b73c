// Dashboard service - Session actor driving the stream status machine
use crate::application::status_machine::{Effect, Event, FetchKind, FetchRequest, RequestId, StreamState};
use crate::application::telemetry_source::{FetchError, TelemetrySource};
use crate::domain::batch::{LocationId, TimeSeriesBatch};
use crate::domain::buffer::DEFAULT_CAPACITY;
use crate::domain::cumulative::{cumulative_density, cumulative_totals};
use crate::domain::dashboard::ViewSnapshot;
use crate::domain::location::Location;
use crate::domain::navigation::Direction;
use crate::domain::range::HistoryRange;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

const COMMAND_QUEUE: usize = 32;
const INTERNAL_QUEUE: usize = 64;

#[derive(Debug, Clone)]
pub struct DashboardSettings {
    pub capacity: usize,
    pub poll_interval: Duration,
    pub animation_tick: Duration,
}

impl Default for DashboardSettings {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            poll_interval: Duration::from_millis(2500),
            animation_tick: Duration::from_millis(1000),
        }
    }
}

#[derive(Debug, Error)]
pub enum DashboardError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("request was superseded by a newer load")]
    Superseded,

    #[error("dashboard session is closed")]
    SessionClosed,
}

type Reply = oneshot::Sender<Result<(), DashboardError>>;

struct Command {
    event: Event,
    reply: Reply,
}

enum Internal {
    PollTick,
    AnimationTick,
    FetchCompleted {
        id: RequestId,
        result: Result<TimeSeriesBatch, FetchError>,
    },
}

/// Cheap handle to a running dashboard session.
#[derive(Clone)]
pub struct DashboardHandle {
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<ViewSnapshot>,
    animation_tick: Duration,
}

impl DashboardHandle {
    async fn dispatch(&self, event: Event) -> Result<(), DashboardError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command { event, reply })
            .await
            .map_err(|_| DashboardError::SessionClosed)?;
        response.await.map_err(|_| DashboardError::SessionClosed)?
    }

    /// Resolves once the history batch is shown or the load failed.
    pub async fn request_history(&self, range: HistoryRange) -> Result<(), DashboardError> {
        self.dispatch(Event::RequestHistory(range)).await
    }

    pub async fn request_live(&self) -> Result<(), DashboardError> {
        self.dispatch(Event::RequestLive).await
    }

    pub async fn request_prediction(&self) -> Result<(), DashboardError> {
        self.dispatch(Event::RequestPrediction).await
    }

    pub async fn seek_to(&self, index: usize) -> Result<(), DashboardError> {
        self.dispatch(Event::SeekTo(index)).await
    }

    pub async fn start_animation(
        &self,
        direction: Direction,
        interval: Option<Duration>,
    ) -> Result<(), DashboardError> {
        let interval = interval.unwrap_or(self.animation_tick);
        self.dispatch(Event::StartAnimation { direction, interval }).await
    }

    pub async fn stop_animation(&self) -> Result<(), DashboardError> {
        self.dispatch(Event::StopAnimation).await
    }

    pub async fn select_critical_point(&self, direction: Direction) -> Result<(), DashboardError> {
        self.dispatch(Event::SelectCriticalPoint(direction)).await
    }

    pub async fn select_measurement(&self, name: String) -> Result<(), DashboardError> {
        self.dispatch(Event::SelectMeasurement(name)).await
    }

    pub async fn toggle_location(&self, id: LocationId) -> Result<(), DashboardError> {
        self.dispatch(Event::ToggleLocation(id)).await
    }

    pub async fn clear_selection(&self) -> Result<(), DashboardError> {
        self.dispatch(Event::ClearSelection).await
    }

    pub fn snapshot(&self) -> ViewSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ViewSnapshot> {
        self.snapshots.clone()
    }
}

/// Owns the stream state, its timers and in-flight fetches. Runs on a single
/// task so every transition sees a consistent buffer and selection.
pub struct DashboardService {
    source: Arc<dyn TelemetrySource>,
    grid: Arc<[Location]>,
    settings: DashboardSettings,
    state: StreamState,
    waiters: HashMap<RequestId, Reply>,
    poll_timer: Option<JoinHandle<()>>,
    animation_timer: Option<JoinHandle<()>>,
    auth_required: bool,
    internal_tx: mpsc::Sender<Internal>,
    snapshots: watch::Sender<ViewSnapshot>,
}

impl DashboardService {
    pub fn spawn(
        source: Arc<dyn TelemetrySource>,
        grid: Arc<[Location]>,
        settings: DashboardSettings,
    ) -> DashboardHandle {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE);
        let (internal_tx, internal_rx) = mpsc::channel(INTERNAL_QUEUE);
        let (snapshot_tx, snapshot_rx) = watch::channel(ViewSnapshot::default());

        let handle = DashboardHandle {
            commands: command_tx,
            snapshots: snapshot_rx,
            animation_tick: settings.animation_tick,
        };

        let service = Self {
            source,
            grid,
            state: StreamState::new(settings.capacity),
            settings,
            waiters: HashMap::new(),
            poll_timer: None,
            animation_timer: None,
            auth_required: false,
            internal_tx,
            snapshots: snapshot_tx,
        };
        tokio::spawn(service.run(command_rx, internal_rx));

        handle
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>, mut internal: mpsc::Receiver<Internal>) {
        tracing::info!(capacity = self.settings.capacity, "dashboard session started");
        self.publish();

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(message) = internal.recv() => self.handle_internal(message),
            }
            self.publish();
        }

        self.abort_timers();
        tracing::info!("dashboard session closed");
    }

    fn handle_command(&mut self, command: Command) {
        let Command { event, reply } = command;
        let awaits_load = matches!(
            event,
            Event::RequestHistory(_) | Event::RequestLive | Event::RequestPrediction
        );

        let effects = self.state.apply(event);
        let issued = effects.iter().find_map(|effect| match effect {
            Effect::Fetch(request) => Some(request.id),
            _ => None,
        });
        self.execute(effects);

        match issued {
            Some(id) if awaits_load => {
                for (_, waiter) in self.waiters.drain() {
                    let _ = waiter.send(Err(DashboardError::Superseded));
                }
                self.waiters.insert(id, reply);
            }
            _ => {
                let _ = reply.send(Ok(()));
            }
        }
    }

    fn handle_internal(&mut self, message: Internal) {
        match message {
            Internal::PollTick => {
                self.poll_timer = None;
                let effects = self.state.apply(Event::PollTick);
                self.execute(effects);
            }
            Internal::AnimationTick => {
                let effects = self.state.apply(Event::AnimationTick);
                self.execute(effects);
            }
            Internal::FetchCompleted { id, result } => self.fetch_completed(id, result),
        }
    }

    fn fetch_completed(&mut self, id: RequestId, result: Result<TimeSeriesBatch, FetchError>) {
        let current = self.state.pending_request() == Some(id);
        let (event, outcome) = match result {
            Ok(batch) => {
                if current {
                    self.auth_required = false;
                }
                (Event::BatchArrived { request: id, batch }, Ok(()))
            }
            Err(err) => {
                if current && err.is_unauthorized() {
                    tracing::warn!(request = id, "backend requires login");
                    self.auth_required = true;
                }
                let message = err.to_string();
                (Event::FetchFailed { request: id, message }, Err(DashboardError::Fetch(err)))
            }
        };

        let effects = self.state.apply(event);
        self.execute(effects);

        if let Some(waiter) = self.waiters.remove(&id) {
            let response = if current { outcome } else { Err(DashboardError::Superseded) };
            let _ = waiter.send(response);
        }
    }

    fn execute(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Fetch(request) => self.spawn_fetch(request),
                Effect::ArmPollTimer => {
                    let tx = self.internal_tx.clone();
                    let delay = self.settings.poll_interval;
                    replace_timer(
                        &mut self.poll_timer,
                        tokio::spawn(async move {
                            tokio::time::sleep(delay).await;
                            let _ = tx.send(Internal::PollTick).await;
                        }),
                    );
                }
                Effect::CancelPollTimer => cancel_timer(&mut self.poll_timer),
                Effect::ArmAnimationTimer(period) => {
                    let tx = self.internal_tx.clone();
                    replace_timer(
                        &mut self.animation_timer,
                        tokio::spawn(async move {
                            let mut interval = tokio::time::interval(period);
                            // The first tick completes immediately; the start frame is already shown.
                            interval.tick().await;
                            loop {
                                interval.tick().await;
                                if tx.send(Internal::AnimationTick).await.is_err() {
                                    break;
                                }
                            }
                        }),
                    );
                }
                Effect::CancelAnimationTimer => cancel_timer(&mut self.animation_timer),
            }
        }
    }

    fn spawn_fetch(&self, request: FetchRequest) {
        let source = self.source.clone();
        let tx = self.internal_tx.clone();
        let FetchRequest { id, kind } = request;
        tracing::debug!(request = id, ?kind, "fetch issued");

        tokio::spawn(async move {
            let result = match &kind {
                FetchKind::History(range) => source.fetch_history(range).await,
                FetchKind::Live { client_id } => source.fetch_live(client_id.as_ref()).await,
                FetchKind::Prediction => source.fetch_prediction().await,
            };
            let _ = tx.send(Internal::FetchCompleted { id, result }).await;
        });
    }

    fn abort_timers(&mut self) {
        cancel_timer(&mut self.poll_timer);
        cancel_timer(&mut self.animation_timer);
    }

    fn publish(&self) {
        let status = self.state.status();
        let buffer = self.state.buffer().clone();
        let selection = self.state.selection();
        let measurement = self.state.active_measurement().map(str::to_string);

        let (cumulative, density) = match measurement.as_deref() {
            Some(name) => (
                cumulative_totals(&buffer, name, &selection.locations),
                cumulative_density(&buffer, name, &selection.locations, &self.grid),
            ),
            None => (Vec::new(), Vec::new()),
        };

        let selected_index = self.state.selected_index();
        let selected_timestamp = selected_index.and_then(|i| buffer.timestamps.get(i).cloned());
        let selected_values = match (measurement.as_deref(), selected_index) {
            (Some(name), Some(index)) => buffer
                .series(name)
                .map(|series| {
                    series
                        .keys()
                        .map(|id| (id.clone(), buffer.sample_at(name, id, index).map(|s| s.central())))
                        .collect()
                })
                .unwrap_or_default(),
            _ => BTreeMap::new(),
        };

        self.snapshots.send_replace(ViewSnapshot {
            status,
            caption: status.caption(),
            loading: status.is_loading(),
            selected_index,
            selected_timestamp,
            measurement,
            selected_locations: selection.locations.iter().cloned().collect(),
            selected_values,
            buffer,
            cumulative,
            cumulative_density: density,
            last_error: self.state.last_error().map(str::to_string),
            auth_required: self.auth_required,
        });
    }
}

fn replace_timer(slot: &mut Option<JoinHandle<()>>, handle: JoinHandle<()>) {
    if let Some(previous) = slot.replace(handle) {
        previous.abort();
    }
}

fn cancel_timer(slot: &mut Option<JoinHandle<()>>) {
    if let Some(handle) = slot.take() {
        handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::batch::{ClientId, Sample, SeriesValues, Timestamp};
    use crate::domain::range::Interval;
    use crate::domain::status::ViewStatus;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::collections::{BTreeMap, VecDeque};
    use std::sync::Mutex;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(2);

    fn batch(range: std::ops::Range<u32>) -> TimeSeriesBatch {
        let timestamps = range.clone().map(|t| Timestamp::new(format!("t{t:04}"))).collect();
        let mut series = SeriesValues::new();
        series.insert(
            LocationId::new("1"),
            range.map(|t| Some(Sample::Scalar(t as f64))).collect(),
        );
        let mut values = BTreeMap::new();
        values.insert("C1".to_string(), series);
        TimeSeriesBatch::new(timestamps, values)
    }

    fn range() -> HistoryRange {
        HistoryRange::new(
            Utc.with_ymd_and_hms(2022, 8, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2022, 8, 1, 6, 0, 0).unwrap(),
            Interval::default(),
        )
    }

    #[derive(Default)]
    struct FakeSource {
        history_delay: Duration,
        unauthorized: bool,
        live_updates: Mutex<VecDeque<TimeSeriesBatch>>,
    }

    #[async_trait]
    impl TelemetrySource for FakeSource {
        async fn fetch_locations(&self) -> Result<Vec<Location>, FetchError> {
            Ok(vec![Location::new(LocationId::new("1"), 0.0)])
        }

        async fn fetch_history(&self, _range: &HistoryRange) -> Result<TimeSeriesBatch, FetchError> {
            tokio::time::sleep(self.history_delay).await;
            if self.unauthorized {
                return Err(FetchError::Unauthorized { endpoint: "/history".into() });
            }
            Ok(batch(0..3))
        }

        async fn fetch_live(&self, client_id: Option<&ClientId>) -> Result<TimeSeriesBatch, FetchError> {
            match client_id {
                None => {
                    let mut first = batch(0..5);
                    first.client_id = Some(ClientId::new("session"));
                    Ok(first)
                }
                Some(_) => Ok(self
                    .live_updates
                    .lock()
                    .unwrap()
                    .pop_front()
                    .unwrap_or_default()),
            }
        }

        async fn fetch_prediction(&self) -> Result<TimeSeriesBatch, FetchError> {
            Ok(batch(100..104))
        }
    }

    fn settings() -> DashboardSettings {
        DashboardSettings {
            capacity: 20,
            poll_interval: Duration::from_millis(10),
            animation_tick: Duration::from_millis(5),
        }
    }

    fn spawn(source: FakeSource) -> DashboardHandle {
        let grid: Arc<[Location]> = vec![Location::new(LocationId::new("1"), 10_000.0)].into();
        DashboardService::spawn(Arc::new(source), grid, settings())
    }

    #[tokio::test]
    async fn test_history_snapshot_is_consistent() {
        let handle = spawn(FakeSource::default());
        handle.request_history(range()).await.unwrap();

        let snapshot = handle.snapshot();
        assert_eq!(snapshot.status, ViewStatus::ViewingHistory);
        assert_eq!(snapshot.caption, "Viewing historical data");
        assert_eq!(snapshot.selected_index, Some(0));
        assert_eq!(snapshot.selected_timestamp, Some(Timestamp::new("t0000")));
        assert_eq!(snapshot.measurement.as_deref(), Some("C1"));
        assert_eq!(snapshot.selected_values.get(&LocationId::new("1")), Some(&Some(0.0)));
        assert_eq!(snapshot.cumulative, vec![0.0, 1.0, 2.0]);
        assert_eq!(snapshot.cumulative_density, vec![0.0, 1.0 / 30_000.0, 2.0 / 30_000.0]);
    }

    #[tokio::test]
    async fn test_live_polling_follows_latest() {
        let source = FakeSource::default();
        source.live_updates.lock().unwrap().extend([TimeSeriesBatch::default(), batch(5..7)]);
        let handle = spawn(source);
        let mut updates = handle.subscribe();

        handle.request_live().await.unwrap();
        assert_eq!(handle.snapshot().status, ViewStatus::ViewingLive);

        timeout(WAIT, updates.wait_for(|s| s.buffer.len() == 7))
            .await
            .expect("live update arrived")
            .expect("session open");
        let snapshot = handle.snapshot();
        assert_eq!(snapshot.selected_index, Some(6));
        assert_eq!(snapshot.status, ViewStatus::ViewingLive);
    }

    #[tokio::test]
    async fn test_unauthorized_history_flags_login() {
        let handle = spawn(FakeSource { unauthorized: true, ..FakeSource::default() });
        let err = handle.request_history(range()).await.unwrap_err();
        assert!(matches!(err, DashboardError::Fetch(FetchError::Unauthorized { .. })));

        let snapshot = handle.snapshot();
        assert!(snapshot.auth_required);
        assert_eq!(snapshot.status, ViewStatus::LoadingHistory);
        assert!(snapshot.last_error.is_some());
    }

    #[tokio::test]
    async fn test_newer_load_supersedes_pending_history() {
        let handle = spawn(FakeSource {
            history_delay: Duration::from_millis(100),
            ..FakeSource::default()
        });

        let slow = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.request_history(range()).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.request_prediction().await.unwrap();

        let result = slow.await.unwrap();
        assert!(matches!(result, Err(DashboardError::Superseded)));

        tokio::time::sleep(Duration::from_millis(150)).await;
        let snapshot = handle.snapshot();
        assert_eq!(snapshot.status, ViewStatus::ViewingPrediction);
        assert_eq!(snapshot.buffer.timestamps[0].as_str(), "t0100");
    }

    #[tokio::test]
    async fn test_animation_completes_and_restores() {
        let handle = spawn(FakeSource::default());
        let mut updates = handle.subscribe();
        handle.request_history(range()).await.unwrap();
        handle.seek_to(2).await.unwrap();

        handle.start_animation(Direction::Forward, None).await.unwrap();
        assert_eq!(handle.snapshot().status, ViewStatus::Animating);
        assert_eq!(handle.snapshot().selected_index, Some(0));

        timeout(WAIT, updates.wait_for(|s| s.status == ViewStatus::ViewingHistory))
            .await
            .expect("animation finished")
            .expect("session open");
        assert_eq!(handle.snapshot().selected_index, Some(2));
    }

    #[tokio::test]
    async fn test_critical_point_and_selection_commands() {
        let handle = spawn(FakeSource::default());
        handle.request_prediction().await.unwrap();

        handle.select_critical_point(Direction::Forward).await.unwrap();
        assert_eq!(handle.snapshot().selected_index, Some(3));

        handle.toggle_location(LocationId::new("1")).await.unwrap();
        handle.select_measurement("E2".into()).await.unwrap();
        let snapshot = handle.snapshot();
        assert_eq!(snapshot.selected_locations, vec![LocationId::new("1")]);
        assert_eq!(snapshot.cumulative, vec![0.0; 4]);

        handle.clear_selection().await.unwrap();
        assert!(handle.snapshot().selected_locations.is_empty());
    }
}
