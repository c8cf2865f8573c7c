//! # Session Runner
//!
//! Async host for a [`TrackingSession`]. One tokio task owns the session and
//! every timer, and serializes all inputs through a single `select!` loop:
//!
//! - control commands from [`SessionHandle`]s
//! - position samples from the [`PositionSource`] subscription
//! - session clock ticks
//! - simulation steps
//! - results of background position acquisition
//!
//! Timers live only inside the loop. Creating a timer replaces (drops) the
//! previous one, and stop/reset/shutdown drop all of them together with the
//! position subscription, so nothing can keep firing after teardown.
//! Acquisitions run as spawned tasks tagged with a generation; teardown
//! bumps it, so a fix that arrives late is discarded.
//!
//! Events drained from the session are forwarded to the optional
//! [`SyncChannel`] and [`ActivitySink`] and broadcast to subscribers.

use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error, info, warn};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, Interval, MissedTickBehavior, Sleep};

use crate::config::{RunnerConfig, TrackerConfig};
use crate::error::{Result, TrackingError};
use crate::session::{
    FinishedActivity, SampleSource, ServerSync, SessionEvent, SessionSnapshot, SessionState,
    StartOptions, SyncUpdate, TrackingSession,
};
use crate::{Path, PositionSample};

// ============================================================================
// Collaborator Interfaces
// ============================================================================

/// Failure reported by a position source.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PositionError {
    #[error("position request timed out")]
    Timeout,
    #[error("location permission denied")]
    PermissionDenied,
    #[error("position unavailable: {0}")]
    Unavailable(String),
}

impl From<PositionError> for TrackingError {
    fn from(e: PositionError) -> Self {
        match e {
            PositionError::Timeout => TrackingError::PositionTimeout { attempts: 1 },
            PositionError::PermissionDenied => TrackingError::PositionPermissionDenied,
            PositionError::Unavailable(message) => TrackingError::PositionUnavailable { message },
        }
    }
}

/// Continuous position updates. Dropping it cancels the subscription; the
/// source sees its sender close.
#[derive(Debug)]
pub struct PositionSubscription {
    rx: mpsc::Receiver<std::result::Result<PositionSample, PositionError>>,
}

/// Sender half handed to position source implementations.
pub type PositionSender = mpsc::Sender<std::result::Result<PositionSample, PositionError>>;

impl PositionSubscription {
    /// Create a subscription and the sender the source pushes into.
    pub fn channel(buffer: usize) -> (PositionSender, Self) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (tx, Self { rx })
    }

    pub async fn recv(&mut self) -> Option<std::result::Result<PositionSample, PositionError>> {
        self.rx.recv().await
    }
}

/// Device or platform position provider.
#[async_trait]
pub trait PositionSource: Send + Sync {
    /// Acquire a single fix.
    async fn acquire(&self) -> std::result::Result<PositionSample, PositionError>;

    /// Register for continuous updates.
    fn subscribe(&self) -> PositionSubscription;
}

/// Outbound half of the sync collaborator. Must not block.
pub trait SyncChannel: Send + Sync {
    /// Publish one update; `SyncChannelUnavailable` when offline.
    fn publish(&self, update: &SyncUpdate) -> Result<()>;
}

/// Persistence collaborator for finished activities.
pub trait ActivitySink: Send + Sync {
    fn save(&self, activity: &FinishedActivity) -> Result<()>;
}

/// Source of "now" in Unix milliseconds.
pub type ClockFn = Arc<dyn Fn() -> i64 + Send + Sync>;

/// Wall clock used unless the host injects one.
pub fn system_clock() -> ClockFn {
    Arc::new(|| chrono::Utc::now().timestamp_millis())
}

// ============================================================================
// Acquisition with retry
// ============================================================================

/// Acquire a fix, retrying timeouts with exponential backoff.
///
/// Timeouts (reported by the source or hit locally) are retried up to
/// `max_acquire_attempts`; any other failure is returned immediately.
pub async fn acquire_with_retry(
    source: &dyn PositionSource,
    config: &RunnerConfig,
) -> Result<PositionSample> {
    let attempts = config.max_acquire_attempts.max(1);
    let timeout = Duration::from_millis(config.acquire_timeout_ms);

    for attempt in 1..=attempts {
        let outcome = match time::timeout(timeout, source.acquire()).await {
            Ok(result) => result,
            Err(_) => Err(PositionError::Timeout),
        };

        match outcome {
            Ok(sample) => {
                if attempt > 1 {
                    info!("[Runner] Position acquired on attempt {}", attempt);
                }
                return Ok(sample);
            }
            Err(PositionError::Timeout) if attempt < attempts => {
                let backoff =
                    Duration::from_millis(config.retry_backoff_ms * (1 << (attempt - 1).min(10)));
                warn!(
                    "[Runner] Position timeout, retry {} after {:?}",
                    attempt, backoff
                );
                time::sleep(backoff).await;
            }
            Err(PositionError::Timeout) => break,
            Err(e) => {
                error!("[Runner] Position acquisition failed: {}", e);
                return Err(e.into());
            }
        }
    }

    warn!("[Runner] Position timeout after {} attempts", attempts);
    Err(TrackingError::PositionTimeout { attempts })
}

// ============================================================================
// Handle
// ============================================================================

enum Command {
    Start {
        path: Option<Path>,
        options: StartOptions,
        reply: oneshot::Sender<Result<()>>,
    },
    StartSimulation {
        path: Path,
        speed_multiplier: f64,
        options: StartOptions,
        reply: oneshot::Sender<Result<()>>,
    },
    SetSpeed {
        speed_multiplier: f64,
        reply: oneshot::Sender<Result<u64>>,
    },
    Stop {
        reply: oneshot::Sender<Result<FinishedActivity>>,
    },
    MarkDone {
        reply: oneshot::Sender<Result<FinishedActivity>>,
    },
    Reset {
        reply: oneshot::Sender<()>,
    },
    ServerSync {
        sync: ServerSync,
        reply: oneshot::Sender<Result<()>>,
    },
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
    Shutdown,
}

/// Cloneable control surface for a running session.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionHandle {
    /// Start real tracking; resolves once the initial fix is in.
    ///
    /// The runner keeps serving other commands while the fix is pending. A
    /// `reset`, `stop` or `shutdown` in the meantime resolves this with
    /// [`TrackingError::StartCancelled`].
    pub async fn start(&self, path: Option<Path>, options: StartOptions) -> Result<()> {
        self.request(|reply| Command::Start {
            path,
            options,
            reply,
        })
        .await?
    }

    pub async fn start_simulation(
        &self,
        path: Path,
        speed_multiplier: f64,
        options: StartOptions,
    ) -> Result<()> {
        self.request(|reply| Command::StartSimulation {
            path,
            speed_multiplier,
            options,
            reply,
        })
        .await?
    }

    /// Returns the new step interval in milliseconds.
    pub async fn set_speed_multiplier(&self, speed_multiplier: f64) -> Result<u64> {
        self.request(|reply| Command::SetSpeed {
            speed_multiplier,
            reply,
        })
        .await?
    }

    pub async fn stop(&self) -> Result<FinishedActivity> {
        self.request(|reply| Command::Stop { reply }).await?
    }

    pub async fn mark_done(&self) -> Result<FinishedActivity> {
        self.request(|reply| Command::MarkDone { reply }).await?
    }

    pub async fn reset(&self) -> Result<()> {
        self.request(|reply| Command::Reset { reply }).await
    }

    /// Forward an inbound sync message.
    pub async fn server_sync(&self, sync: ServerSync) -> Result<()> {
        self.request(|reply| Command::ServerSync { sync, reply })
            .await?
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// Stop the runner task, cancelling every timer.
    pub async fn shutdown(&self) -> Result<()> {
        self.commands
            .send(Command::Shutdown)
            .await
            .map_err(|_| TrackingError::RunnerClosed)
    }

    /// Receive session events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| TrackingError::RunnerClosed)?;
        rx.await.map_err(|_| TrackingError::RunnerClosed)
    }
}

// ============================================================================
// Runner
// ============================================================================

enum LoopEvent {
    Command(Option<Command>),
    ClockTick,
    SimulationTick,
    Sample(Option<std::result::Result<PositionSample, PositionError>>),
    SampleTimeout,
    Acquired(Acquired),
}

/// Result of a background acquisition, tagged with the generation it was
/// spawned in. Results from an older generation are discarded.
struct Acquired {
    generation: u64,
    result: Result<PositionSample>,
}

/// Owns a session and all of its timers.
pub struct SessionRunner {
    session: TrackingSession,
    config: RunnerConfig,
    source: Arc<dyn PositionSource>,
    sync: Option<Arc<dyn SyncChannel>>,
    sink: Option<Arc<dyn ActivitySink>>,
    clock: ClockFn,
    events: broadcast::Sender<SessionEvent>,

    tick_timer: Option<Interval>,
    simulation_timer: Option<Interval>,
    subscription: Option<PositionSubscription>,
    watchdog: Option<Pin<Box<Sleep>>>,

    /// Bumped by every teardown; stale acquisitions compare against it
    acquire_generation: u64,
    acquire_task: Option<JoinHandle<()>>,
    acquired_tx: mpsc::Sender<Acquired>,
    acquired_rx: mpsc::Receiver<Acquired>,
    /// Reply for a real start still waiting on its first fix
    pending_start: Option<oneshot::Sender<Result<()>>>,

    sync_degraded: bool,
}

impl SessionRunner {
    /// Create a runner for `source` with default tracker configuration.
    pub fn new(source: Arc<dyn PositionSource>, config: RunnerConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_buffer.max(1));
        let (acquired_tx, acquired_rx) = mpsc::channel(1);
        Self {
            session: TrackingSession::new(),
            config,
            source,
            sync: None,
            sink: None,
            clock: system_clock(),
            events,
            tick_timer: None,
            simulation_timer: None,
            subscription: None,
            watchdog: None,
            acquire_generation: 0,
            acquire_task: None,
            acquired_tx,
            acquired_rx,
            pending_start: None,
            sync_degraded: false,
        }
    }

    pub fn with_tracker_config(mut self, config: TrackerConfig) -> Self {
        self.session = TrackingSession::with_config(config);
        self
    }

    pub fn with_sync_channel(mut self, sync: Arc<dyn SyncChannel>) -> Self {
        self.sync = Some(sync);
        self
    }

    pub fn with_activity_sink(mut self, sink: Arc<dyn ActivitySink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_clock(mut self, clock: ClockFn) -> Self {
        self.clock = clock;
        self
    }

    /// Spawn the runner loop on the current tokio runtime.
    pub fn spawn(self) -> SessionHandle {
        let (commands, rx) = mpsc::channel(self.config.event_buffer.max(1));
        let handle = SessionHandle {
            commands,
            events: self.events.clone(),
        };
        tokio::spawn(self.run(rx));
        handle
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        info!("[Runner] Session runner started");

        loop {
            let event = tokio::select! {
                command = commands.recv() => LoopEvent::Command(command),
                _ = next_tick(&mut self.tick_timer) => LoopEvent::ClockTick,
                _ = next_tick(&mut self.simulation_timer) => LoopEvent::SimulationTick,
                sample = next_sample(&mut self.subscription) => LoopEvent::Sample(sample),
                _ = expired(&mut self.watchdog) => LoopEvent::SampleTimeout,
                Some(acquired) = self.acquired_rx.recv() => LoopEvent::Acquired(acquired),
            };

            match event {
                LoopEvent::Command(None) | LoopEvent::Command(Some(Command::Shutdown)) => break,
                LoopEvent::Command(Some(command)) => self.handle_command(command),
                LoopEvent::ClockTick => {
                    let now = self.now();
                    self.session.tick(now);
                }
                LoopEvent::SimulationTick => self.handle_simulation_tick(),
                LoopEvent::Sample(Some(Ok(sample))) => self.handle_sample(sample),
                LoopEvent::Sample(Some(Err(e))) => self.handle_source_error(e),
                LoopEvent::Sample(None) => {
                    warn!("[Runner] Position subscription closed by source");
                    self.subscription = None;
                }
                LoopEvent::SampleTimeout => self.reacquire(),
                LoopEvent::Acquired(acquired) => self.handle_acquired(acquired),
            }

            self.flush_events();
        }

        self.cancel_timers();
        info!("[Runner] Session runner stopped");
    }

    // ========================================================================
    // Commands
    // ========================================================================

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start {
                path,
                options,
                reply,
            } => self.start_real(path, options, reply),
            Command::StartSimulation {
                path,
                speed_multiplier,
                options,
                reply,
            } => {
                let now = self.now();
                let result = self
                    .session
                    .start_simulation(path, speed_multiplier, options, now);
                if result.is_ok() {
                    self.cancel_timers();
                    self.tick_timer = Some(new_interval(self.config.tick_interval_ms));
                    self.simulation_timer =
                        self.session.simulation_interval_ms().map(new_interval);
                }
                let _ = reply.send(result);
            }
            Command::SetSpeed {
                speed_multiplier,
                reply,
            } => {
                let result = self.session.set_speed_multiplier(speed_multiplier);
                if let Ok(interval_ms) = result {
                    // Replace the step timer; progress stays where it is
                    if self.simulation_timer.is_some() {
                        self.simulation_timer = Some(new_interval(interval_ms));
                    }
                }
                let _ = reply.send(result);
            }
            Command::Stop { reply } => {
                let now = self.now();
                let result = self.session.stop(now);
                if result.is_ok() {
                    self.cancel_timers();
                } else if self.pending_start.is_some() {
                    // Tracking never got its first fix; abandon the start
                    self.cancel_timers();
                    self.session.reset();
                }
                let _ = reply.send(result);
            }
            Command::MarkDone { reply } => {
                let now = self.now();
                let result = self.session.mark_done(now);
                if result.is_ok() {
                    self.cancel_timers();
                }
                let _ = reply.send(result);
            }
            Command::Reset { reply } => {
                self.cancel_timers();
                self.session.reset();
                let _ = reply.send(());
            }
            Command::ServerSync { sync, reply } => {
                let now = self.now();
                let result = self.session.apply_server_sync(sync, now);
                if let Err(e) = &result {
                    debug!("[Runner] Ignoring server sync: {}", e);
                }
                let _ = reply.send(result);
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.session.snapshot());
            }
            Command::Shutdown => {}
        }
    }

    /// Start real tracking. The state machine validates and terminates any
    /// simulation; the first fix is acquired in the background and `reply`
    /// is answered once it arrives.
    fn start_real(
        &mut self,
        path: Option<Path>,
        options: StartOptions,
        reply: oneshot::Sender<Result<()>>,
    ) {
        let now = self.now();
        if let Err(e) = self.session.start(path, options, now) {
            let _ = reply.send(Err(e));
            return;
        }
        self.cancel_timers();
        self.pending_start = Some(reply);
        self.spawn_acquisition();
    }

    // ========================================================================
    // Inputs
    // ========================================================================

    fn handle_simulation_tick(&mut self) {
        let now = self.now();
        match self.session.simulation_tick(now) {
            Ok(Some(activity)) => {
                info!(
                    "[Runner] Simulation finished: {:.3} km",
                    activity.distance_km
                );
                self.cancel_timers();
            }
            Ok(None) => {
                if self.session.simulation_interval_ms().is_none() {
                    self.simulation_timer = None;
                }
            }
            Err(e) if self.session.state() == SessionState::Stopped => {
                warn!("[Runner] Simulation ended without a saved activity: {}", e);
                self.cancel_timers();
            }
            Err(e) => {
                warn!("[Runner] Simulation step failed: {}", e);
                self.simulation_timer = None;
            }
        }
    }

    fn handle_sample(&mut self, sample: PositionSample) {
        self.rearm_watchdog();
        match self.session.ingest(sample) {
            Ok(disposition) => debug!("[Runner] Sample {:?}", disposition),
            Err(e) => debug!("[Runner] Sample ignored: {}", e),
        }
    }

    fn handle_source_error(&mut self, e: PositionError) {
        if e == PositionError::Timeout {
            // The watchdog decides when silence becomes a re-acquisition
            debug!("[Runner] Subscription reported timeout");
            return;
        }
        error!("[Runner] Position subscription failed: {}", e);
        self.subscription = None;
        self.watchdog = None;
        self.broadcast(SessionEvent::PositionFailed(e.into()));
    }

    /// Watchdog expiry: look for a fix in the background.
    fn reacquire(&mut self) {
        self.watchdog = None;
        if self.acquire_task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        warn!(
            "[Runner] No position for {} ms, re-acquiring",
            self.config.sample_timeout_ms
        );
        self.spawn_acquisition();
    }

    /// Spawn an acquisition whose result re-enters the loop.
    fn spawn_acquisition(&mut self) {
        if let Some(task) = self.acquire_task.take() {
            task.abort();
        }
        let generation = self.acquire_generation;
        let source = Arc::clone(&self.source);
        let config = self.config.clone();
        let tx = self.acquired_tx.clone();
        self.acquire_task = Some(tokio::spawn(async move {
            let result = acquire_with_retry(source.as_ref(), &config).await;
            let _ = tx.send(Acquired { generation, result }).await;
        }));
    }

    fn handle_acquired(&mut self, acquired: Acquired) {
        if acquired.generation != self.acquire_generation {
            debug!("[Runner] Discarding acquisition from a torn-down run");
            return;
        }
        self.acquire_task = None;

        if let Some(reply) = self.pending_start.take() {
            let result = self.finish_start(acquired.result);
            let _ = reply.send(result);
            return;
        }

        let tracking_real = self.session.source() == Some(SampleSource::Real)
            && matches!(
                self.session.state(),
                SessionState::Active | SessionState::Completed
            );
        if !tracking_real {
            debug!("[Runner] Discarding fix, no real tracking in progress");
            return;
        }

        match acquired.result {
            Ok(sample) => {
                if self.subscription.is_none() {
                    self.subscription = Some(self.source.subscribe());
                }
                self.handle_sample(sample);
            }
            Err(e) => {
                error!("[Runner] Re-acquisition failed: {}", e);
                self.subscription = None;
                self.broadcast(SessionEvent::PositionFailed(e));
            }
        }
    }

    /// Complete a pending real start with its first fix.
    fn finish_start(&mut self, result: Result<PositionSample>) -> Result<()> {
        let first_fix = match result {
            Ok(sample) => sample,
            Err(e) => {
                warn!("[Runner] Cannot start tracking: {}", e);
                self.session.reset();
                return Err(e);
            }
        };

        self.session.ingest(first_fix)?;
        self.subscription = Some(self.source.subscribe());
        self.watchdog = Some(Box::pin(time::sleep(self.sample_timeout())));
        self.tick_timer = Some(new_interval(self.config.tick_interval_ms));
        Ok(())
    }

    // ========================================================================
    // Outputs
    // ========================================================================

    fn flush_events(&mut self) {
        for event in self.session.drain_events() {
            match &event {
                SessionEvent::SampleAccepted(update) => self.publish(update),
                SessionEvent::Finished(activity) => {
                    if let Some(sink) = &self.sink {
                        if let Err(e) = sink.save(activity) {
                            warn!("[Runner] Failed to save '{}': {}", activity.title, e);
                        }
                    }
                }
                _ => {}
            }
            self.broadcast(event);
        }
    }

    fn publish(&mut self, update: &SyncUpdate) {
        let Some(sync) = &self.sync else {
            return;
        };
        match sync.publish(update) {
            Ok(()) if self.sync_degraded => {
                info!("[Runner] Sync channel recovered");
                self.sync_degraded = false;
            }
            Ok(()) => {}
            Err(e) => {
                if !self.sync_degraded {
                    warn!("[Runner] Continuing on local clock: {}", e);
                    self.sync_degraded = true;
                }
            }
        }
    }

    fn broadcast(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    // ========================================================================
    // Timers
    // ========================================================================

    /// Drop every timer, the subscription and any acquisition in flight.
    fn cancel_timers(&mut self) {
        self.tick_timer = None;
        self.simulation_timer = None;
        self.subscription = None;
        self.watchdog = None;

        self.acquire_generation += 1;
        if let Some(task) = self.acquire_task.take() {
            task.abort();
        }
        // A result may already be queued from before the abort
        while self.acquired_rx.try_recv().is_ok() {}

        if let Some(reply) = self.pending_start.take() {
            info!("[Runner] Pending start cancelled");
            let _ = reply.send(Err(TrackingError::StartCancelled));
        }
    }

    fn rearm_watchdog(&mut self) {
        let deadline = Instant::now() + self.sample_timeout();
        match self.watchdog.as_mut() {
            Some(sleep) => sleep.as_mut().reset(deadline),
            None if self.subscription.is_some() => {
                self.watchdog = Some(Box::pin(time::sleep_until(deadline)));
            }
            None => {}
        }
    }

    fn sample_timeout(&self) -> Duration {
        Duration::from_millis(self.config.sample_timeout_ms)
    }

    fn now(&self) -> i64 {
        (self.clock)()
    }
}

fn new_interval(period_ms: u64) -> Interval {
    let period = Duration::from_millis(period_ms.max(1));
    let mut interval = time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(interval) => {
            interval.tick().await;
        }
        None => pending::<()>().await,
    }
}

async fn next_sample(
    subscription: &mut Option<PositionSubscription>,
) -> Option<std::result::Result<PositionSample, PositionError>> {
    match subscription {
        Some(sub) => sub.recv().await,
        None => pending().await,
    }
}

async fn expired(watchdog: &mut Option<Pin<Box<Sleep>>>) {
    match watchdog {
        Some(sleep) => sleep.as_mut().await,
        None => pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use crate::GeoPoint;

    struct ScriptedSource {
        results: Mutex<VecDeque<std::result::Result<PositionSample, PositionError>>>,
        calls: Mutex<u32>,
    }

    impl ScriptedSource {
        fn new(results: Vec<std::result::Result<PositionSample, PositionError>>) -> Self {
            Self {
                results: Mutex::new(results.into()),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl PositionSource for ScriptedSource {
        async fn acquire(&self) -> std::result::Result<PositionSample, PositionError> {
            *self.calls.lock().unwrap() += 1;
            let next = self.results.lock().unwrap().pop_front();
            next.unwrap_or(Err(PositionError::Timeout))
        }

        fn subscribe(&self) -> PositionSubscription {
            PositionSubscription::channel(8).1
        }
    }

    fn fix() -> PositionSample {
        PositionSample::new(GeoPoint::new(51.5, -0.12), 0)
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers_after_timeouts() {
        let source = ScriptedSource::new(vec![
            Err(PositionError::Timeout),
            Err(PositionError::Timeout),
            Ok(fix()),
        ]);
        let sample = acquire_with_retry(&source, &RunnerConfig::default())
            .await
            .unwrap();
        assert_eq!(sample, fix());
        assert_eq!(source.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up_after_five_attempts() {
        let source = ScriptedSource::new(vec![]);
        let result = acquire_with_retry(&source, &RunnerConfig::default()).await;
        assert_eq!(result, Err(TrackingError::PositionTimeout { attempts: 5 }));
        assert_eq!(source.calls(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permission_denied_is_not_retried() {
        let source = ScriptedSource::new(vec![Err(PositionError::PermissionDenied), Ok(fix())]);
        let result = acquire_with_retry(&source, &RunnerConfig::default()).await;
        assert_eq!(result, Err(TrackingError::PositionPermissionDenied));
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unavailable_is_not_retried() {
        let source = ScriptedSource::new(vec![Err(PositionError::Unavailable(
            "no provider".to_string(),
        ))]);
        let result = acquire_with_retry(&source, &RunnerConfig::default()).await;
        assert!(matches!(
            result,
            Err(TrackingError::PositionUnavailable { .. })
        ));
        assert_eq!(source.calls(), 1);
    }

    struct HangingSource;

    #[async_trait]
    impl PositionSource for HangingSource {
        async fn acquire(&self) -> std::result::Result<PositionSample, PositionError> {
            pending().await
        }

        fn subscribe(&self) -> PositionSubscription {
            PositionSubscription::channel(1).1
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_acquire_times_out_locally() {
        let result = acquire_with_retry(&HangingSource, &RunnerConfig::default()).await;
        assert_eq!(result, Err(TrackingError::PositionTimeout { attempts: 5 }));
    }
}
