//! # Tracking Session
//!
//! State machine that composes the accumulator, matcher, clock and
//! simulation driver into one session.
//!
//! ```text
//! Idle ──start──> Active ──completion──> Completed ──mark_done──> Stopped
//!                   │                        │
//!                   └─────────stop───────────┴─────────stop──────> Stopped
//! reset: any state ──> Idle
//! ```
//!
//! The session is the single owner of all live statistics. Consumers get
//! clones through [`TrackingSession::snapshot`] and typed events through
//! [`TrackingSession::drain_events`]; nothing outside can mutate the stats.
//! All methods take the current time explicitly so the session itself never
//! reads a clock and never owns a timer.

use std::collections::VecDeque;

use chrono::DateTime;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::accumulator::DistanceAccumulator;
use crate::clock::SessionClock;
use crate::config::TrackerConfig;
use crate::error::{OptionExt, Result, TrackingError};
use crate::geo_utils::simplify_path;
use crate::matching::{RouteMatcher, RouteProgress};
use crate::simulation::{SimulationDriver, SimulationStep};
use crate::{GeoPoint, LngLat, Path, PositionSample};

// ============================================================================
// Core Types
// ============================================================================

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    Idle,
    Active,
    Completed,
    Stopped,
}

/// Which producer feeds the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SampleSource {
    Real,
    Simulated,
}

/// Live statistics. Only the session writes these.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingStats {
    pub distance_km: f64,
    pub duration_seconds: u64,
    pub speed_kmh: f64,
    /// Unix ms; replaced by the server start time after a sync
    pub start_time_ms: i64,
    pub last_sync_time_ms: Option<i64>,
    /// Server elapsed value from the most recent sync
    pub server_time_offset_ms: Option<i64>,
}

/// Options for starting a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StartOptions {
    /// Title for the finished activity; defaults to "Activity <date>"
    pub title: Option<String>,
}

/// Inbound authoritative clock message.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerSync {
    pub elapsed_ms: i64,
    pub server_start_time: i64,
}

/// Stats block of an outbound sync update.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStats {
    pub distance_km: f64,
    pub duration_seconds: u64,
    pub speed_kmh: f64,
}

/// Outbound update published for every accepted sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncUpdate {
    pub position: LngLat,
    pub timestamp: i64,
    pub stats: SyncStats,
}

/// Finalized activity handed to the persistence collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishedActivity {
    pub title: String,
    pub distance_km: f64,
    pub duration_seconds: u64,
    /// Recorded track, simplified
    pub path: Vec<LngLat>,
    pub start_point: LngLat,
    pub end_point: LngLat,
    pub completed: bool,
}

/// Read-only view of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub source: Option<SampleSource>,
    pub stats: TrackingStats,
    pub progress: Option<RouteProgress>,
    /// Latest position, including ones that no longer count towards stats
    pub position: Option<GeoPoint>,
}

/// Events emitted by a session, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Started { source: SampleSource },
    SampleAccepted(SyncUpdate),
    ProgressUpdated(RouteProgress),
    /// Emitted once per session when the completion latch is set
    RouteCompleted(RouteProgress),
    Finished(FinishedActivity),
    /// A simulation was terminated to make way for another start
    SimulationCancelled,
    Reset,
    /// The position source failed for good; emitted by the runner
    PositionFailed(TrackingError),
}

/// What the session did with an ingested sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleDisposition {
    /// Counted towards distance and duration
    Recorded,
    /// Shown as the current position only; stats are frozen
    Frozen,
    /// Coordinates were not usable
    Rejected,
}

/// State held only while a session is running or stopped.
#[derive(Debug)]
struct ActiveRun {
    source: SampleSource,
    title: String,
    clock: SessionClock,
    accumulator: DistanceAccumulator,
    matcher: Option<RouteMatcher>,
    simulation: Option<SimulationDriver>,
    track: Vec<GeoPoint>,
}

// ============================================================================
// Tracking Session
// ============================================================================

/// Orchestrates one tracking session.
#[derive(Debug)]
pub struct TrackingSession {
    config: TrackerConfig,
    state: SessionState,
    stats: TrackingStats,
    run: Option<ActiveRun>,
    position: Option<GeoPoint>,
    events: VecDeque<SessionEvent>,
}

impl TrackingSession {
    /// Create an idle session with default configuration.
    pub fn new() -> Self {
        Self::with_config(TrackerConfig::default())
    }

    /// Create an idle session with custom configuration.
    pub fn with_config(config: TrackerConfig) -> Self {
        Self {
            config,
            state: SessionState::Idle,
            stats: TrackingStats::default(),
            run: None,
            position: None,
            events: VecDeque::new(),
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Start real tracking, optionally against a reference path.
    ///
    /// A running simulation is terminated first. Starting over real tracking
    /// fails with [`TrackingError::AlreadyActive`]; an invalid path fails
    /// before anything changes.
    pub fn start(&mut self, path: Option<Path>, options: StartOptions, now_ms: i64) -> Result<()> {
        self.check_startable(SampleSource::Real)?;
        let matcher = path
            .map(|p| RouteMatcher::new(p, self.config.clone()))
            .transpose()?;

        self.cancel_simulation();
        self.begin_run(SampleSource::Real, matcher, None, options, now_ms);
        Ok(())
    }

    /// Start a simulated walk-through of `path`.
    ///
    /// Replaces a running simulation; refuses to preempt real tracking.
    pub fn start_simulation(
        &mut self,
        path: Path,
        speed_multiplier: f64,
        options: StartOptions,
        now_ms: i64,
    ) -> Result<()> {
        self.check_startable(SampleSource::Simulated)?;
        let driver = SimulationDriver::new(path.clone(), speed_multiplier, &self.config)?;
        let matcher = RouteMatcher::new(path, self.config.clone())?;

        self.cancel_simulation();
        let seed = driver.begin(now_ms);
        self.begin_run(SampleSource::Simulated, Some(matcher), Some(driver), options, now_ms);
        self.record_sample(&seed);
        Ok(())
    }

    /// Finalize the session and hand back the activity to persist.
    ///
    /// Refuses to produce an activity from too little data; the session then
    /// stays as it was so tracking can continue.
    pub fn stop(&mut self, now_ms: i64) -> Result<FinishedActivity> {
        if !matches!(self.state, SessionState::Active | SessionState::Completed) {
            return Err(self.invalid("stop"));
        }

        if self.state == SessionState::Active {
            self.refresh_duration(now_ms);
        }

        let activity = self.finished_activity()?;

        if let Some(run) = self.run.as_mut() {
            run.simulation = None;
        }
        self.state = SessionState::Stopped;

        info!(
            "[TrackingSession] Stopped '{}': {:.3} km in {} s ({} points)",
            activity.title,
            activity.distance_km,
            activity.duration_seconds,
            activity.path.len()
        );
        self.events.push_back(SessionEvent::Finished(activity.clone()));
        Ok(activity)
    }

    /// Acknowledge a completed course. Only valid in `Completed`.
    pub fn mark_done(&mut self, now_ms: i64) -> Result<FinishedActivity> {
        if self.state != SessionState::Completed {
            return Err(self.invalid("mark as done"));
        }
        self.stop(now_ms)
    }

    /// Drop all accumulated state and return to `Idle`. Always succeeds.
    pub fn reset(&mut self) {
        if self.state != SessionState::Idle {
            info!("[TrackingSession] Reset from {:?}", self.state);
        }
        self.state = SessionState::Idle;
        self.stats = TrackingStats::default();
        self.run = None;
        self.position = None;
        self.events.push_back(SessionEvent::Reset);
    }

    // ========================================================================
    // Inputs
    // ========================================================================

    /// Feed a real position sample.
    pub fn ingest(&mut self, sample: PositionSample) -> Result<SampleDisposition> {
        match (self.state, self.source()) {
            (SessionState::Active | SessionState::Completed, Some(SampleSource::Real)) => {
                Ok(self.record_sample(&sample))
            }
            (SessionState::Active | SessionState::Completed, _) => {
                Err(self.invalid("ingest a real sample during simulation"))
            }
            _ => Err(self.invalid("ingest")),
        }
    }

    /// Advance the duration from the session clock. Returns the duration
    /// while active, `None` once stats are frozen.
    pub fn tick(&mut self, now_ms: i64) -> Option<u64> {
        if self.state != SessionState::Active {
            return None;
        }
        self.refresh_duration(now_ms);
        Some(self.stats.duration_seconds)
    }

    /// Advance the simulation by one vertex.
    ///
    /// Returns the finished activity when the final vertex is reached. If the
    /// track is too short to save, the error is returned and the session is
    /// `Stopped` regardless.
    pub fn simulation_tick(&mut self, now_ms: i64) -> Result<Option<FinishedActivity>> {
        if !matches!(self.state, SessionState::Active | SessionState::Completed) {
            return Err(self.invalid("advance simulation"));
        }
        let step = match self.run.as_mut().and_then(|run| run.simulation.as_mut()) {
            Some(driver) => driver.step(now_ms),
            None => return Err(self.invalid("advance simulation without a simulation")),
        };

        match step {
            SimulationStep::Sample(sample) => {
                self.record_sample(&sample);
                Ok(None)
            }
            SimulationStep::Finished(sample) => {
                self.record_sample(&sample);
                self.finish_simulation(now_ms).map(Some)
            }
            SimulationStep::Done => Ok(None),
        }
    }

    /// Finalize at the end of the path. The simulation cannot produce more
    /// samples, so the session stops even when finalization is refused.
    fn finish_simulation(&mut self, now_ms: i64) -> Result<FinishedActivity> {
        self.stop(now_ms).map_err(|e| {
            warn!("[TrackingSession] Simulation ended without an activity: {}", e);
            if let Some(run) = self.run.as_mut() {
                run.simulation = None;
            }
            self.state = SessionState::Stopped;
            e
        })
    }

    /// Change simulation speed; returns the new step interval.
    pub fn set_speed_multiplier(&mut self, speed_multiplier: f64) -> Result<u64> {
        let state = self.state;
        self.run
            .as_mut()
            .and_then(|run| run.simulation.as_mut())
            .ok_or(TrackingError::InvalidStateTransition {
                operation: "change simulation speed",
                state,
            })?
            .set_speed_multiplier(speed_multiplier)
    }

    /// Apply an authoritative clock message.
    pub fn apply_server_sync(&mut self, sync: ServerSync, now_ms: i64) -> Result<()> {
        if !matches!(self.state, SessionState::Active | SessionState::Completed) {
            return Err(self.invalid("apply server sync"));
        }
        if let Some(run) = self.run.as_mut() {
            run.clock
                .apply_server_sync(sync.server_start_time, sync.elapsed_ms, now_ms);
        }
        self.stats.start_time_ms = sync.server_start_time;
        self.stats.last_sync_time_ms = Some(now_ms);
        self.stats.server_time_offset_ms = Some(sync.elapsed_ms);

        if self.state == SessionState::Active {
            self.refresh_duration(now_ms);
        }
        Ok(())
    }

    // ========================================================================
    // Outputs
    // ========================================================================

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn source(&self) -> Option<SampleSource> {
        self.run.as_ref().map(|run| run.source)
    }

    pub fn stats(&self) -> &TrackingStats {
        &self.stats
    }

    pub fn progress(&self) -> Option<&RouteProgress> {
        self.run
            .as_ref()
            .and_then(|run| run.matcher.as_ref())
            .map(RouteMatcher::progress)
    }

    /// Current simulation step interval, if a simulation is running.
    pub fn simulation_interval_ms(&self) -> Option<u64> {
        self.run
            .as_ref()
            .and_then(|run| run.simulation.as_ref())
            .filter(|driver| !driver.is_finished())
            .map(SimulationDriver::interval_ms)
    }

    /// Number of samples counted towards distance.
    pub fn sample_count(&self) -> usize {
        self.run
            .as_ref()
            .map_or(0, |run| run.accumulator.sample_count())
    }

    /// Immutable copy of the current state.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            source: self.source(),
            stats: self.stats.clone(),
            progress: self.progress().cloned(),
            position: self.position,
        }
    }

    /// Take all events emitted since the last call.
    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        self.events.drain(..).collect()
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn check_startable(&self, source: SampleSource) -> Result<()> {
        match (self.state, self.source()) {
            (SessionState::Idle, _) => Ok(()),
            // A running simulation always yields to a new start
            (SessionState::Active | SessionState::Completed, Some(SampleSource::Simulated)) => {
                Ok(())
            }
            (SessionState::Active, _) => {
                warn!("[TrackingSession] {:?} start rejected: already active", source);
                Err(TrackingError::AlreadyActive)
            }
            _ => Err(self.invalid("start")),
        }
    }

    /// Terminate a running simulation, leaving the session idle.
    fn cancel_simulation(&mut self) {
        if self.source() == Some(SampleSource::Simulated)
            && matches!(self.state, SessionState::Active | SessionState::Completed)
        {
            info!("[TrackingSession] Cancelling running simulation");
            self.reset();
            self.events.push_back(SessionEvent::SimulationCancelled);
        }
    }

    fn begin_run(
        &mut self,
        source: SampleSource,
        matcher: Option<RouteMatcher>,
        simulation: Option<SimulationDriver>,
        options: StartOptions,
        now_ms: i64,
    ) {
        let title = options
            .title
            .unwrap_or_else(|| default_title(now_ms));

        info!(
            "[TrackingSession] Starting {:?} session '{}' (path: {})",
            source,
            title,
            matcher
                .as_ref()
                .map_or("none".to_string(), |m| format!("{} points", m.path().len()))
        );

        self.stats = TrackingStats {
            start_time_ms: now_ms,
            ..TrackingStats::default()
        };
        self.position = None;
        self.run = Some(ActiveRun {
            source,
            title,
            clock: SessionClock::new(now_ms),
            accumulator: DistanceAccumulator::new(now_ms),
            matcher,
            simulation,
            track: Vec::new(),
        });
        self.state = SessionState::Active;
        self.events.push_back(SessionEvent::Started { source });
    }

    /// Route one sample through the accumulator and matcher.
    fn record_sample(&mut self, sample: &PositionSample) -> SampleDisposition {
        if !sample.point.is_valid() {
            warn!(
                "[TrackingSession] Dropping sample with invalid coordinates ({}, {})",
                sample.point.latitude, sample.point.longitude
            );
            return SampleDisposition::Rejected;
        }
        self.position = Some(sample.point);

        let state = self.state;
        let Some(run) = self.run.as_mut() else {
            return SampleDisposition::Rejected;
        };

        let outcome = run.matcher.as_mut().map(|m| m.match_position(&sample.point));
        let advanced = outcome.as_ref().is_some_and(|o| o.advanced());

        // Once completed only forward progress along the course still counts
        if state == SessionState::Completed && !advanced {
            debug!("[TrackingSession] Stats frozen, sample shown only");
            return SampleDisposition::Frozen;
        }

        let update = run.accumulator.add_sample(sample);
        run.track.push(sample.point);
        self.stats.distance_km = update.total_km;
        self.stats.speed_kmh = update.speed_kmh;
        let ticked = run.clock.tick(sample.timestamp_ms);
        self.stats.duration_seconds = self.stats.duration_seconds.max(ticked);

        self.events.push_back(SessionEvent::SampleAccepted(SyncUpdate {
            position: sample.point.into(),
            timestamp: sample.timestamp_ms,
            stats: SyncStats {
                distance_km: self.stats.distance_km,
                duration_seconds: self.stats.duration_seconds,
                speed_kmh: self.stats.speed_kmh,
            },
        }));

        if let Some(outcome) = outcome.filter(|o| o.advanced()) {
            let completion_fired = outcome.completion_fired;
            self.events
                .push_back(SessionEvent::ProgressUpdated(outcome.progress.clone()));
            if completion_fired {
                info!(
                    "[TrackingSession] Course completed at {}%",
                    outcome.progress.progress_percent
                );
                self.state = SessionState::Completed;
                self.events
                    .push_back(SessionEvent::RouteCompleted(outcome.progress));
            }
        }

        SampleDisposition::Recorded
    }

    fn refresh_duration(&mut self, now_ms: i64) {
        if let Some(run) = self.run.as_ref() {
            let ticked = run.clock.tick(now_ms);
            self.stats.duration_seconds = self.stats.duration_seconds.max(ticked);
        }
    }

    fn finished_activity(&self) -> Result<FinishedActivity> {
        let run = self.run.as_ref().ok_or_else(|| self.invalid("stop"))?;

        let sample_count = run.accumulator.sample_count();
        if sample_count < self.config.min_samples_to_save
            || self.stats.distance_km < self.config.min_distance_km_to_save
        {
            warn!(
                "[TrackingSession] Refusing to finalize: {} samples, {:.3} km",
                sample_count, self.stats.distance_km
            );
            return Err(TrackingError::InsufficientTrackData {
                sample_count,
                min_samples: self.config.min_samples_to_save,
                distance_km: self.stats.distance_km,
                min_distance_km: self.config.min_distance_km_to_save,
            });
        }

        let first = run.track.first().ok_or_internal("recorded track is empty")?;
        let last = run.track.last().ok_or_internal("recorded track is empty")?;

        let path = simplify_path(
            &run.track,
            self.config.max_snapshot_points,
            self.config.simplification_tolerance,
        );

        Ok(FinishedActivity {
            title: run.title.clone(),
            distance_km: self.stats.distance_km,
            duration_seconds: self.stats.duration_seconds,
            path: path.into_iter().map(LngLat::from).collect(),
            start_point: (*first).into(),
            end_point: (*last).into(),
            completed: run
                .matcher
                .as_ref()
                .is_some_and(RouteMatcher::is_completed),
        })
    }

    fn invalid(&self, operation: &'static str) -> TrackingError {
        TrackingError::InvalidStateTransition {
            operation,
            state: self.state,
        }
    }
}

impl Default for TrackingSession {
    fn default() -> Self {
        Self::new()
    }
}

fn default_title(now_ms: i64) -> String {
    DateTime::from_timestamp_millis(now_ms)
        .map(|dt| format!("Activity {}", dt.format("%Y-%m-%d %H:%M")))
        .unwrap_or_else(|| "Activity".to_string())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Points ~111 m apart heading north.
    fn path(n: usize) -> Path {
        Path::new(
            (0..n)
                .map(|i| GeoPoint::new(51.5 + i as f64 * 0.001, -0.12))
                .collect(),
        )
    }

    fn sample_at(path: &Path, i: usize, t: i64) -> PositionSample {
        PositionSample::new(path.points()[i], t)
    }

    #[test]
    fn test_start_and_ingest() {
        let route = path(10);
        let mut session = TrackingSession::new();
        session
            .start(Some(route.clone()), StartOptions::default(), 0)
            .unwrap();
        assert_eq!(session.state(), SessionState::Active);

        for i in 0..4 {
            let disposition = session.ingest(sample_at(&route, i, i as i64 * 1000)).unwrap();
            assert_eq!(disposition, SampleDisposition::Recorded);
        }

        let stats = session.stats();
        assert!((stats.distance_km - 0.3336).abs() < 0.001);
        assert_eq!(stats.duration_seconds, 3);
        assert!(stats.speed_kmh > 0.0);
        assert_eq!(session.progress().unwrap().closest_index, 3);
    }

    #[test]
    fn test_start_twice_is_rejected() {
        let mut session = TrackingSession::new();
        session.start(None, StartOptions::default(), 0).unwrap();
        assert_eq!(
            session.start(None, StartOptions::default(), 10),
            Err(TrackingError::AlreadyActive)
        );
        assert_eq!(session.stats().start_time_ms, 0);
    }

    #[test]
    fn test_start_requires_idle_after_stop() {
        let route = path(10);
        let mut session = TrackingSession::new();
        session.start(None, StartOptions::default(), 0).unwrap();
        for i in 0..3 {
            session.ingest(sample_at(&route, i, i as i64 * 1000)).unwrap();
        }
        session.stop(5000).unwrap();

        assert!(matches!(
            session.start(None, StartOptions::default(), 6000),
            Err(TrackingError::InvalidStateTransition {
                operation: "start",
                state: SessionState::Stopped
            })
        ));
        session.reset();
        assert!(session.start(None, StartOptions::default(), 6000).is_ok());
    }

    #[test]
    fn test_ingest_requires_running_session() {
        let mut session = TrackingSession::new();
        let result = session.ingest(PositionSample::new(GeoPoint::new(51.5, -0.12), 0));
        assert!(matches!(
            result,
            Err(TrackingError::InvalidStateTransition {
                state: SessionState::Idle,
                ..
            })
        ));
    }

    #[test]
    fn test_invalid_sample_rejected() {
        let mut session = TrackingSession::new();
        session.start(None, StartOptions::default(), 0).unwrap();
        let result = session
            .ingest(PositionSample::new(GeoPoint::new(f64::NAN, 0.0), 10))
            .unwrap();
        assert_eq!(result, SampleDisposition::Rejected);
        assert_eq!(session.sample_count(), 0);
    }

    #[test]
    fn test_tracking_without_path_has_no_progress() {
        let route = path(5);
        let mut session = TrackingSession::new();
        session.start(None, StartOptions::default(), 0).unwrap();
        session.ingest(sample_at(&route, 0, 0)).unwrap();
        session.ingest(sample_at(&route, 4, 1000)).unwrap();

        assert!(session.progress().is_none());
        assert!(session.stats().distance_km > 0.4);
        assert!(session
            .drain_events()
            .iter()
            .all(|e| !matches!(e, SessionEvent::ProgressUpdated(_))));
    }

    #[test]
    fn test_completion_freezes_stats() {
        let route = path(10);
        let mut session = TrackingSession::new();
        session.start(Some(route.clone()), StartOptions::default(), 0).unwrap();

        for i in 0..=7 {
            session.ingest(sample_at(&route, i, i as i64 * 1000)).unwrap();
        }
        assert_eq!(session.state(), SessionState::Completed);
        let frozen = session.stats().clone();

        // Wandering off and back does not count
        let off_route = PositionSample::new(GeoPoint::new(51.51, -0.10), 9000);
        assert_eq!(session.ingest(off_route).unwrap(), SampleDisposition::Frozen);
        assert_eq!(
            session.ingest(sample_at(&route, 2, 10_000)).unwrap(),
            SampleDisposition::Frozen
        );
        assert_eq!(session.tick(60_000), None);
        assert_eq!(session.stats(), &frozen);
        assert_eq!(session.snapshot().position, Some(route.points()[2]));

        // Finishing the tail of the course still counts
        assert_eq!(
            session.ingest(sample_at(&route, 9, 11_000)).unwrap(),
            SampleDisposition::Recorded
        );
        assert_eq!(session.progress().unwrap().progress_percent, 100);

        let completions = session
            .drain_events()
            .into_iter()
            .filter(|e| matches!(e, SessionEvent::RouteCompleted(_)))
            .count();
        assert_eq!(completions, 1);
    }

    #[test]
    fn test_mark_done_only_when_completed() {
        let route = path(10);
        let mut session = TrackingSession::new();
        session.start(Some(route.clone()), StartOptions::default(), 0).unwrap();
        for i in 0..3 {
            session.ingest(sample_at(&route, i, i as i64 * 1000)).unwrap();
        }
        assert!(matches!(
            session.mark_done(3000),
            Err(TrackingError::InvalidStateTransition { .. })
        ));

        for i in 3..10 {
            session.ingest(sample_at(&route, i, i as i64 * 1000)).unwrap();
        }
        let activity = session.mark_done(12_000).unwrap();
        assert!(activity.completed);
        assert_eq!(session.state(), SessionState::Stopped);
    }

    #[test]
    fn test_stop_snapshot_contents() {
        let route = path(10);
        let mut session = TrackingSession::new();
        session
            .start(
                Some(route.clone()),
                StartOptions {
                    title: Some("Morning loop".to_string()),
                },
                0,
            )
            .unwrap();
        for i in 0..5 {
            session.ingest(sample_at(&route, i, i as i64 * 1000)).unwrap();
        }

        let activity = session.stop(10_000).unwrap();
        assert_eq!(activity.title, "Morning loop");
        assert_eq!(activity.duration_seconds, 10);
        assert!(!activity.completed);
        assert_eq!(activity.start_point, LngLat::from(route.points()[0]));
        assert_eq!(activity.end_point, LngLat::from(route.points()[4]));
        assert!(activity.path.len() <= 100);
    }

    #[test]
    fn test_stop_twice() {
        let route = path(5);
        let mut session = TrackingSession::new();
        session.start(None, StartOptions::default(), 0).unwrap();
        for i in 0..3 {
            session.ingest(sample_at(&route, i, i as i64 * 1000)).unwrap();
        }
        session.stop(4000).unwrap();
        assert!(matches!(
            session.stop(5000),
            Err(TrackingError::InvalidStateTransition {
                operation: "stop",
                state: SessionState::Stopped
            })
        ));

        let finished = session
            .drain_events()
            .into_iter()
            .filter(|e| matches!(e, SessionEvent::Finished(_)))
            .count();
        assert_eq!(finished, 1);
    }

    #[test]
    fn test_stop_rejects_stationary_track() {
        let route = path(5);
        let mut session = TrackingSession::new();
        session.start(None, StartOptions::default(), 0).unwrap();
        for t in 0..5 {
            session.ingest(sample_at(&route, 0, t * 1000)).unwrap();
        }
        assert!(matches!(
            session.stop(6000),
            Err(TrackingError::InsufficientTrackData { sample_count: 5, .. })
        ));
        assert_eq!(session.state(), SessionState::Active);
    }

    #[test]
    fn test_real_start_cancels_simulation() {
        let route = path(10);
        let mut session = TrackingSession::new();
        session
            .start_simulation(route.clone(), 2.0, StartOptions::default(), 0)
            .unwrap();
        session.simulation_tick(1000).unwrap();
        assert_eq!(session.source(), Some(SampleSource::Simulated));

        session.start(Some(route), StartOptions::default(), 2000).unwrap();
        assert_eq!(session.source(), Some(SampleSource::Real));
        assert_eq!(session.state(), SessionState::Active);
        assert_eq!(session.sample_count(), 0);
        assert_eq!(session.simulation_interval_ms(), None);
        assert!(session
            .drain_events()
            .contains(&SessionEvent::SimulationCancelled));
    }

    #[test]
    fn test_simulation_cannot_preempt_real_tracking() {
        let route = path(10);
        let mut session = TrackingSession::new();
        session.start(None, StartOptions::default(), 0).unwrap();
        assert_eq!(
            session.start_simulation(route, 1.0, StartOptions::default(), 10),
            Err(TrackingError::AlreadyActive)
        );
        assert_eq!(session.source(), Some(SampleSource::Real));
    }

    #[test]
    fn test_real_samples_rejected_during_simulation() {
        let route = path(10);
        let mut session = TrackingSession::new();
        session
            .start_simulation(route.clone(), 1.0, StartOptions::default(), 0)
            .unwrap();
        assert!(session.ingest(sample_at(&route, 3, 100)).is_err());
        assert_eq!(session.sample_count(), 1);
    }

    #[test]
    fn test_short_simulation_still_ends() {
        let route = path(2);
        let mut session = TrackingSession::new();
        session
            .start_simulation(route, 1.0, StartOptions::default(), 0)
            .unwrap();

        assert!(matches!(
            session.simulation_tick(2000),
            Err(TrackingError::InsufficientTrackData {
                sample_count: 2,
                min_samples: 3,
                ..
            })
        ));
        assert_eq!(session.state(), SessionState::Stopped);
        assert_eq!(session.simulation_interval_ms(), None);
        assert!(matches!(
            session.simulation_tick(4000),
            Err(TrackingError::InvalidStateTransition {
                state: SessionState::Stopped,
                ..
            })
        ));
        assert!(session
            .drain_events()
            .iter()
            .all(|e| !matches!(e, SessionEvent::Finished(_))));
    }

    #[test]
    fn test_speed_change_requires_simulation() {
        let mut session = TrackingSession::new();
        assert!(session.set_speed_multiplier(2.0).is_err());

        session
            .start_simulation(path(10), 1.0, StartOptions::default(), 0)
            .unwrap();
        session.simulation_tick(2000).unwrap();
        assert_eq!(session.set_speed_multiplier(4.0).unwrap(), 500);
        assert_eq!(session.simulation_interval_ms(), Some(500));
        assert_eq!(session.progress().unwrap().closest_index, 1);
    }

    #[test]
    fn test_server_sync_updates_stats() {
        let mut session = TrackingSession::new();
        assert!(session
            .apply_server_sync(
                ServerSync {
                    elapsed_ms: 1000,
                    server_start_time: 0
                },
                0
            )
            .is_err());

        session.start(None, StartOptions::default(), 10_000).unwrap();
        session
            .apply_server_sync(
                ServerSync {
                    elapsed_ms: 42_000,
                    server_start_time: -32_000,
                },
                11_000,
            )
            .unwrap();

        let stats = session.stats();
        assert_eq!(stats.duration_seconds, 42);
        assert_eq!(stats.start_time_ms, -32_000);
        assert_eq!(stats.last_sync_time_ms, Some(11_000));
        assert_eq!(stats.server_time_offset_ms, Some(42_000));
        assert_eq!(session.tick(12_500), Some(43));
    }

    #[test]
    fn test_reset_from_any_state() {
        let route = path(5);
        let mut session = TrackingSession::new();
        session.reset();
        assert_eq!(session.state(), SessionState::Idle);

        session.start(Some(route.clone()), StartOptions::default(), 0).unwrap();
        session.ingest(sample_at(&route, 1, 1000)).unwrap();
        session.reset();

        let snapshot = session.snapshot();
        assert_eq!(snapshot.state, SessionState::Idle);
        assert_eq!(snapshot.stats, TrackingStats::default());
        assert!(snapshot.progress.is_none());
        assert!(snapshot.position.is_none());
    }

    #[test]
    fn test_sync_update_serializes_as_wire_format() {
        let route = path(3);
        let mut session = TrackingSession::new();
        session.start(None, StartOptions::default(), 0).unwrap();
        session.ingest(sample_at(&route, 0, 500)).unwrap();

        let update = session
            .drain_events()
            .into_iter()
            .find_map(|e| match e {
                SessionEvent::SampleAccepted(u) => Some(u),
                _ => None,
            })
            .unwrap();

        let json = serde_json::to_value(update).unwrap();
        assert_eq!(json["position"][0], -0.12);
        assert_eq!(json["position"][1], 51.5);
        assert_eq!(json["timestamp"], 500);
        assert!(json["stats"].get("distanceKm").is_some());
        assert!(json["stats"].get("speedKmh").is_some());
    }

    #[test]
    fn test_default_title() {
        assert_eq!(default_title(0), "Activity 1970-01-01 00:00");
    }
}
