//! # Route Tracker
//!
//! Live GPS activity tracking and route-progress engine.
//!
//! This library provides:
//! - Distance, speed and duration tracking over a stream of position samples
//! - Progress matching against a reference path with a one-shot completion latch
//! - A session clock reconciled against an authoritative server offset
//! - Simulated walk-throughs of a path through the same pipeline as real samples
//! - An async runner that owns every timer and position subscription
//!
//! ## Features
//!
//! - **`runtime`** (default) - tokio session runner and collaborator traits
//!
//! ## Quick Start
//!
//! ```rust
//! use route_tracker::{GeoPoint, Path, PositionSample, StartOptions, TrackingSession};
//!
//! let route = Path::new(vec![
//!     GeoPoint::new(51.5074, -0.1278),
//!     GeoPoint::new(51.5080, -0.1290),
//!     GeoPoint::new(51.5090, -0.1300),
//! ]);
//!
//! let mut session = TrackingSession::new();
//! session.start(Some(route.clone()), StartOptions::default(), 0).unwrap();
//!
//! for (i, point) in route.points().iter().enumerate() {
//!     session.ingest(PositionSample::new(*point, i as i64 * 30_000)).unwrap();
//! }
//!
//! let progress = session.progress().unwrap();
//! assert!(progress.completed);
//! assert_eq!(progress.progress_percent, 100);
//! ```

use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{OptionExt, Result, TrackingError};

// Thresholds and runner settings
pub mod config;
pub use config::{RunnerConfig, TrackerConfig};

// Geographic utilities (distance, path length, simplification)
pub mod geo_utils;
pub use geo_utils::{distance_km, path_length_km};

// Distance and speed accumulation
pub mod accumulator;
pub use accumulator::{AccumulatorUpdate, DistanceAccumulator};

// Route progress matching
pub mod matching;
pub use matching::{match_progress, MatchDisposition, MatchOutcome, RouteMatcher, RouteProgress};

// Session clock
pub mod clock;
pub use clock::{format_hms, SessionClock};

// Synthetic walk-through
pub mod simulation;
pub use simulation::{SimulationDriver, SimulationStep};

// Tracking state machine
pub mod session;
pub use session::{
    FinishedActivity, SampleDisposition, SampleSource, ServerSync, SessionEvent, SessionSnapshot,
    SessionState, StartOptions, SyncStats, SyncUpdate, TrackingSession, TrackingStats,
};

// Process-wide session registry
pub mod registry;
pub use registry::{remove_session, session_ids, with_session, SESSIONS};

// Async session runner
#[cfg(feature = "runtime")]
pub mod runtime;
#[cfg(feature = "runtime")]
pub use runtime::{
    acquire_with_retry, ActivitySink, PositionError, PositionSource, PositionSubscription,
    SessionHandle, SessionRunner, SyncChannel,
};

/// Initialize logging for Android.
///
/// Routes `log` records to logcat under the `RouteTrackerRust` tag. Safe to
/// call more than once.
#[cfg(target_os = "android")]
pub fn init_logging() {
    use android_logger::Config;
    use log::LevelFilter;

    android_logger::init_once(
        Config::default()
            .with_max_level(LevelFilter::Debug)
            .with_tag("RouteTrackerRust"),
    );
}

/// Initialize logging.
///
/// No-op off Android: desktop and server hosts install their own `log`
/// backend (tests use `env_logger`).
#[cfg(not(target_os = "android"))]
pub fn init_logging() {}

/// Minimum number of points for a path to be tracked or matched.
pub const MIN_PATH_POINTS: usize = 2;

// ============================================================================
// Core Types
// ============================================================================

/// A coordinate with latitude and longitude in degrees.
///
/// # Example
/// ```
/// use route_tracker::GeoPoint;
/// let point = GeoPoint::new(51.5074, -0.1278); // London
/// assert!(point.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    /// Create a new point.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

/// Wire/storage coordinate, serialized as `[longitude, latitude]`.
///
/// Only used at the boundary; convert with `From`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LngLat(pub f64, pub f64);

impl LngLat {
    pub fn lng(&self) -> f64 {
        self.0
    }

    pub fn lat(&self) -> f64 {
        self.1
    }
}

impl From<GeoPoint> for LngLat {
    fn from(p: GeoPoint) -> Self {
        LngLat(p.longitude, p.latitude)
    }
}

impl From<LngLat> for GeoPoint {
    fn from(c: LngLat) -> Self {
        GeoPoint::new(c.1, c.0)
    }
}

/// A single position fix. Immutable once created.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionSample {
    pub point: GeoPoint,
    /// Unix timestamp in milliseconds
    pub timestamp_ms: i64,
    /// Horizontal accuracy in meters, if the source reports one
    pub accuracy_m: Option<f64>,
}

impl PositionSample {
    pub fn new(point: GeoPoint, timestamp_ms: i64) -> Self {
        Self {
            point,
            timestamp_ms,
            accuracy_m: None,
        }
    }

    pub fn with_accuracy(point: GeoPoint, timestamp_ms: i64, accuracy_m: f64) -> Self {
        Self {
            point,
            timestamp_ms,
            accuracy_m: Some(accuracy_m),
        }
    }
}

/// An ordered reference path. Read-only once built.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Path {
    points: Vec<GeoPoint>,
}

impl Path {
    pub fn new(points: Vec<GeoPoint>) -> Self {
        Self { points }
    }

    /// Build a path from wire coordinates.
    pub fn from_lng_lat(coords: &[LngLat]) -> Self {
        Self::new(coords.iter().copied().map(GeoPoint::from).collect())
    }

    /// Wire representation of the path.
    pub fn to_lng_lat(&self) -> Vec<LngLat> {
        self.points.iter().copied().map(LngLat::from).collect()
    }

    pub fn points(&self) -> &[GeoPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Whether the path has enough points to be tracked or matched.
    pub fn is_trackable(&self) -> bool {
        self.points.len() >= MIN_PATH_POINTS
    }

    /// Total length in kilometers.
    pub fn length_km(&self) -> f64 {
        path_length_km(&self.points)
    }
}

// ============================================================================
// Tests
// ============================================================================
