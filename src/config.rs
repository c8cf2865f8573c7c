//! Tunable thresholds for tracking and the async session runner.
//!
//! Both structs deserialize from JSON so hosts can ship overrides without a
//! rebuild; missing fields fall back to the defaults.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackingError};

/// Configuration for matching, completion and finalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TrackerConfig {
    /// Positions farther than this from every path vertex are off-route.
    /// Default: 0.05 km (50 m)
    pub on_route_threshold_km: f64,

    /// Completion fires once the closest vertex is within this many vertices
    /// of the path end (`closest_index >= len - n`).
    /// Default: 3
    pub completion_tail_vertices: usize,

    /// Completion fires once progress exceeds this percentage.
    /// Default: 95
    pub completion_percent: u8,

    /// Maximum points in a finalized activity path.
    /// Default: 100
    pub max_snapshot_points: usize,

    /// Douglas-Peucker tolerance (degrees) applied before down-sampling.
    /// Default: 0.00001 (~1 meter)
    pub simplification_tolerance: f64,

    /// Minimum accepted samples before an activity can be saved.
    /// Default: 3
    pub min_samples_to_save: usize,

    /// Minimum distance before an activity can be saved.
    /// Default: 0.01 km
    pub min_distance_km_to_save: f64,

    /// Simulation step interval at 1x speed.
    /// Default: 2000 ms
    pub base_interval_ms: u64,

    /// Simulation step interval floor, regardless of multiplier.
    /// Default: 200 ms
    pub min_interval_ms: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            on_route_threshold_km: 0.05,
            completion_tail_vertices: 3,
            completion_percent: 95,
            max_snapshot_points: 100,
            simplification_tolerance: 0.00001,
            min_samples_to_save: 3,
            min_distance_km_to_save: 0.01,
            base_interval_ms: 2000,
            min_interval_ms: 200,
        }
    }
}

impl TrackerConfig {
    /// Parse a config from JSON, validating the result.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| TrackingError::ConfigError {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would break matching or finalization invariants.
    pub fn validate(&self) -> Result<()> {
        if !(self.on_route_threshold_km.is_finite() && self.on_route_threshold_km > 0.0) {
            return Err(config_error("onRouteThresholdKm must be positive"));
        }
        if self.completion_percent > 100 {
            return Err(config_error("completionPercent must be <= 100"));
        }
        // First and last point are always kept.
        if self.max_snapshot_points < 2 {
            return Err(config_error("maxSnapshotPoints must be >= 2"));
        }
        if self.simplification_tolerance < 0.0 || self.min_distance_km_to_save < 0.0 {
            return Err(config_error("tolerances must not be negative"));
        }
        if self.min_interval_ms == 0 || self.base_interval_ms < self.min_interval_ms {
            return Err(config_error(
                "baseIntervalMs must be >= minIntervalMs and minIntervalMs > 0",
            ));
        }
        Ok(())
    }
}

/// Configuration for the async session runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RunnerConfig {
    /// Session clock tick cadence.
    pub tick_interval_ms: u64,
    /// Re-acquire a fix when the subscription is silent this long.
    pub sample_timeout_ms: u64,
    /// Timeout for a single acquisition attempt.
    pub acquire_timeout_ms: u64,
    /// Attempts before a timeout becomes fatal.
    pub max_acquire_attempts: u32,
    /// Base backoff between attempts (doubles each retry).
    pub retry_backoff_ms: u64,
    /// Capacity of command and event channels.
    pub event_buffer: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            sample_timeout_ms: 15_000,
            acquire_timeout_ms: 10_000,
            max_acquire_attempts: 5,
            retry_backoff_ms: 250,
            event_buffer: 64,
        }
    }
}

fn config_error(message: &str) -> TrackingError {
    TrackingError::ConfigError {
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(TrackerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_from_json_partial_override() {
        let config = TrackerConfig::from_json(r#"{"onRouteThresholdKm": 0.1}"#).unwrap();
        assert_eq!(config.on_route_threshold_km, 0.1);
        assert_eq!(config.max_snapshot_points, 100);
    }

    #[test]
    fn test_from_json_rejects_bad_values() {
        let result = TrackerConfig::from_json(r#"{"maxSnapshotPoints": 1}"#);
        assert!(matches!(result, Err(TrackingError::ConfigError { .. })));

        let result = TrackerConfig::from_json("not json");
        assert!(matches!(result, Err(TrackingError::ConfigError { .. })));
    }

    #[test]
    fn test_runner_defaults() {
        let config = RunnerConfig::default();
        assert_eq!(config.max_acquire_attempts, 5);
        assert_eq!(config.tick_interval_ms, 1000);
    }
}
