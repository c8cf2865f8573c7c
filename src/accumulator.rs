//! Running distance and speed over a stream of position samples.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::geo_utils::distance_km;
use crate::PositionSample;

const MS_PER_HOUR: f64 = 3_600_000.0;

/// Result of feeding one sample to the accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccumulatorUpdate {
    /// Distance added by this sample
    pub increment_km: f64,
    /// Cumulative distance since the session started
    pub total_km: f64,
    /// Average speed since the session started
    pub speed_kmh: f64,
}

/// Accumulates distance between successive samples.
///
/// Distance only ever grows here; clearing it is the session's job.
#[derive(Debug, Clone)]
pub struct DistanceAccumulator {
    start_time_ms: i64,
    total_km: f64,
    speed_kmh: f64,
    last_sample: Option<PositionSample>,
    sample_count: usize,
}

impl DistanceAccumulator {
    /// Create an accumulator for a session that started at `start_time_ms`.
    pub fn new(start_time_ms: i64) -> Self {
        Self {
            start_time_ms,
            total_km: 0.0,
            speed_kmh: 0.0,
            last_sample: None,
            sample_count: 0,
        }
    }

    /// Add a sample and return the increment, total and speed.
    ///
    /// The first sample only establishes the baseline.
    pub fn add_sample(&mut self, sample: &PositionSample) -> AccumulatorUpdate {
        self.sample_count += 1;

        let increment_km = match self.last_sample.replace(*sample) {
            None => 0.0,
            Some(last) => distance_km(&last.point, &sample.point),
        };

        self.total_km += increment_km;

        let elapsed_ms = sample.timestamp_ms - self.start_time_ms;
        self.speed_kmh = if elapsed_ms > 0 {
            self.total_km / (elapsed_ms as f64 / MS_PER_HOUR)
        } else {
            0.0
        };

        debug!(
            "[Accumulator] +{:.4} km, total {:.4} km, {:.1} km/h",
            increment_km, self.total_km, self.speed_kmh
        );

        AccumulatorUpdate {
            increment_km,
            total_km: self.total_km,
            speed_kmh: self.speed_kmh,
        }
    }

    pub fn total_km(&self) -> f64 {
        self.total_km
    }

    pub fn speed_kmh(&self) -> f64 {
        self.speed_kmh
    }

    /// Number of samples fed so far, including the baseline.
    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    pub fn last_sample(&self) -> Option<&PositionSample> {
        self.last_sample.as_ref()
    }
}
