//! Synthetic walk-through of a reference path.
//!
//! The driver only produces samples; the session feeds them through the same
//! accumulator and matcher as real positions. Cadence is owned by whoever
//! calls [`SimulationDriver::step`] (the runner's interval timer).

use log::{debug, info};

use crate::config::TrackerConfig;
use crate::error::{OptionExt, Result, TrackingError};
use crate::{Path, PositionSample};

/// Output of one simulation step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SimulationStep {
    /// Intermediate synthetic sample
    Sample(PositionSample),
    /// Sample at the final vertex; reported exactly once
    Finished(PositionSample),
    /// Already finished, nothing emitted
    Done,
}

/// Steps through a path one vertex per tick.
#[derive(Debug, Clone)]
pub struct SimulationDriver {
    path: Path,
    index: usize,
    speed_multiplier: f64,
    interval_ms: u64,
    base_interval_ms: u64,
    min_interval_ms: u64,
    finished: bool,
}

impl SimulationDriver {
    /// Create a driver positioned at the first vertex.
    pub fn new(path: Path, speed_multiplier: f64, config: &TrackerConfig) -> Result<Self> {
        let point_count = path.len();
        let path = Some(path)
            .filter(Path::is_trackable)
            .ok_or_path_invalid(point_count)?;
        validate_multiplier(speed_multiplier)?;

        Ok(Self {
            path,
            index: 0,
            speed_multiplier,
            interval_ms: compute_interval_ms(
                speed_multiplier,
                config.base_interval_ms,
                config.min_interval_ms,
            ),
            base_interval_ms: config.base_interval_ms,
            min_interval_ms: config.min_interval_ms,
            finished: false,
        })
    }

    /// Seed sample at the first vertex, emitted when the simulation starts.
    pub fn begin(&self, now_ms: i64) -> PositionSample {
        info!(
            "[Simulation] Starting {} vertices at {}x ({} ms/step)",
            self.path.len(),
            self.speed_multiplier,
            self.interval_ms
        );
        PositionSample::new(self.path.points()[0], now_ms)
    }

    /// Advance one vertex.
    pub fn step(&mut self, now_ms: i64) -> SimulationStep {
        if self.finished {
            return SimulationStep::Done;
        }

        let last = self.path.len() - 1;
        self.index = (self.index + 1).min(last);
        let sample = PositionSample::new(self.path.points()[self.index], now_ms);
        debug!("[Simulation] Step {}/{}", self.index, last);

        if self.index == last {
            self.finished = true;
            info!("[Simulation] Reached final vertex");
            SimulationStep::Finished(sample)
        } else {
            SimulationStep::Sample(sample)
        }
    }

    /// Change speed without touching the current index. Returns the new interval.
    pub fn set_speed_multiplier(&mut self, speed_multiplier: f64) -> Result<u64> {
        validate_multiplier(speed_multiplier)?;
        self.speed_multiplier = speed_multiplier;
        self.interval_ms =
            compute_interval_ms(speed_multiplier, self.base_interval_ms, self.min_interval_ms);
        debug!(
            "[Simulation] Speed {}x -> {} ms/step at vertex {}",
            speed_multiplier, self.interval_ms, self.index
        );
        Ok(self.interval_ms)
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    pub fn speed_multiplier(&self) -> f64 {
        self.speed_multiplier
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// `max(min_interval, base_interval / multiplier)`
pub fn compute_interval_ms(speed_multiplier: f64, base_interval_ms: u64, min_interval_ms: u64) -> u64 {
    let interval = (base_interval_ms as f64 / speed_multiplier) as u64;
    interval.max(min_interval_ms)
}

fn validate_multiplier(speed_multiplier: f64) -> Result<()> {
    if speed_multiplier.is_finite() && speed_multiplier > 0.0 {
        Ok(())
    } else {
        Err(TrackingError::InvalidSpeedMultiplier {
            multiplier: speed_multiplier,
        })
    }
}
