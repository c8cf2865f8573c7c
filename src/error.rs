//! Unified error handling for the route-tracker library.
//!
//! Every fallible operation returns [`TrackingError`]. Position acquisition
//! errors are split into retryable (timeouts) and fatal (permission, device)
//! classes; state-machine violations are always surfaced to the caller.

use thiserror::Error;

use crate::session::SessionState;

/// Unified error type for tracking operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrackingError {
    /// Position acquisition timed out (retryable)
    #[error("Position acquisition timed out after {attempts} attempt(s)")]
    PositionTimeout { attempts: u32 },

    /// The user or OS denied access to location
    #[error("Location permission denied")]
    PositionPermissionDenied,

    /// No position provider is available on this device
    #[error("Position source unavailable: {message}")]
    PositionUnavailable { message: String },

    /// Reference path cannot be tracked or matched
    #[error("Path has {point_count} points, minimum {minimum_required} required")]
    PathInvalid {
        point_count: usize,
        minimum_required: usize,
    },

    /// Not enough recorded data to finalize an activity
    #[error(
        "Insufficient track data: {sample_count} samples ({min_samples} required), \
         {distance_km:.3} km ({min_distance_km:.3} km required)"
    )]
    InsufficientTrackData {
        sample_count: usize,
        min_samples: usize,
        distance_km: f64,
        min_distance_km: f64,
    },

    /// Sync collaborator could not be reached; tracking continues locally
    #[error("Sync channel unavailable: {message}")]
    SyncChannelUnavailable { message: String },

    /// `start` called while a real tracking session is already running
    #[error("Tracking session is already active")]
    AlreadyActive,

    /// Operation not permitted in the current lifecycle state
    #[error("Cannot {operation} while session is {state:?}")]
    InvalidStateTransition {
        operation: &'static str,
        state: SessionState,
    },

    /// Simulation speed multiplier must be finite and positive
    #[error("Invalid speed multiplier {multiplier}")]
    InvalidSpeedMultiplier { multiplier: f64 },

    /// Configuration error
    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    /// The session runner task has shut down
    #[error("Session runner is no longer running")]
    RunnerClosed,

    /// A real start was torn down before its first fix arrived
    #[error("Start cancelled before a position was acquired")]
    StartCancelled,

    /// Generic internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl TrackingError {
    /// Whether the operation that produced this error may be retried.
    ///
    /// Only acquisition timeouts are retryable; permission and availability
    /// failures are fatal on first sight.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TrackingError::PositionTimeout { .. })
    }
}

/// Result type alias for tracking operations.
pub type Result<T> = std::result::Result<T, TrackingError>;

/// Extension trait for converting Option to TrackingError.
pub trait OptionExt<T> {
    /// Convert Option to Result with a path-invalid error.
    fn ok_or_path_invalid(self, point_count: usize) -> Result<T>;

    /// Convert Option to Result with generic internal error.
    fn ok_or_internal(self, message: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_path_invalid(self, point_count: usize) -> Result<T> {
        self.ok_or(TrackingError::PathInvalid {
            point_count,
            minimum_required: crate::MIN_PATH_POINTS,
        })
    }

    fn ok_or_internal(self, message: &str) -> Result<T> {
        self.ok_or_else(|| TrackingError::Internal {
            message: message.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TrackingError::PathInvalid {
            point_count: 1,
            minimum_required: 2,
        };
        assert!(err.to_string().contains("1 points"));

        let err = TrackingError::InvalidStateTransition {
            operation: "stop",
            state: SessionState::Stopped,
        };
        assert_eq!(err.to_string(), "Cannot stop while session is Stopped");

        assert_eq!(
            TrackingError::StartCancelled.to_string(),
            "Start cancelled before a position was acquired"
        );
    }

    #[test]
    fn test_only_timeouts_are_retryable() {
        assert!(TrackingError::PositionTimeout { attempts: 1 }.is_retryable());
        assert!(!TrackingError::PositionPermissionDenied.is_retryable());
        assert!(!TrackingError::PositionUnavailable {
            message: "no gps".to_string()
        }
        .is_retryable());
    }

    #[test]
    fn test_option_ext() {
        let none: Option<i32> = None;
        let result = none.ok_or_path_invalid(1);
        assert!(matches!(
            result,
            Err(TrackingError::PathInvalid {
                point_count: 1,
                minimum_required: 2
            })
        ));

        let result = Some(3).ok_or_internal("unused");
        assert_eq!(result, Ok(3));
        let result = None::<i32>.ok_or_internal("missing");
        assert!(matches!(result, Err(TrackingError::Internal { .. })));
    }
}
