//! Session clock reconciled against an authoritative server offset.
//!
//! The local clock is always usable on its own. When a sync message arrives
//! the server's elapsed value replaces the local estimate and local time is
//! only used to extrapolate from the moment of the sync.

use log::debug;
use serde::{Deserialize, Serialize};

/// Elapsed-time tracker for one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionClock {
    start_time_ms: i64,
    last_sync_time_ms: Option<i64>,
    server_elapsed_ms: Option<i64>,
}

impl SessionClock {
    pub fn new(start_time_ms: i64) -> Self {
        Self {
            start_time_ms,
            last_sync_time_ms: None,
            server_elapsed_ms: None,
        }
    }

    /// Elapsed milliseconds at `now_ms`, clamped at zero.
    pub fn elapsed_ms(&self, now_ms: i64) -> i64 {
        let elapsed = match (self.server_elapsed_ms, self.last_sync_time_ms) {
            (Some(server_elapsed), Some(last_sync)) => server_elapsed + (now_ms - last_sync),
            _ => now_ms - self.start_time_ms,
        };
        elapsed.max(0)
    }

    /// Whole elapsed seconds at `now_ms`. Never negative.
    pub fn tick(&self, now_ms: i64) -> u64 {
        (self.elapsed_ms(now_ms) / 1000) as u64
    }

    /// Adopt the server's view of the session.
    pub fn apply_server_sync(&mut self, server_start_time_ms: i64, server_elapsed_ms: i64, now_ms: i64) {
        debug!(
            "[SessionClock] Sync: server elapsed {} ms (local {} ms)",
            server_elapsed_ms,
            self.elapsed_ms(now_ms)
        );
        self.start_time_ms = server_start_time_ms;
        self.server_elapsed_ms = Some(server_elapsed_ms);
        self.last_sync_time_ms = Some(now_ms);
    }

    pub fn start_time_ms(&self) -> i64 {
        self.start_time_ms
    }

    pub fn last_sync_time_ms(&self) -> Option<i64> {
        self.last_sync_time_ms
    }

    pub fn server_elapsed_ms(&self) -> Option<i64> {
        self.server_elapsed_ms
    }
}

/// Render seconds as `HH:MM:SS`. Hours are not wrapped at 24.
pub fn format_hms(total_seconds: u64) -> String {
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}
