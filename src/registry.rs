//! # Session Registry
//!
//! Process-wide map of tracking sessions keyed by id. This is the entry
//! point for synchronous hosts (an FFI layer, a request handler) that drive
//! sessions by id instead of holding a [`TrackingSession`] or running a
//! `SessionRunner`. Each entry is a fully independent session; sessions
//! never share state.
//!
//! ```rust
//! use route_tracker::{registry, GeoPoint, PositionSample, SessionState, StartOptions};
//!
//! registry::with_session("ride-1", |s| s.start(None, StartOptions::default(), 0)).unwrap();
//! registry::with_session("ride-1", |s| {
//!     s.ingest(PositionSample::new(GeoPoint::new(51.5, -0.12), 1_000))
//! })
//! .unwrap();
//!
//! let state = registry::with_session("ride-1", |s| s.state());
//! assert_eq!(state, SessionState::Active);
//! registry::remove_session("ride-1");
//! ```

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use log::info;
use once_cell::sync::Lazy;

use crate::session::TrackingSession;

/// Global session map.
pub static SESSIONS: Lazy<Mutex<HashMap<String, TrackingSession>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Run `f` against the session with `id`, creating an idle one if needed.
pub fn with_session<F, R>(id: &str, f: F) -> R
where
    F: FnOnce(&mut TrackingSession) -> R,
{
    let mut sessions = SESSIONS.lock().unwrap_or_else(PoisonError::into_inner);
    let session = sessions.entry(id.to_string()).or_insert_with(|| {
        info!("[Registry] Creating session '{}'", id);
        TrackingSession::new()
    });
    f(session)
}

/// Remove a session, returning it if it existed.
pub fn remove_session(id: &str) -> Option<TrackingSession> {
    SESSIONS
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(id)
}

/// Ids of all registered sessions.
pub fn session_ids() -> Vec<String> {
    SESSIONS
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .keys()
        .cloned()
        .collect()
}
