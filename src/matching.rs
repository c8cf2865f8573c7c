//! Route progress matching against a reference path.
//!
//! A position is snapped to its closest path vertex (no segment
//! interpolation). Progress only ever moves forward: an update is accepted
//! only when it extends the completed part of the path, which makes noisy
//! or out-of-order samples harmless. Completion is a one-shot latch.

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::config::TrackerConfig;
use crate::error::{OptionExt, Result};
use crate::geo_utils::distance_km;
use crate::{GeoPoint, Path, MIN_PATH_POINTS};

/// Progress along a reference path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteProgress {
    /// Index of the path vertex closest to the last accepted position
    pub closest_index: usize,
    /// `path[0..=closest_index]`; empty until the first accepted match
    pub completed_path: Vec<GeoPoint>,
    /// `path[closest_index..]`
    pub remaining_path: Vec<GeoPoint>,
    /// Share of vertices consumed, 0-100
    pub progress_percent: u8,
    /// Completion latch
    pub completed: bool,
}

impl RouteProgress {
    /// Progress before any position has been matched.
    pub fn initial(path: &[GeoPoint]) -> Self {
        Self {
            remaining_path: path.to_vec(),
            ..Self::default()
        }
    }
}

/// What happened to a position fed to the matcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MatchDisposition {
    /// Path too short to match against
    Unmatched,
    /// Farther than the on-route threshold from every vertex
    OffRoute,
    /// On route but not ahead of the previous progress
    NotAdvanced,
    /// Progress moved forward
    Advanced,
}

/// Result of matching one position.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchOutcome {
    /// Progress after this position (the previous progress unless advanced)
    pub progress: RouteProgress,
    pub disposition: MatchDisposition,
    /// True only for the match that set the completion latch
    pub completion_fired: bool,
    /// Distance to the closest vertex, when the path could be scanned
    pub distance_to_route_km: Option<f64>,
}

impl MatchOutcome {
    fn unchanged(previous: &RouteProgress, disposition: MatchDisposition, distance: Option<f64>) -> Self {
        Self {
            progress: previous.clone(),
            disposition,
            completion_fired: false,
            distance_to_route_km: distance,
        }
    }

    pub fn advanced(&self) -> bool {
        self.disposition == MatchDisposition::Advanced
    }
}

/// Find the closest vertex by linear scan. Ties resolve to the lower index.
pub fn closest_vertex(path: &[GeoPoint], position: &GeoPoint) -> Option<(usize, f64)> {
    path.iter()
        .map(|p| distance_km(position, p))
        .enumerate()
        .fold(None, |best, (i, d)| match best {
            Some((_, best_d)) if best_d <= d => best,
            _ => Some((i, d)),
        })
}

/// Vertex-snapped progress percentage, clamped to 0-100.
pub fn progress_percent(closest_index: usize, path_len: usize) -> u8 {
    if path_len < MIN_PATH_POINTS {
        return 0;
    }
    let pct = (100.0 * closest_index as f64 / (path_len - 1) as f64).round();
    pct.clamp(0.0, 100.0) as u8
}

/// Match a position against a path given the previous progress.
///
/// Pure function; [`RouteMatcher`] wraps it with owned state.
pub fn match_progress(
    path: &[GeoPoint],
    position: &GeoPoint,
    previous: &RouteProgress,
    config: &TrackerConfig,
) -> MatchOutcome {
    if path.len() < MIN_PATH_POINTS {
        return MatchOutcome::unchanged(previous, MatchDisposition::Unmatched, None);
    }

    let Some((closest_index, min_distance)) = closest_vertex(path, position) else {
        return MatchOutcome::unchanged(previous, MatchDisposition::Unmatched, None);
    };

    if min_distance >= config.on_route_threshold_km {
        return MatchOutcome::unchanged(previous, MatchDisposition::OffRoute, Some(min_distance));
    }

    let completed_len = closest_index + 1;
    if completed_len <= previous.completed_path.len() {
        return MatchOutcome::unchanged(previous, MatchDisposition::NotAdvanced, Some(min_distance));
    }

    let percent = progress_percent(closest_index, path.len());

    let tail_start = path.len().saturating_sub(config.completion_tail_vertices);
    let reached_end = closest_index >= tail_start || percent > config.completion_percent;
    let completion_fired = !previous.completed && reached_end;

    let progress = RouteProgress {
        closest_index,
        completed_path: path[..completed_len].to_vec(),
        remaining_path: path[closest_index..].to_vec(),
        progress_percent: percent,
        completed: previous.completed || completion_fired,
    };

    MatchOutcome {
        progress,
        disposition: MatchDisposition::Advanced,
        completion_fired,
        distance_to_route_km: Some(min_distance),
    }
}

/// Stateful matcher for a single session's reference path.
#[derive(Debug, Clone)]
pub struct RouteMatcher {
    path: Path,
    progress: RouteProgress,
    config: TrackerConfig,
}

impl RouteMatcher {
    /// Create a matcher; paths with fewer than two points are rejected.
    pub fn new(path: Path, config: TrackerConfig) -> Result<Self> {
        let point_count = path.len();
        let path = Some(path)
            .filter(Path::is_trackable)
            .ok_or_path_invalid(point_count)?;

        Ok(Self {
            progress: RouteProgress::initial(path.points()),
            path,
            config,
        })
    }

    /// Match a position, keeping the new progress if it advanced.
    pub fn match_position(&mut self, position: &GeoPoint) -> MatchOutcome {
        let outcome = match_progress(self.path.points(), position, &self.progress, &self.config);

        match outcome.disposition {
            MatchDisposition::Advanced => {
                debug!(
                    "[RouteMatcher] Advanced to vertex {}/{} ({}%)",
                    outcome.progress.closest_index,
                    self.path.len() - 1,
                    outcome.progress.progress_percent
                );
                if outcome.completion_fired {
                    info!(
                        "[RouteMatcher] Route completed at vertex {}",
                        outcome.progress.closest_index
                    );
                }
                self.progress = outcome.progress.clone();
            }
            MatchDisposition::OffRoute => {
                debug!(
                    "[RouteMatcher] Off route by {:.0} m",
                    outcome.distance_to_route_km.unwrap_or_default() * 1000.0
                );
            }
            MatchDisposition::NotAdvanced | MatchDisposition::Unmatched => {}
        }

        outcome
    }

    pub fn progress(&self) -> &RouteProgress {
        &self.progress
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_completed(&self) -> bool {
        self.progress.completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Points ~111 m apart heading north.
    fn straight_path(n: usize) -> Vec<GeoPoint> {
        (0..n)
            .map(|i| GeoPoint::new(51.5 + i as f64 * 0.001, -0.12))
            .collect()
    }

    #[test]
    fn test_closest_vertex() {
        let path = straight_path(5);
        let (idx, dist) = closest_vertex(&path, &GeoPoint::new(51.5021, -0.12)).unwrap();
        assert_eq!(idx, 2);
        assert!(dist < 0.02);
        assert!(closest_vertex(&[], &path[0]).is_none());
    }

    #[test]
    fn test_short_path_is_unmatched() {
        let path = straight_path(1);
        let outcome = match_progress(
            &path,
            &path[0],
            &RouteProgress::default(),
            &TrackerConfig::default(),
        );
        assert_eq!(outcome.disposition, MatchDisposition::Unmatched);
        assert_eq!(outcome.progress, RouteProgress::default());
    }

    #[test]
    fn test_off_route_keeps_previous() {
        let path = straight_path(10);
        let previous = RouteProgress::initial(&path);
        // ~700 m east of the path
        let outcome = match_progress(
            &path,
            &GeoPoint::new(51.502, -0.11),
            &previous,
            &TrackerConfig::default(),
        );
        assert_eq!(outcome.disposition, MatchDisposition::OffRoute);
        assert_eq!(outcome.progress, previous);
    }

    #[test]
    fn test_split_shares_closest_vertex() {
        let path = straight_path(10);
        let outcome = match_progress(
            &path,
            &path[4],
            &RouteProgress::initial(&path),
            &TrackerConfig::default(),
        );
        assert!(outcome.advanced());
        assert_eq!(outcome.progress.completed_path, path[..5].to_vec());
        assert_eq!(outcome.progress.remaining_path, path[4..].to_vec());
        assert_eq!(outcome.progress.progress_percent, 44);
        assert!(!outcome.progress.completed);
    }

    #[test]
    fn test_backward_sample_rejected() {
        let path = straight_path(10);
        let config = TrackerConfig::default();
        let ahead = match_progress(&path, &path[6], &RouteProgress::initial(&path), &config);
        let back = match_progress(&path, &path[3], &ahead.progress, &config);

        assert_eq!(back.disposition, MatchDisposition::NotAdvanced);
        assert_eq!(back.progress, ahead.progress);
    }

    #[test]
    fn test_completion_latch_fires_once() {
        let path = straight_path(20);
        let mut matcher = RouteMatcher::new(Path::new(path.clone()), TrackerConfig::default()).unwrap();

        let mut fired = 0;
        for p in &path {
            if matcher.match_position(p).completion_fired {
                fired += 1;
            }
        }
        // Linger at the end
        for _ in 0..5 {
            if matcher.match_position(&path[19]).completion_fired {
                fired += 1;
            }
        }

        assert_eq!(fired, 1);
        assert!(matcher.is_completed());
        assert_eq!(matcher.progress().progress_percent, 100);
    }

    #[test]
    fn test_completion_by_tail_index() {
        let path = straight_path(50);
        let mut matcher = RouteMatcher::new(Path::new(path.clone()), TrackerConfig::default()).unwrap();

        // Index 47 = len - 3, 96% would also trigger; index 46 is 94%
        assert!(!matcher.match_position(&path[46]).completion_fired);
        assert!(matcher.match_position(&path[47]).completion_fired);
    }

    #[test]
    fn test_matcher_rejects_short_path() {
        let result = RouteMatcher::new(Path::new(straight_path(1)), TrackerConfig::default());
        assert!(matches!(
            result,
            Err(crate::TrackingError::PathInvalid { point_count: 1, .. })
        ));
    }

    #[test]
    fn test_progress_percent_bounds() {
        assert_eq!(progress_percent(0, 5), 0);
        assert_eq!(progress_percent(4, 5), 100);
        assert_eq!(progress_percent(10, 5), 100);
        assert_eq!(progress_percent(0, 1), 0);
    }
}
