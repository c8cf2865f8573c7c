//! # Geographic Utilities
//!
//! Distance and path helpers shared by the accumulator, matcher and session.
//!
//! | Function | Description |
//! |----------|-------------|
//! | [`distance_km`] | Great-circle distance between two points |
//! | [`path_length_km`] | Total length of a path |
//! | [`simplify_path`] | Bounded-size simplification for finalized tracks |
//!
//! ## Example
//!
//! ```rust
//! use route_tracker::{GeoPoint, geo_utils};
//!
//! let track = vec![
//!     GeoPoint::new(51.5074, -0.1278),
//!     GeoPoint::new(51.5080, -0.1290),
//!     GeoPoint::new(51.5090, -0.1300),
//! ];
//!
//! let length = geo_utils::path_length_km(&track);
//! assert!(length > 0.0);
//! ```

use geo::{algorithm::simplify::Simplify, Coord, LineString};

use crate::GeoPoint;

/// Mean Earth radius used by the haversine formula.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

// =============================================================================
// Distance Functions
// =============================================================================

/// Great-circle distance between two points in kilometers (haversine).
///
/// Symmetric in its arguments and zero for identical points.
///
/// ```rust
/// use route_tracker::{GeoPoint, geo_utils};
///
/// let london = GeoPoint::new(51.5074, -0.1278);
/// let paris = GeoPoint::new(48.8566, 2.3522);
///
/// let distance = geo_utils::distance_km(&london, &paris);
/// assert!((distance - 343.5).abs() < 1.0);
/// ```
#[inline]
pub fn distance_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2)
        + a.latitude.to_radians().cos() * b.latitude.to_radians().cos() * (d_lon / 2.0).sin().powi(2);

    // Rounding can push h marginally above 1 for antipodal points
    let c = 2.0 * h.sqrt().min(1.0).asin();

    EARTH_RADIUS_KM * c
}

/// Sum of consecutive distances along a path, in kilometers.
///
/// Empty or single-point paths return 0.0.
pub fn path_length_km(points: &[GeoPoint]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }

    points
        .windows(2)
        .map(|w| distance_km(&w[0], &w[1]))
        .sum()
}

// =============================================================================
// Simplification
// =============================================================================

/// Reduce a track to at most `max_points` points.
///
/// Runs Douglas-Peucker with `tolerance` (degrees) and then samples uniformly
/// if the result is still too long. The first and last input points are
/// always kept. Tracks already within the limit are returned unchanged.
pub fn simplify_path(points: &[GeoPoint], max_points: usize, tolerance: f64) -> Vec<GeoPoint> {
    let max_points = max_points.max(2);
    if points.len() <= max_points {
        return points.to_vec();
    }

    let line = LineString::new(
        points
            .iter()
            .map(|p| Coord {
                x: p.longitude,
                y: p.latitude,
            })
            .collect(),
    );
    let simplified: Vec<GeoPoint> = line
        .simplify(&tolerance)
        .0
        .iter()
        .map(|c| GeoPoint::new(c.y, c.x))
        .collect();

    if simplified.len() <= max_points {
        return simplified;
    }

    // Uniform sampling, spread so index 0 and len-1 are both hit
    let last = simplified.len() - 1;
    (0..max_points)
        .map(|i| simplified[i * last / (max_points - 1)])
        .collect()
}
