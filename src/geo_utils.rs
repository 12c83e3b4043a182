//! # Geographic Utilities
//!
//! Distance computations between a walker and a route path.
//!
//! | Function | Description |
//! |----------|-------------|
//! | [`haversine_distance`] | Great-circle distance between two GPS points |
//! | [`distance_to_segment`] | Distance from a point to a route segment |
//! | [`distance_to_path`] | Nearest-approach distance from a point to a route path |
//! | [`nearest_segment`] | Index and distance of the closest segment of a path |
//! | [`polyline_length`] | Total length of a path in meters |
//! | [`meters_to_degrees`] | Convert meters to approximate degrees at a latitude |
//!
//! ## Example
//!
//! ```rust
//! use walk_navigator::{GpsPoint, geo_utils};
//!
//! let path = vec![
//!     GpsPoint::new(35.0000, 135.7600),
//!     GpsPoint::new(35.0100, 135.7600),
//! ];
//!
//! // ~91m east of the middle of the segment
//! let walker = GpsPoint::new(35.0050, 135.7610);
//! let off_route = geo_utils::distance_to_path(&walker, &path);
//! assert!((off_route - 91.0).abs() < 2.0);
//! ```
//!
//! ## Algorithm Notes
//!
//! Distances are great-circle (haversine) distances on a spherical Earth with
//! radius 6,371 km. Projection onto a segment is done on a local plane where
//! longitude is scaled by the cosine of the segment's mean latitude; the
//! projected point is then measured with haversine. This is accurate for
//! segment lengths typical of walking routes (well under a few kilometers).

use crate::GpsPoint;
use geo::{Distance, Haversine, Point};

// =============================================================================
// Distance Functions
// =============================================================================

/// Calculate the great-circle distance between two GPS points using the Haversine formula.
///
/// # Example
///
/// ```rust
/// use walk_navigator::{GpsPoint, geo_utils};
///
/// let london = GpsPoint::new(51.5074, -0.1278);
/// let paris = GpsPoint::new(48.8566, 2.3522);
///
/// let distance = geo_utils::haversine_distance(&london, &paris);
/// assert!((distance - 343_560.0).abs() < 1000.0); // ~344 km
/// ```
#[inline]
pub fn haversine_distance(p1: &GpsPoint, p2: &GpsPoint) -> f64 {
    let point1 = Point::new(p1.longitude, p1.latitude);
    let point2 = Point::new(p2.longitude, p2.latitude);
    Haversine::distance(point1, point2)
}

/// Closest point to `p` on the segment `start`..`end`.
///
/// The projection parameter is clamped to `[0, 1]` so the result always lies on
/// the segment. A zero-length segment returns `start`.
pub fn closest_point_on_segment(p: &GpsPoint, start: &GpsPoint, end: &GpsPoint) -> GpsPoint {
    let lng_scale = ((start.latitude + end.latitude) / 2.0).to_radians().cos();

    let dx = (end.longitude - start.longitude) * lng_scale;
    let dy = end.latitude - start.latitude;
    let len_sq = dx * dx + dy * dy;

    if len_sq == 0.0 {
        return *start;
    }

    let px = (p.longitude - start.longitude) * lng_scale;
    let py = p.latitude - start.latitude;
    let param = ((px * dx + py * dy) / len_sq).clamp(0.0, 1.0);

    GpsPoint::new(
        start.latitude + param * (end.latitude - start.latitude),
        start.longitude + param * (end.longitude - start.longitude),
    )
}

/// Distance in meters from `p` to the segment `start`..`end`.
///
/// A degenerate segment (`start == end`) gives exactly `haversine_distance(p, start)`.
pub fn distance_to_segment(p: &GpsPoint, start: &GpsPoint, end: &GpsPoint) -> f64 {
    let closest = closest_point_on_segment(p, start, end);
    haversine_distance(p, &closest)
}

/// Nearest-approach distance in meters from `p` to a path.
///
/// The minimum over the distance to every vertex and to every consecutive
/// segment. An empty path returns `f64::INFINITY`.
pub fn distance_to_path(p: &GpsPoint, path: &[GpsPoint]) -> f64 {
    let vertex_min = path
        .iter()
        .map(|v| haversine_distance(p, v))
        .fold(f64::INFINITY, f64::min);

    nearest_segment(p, path).map_or(vertex_min, |(_, d)| d.min(vertex_min))
}

/// Exhaustive search for the segment of `path` closest to `p`.
///
/// Returns `(segment_index, distance)` where segment `i` joins `path[i]` and
/// `path[i + 1]`. Ties keep the earliest segment. Paths with fewer than two
/// points have no segments and return `None`.
pub fn nearest_segment(p: &GpsPoint, path: &[GpsPoint]) -> Option<(usize, f64)> {
    path.windows(2)
        .enumerate()
        .map(|(i, w)| (i, distance_to_segment(p, &w[0], &w[1])))
        .fold(None, |best: Option<(usize, f64)>, (i, d)| match best {
            Some((_, best_d)) if best_d <= d => best,
            _ => Some((i, d)),
        })
}

/// Calculate the total length of a path in meters.
///
/// Empty or single-point paths return 0.0.
pub fn polyline_length(points: &[GpsPoint]) -> f64 {
    points
        .windows(2)
        .map(|w| haversine_distance(&w[0], &w[1]))
        .sum()
}

/// Convert meters to approximate degrees at a given latitude.
///
/// Uses the longitude scale at that latitude. Away from the equator this is
/// larger than the latitude equivalent, so callers building a square search
/// window from it only need a small margin to cover both axes.
#[inline]
pub fn meters_to_degrees(meters: f64, latitude: f64) -> f64 {
    let lat_rad = latitude.to_radians();
    let meters_per_degree = 111_320.0 * lat_rad.cos().max(0.1);
    meters / meters_per_degree
}

// =============================================================================
// Unit Tests
// =============================================================================
