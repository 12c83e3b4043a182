//! # Path Index
//!
//! Assigns a live position to the nearest segment of the active route.
//!
//! Segment bounding boxes are bulk-loaded into an R-tree. A query pulls the
//! segments whose boxes touch a square window around the walker and measures
//! only those. When nothing within the window is close enough, the query falls
//! back to an exhaustive scan, so the result always equals the brute-force
//! minimum over vertices and segments.

use crate::geo_utils::{distance_to_segment, haversine_distance, meters_to_degrees};
use crate::GpsPoint;
use rstar::{RTree, RTreeObject, AABB};

/// Margin applied to the search window to absorb degree/meter approximations.
const WINDOW_MARGIN: f64 = 1.05;

/// Above this latitude the square window stops being conservative; scan instead.
const MAX_INDEXED_LATITUDE: f64 = 80.0;

/// Result of matching a position against a route path.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathMatch {
    /// Nearest-approach distance to the path in meters
    pub distance_meters: f64,
    /// Segment `i` joins path points `i` and `i + 1`
    pub segment_index: usize,
}

/// A route segment with its position in the path (for R-tree queries)
#[derive(Debug, Clone, Copy)]
struct IndexedSegment {
    index: usize,
    start: GpsPoint,
    end: GpsPoint,
}

impl IndexedSegment {
    /// Distance to the segment or either endpoint, whichever is smaller.
    fn distance(&self, p: &GpsPoint) -> f64 {
        distance_to_segment(p, &self.start, &self.end)
            .min(haversine_distance(p, &self.start))
            .min(haversine_distance(p, &self.end))
    }
}

impl RTreeObject for IndexedSegment {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(
            [self.start.longitude, self.start.latitude],
            [self.end.longitude, self.end.latitude],
        )
    }
}

/// Spatial index over the segments of one route path.
#[derive(Debug, Clone)]
pub struct PathIndex {
    tree: RTree<IndexedSegment>,
    segments: Vec<IndexedSegment>,
    single_point: Option<GpsPoint>,
}

impl PathIndex {
    /// Build an index for `path`.
    pub fn new(path: &[GpsPoint]) -> Self {
        let segments: Vec<IndexedSegment> = path
            .windows(2)
            .enumerate()
            .map(|(index, w)| IndexedSegment { index, start: w[0], end: w[1] })
            .collect();

        let single_point = if path.len() == 1 { Some(path[0]) } else { None };

        Self {
            tree: RTree::bulk_load(segments.clone()),
            segments,
            single_point,
        }
    }

    /// Number of indexed segments.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty() && self.single_point.is_none()
    }

    /// Nearest segment to `p`.
    ///
    /// `search_radius_meters` sizes the candidate window; it affects speed,
    /// never the answer. Returns `None` for an empty path. A single-point path
    /// reports segment 0 and the distance to that point.
    pub fn nearest(&self, p: &GpsPoint, search_radius_meters: f64) -> Option<PathMatch> {
        if let Some(only) = self.single_point {
            return Some(PathMatch {
                distance_meters: haversine_distance(p, &only),
                segment_index: 0,
            });
        }
        if self.segments.is_empty() {
            return None;
        }

        if search_radius_meters > 0.0 && p.latitude.abs() <= MAX_INDEXED_LATITUDE {
            let half = meters_to_degrees(search_radius_meters * WINDOW_MARGIN, p.latitude);
            let window = AABB::from_corners(
                [p.longitude - half, p.latitude - half],
                [p.longitude + half, p.latitude + half],
            );
            let candidate = best_of(self.tree.locate_in_envelope_intersecting(&window), p);
            if let Some(found) = candidate {
                if found.distance_meters <= search_radius_meters {
                    return Some(found);
                }
            }
        }

        best_of(self.segments.iter(), p)
    }
}

/// Closest of `segments` to `p`; ties keep the lowest segment index.
fn best_of<'a>(segments: impl Iterator<Item = &'a IndexedSegment>, p: &GpsPoint) -> Option<PathMatch> {
    segments
        .map(|s| PathMatch { distance_meters: s.distance(p), segment_index: s.index })
        .fold(None, |best: Option<PathMatch>, m| match best {
            Some(b)
                if b.distance_meters < m.distance_meters
                    || (b.distance_meters == m.distance_meters && b.segment_index < m.segment_index) =>
            {
                Some(b)
            }
            _ => Some(m),
        })
}
