//! # Route Session
//!
//! The active route and the walker's progress along it.
//!
//! A [`Route`] is an immutable snapshot from the routing service. A
//! [`RouteSession`] wraps one route with the walk's intent (mode, destination)
//! and progress (visited POIs, current step). Recalculation swaps the route as
//! a whole; the session's intent and visited POIs carry over.

use crate::path_index::{PathIndex, PathMatch};
use crate::{geo_utils, polyline, GpsPoint, MapRegion};
use serde::{Deserialize, Serialize};

/// How the walk was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalkMode {
    /// Walk to a chosen destination
    #[default]
    Destination,
    /// Walk for a chosen duration
    TimeBased,
}

impl WalkMode {
    /// Wire name: `"destination"` or `"time_based"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            WalkMode::Destination => "destination",
            WalkMode::TimeBased => "time_based",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "destination" => Some(WalkMode::Destination),
            "time_based" => Some(WalkMode::TimeBased),
            _ => None,
        }
    }
}

/// A point of interest the walker has already visited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitedPoi {
    pub poi_id: String,
    pub name: String,
}

impl VisitedPoi {
    pub fn new(poi_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self { poi_id: poi_id.into(), name: name.into() }
    }
}

/// Immutable route snapshot from the routing service.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    /// Proposal identifier; kept across recalculations
    pub id: String,
    pub title: String,
    pub generated_story: String,
    pub estimated_duration_minutes: u32,
    pub estimated_distance_meters: u32,
    /// Ordered highlight descriptions, one per step
    pub highlights: Vec<String>,
    /// Wire form of `path`, kept for persistence
    pub encoded_polyline: String,
    /// Decoded path; every coordinate is in range
    pub path: Vec<GpsPoint>,
}

impl Route {
    /// Create a route by decoding its polyline.
    ///
    /// A malformed polyline yields the valid prefix of the path; check
    /// [`Route::is_usable`] before tracking against it.
    pub fn new(id: impl Into<String>, title: impl Into<String>, encoded_polyline: impl Into<String>) -> Self {
        let encoded_polyline = encoded_polyline.into();
        let path = polyline::decode(&encoded_polyline);
        Self {
            id: id.into(),
            title: title.into(),
            generated_story: String::new(),
            estimated_duration_minutes: 0,
            estimated_distance_meters: 0,
            highlights: Vec::new(),
            encoded_polyline,
            path,
        }
    }

    pub fn with_estimates(mut self, duration_minutes: u32, distance_meters: u32) -> Self {
        self.estimated_duration_minutes = duration_minutes;
        self.estimated_distance_meters = distance_meters;
        self
    }

    pub fn with_highlights(mut self, highlights: Vec<String>) -> Self {
        self.highlights = highlights;
        self
    }

    pub fn with_story(mut self, story: impl Into<String>) -> Self {
        self.generated_story = story.into();
        self
    }

    /// At least two points, all in range.
    pub fn is_usable(&self) -> bool {
        self.path.len() >= 2 && polyline::is_valid(&self.path)
    }

    /// Map region for displaying the whole route.
    pub fn region(&self) -> Option<MapRegion> {
        polyline::bounding_region(&self.path)
    }

    /// Length of the decoded path in meters.
    pub fn path_length_meters(&self) -> f64 {
        geo_utils::polyline_length(&self.path)
    }

    /// Estimated distance for display, e.g. `"1.8km"`.
    pub fn distance_label(&self) -> String {
        format!("{:.1}km", self.estimated_distance_meters as f64 / 1000.0)
    }

    /// Estimated duration for display, e.g. `"32 min"`.
    pub fn duration_label(&self) -> String {
        format!("{} min", self.estimated_duration_minutes)
    }

    /// Steps derived from the highlights, with `current_step` marked current.
    pub fn steps(&self, current_step: usize) -> Vec<RouteStep> {
        let distances = step_distances(self.estimated_distance_meters, self.highlights.len());
        self.highlights
            .iter()
            .zip(distances)
            .enumerate()
            .map(|(index, (description, distance_meters))| RouteStep {
                index,
                description: description.clone(),
                distance_meters,
                distance_label: distance_label(distance_meters),
                status: StepStatus::for_index(index, current_step),
            })
            .collect()
    }
}

/// Progress status of one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Completed,
    Current,
    Upcoming,
}

impl StepStatus {
    fn for_index(index: usize, current_step: usize) -> Self {
        match index.cmp(&current_step) {
            std::cmp::Ordering::Less => StepStatus::Completed,
            std::cmp::Ordering::Equal => StepStatus::Current,
            std::cmp::Ordering::Greater => StepStatus::Upcoming,
        }
    }
}

/// One step of the walk, derived from a route highlight. Never stored on its own.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteStep {
    pub index: usize,
    pub description: String,
    /// Display distance to the next step (see [`step_distances`])
    pub distance_meters: u32,
    pub distance_label: String,
    pub status: StepStatus,
}

/// Apportion a route's estimated distance across its highlight steps.
///
/// Step `i` of `n` gets `round(total / n * (0.8 + 0.1 * i))` meters, so early
/// steps read shorter and later ones longer. This is a display heuristic: it
/// does not use the real distances between highlights along the path and the
/// values need not sum to `total`.
pub fn step_distances(total_meters: u32, steps: usize) -> Vec<u32> {
    if steps == 0 {
        return Vec::new();
    }
    let share = total_meters as f64 / steps as f64;
    (0..steps)
        .map(|i| (share * (0.8 + 0.1 * i as f64)).round() as u32)
        .collect()
}

/// `"240m"` below a kilometer, `"1.2km"` from there on.
pub fn distance_label(meters: u32) -> String {
    if meters < 1000 {
        format!("{}m", meters)
    } else {
        format!("{:.1}km", meters as f64 / 1000.0)
    }
}

/// Mutable state of one active walk.
#[derive(Debug, Clone)]
pub struct RouteSession {
    route: Route,
    index: PathIndex,
    mode: WalkMode,
    destination: Option<GpsPoint>,
    visited_pois: Vec<VisitedPoi>,
    current_step: usize,
}

impl RouteSession {
    pub fn new(route: Route, mode: WalkMode, destination: Option<GpsPoint>) -> Self {
        let index = PathIndex::new(&route.path);
        Self {
            route,
            index,
            mode,
            destination,
            visited_pois: Vec::new(),
            current_step: 0,
        }
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    pub fn mode(&self) -> WalkMode {
        self.mode
    }

    pub fn destination(&self) -> Option<GpsPoint> {
        self.destination
    }

    /// Visited POIs in the order they were first visited.
    pub fn visited_pois(&self) -> &[VisitedPoi] {
        &self.visited_pois
    }

    pub fn has_visited(&self, poi_id: &str) -> bool {
        self.visited_pois.iter().any(|p| p.poi_id == poi_id)
    }

    /// Record a visit. Returns false if the POI was already recorded.
    pub fn mark_visited(&mut self, poi: VisitedPoi) -> bool {
        if self.has_visited(&poi.poi_id) {
            return false;
        }
        self.visited_pois.push(poi);
        true
    }

    pub fn current_step(&self) -> usize {
        self.current_step
    }

    /// Move to the next step. Returns false once past the last step.
    pub fn advance_step(&mut self) -> bool {
        if self.current_step >= self.route.highlights.len() {
            return false;
        }
        self.current_step += 1;
        true
    }

    /// Restore progress, clamped to the number of steps.
    pub fn set_current_step(&mut self, step: usize) {
        self.current_step = step.min(self.route.highlights.len());
    }

    pub fn steps(&self) -> Vec<RouteStep> {
        self.route.steps(self.current_step)
    }

    pub fn has_usable_path(&self) -> bool {
        self.route.is_usable()
    }

    /// Distance to the route and the nearest segment.
    pub fn locate(&self, position: &GpsPoint, search_radius_meters: f64) -> Option<PathMatch> {
        self.index.nearest(position, search_radius_meters)
    }

    /// Swap in a recalculated route; step progress restarts on the new route.
    pub fn replace_route(&mut self, route: Route) {
        self.index = PathIndex::new(&route.path);
        self.route = route;
        self.current_step = 0;
    }
}
