//! # Walk Navigator
//!
//! Guides a pedestrian along a previously generated walking route.
//!
//! This library provides:
//! - Decoding/encoding of the Google encoded polyline format used to transmit routes
//! - Distance from a live position to a route path, with nearest-segment assignment
//! - A tracking state machine that decides when the walker has really left the route
//! - Coordination of a single in-flight route recalculation
//! - Persistence of the active walk across restarts
//!
//! ## Features
//!
//! - **`http`** - Enable the reqwest-backed routing service client
//! - **`ffi`** - Enable FFI bindings for mobile platforms (iOS/Android)
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use walk_navigator::{polyline, geo_utils, GpsPoint};
//!
//! let path = polyline::decode("_p~iF~ps|U_ulLnnqC_mqNvxq`@");
//! assert_eq!(path.len(), 3);
//! assert!(polyline::is_valid(&path));
//!
//! let walker = GpsPoint::new(38.5, -120.2);
//! let off_route = geo_utils::distance_to_path(&walker, &path);
//! assert!(off_route < 1.0);
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub mod error;
pub mod geo_utils;
pub mod monitor;
pub mod navigator;
pub mod path_index;
pub mod polyline;
pub mod recalculation;
pub mod session;
pub mod store;
pub mod tracker;

// HTTP module for the routing service
#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "http")]
pub use http::HttpRoutingClient;

pub use error::{PolylineError, RecalculationError, StoreError, TransportError};
pub use monitor::{DeviationEvent, DeviationMonitor, TrackingState};
pub use navigator::Navigator;
pub use path_index::{PathIndex, PathMatch};
pub use recalculation::{
    AmbientContext, AmbientProvider, ClockAmbient, FixedAmbient, RecalculationCoordinator,
    RecalculationOutcome, RecalculationTicket, RoutingClient, TimeOfDay,
};
pub use session::{Route, RouteSession, RouteStep, StepStatus, VisitedPoi, WalkMode};
pub use store::{JsonFileStore, KeyValueStore, MemoryStore, SessionStore};
pub use tracker::{run_navigation, NavigationEvent, WalkCommand};

#[cfg(feature = "ffi")]
uniffi::setup_scaffolding!();

/// Initialize logging for Android (only used in FFI)
#[cfg(all(feature = "ffi", target_os = "android"))]
fn init_logging() {
    use android_logger::Config;
    use log::LevelFilter;

    android_logger::init_once(
        Config::default()
            .with_max_level(LevelFilter::Debug)
            .with_tag("WalkNavigatorRust"),
    );
}

#[cfg(all(feature = "ffi", not(target_os = "android")))]
fn init_logging() {
    // No-op on non-Android platforms
}

// ============================================================================
// Core Types
// ============================================================================

/// A GPS coordinate with latitude and longitude.
///
/// Serializes as `{"latitude": .., "longitude": ..}`, the shape the routing
/// service uses for locations.
///
/// # Example
/// ```
/// use walk_navigator::GpsPoint;
/// let point = GpsPoint::new(35.0116, 135.7681); // Kyoto
/// assert!(point.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct GpsPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GpsPoint {
    /// Create a new GPS point.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude.abs() <= 90.0
            && self.longitude.abs() <= 180.0
    }
}

/// Visible map region for a route: a center plus a span in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct MapRegion {
    pub center: GpsPoint,
    pub lat_delta: f64,
    pub lon_delta: f64,
}

/// Configuration for deviation tracking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Distance from the route path beyond which the walker counts as off-route.
    /// Default: 150.0 meters
    pub deviation_threshold_meters: f64,

    /// Period of the liveness re-check, independent of location updates.
    /// Default: 5 seconds
    pub poll_interval_secs: u64,

    /// Half-width of the window used to pull candidate segments from the
    /// path index. Default: 150.0 meters
    pub index_search_radius_meters: f64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            deviation_threshold_meters: 150.0,
            poll_interval_secs: 5,
            index_search_radius_meters: 150.0,
        }
    }
}

impl TrackingConfig {
    /// Config with a custom threshold; the index window follows the threshold.
    pub fn with_threshold(deviation_threshold_meters: f64) -> Self {
        Self {
            deviation_threshold_meters,
            index_search_radius_meters: deviation_threshold_meters,
            ..Self::default()
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

// ============================================================================
// FFI Exports (only when feature enabled)
// ============================================================================

#[cfg(feature = "ffi")]
mod ffi {
    use super::*;
    use log::info;

    /// Decode an encoded polyline, keeping the valid prefix of malformed input.
    #[uniffi::export]
    pub fn decode_polyline(encoded: String) -> Vec<GpsPoint> {
        init_logging();
        let points = polyline::decode(&encoded);
        info!("[WalkNavigatorRust] decode_polyline: {} chars -> {} points", encoded.len(), points.len());
        points
    }

    /// Encode points as a polyline string (1e5 precision).
    #[uniffi::export]
    pub fn encode_polyline(points: Vec<GpsPoint>) -> String {
        polyline::encode(&points)
    }

    /// True iff non-empty and every coordinate is in range.
    #[uniffi::export]
    pub fn is_valid_path(points: Vec<GpsPoint>) -> bool {
        polyline::is_valid(&points)
    }

    /// Map region enclosing the points, or None when empty.
    #[uniffi::export]
    pub fn path_region(points: Vec<GpsPoint>) -> Option<MapRegion> {
        polyline::bounding_region(&points)
    }

    /// Minimum distance in meters from a point to a path.
    #[uniffi::export]
    pub fn ffi_distance_to_path(point: GpsPoint, path: Vec<GpsPoint>) -> f64 {
        geo_utils::distance_to_path(&point, &path)
    }

    /// Display distances for each highlight step of a route.
    #[uniffi::export]
    pub fn ffi_step_distances(estimated_distance_meters: u32, highlight_count: u32) -> Vec<u32> {
        session::step_distances(estimated_distance_meters, highlight_count as usize)
    }
}

// ============================================================================
// Tests
// ============================================================================
