//! # Deviation Monitor
//!
//! Tracking state machine that decides when the walker has left the route.
//!
//! ```text
//! Idle ──start──▶ Tracking ──distance > threshold──▶ DeviationPending
//!                   ▲  │                               │        │
//!                   │  └──────manual trigger─────┐  accept   dismiss
//!                   │                            ▼     ▼        ▼
//!                   └──success/failure── RecalculationInFlight  Suppressed
//!                                                ▲                │
//!                                                └──manual trigger┘
//! ```
//!
//! Location updates and the poll timer both call [`DeviationMonitor::check`].
//! Only `Tracking` measures; every other state skips the check, so a pending
//! prompt is raised once and a dismissed prompt stays dismissed until a
//! recalculation succeeds or a new session starts.

use crate::path_index::PathMatch;
use crate::session::RouteSession;
use crate::{GpsPoint, TrackingConfig};
use log::{debug, info, warn};

/// Where the monitor is in the tracking cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingState {
    /// No active session
    Idle,
    /// Checking every sample against the route
    Tracking,
    /// Off-route; waiting for the walker to accept or dismiss recalculation
    DeviationPending,
    /// A recalculation request is outstanding
    RecalculationInFlight,
    /// Walker dismissed the prompt; no checks until the route changes
    Suppressed,
}

/// One-shot signal raised on entering `DeviationPending`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviationEvent {
    pub position: GpsPoint,
    pub distance_meters: f64,
    pub segment_index: usize,
}

/// Deviation detection for one walker.
#[derive(Debug, Clone)]
pub struct DeviationMonitor {
    config: TrackingConfig,
    state: TrackingState,
    /// State restored when an in-flight recalculation fails.
    resume_state: TrackingState,
    last_match: Option<PathMatch>,
}

impl DeviationMonitor {
    pub fn new(config: TrackingConfig) -> Self {
        Self {
            config,
            state: TrackingState::Idle,
            resume_state: TrackingState::Tracking,
            last_match: None,
        }
    }

    pub fn config(&self) -> &TrackingConfig {
        &self.config
    }

    pub fn state(&self) -> TrackingState {
        self.state
    }

    /// Result of the most recent measurement, if any.
    pub fn last_match(&self) -> Option<PathMatch> {
        self.last_match
    }

    /// Begin tracking a session. Stays `Idle` if the route has no usable path.
    pub fn start(&mut self, session: &RouteSession) -> bool {
        self.last_match = None;
        self.resume_state = TrackingState::Tracking;
        if !session.has_usable_path() {
            warn!(
                "[DeviationMonitor] Route {} has no usable path ({} points); not tracking",
                session.route().id,
                session.route().path.len()
            );
            self.state = TrackingState::Idle;
            return false;
        }
        info!(
            "[DeviationMonitor] Tracking route {} ({} points, threshold {:.0}m)",
            session.route().id,
            session.route().path.len(),
            self.config.deviation_threshold_meters
        );
        self.state = TrackingState::Tracking;
        true
    }

    /// Measure `position` against the route.
    ///
    /// Returns an event only on the transition into `DeviationPending`.
    pub fn check(&mut self, position: &GpsPoint, session: &RouteSession) -> Option<DeviationEvent> {
        if self.state != TrackingState::Tracking {
            return None;
        }
        if !position.is_valid() {
            warn!("[DeviationMonitor] Ignoring invalid position {:?}", position);
            return None;
        }

        let found = session.locate(position, self.config.index_search_radius_meters)?;
        self.last_match = Some(found);

        if found.distance_meters <= self.config.deviation_threshold_meters {
            debug!(
                "[DeviationMonitor] On route: {:.1}m from segment {}",
                found.distance_meters, found.segment_index
            );
            return None;
        }

        info!(
            "[DeviationMonitor] Deviation: {:.1}m from route (threshold {:.0}m, nearest segment {})",
            found.distance_meters, self.config.deviation_threshold_meters, found.segment_index
        );
        self.state = TrackingState::DeviationPending;
        Some(DeviationEvent {
            position: *position,
            distance_meters: found.distance_meters,
            segment_index: found.segment_index,
        })
    }

    /// Walker dismissed the deviation prompt.
    pub fn dismiss(&mut self) -> bool {
        if self.state != TrackingState::DeviationPending {
            return false;
        }
        info!("[DeviationMonitor] Deviation dismissed; suppressing checks for this route");
        self.state = TrackingState::Suppressed;
        true
    }

    /// Enter `RecalculationInFlight`.
    ///
    /// Allowed from `DeviationPending` (accepted prompt) and from `Tracking` or
    /// `Suppressed` (manual request). Returns false when idle or already in flight.
    pub fn begin_recalculation(&mut self) -> bool {
        match self.state {
            TrackingState::Tracking | TrackingState::DeviationPending => {
                self.resume_state = TrackingState::Tracking;
            }
            TrackingState::Suppressed => {
                self.resume_state = TrackingState::Suppressed;
            }
            TrackingState::Idle | TrackingState::RecalculationInFlight => return false,
        }
        self.state = TrackingState::RecalculationInFlight;
        true
    }

    /// New route applied: track afresh, suppression cleared.
    pub fn recalculation_succeeded(&mut self) -> bool {
        if self.state != TrackingState::RecalculationInFlight {
            return false;
        }
        self.state = TrackingState::Tracking;
        self.resume_state = TrackingState::Tracking;
        self.last_match = None;
        true
    }

    /// Recalculation failed: back to where the walker was, latch untouched.
    pub fn recalculation_failed(&mut self) -> bool {
        if self.state != TrackingState::RecalculationInFlight {
            return false;
        }
        self.state = self.resume_state;
        true
    }

    /// Session cleared.
    pub fn reset(&mut self) {
        self.state = TrackingState::Idle;
        self.resume_state = TrackingState::Tracking;
        self.last_match = None;
    }
}
