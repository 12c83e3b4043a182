//! # Navigator
//!
//! Owns the active walk and drives it from location samples and walker
//! commands.
//!
//! The navigator is synchronous: recalculation hands back a
//! [`RecalculationTicket`] whose future the caller awaits and feeds into
//! [`Navigator::complete_recalculation`]. The async event loop in
//! [`crate::tracker`] does exactly that.
//!
//! Every session is tagged with a generation number. Starting, resuming or
//! finishing a walk bumps it, which is how late recalculation results for a
//! walk that no longer exists are recognized and dropped.

use crate::error::{RecalculationError, TransportError};
use crate::monitor::{DeviationEvent, DeviationMonitor, TrackingState};
use crate::recalculation::{
    AmbientProvider, RecalculationCoordinator, RecalculationOutcome, RecalculationTicket, RoutingClient, UpdatedRoute,
};
use crate::session::{Route, RouteSession, VisitedPoi, WalkMode};
use crate::store::{KeyValueStore, SessionStore};
use crate::{GpsPoint, TrackingConfig};
use log::{debug, info, warn};
use std::sync::Arc;

/// One walker's navigation state.
pub struct Navigator<C: RoutingClient, S: KeyValueStore> {
    monitor: DeviationMonitor,
    coordinator: RecalculationCoordinator<C>,
    store: SessionStore<S>,
    ambient: Box<dyn AmbientProvider>,
    session: Option<RouteSession>,
    generation: u64,
    last_position: Option<GpsPoint>,
}

impl<C: RoutingClient, S: KeyValueStore> Navigator<C, S> {
    pub fn new(config: TrackingConfig, client: Arc<C>, store: SessionStore<S>, ambient: Box<dyn AmbientProvider>) -> Self {
        Self {
            monitor: DeviationMonitor::new(config),
            coordinator: RecalculationCoordinator::new(client),
            store,
            ambient,
            session: None,
            generation: 0,
            last_position: None,
        }
    }

    pub fn config(&self) -> &TrackingConfig {
        self.monitor.config()
    }

    pub fn session(&self) -> Option<&RouteSession> {
        self.session.as_ref()
    }

    pub fn state(&self) -> TrackingState {
        self.monitor.state()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn last_position(&self) -> Option<GpsPoint> {
        self.last_position
    }

    pub fn store(&self) -> &SessionStore<S> {
        &self.store
    }

    /// Begin a walk on `route`, replacing any current one.
    ///
    /// Returns whether tracking started; a route without a usable path is
    /// kept for display but not tracked, and is not persisted, so a stored walk
    /// stays resumable.
    pub fn start_session(&mut self, route: Route, mode: WalkMode, destination: Option<GpsPoint>) -> bool {
        info!("[Navigator] Starting walk on {} \"{}\" ({})", route.id, route.title, mode.as_str());
        let session = RouteSession::new(route, mode, destination);
        let trackable = session.has_usable_path();
        if trackable {
            persist(&mut self.store, &session);
        }
        self.install(session);
        trackable
    }

    /// Resume the stored walk, if any. Returns whether one was restored.
    pub fn resume(&mut self) -> bool {
        match self.store.load() {
            Ok(Some(session)) => {
                info!("[Navigator] Resuming walk on {}", session.route().id);
                self.install(session);
                true
            }
            Ok(None) => {
                debug!("[Navigator] No stored walk to resume");
                false
            }
            Err(e) => {
                warn!("[Navigator] Could not read stored walk: {}", e);
                false
            }
        }
    }

    fn install(&mut self, session: RouteSession) -> bool {
        self.generation += 1;
        self.coordinator.abandon();
        let tracking = self.monitor.start(&session);
        self.session = Some(session);
        tracking
    }

    /// A new location sample.
    pub fn on_location(&mut self, position: GpsPoint) -> Option<DeviationEvent> {
        if position.is_valid() {
            self.last_position = Some(position);
        }
        let session = self.session.as_ref()?;
        self.monitor.check(&position, session)
    }

    /// Poll timer fired: re-check the last known position.
    pub fn on_tick(&mut self) -> Option<DeviationEvent> {
        let position = self.last_position?;
        let session = self.session.as_ref()?;
        self.monitor.check(&position, session)
    }

    /// Walker dismissed the deviation prompt.
    pub fn dismiss_deviation(&mut self) -> bool {
        self.monitor.dismiss()
    }

    /// Start a recalculation from the last known position.
    ///
    /// Used both for an accepted deviation prompt and a manual request.
    /// Returns `Ok(None)` when a recalculation is already in flight or there
    /// is nothing to recalculate from, without contacting the service.
    pub fn request_recalculation(&mut self) -> Result<Option<RecalculationTicket>, RecalculationError> {
        if self.monitor.state() == TrackingState::RecalculationInFlight || self.coordinator.is_in_flight() {
            debug!("[Navigator] Recalculation already in flight");
            return Ok(None);
        }

        let ambient = self.ambient.current();
        let request = RecalculationCoordinator::<C>::build_request(self.session.as_ref(), self.last_position, &ambient)
            .map_err(|e| {
                warn!("[Navigator] Cannot recalculate: {}", e);
                e
            })?;

        if !self.monitor.begin_recalculation() {
            debug!("[Navigator] Not tracking; recalculation ignored");
            return Ok(None);
        }
        Ok(self.coordinator.issue(self.generation, request))
    }

    /// Hand back the result of a ticket issued for `generation`.
    pub fn complete_recalculation(
        &mut self,
        generation: u64,
        result: Result<UpdatedRoute, TransportError>,
    ) -> RecalculationOutcome {
        let outcome = self.coordinator.resolve(generation, self.generation, result);
        match &outcome {
            RecalculationOutcome::Applied(route) => {
                if let Some(session) = self.session.as_mut() {
                    session.replace_route(route.clone());
                    self.monitor.recalculation_succeeded();
                    persist(&mut self.store, session);
                }
            }
            RecalculationOutcome::Failed(_) => {
                self.monitor.recalculation_failed();
            }
            RecalculationOutcome::Discarded(_) => {}
        }
        outcome
    }

    /// Record a visited POI. Returns false if there is no walk or it was already recorded.
    pub fn mark_visited(&mut self, poi: VisitedPoi) -> bool {
        let Some(session) = self.session.as_mut() else {
            return false;
        };
        if !session.mark_visited(poi) {
            return false;
        }
        persist(&mut self.store, session);
        true
    }

    /// Move to the next step of the walk.
    pub fn advance_step(&mut self) -> bool {
        let Some(session) = self.session.as_mut() else {
            return false;
        };
        if !session.advance_step() {
            return false;
        }
        persist(&mut self.store, session);
        true
    }

    /// End the walk: clear the session and forget any outstanding request.
    pub fn finish_walk(&mut self) -> Option<RouteSession> {
        let finished = self.session.take();
        self.generation += 1;
        self.coordinator.abandon();
        self.monitor.reset();
        self.last_position = None;
        if let Err(e) = self.store.clear() {
            warn!("[Navigator] Could not clear stored walk: {}", e);
        }
        if let Some(session) = &finished {
            info!(
                "[Navigator] Finished walk on {} ({} POIs visited)",
                session.route().id,
                session.visited_pois().len()
            );
        }
        finished
    }
}

/// Save the session; a failing store only costs the ability to resume.
fn persist<S: KeyValueStore>(store: &mut SessionStore<S>, session: &RouteSession) {
    if let Err(e) = store.save(session) {
        warn!("[Navigator] Could not persist walk {}: {}", session.route().id, e);
    }
}
