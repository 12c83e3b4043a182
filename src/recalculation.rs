//! # Route Recalculation
//!
//! Asks the routing service for a new route from the walker's current position
//! and applies the answer.
//!
//! The coordinator allows one outstanding request at a time. Each request is
//! tagged with the session generation it was issued for; a result arriving for
//! an older generation (the walk was finished or replaced meanwhile) is
//! discarded instead of applied.

use crate::error::{RecalculationError, TransportError};
use crate::session::{Route, RouteSession, VisitedPoi, WalkMode};
use crate::GpsPoint;
use chrono::Timelike;
use futures::future::BoxFuture;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Duration sent with destination-mode proposal requests.
const DESTINATION_MODE_DURATION_MINUTES: u32 = 120;

// ============================================================================
// Wire Types
// ============================================================================

/// Previously visited POIs, as the routing service expects them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisitedPois {
    pub previous_pois: Vec<VisitedPoi>,
}

/// Body of `POST /routes/recalculate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecalculationRequest {
    pub proposal_id: String,
    pub current_location: GpsPoint,
    pub destination: Option<GpsPoint>,
    pub mode: WalkMode,
    pub visited_pois: VisitedPois,
    pub weather: String,
    pub time_of_day: TimeOfDay,
}

/// Response of `POST /routes/recalculate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecalculationResponse {
    pub updated_route: UpdatedRoute,
}

/// The recalculated route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdatedRoute {
    pub title: String,
    pub estimated_duration_minutes: u32,
    pub estimated_distance_meters: u32,
    #[serde(default)]
    pub highlights: Vec<String>,
    pub route_polyline: String,
    #[serde(default)]
    pub generated_story: String,
}

/// Body of `POST /routes/proposals`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalRequest {
    pub start_location: GpsPoint,
    pub destination: Option<GpsPoint>,
    pub mode: WalkMode,
    pub duration_minutes: Option<u32>,
    pub theme: String,
}

impl ProposalRequest {
    /// Destination-mode requests always carry a 120 minute budget.
    pub fn new(
        start_location: GpsPoint,
        destination: Option<GpsPoint>,
        mode: WalkMode,
        duration_minutes: Option<u32>,
        theme: impl Into<String>,
    ) -> Self {
        let duration_minutes = match mode {
            WalkMode::Destination => Some(DESTINATION_MODE_DURATION_MINUTES),
            WalkMode::TimeBased => duration_minutes,
        };
        Self {
            start_location,
            destination,
            mode,
            duration_minutes,
            theme: theme.into(),
        }
    }
}

/// Response of `POST /routes/proposals`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalResponse {
    pub proposals: Vec<RouteProposal>,
}

/// One proposed route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteProposal {
    pub proposal_id: String,
    pub title: String,
    pub estimated_duration_minutes: u32,
    pub estimated_distance_meters: u32,
    #[serde(default)]
    pub theme: String,
    #[serde(default)]
    pub display_highlights: Vec<String>,
    pub route_polyline: String,
    #[serde(default)]
    pub generated_story: String,
}

impl Route {
    /// Route for a selected proposal.
    pub fn from_proposal(proposal: &RouteProposal) -> Self {
        Route::new(&proposal.proposal_id, &proposal.title, &proposal.route_polyline)
            .with_estimates(proposal.estimated_duration_minutes, proposal.estimated_distance_meters)
            .with_highlights(proposal.display_highlights.clone())
            .with_story(&proposal.generated_story)
    }

    /// Route for a recalculation result; the proposal id carries over.
    pub fn from_update(proposal_id: &str, update: &UpdatedRoute) -> Self {
        Route::new(proposal_id, &update.title, &update.route_polyline)
            .with_estimates(update.estimated_duration_minutes, update.estimated_distance_meters)
            .with_highlights(update.highlights.clone())
            .with_story(&update.generated_story)
    }
}

// ============================================================================
// Collaborators
// ============================================================================

/// The routing service, as far as recalculation is concerned.
pub trait RoutingClient: Send + Sync + 'static {
    /// Request a new route. The future must not borrow `self`.
    fn recalculate(&self, request: RecalculationRequest) -> BoxFuture<'static, Result<UpdatedRoute, TransportError>>;
}

/// Coarse time of day sent to the routing service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeOfDay {
    Morning,
    Afternoon,
    Evening,
    Night,
}

impl TimeOfDay {
    /// 5-11 morning, 12-16 afternoon, 17-20 evening, otherwise night.
    pub fn from_hour(hour: u32) -> Self {
        match hour {
            5..=11 => TimeOfDay::Morning,
            12..=16 => TimeOfDay::Afternoon,
            17..=20 => TimeOfDay::Evening,
            _ => TimeOfDay::Night,
        }
    }
}

/// Weather and time of day at the moment of a request.
#[derive(Debug, Clone, PartialEq)]
pub struct AmbientContext {
    pub weather: String,
    pub time_of_day: TimeOfDay,
}

/// Supplies ambient context; implemented by the host.
pub trait AmbientProvider: Send + Sync {
    fn current(&self) -> AmbientContext;
}

/// Always returns the same context.
#[derive(Debug, Clone)]
pub struct FixedAmbient(pub AmbientContext);

impl AmbientProvider for FixedAmbient {
    fn current(&self) -> AmbientContext {
        self.0.clone()
    }
}

/// Time of day from the local clock, weather as configured.
#[derive(Debug, Clone)]
pub struct ClockAmbient {
    pub weather: String,
}

impl AmbientProvider for ClockAmbient {
    fn current(&self) -> AmbientContext {
        AmbientContext {
            weather: self.weather.clone(),
            time_of_day: TimeOfDay::from_hour(chrono::Local::now().hour()),
        }
    }
}

// ============================================================================
// Coordinator
// ============================================================================

/// An issued recalculation: await `response`, then hand the result back.
pub struct RecalculationTicket {
    pub generation: u64,
    pub request: RecalculationRequest,
    pub response: BoxFuture<'static, Result<UpdatedRoute, TransportError>>,
}

impl fmt::Debug for RecalculationTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecalculationTicket")
            .field("generation", &self.generation)
            .field("request", &self.request)
            .finish_non_exhaustive()
    }
}

/// What happened to a recalculation result.
#[derive(Debug, Clone, PartialEq)]
pub enum RecalculationOutcome {
    /// New route ready to replace the current one
    Applied(Route),
    /// Failed; the current route stays
    Failed(RecalculationError),
    /// Result no longer relevant; dropped without telling the walker
    Discarded(RecalculationError),
}

/// Single-flight recalculation against a [`RoutingClient`].
pub struct RecalculationCoordinator<C: RoutingClient> {
    client: Arc<C>,
    /// Generation and proposal id of the outstanding request
    in_flight: Option<(u64, String)>,
}

impl<C: RoutingClient> RecalculationCoordinator<C> {
    pub fn new(client: Arc<C>) -> Self {
        Self { client, in_flight: None }
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Build a request from the session, failing fast on missing context.
    pub fn build_request(
        session: Option<&RouteSession>,
        position: Option<GpsPoint>,
        ambient: &AmbientContext,
    ) -> Result<RecalculationRequest, RecalculationError> {
        let session = session.ok_or(RecalculationError::MissingSessionContext("active session"))?;
        let route_id = &session.route().id;
        if route_id.is_empty() {
            return Err(RecalculationError::MissingSessionContext("route identifier"));
        }
        let position = position.ok_or(RecalculationError::MissingSessionContext("current location"))?;

        Ok(RecalculationRequest {
            proposal_id: route_id.clone(),
            current_location: position,
            destination: session.destination(),
            mode: session.mode(),
            visited_pois: VisitedPois {
                previous_pois: session.visited_pois().to_vec(),
            },
            weather: ambient.weather.clone(),
            time_of_day: ambient.time_of_day,
        })
    }

    /// Send `request`. Returns `None` while another request is outstanding.
    pub fn issue(&mut self, generation: u64, request: RecalculationRequest) -> Option<RecalculationTicket> {
        if let Some((outstanding, _)) = &self.in_flight {
            debug!("[Recalculation] Request for generation {} already in flight; ignoring trigger", outstanding);
            return None;
        }

        info!(
            "[Recalculation] Requesting new route for {} from ({:.5}, {:.5}), {} visited POIs",
            request.proposal_id,
            request.current_location.latitude,
            request.current_location.longitude,
            request.visited_pois.previous_pois.len()
        );
        self.in_flight = Some((generation, request.proposal_id.clone()));
        let response = self.client.recalculate(request.clone());

        Some(RecalculationTicket { generation, request, response })
    }

    /// Classify a result that arrived for `generation`.
    pub fn resolve(
        &mut self,
        generation: u64,
        current_generation: u64,
        result: Result<UpdatedRoute, TransportError>,
    ) -> RecalculationOutcome {
        let proposal_id = match &self.in_flight {
            Some((outstanding, id)) if *outstanding == generation && generation == current_generation => id.clone(),
            _ => {
                debug!(
                    "[Recalculation] Discarding result for generation {} (current {})",
                    generation, current_generation
                );
                return RecalculationOutcome::Discarded(RecalculationError::StaleResult {
                    issued: generation,
                    current: current_generation,
                });
            }
        };
        self.in_flight = None;

        let update = match result {
            Ok(update) => update,
            Err(e) => {
                warn!("[Recalculation] Request for {} failed: {}", proposal_id, e);
                return RecalculationOutcome::Failed(e.into());
            }
        };

        let route = Route::from_update(&proposal_id, &update);
        if !route.is_usable() {
            warn!(
                "[Recalculation] New route for {} decodes to {} points; keeping the current route",
                proposal_id,
                route.path.len()
            );
            return RecalculationOutcome::Failed(RecalculationError::MalformedPolyline { points: route.path.len() });
        }

        info!(
            "[Recalculation] New route \"{}\": {} points, {}m, {} min, {} highlights",
            route.title,
            route.path.len(),
            route.estimated_distance_meters,
            route.estimated_duration_minutes,
            route.highlights.len()
        );
        RecalculationOutcome::Applied(route)
    }

    /// Forget the outstanding request; its result will be discarded.
    pub fn abandon(&mut self) {
        if let Some((generation, _)) = self.in_flight.take() {
            debug!("[Recalculation] Abandoning request for generation {}", generation);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::polyline;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Routing client answering from a script, counting calls.
    pub(crate) struct ScriptedClient {
        pub calls: AtomicUsize,
        pub requests: Mutex<Vec<RecalculationRequest>>,
        responses: Mutex<Vec<Result<UpdatedRoute, TransportError>>>,
    }

    impl ScriptedClient {
        pub fn new(responses: Vec<Result<UpdatedRoute, TransportError>>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                requests: Mutex::new(Vec::new()),
                responses: Mutex::new(responses),
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl RoutingClient for ScriptedClient {
        fn recalculate(&self, request: RecalculationRequest) -> BoxFuture<'static, Result<UpdatedRoute, TransportError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().unwrap().push(request);
            let mut responses = self.responses.lock().unwrap();
            let next = if responses.is_empty() {
                Err(TransportError::Request("no scripted response".to_string()))
            } else {
                responses.remove(0)
            };
            async move { next }.boxed()
        }
    }

    pub(crate) fn detour_update() -> UpdatedRoute {
        let path = vec![
            GpsPoint::new(35.0100, 135.7700),
            GpsPoint::new(35.0120, 135.7710),
            GpsPoint::new(35.0140, 135.7730),
        ];
        UpdatedRoute {
            title: "Detour by the shrine".to_string(),
            estimated_duration_minutes: 20,
            estimated_distance_meters: 900,
            highlights: vec!["Shrine gate".to_string(), "Tea house".to_string(), "Bridge".to_string()],
            route_polyline: polyline::encode(&path),
            generated_story: "A new path opens.".to_string(),
        }
    }

    fn session() -> RouteSession {
        let path = vec![GpsPoint::new(35.0, 135.76), GpsPoint::new(35.005, 135.76)];
        let route = Route::new("proposal-7", "River walk", polyline::encode(&path));
        let mut session = RouteSession::new(route, WalkMode::Destination, Some(GpsPoint::new(35.02, 135.78)));
        session.mark_visited(VisitedPoi::new("poi-1", "Sweet shop"));
        session
    }

    fn ambient() -> AmbientContext {
        AmbientContext { weather: "sunny".to_string(), time_of_day: TimeOfDay::Afternoon }
    }

    #[test]
    fn test_time_of_day_buckets() {
        assert_eq!(TimeOfDay::from_hour(4), TimeOfDay::Night);
        assert_eq!(TimeOfDay::from_hour(5), TimeOfDay::Morning);
        assert_eq!(TimeOfDay::from_hour(12), TimeOfDay::Afternoon);
        assert_eq!(TimeOfDay::from_hour(17), TimeOfDay::Evening);
        assert_eq!(TimeOfDay::from_hour(21), TimeOfDay::Night);
    }

    #[test]
    fn test_missing_context_fails_fast() {
        let err = RecalculationCoordinator::<ScriptedClient>::build_request(None, Some(GpsPoint::new(35.0, 135.0)), &ambient())
            .unwrap_err();
        assert_eq!(err, RecalculationError::MissingSessionContext("active session"));

        let session = session();
        let err = RecalculationCoordinator::<ScriptedClient>::build_request(Some(&session), None, &ambient()).unwrap_err();
        assert_eq!(err, RecalculationError::MissingSessionContext("current location"));

        let nameless = RouteSession::new(Route::new("", "No id", "_p~iF~ps|U_ulLnnqC"), WalkMode::TimeBased, None);
        let err = RecalculationCoordinator::<ScriptedClient>::build_request(
            Some(&nameless),
            Some(GpsPoint::new(35.0, 135.0)),
            &ambient(),
        )
        .unwrap_err();
        assert_eq!(err, RecalculationError::MissingSessionContext("route identifier"));
    }

    #[test]
    fn test_request_wire_format() {
        let session = session();
        let request = RecalculationCoordinator::<ScriptedClient>::build_request(
            Some(&session),
            Some(GpsPoint::new(35.003, 135.762)),
            &ambient(),
        )
        .unwrap();

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["proposal_id"], "proposal-7");
        assert_eq!(json["current_location"]["latitude"], 35.003);
        assert_eq!(json["destination"]["longitude"], 135.78);
        assert_eq!(json["mode"], "destination");
        assert_eq!(json["visited_pois"]["previous_pois"][0]["poi_id"], "poi-1");
        assert_eq!(json["visited_pois"]["previous_pois"][0]["name"], "Sweet shop");
        assert_eq!(json["weather"], "sunny");
        assert_eq!(json["time_of_day"], "afternoon");
    }

    #[test]
    fn test_response_wire_format() {
        let body = r#"{"updated_route": {
            "title": "Detour", "estimated_duration_minutes": 25, "estimated_distance_meters": 1800,
            "highlights": ["Gate", "Garden"], "route_polyline": "_p~iF~ps|U_ulLnnqC",
            "generated_story": "Onward."}}"#;
        let response: RecalculationResponse = serde_json::from_str(body).unwrap();
        let route = Route::from_update("proposal-7", &response.updated_route);
        assert_eq!(route.id, "proposal-7");
        assert_eq!(route.path.len(), 2);
        assert_eq!(route.highlights.len(), 2);
    }

    #[test]
    fn test_proposal_destination_mode_duration() {
        let start = GpsPoint::new(35.0041, 135.7681);
        let request = ProposalRequest::new(start, Some(GpsPoint::new(35.01, 135.77)), WalkMode::Destination, Some(30), "gourmet");
        assert_eq!(request.duration_minutes, Some(120));
        let request = ProposalRequest::new(start, None, WalkMode::TimeBased, Some(45), "nature");
        assert_eq!(request.duration_minutes, Some(45));
        assert_eq!(serde_json::to_value(&request).unwrap()["mode"], "time_based");
    }

    #[test]
    fn test_route_from_proposal() {
        let body = r#"{"proposals": [{
            "proposal_id": "p-1", "title": "Shopping street", "estimated_duration_minutes": 32,
            "estimated_distance_meters": 1800, "theme": "gourmet",
            "display_highlights": ["Arcade", "Sweet shop"],
            "route_polyline": "_p~iF~ps|U_ulLnnqC_mqNvxq`@", "generated_story": "Once upon a street."}]}"#;
        let response: ProposalResponse = serde_json::from_str(body).unwrap();
        let route = Route::from_proposal(&response.proposals[0]);
        assert_eq!(route.id, "p-1");
        assert_eq!(route.path.len(), 3);
        assert_eq!(route.highlights, vec!["Arcade".to_string(), "Sweet shop".to_string()]);
    }

    #[tokio::test]
    async fn test_single_flight_and_apply() {
        let client = Arc::new(ScriptedClient::new(vec![Ok(detour_update())]));
        let mut coordinator = RecalculationCoordinator::new(Arc::clone(&client));
        let request = RecalculationCoordinator::<ScriptedClient>::build_request(
            Some(&session()),
            Some(GpsPoint::new(35.003, 135.762)),
            &ambient(),
        )
        .unwrap();

        let ticket = coordinator.issue(1, request.clone()).unwrap();
        assert!(coordinator.is_in_flight());
        assert!(coordinator.issue(1, request).is_none());
        assert_eq!(client.call_count(), 1);

        let result = ticket.response.await;
        match coordinator.resolve(ticket.generation, 1, result) {
            RecalculationOutcome::Applied(route) => {
                assert_eq!(route.id, "proposal-7");
                assert_eq!(route.title, "Detour by the shrine");
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(!coordinator.is_in_flight());
    }

    #[tokio::test]
    async fn test_transport_failure() {
        let client = Arc::new(ScriptedClient::new(vec![Err(TransportError::Server { status: 502 })]));
        let mut coordinator = RecalculationCoordinator::new(client);
        let request = RecalculationCoordinator::<ScriptedClient>::build_request(
            Some(&session()),
            Some(GpsPoint::new(35.003, 135.762)),
            &ambient(),
        )
        .unwrap();

        let ticket = coordinator.issue(3, request).unwrap();
        let outcome = coordinator.resolve(3, 3, ticket.response.await);
        assert_eq!(
            outcome,
            RecalculationOutcome::Failed(RecalculationError::Transport(TransportError::Server { status: 502 }))
        );
        assert!(!coordinator.is_in_flight());
    }

    #[tokio::test]
    async fn test_unusable_polyline_fails() {
        let mut update = detour_update();
        update.route_polyline = "_p~iF".to_string();
        let client = Arc::new(ScriptedClient::new(vec![Ok(update)]));
        let mut coordinator = RecalculationCoordinator::new(client);
        let request = RecalculationCoordinator::<ScriptedClient>::build_request(
            Some(&session()),
            Some(GpsPoint::new(35.003, 135.762)),
            &ambient(),
        )
        .unwrap();

        let ticket = coordinator.issue(1, request).unwrap();
        let outcome = coordinator.resolve(1, 1, ticket.response.await);
        assert_eq!(outcome, RecalculationOutcome::Failed(RecalculationError::MalformedPolyline { points: 0 }));
    }

    #[tokio::test]
    async fn test_stale_result_discarded() {
        let client = Arc::new(ScriptedClient::new(vec![Ok(detour_update())]));
        let mut coordinator = RecalculationCoordinator::new(client);
        let request = RecalculationCoordinator::<ScriptedClient>::build_request(
            Some(&session()),
            Some(GpsPoint::new(35.003, 135.762)),
            &ambient(),
        )
        .unwrap();

        let ticket = coordinator.issue(1, request).unwrap();
        coordinator.abandon();
        let outcome = coordinator.resolve(1, 2, ticket.response.await);
        assert_eq!(
            outcome,
            RecalculationOutcome::Discarded(RecalculationError::StaleResult { issued: 1, current: 2 })
        );
    }
}
