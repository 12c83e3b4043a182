//! End-to-end tests for the navigation event loop.
//!
//! Each test drives [`run_navigation`] through its channels with a fake
//! routing service and a paused tokio clock.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use walk_navigator::recalculation::{RecalculationRequest, UpdatedRoute};
use walk_navigator::{
    polyline, run_navigation, AmbientContext, FixedAmbient, GpsPoint, JsonFileStore, KeyValueStore, MemoryStore,
    NavigationEvent, Navigator, RecalculationError, Route, RoutingClient, SessionStore, TimeOfDay, TrackingConfig,
    TrackingState, TransportError, VisitedPoi, WalkCommand, WalkMode,
};

// =============================================================================
// Test Helpers
// =============================================================================

/// Routing service that answers after a delay, counting calls.
struct FakeRoutingService {
    calls: AtomicUsize,
    delay: Duration,
    failure: Option<TransportError>,
}

impl FakeRoutingService {
    fn answering() -> Arc<Self> {
        Arc::new(Self { calls: AtomicUsize::new(0), delay: Duration::from_secs(2), failure: None })
    }

    fn failing(error: TransportError) -> Arc<Self> {
        Arc::new(Self { calls: AtomicUsize::new(0), delay: Duration::from_secs(2), failure: Some(error) })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl RoutingClient for FakeRoutingService {
    fn recalculate(&self, request: RecalculationRequest) -> BoxFuture<'static, Result<UpdatedRoute, TransportError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.delay;
        let failure = self.failure.clone();
        async move {
            tokio::time::sleep(delay).await;
            if let Some(error) = failure {
                return Err(error);
            }
            let from = request.current_location;
            let path = vec![from, GpsPoint::new(from.latitude + 0.003, from.longitude)];
            Ok(UpdatedRoute {
                title: "Detour".to_string(),
                estimated_duration_minutes: 10,
                estimated_distance_meters: 340,
                highlights: vec!["Alley".to_string()],
                route_polyline: polyline::encode(&path),
                generated_story: String::new(),
            })
        }
        .boxed()
    }
}

/// Straight route north along a meridian, ~1.1km.
fn river_route() -> Route {
    let path: Vec<GpsPoint> = (0..=10)
        .map(|i| GpsPoint::new(35.000 + i as f64 * 0.001, 135.760))
        .collect();
    Route::new("proposal-1", "Kamo river walk", polyline::encode(&path))
        .with_estimates(15, 1100)
        .with_highlights(vec!["Bridge".to_string(), "Stepping stones".to_string()])
}

/// Point `meters` east of the route at a given latitude.
fn off_route(lat: f64, meters: f64) -> GpsPoint {
    GpsPoint::new(lat, 135.760 + meters / (111_195.0 * lat.to_radians().cos()))
}

fn new_navigator<C: RoutingClient, S: KeyValueStore>(client: Arc<C>, backend: S) -> Navigator<C, S> {
    let ambient = FixedAmbient(AmbientContext { weather: "rainy".to_string(), time_of_day: TimeOfDay::Evening });
    Navigator::new(TrackingConfig::default(), client, SessionStore::new(backend), Box::new(ambient))
}

struct Harness<C: RoutingClient, S: KeyValueStore + 'static> {
    locations: mpsc::Sender<GpsPoint>,
    commands: mpsc::Sender<WalkCommand>,
    events: mpsc::Receiver<NavigationEvent>,
    handle: JoinHandle<Navigator<C, S>>,
}

impl<C: RoutingClient, S: KeyValueStore + 'static> Harness<C, S> {
    fn spawn(navigator: Navigator<C, S>) -> Self {
        let (locations, location_rx) = mpsc::channel(16);
        let (commands, command_rx) = mpsc::channel(16);
        let (event_tx, events) = mpsc::channel(16);
        let handle = tokio::spawn(run_navigation(navigator, location_rx, command_rx, event_tx));
        Self { locations, commands, events, handle }
    }

    async fn locate(&self, position: GpsPoint) {
        self.locations.send(position).await.unwrap();
    }

    async fn command(&self, command: WalkCommand) {
        self.commands.send(command).await.unwrap();
    }

    async fn next_event(&mut self) -> NavigationEvent {
        self.events.recv().await.expect("event loop stopped")
    }

    /// Close the command channel and wait for the loop to hand back the navigator.
    async fn stop(self) -> (Navigator<C, S>, mpsc::Receiver<NavigationEvent>) {
        drop(self.commands);
        drop(self.locations);
        (self.handle.await.unwrap(), self.events)
    }
}

fn started(client: Arc<FakeRoutingService>) -> Harness<FakeRoutingService, MemoryStore> {
    let mut navigator = new_navigator(client, MemoryStore::new());
    assert!(navigator.start_session(river_route(), WalkMode::Destination, Some(GpsPoint::new(35.02, 135.78))));
    Harness::spawn(navigator)
}

// =============================================================================
// Deviation
// =============================================================================

#[tokio::test(start_paused = true)]
async fn walker_within_threshold_never_deviates() {
    let mut harness = started(FakeRoutingService::answering());
    for i in 0..10 {
        harness.locate(off_route(35.0005 + i as f64 * 0.001, 100.0)).await;
    }
    tokio::time::sleep(Duration::from_secs(30)).await;

    harness.command(WalkCommand::FinishWalk).await;
    assert!(matches!(harness.next_event().await, NavigationEvent::WalkFinished(Some(_))));
}

#[tokio::test(start_paused = true)]
async fn deviation_is_signalled_once_and_dismissal_suppresses() {
    let client = FakeRoutingService::answering();
    let mut harness = started(Arc::clone(&client));

    harness.locate(off_route(35.0055, 200.0)).await;
    match harness.next_event().await {
        NavigationEvent::Deviated(e) => {
            assert!((e.distance_meters - 200.0).abs() < 1.5);
            assert_eq!(e.segment_index, 5);
        }
        other => panic!("unexpected event {:?}", other),
    }

    // Still off route, across several poll intervals: no second prompt
    harness.locate(off_route(35.0060, 300.0)).await;
    tokio::time::sleep(Duration::from_secs(12)).await;

    harness.command(WalkCommand::DismissDeviation).await;
    for meters in [400.0, 1_000.0, 5_000.0] {
        harness.locate(off_route(35.006, meters)).await;
    }
    tokio::time::sleep(Duration::from_secs(12)).await;

    harness.command(WalkCommand::FinishWalk).await;
    assert!(matches!(harness.next_event().await, NavigationEvent::WalkFinished(Some(_))));
    assert_eq!(client.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn new_walk_clears_dismissed_prompt() {
    let mut harness = started(FakeRoutingService::answering());
    let off = off_route(35.0055, 200.0);

    harness.locate(off).await;
    assert!(matches!(harness.next_event().await, NavigationEvent::Deviated(_)));
    harness.command(WalkCommand::DismissDeviation).await;
    harness.locate(off).await;
    tokio::time::sleep(Duration::from_secs(12)).await;

    harness
        .command(WalkCommand::StartWalk { route: river_route(), mode: WalkMode::Destination, destination: None })
        .await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    harness.locate(off).await;
    match harness.next_event().await {
        NavigationEvent::Deviated(e) => assert_eq!(e.segment_index, 5),
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn poll_timer_checks_last_known_position() {
    let navigator = new_navigator(FakeRoutingService::answering(), MemoryStore::new());
    let mut harness = Harness::spawn(navigator);
    let start = tokio::time::Instant::now();

    // Sample arrives before the walk starts, then GPS goes quiet
    harness.locate(off_route(35.005, 300.0)).await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    harness
        .command(WalkCommand::StartWalk { route: river_route(), mode: WalkMode::TimeBased, destination: None })
        .await;

    assert!(matches!(harness.next_event().await, NavigationEvent::Deviated(_)));
    assert!(start.elapsed() >= Duration::from_secs(4));
}

// =============================================================================
// Recalculation
// =============================================================================

#[tokio::test(start_paused = true)]
async fn accepted_deviation_replaces_route_with_single_request() {
    let client = FakeRoutingService::answering();
    let mut harness = started(Arc::clone(&client));

    harness.command(WalkCommand::MarkVisited(VisitedPoi::new("poi-3", "Bridge"))).await;
    harness.locate(off_route(35.0055, 200.0)).await;
    assert!(matches!(harness.next_event().await, NavigationEvent::Deviated(_)));

    harness.command(WalkCommand::AcceptRecalculation).await;
    harness.command(WalkCommand::AcceptRecalculation).await;
    harness.command(WalkCommand::RequestRecalculation).await;

    match harness.next_event().await {
        NavigationEvent::RouteUpdated(route) => {
            assert_eq!(route.id, "proposal-1");
            assert_eq!(route.title, "Detour");
            assert_eq!(route.path.len(), 2);
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert_eq!(client.calls(), 1);

    let (navigator, _) = harness.stop().await;
    assert_eq!(navigator.state(), TrackingState::Tracking);
    let session = navigator.session().unwrap();
    assert_eq!(session.route().title, "Detour");
    assert!(session.has_visited("poi-3"));
    assert_eq!(navigator.store().load().unwrap().unwrap().route().title, "Detour");
}

#[tokio::test(start_paused = true)]
async fn failed_recalculation_keeps_route() {
    let client = FakeRoutingService::failing(TransportError::Server { status: 503 });
    let mut harness = started(Arc::clone(&client));

    harness.locate(off_route(35.0055, 200.0)).await;
    assert!(matches!(harness.next_event().await, NavigationEvent::Deviated(_)));
    harness.command(WalkCommand::AcceptRecalculation).await;

    match harness.next_event().await {
        NavigationEvent::RecalculationFailed(e) => {
            assert_eq!(e, RecalculationError::Transport(TransportError::Server { status: 503 }));
            assert!(e.is_user_visible());
        }
        other => panic!("unexpected event {:?}", other),
    }

    // Back to tracking and still off route: prompt again on the next check
    assert!(matches!(harness.next_event().await, NavigationEvent::Deviated(_)));

    let (navigator, _) = harness.stop().await;
    assert_eq!(navigator.session().unwrap().route().title, "Kamo river walk");
}

#[tokio::test(start_paused = true)]
async fn recalculation_without_location_fails_fast() {
    let client = FakeRoutingService::answering();
    let mut harness = started(Arc::clone(&client));

    harness.command(WalkCommand::RequestRecalculation).await;
    match harness.next_event().await {
        NavigationEvent::RecalculationFailed(e) => {
            assert_eq!(e, RecalculationError::MissingSessionContext("current location"));
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert_eq!(client.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn result_after_finish_is_discarded() {
    let client = FakeRoutingService::answering();
    let mut harness = started(Arc::clone(&client));

    harness.locate(off_route(35.0055, 200.0)).await;
    assert!(matches!(harness.next_event().await, NavigationEvent::Deviated(_)));
    harness.command(WalkCommand::AcceptRecalculation).await;
    harness.command(WalkCommand::FinishWalk).await;
    assert!(matches!(harness.next_event().await, NavigationEvent::WalkFinished(Some(_))));

    // Let the outstanding request complete
    tokio::time::sleep(Duration::from_secs(10)).await;

    let (navigator, mut events) = harness.stop().await;
    assert!(events.recv().await.is_none());
    assert_eq!(client.calls(), 1);
    assert!(navigator.session().is_none());
    assert_eq!(navigator.state(), TrackingState::Idle);
    assert!(navigator.store().backend().is_empty());
}

// =============================================================================
// Persistence
// =============================================================================

#[tokio::test(start_paused = true)]
async fn walk_resumes_from_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("walk_session.json");

    let mut navigator = new_navigator(FakeRoutingService::answering(), JsonFileStore::new(&path));
    navigator.start_session(river_route(), WalkMode::TimeBased, None);
    let harness = Harness::spawn(navigator);
    harness.command(WalkCommand::MarkVisited(VisitedPoi::new("poi-1", "Bridge"))).await;
    harness.command(WalkCommand::AdvanceStep).await;
    harness.stop().await;

    let mut restarted = new_navigator(FakeRoutingService::answering(), JsonFileStore::new(&path));
    assert!(restarted.resume());
    assert_eq!(restarted.state(), TrackingState::Tracking);
    let session = restarted.session().unwrap();
    assert_eq!(session.route().id, "proposal-1");
    assert_eq!(session.mode(), WalkMode::TimeBased);
    assert_eq!(session.current_step(), 1);
    assert!(session.has_visited("poi-1"));
}
