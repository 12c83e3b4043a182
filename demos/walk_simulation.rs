//! Simulated walk that drifts off route and accepts a recalculation.
//!
//! Run with: cargo run --example walk_simulation

use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use walk_navigator::recalculation::{RecalculationRequest, UpdatedRoute};
use walk_navigator::{
    polyline, run_navigation, AmbientContext, FixedAmbient, GpsPoint, MemoryStore, NavigationEvent, Navigator, Route,
    RoutingClient, SessionStore, TimeOfDay, TrackingConfig, TransportError, WalkCommand, WalkMode,
};

/// Routing service stand-in: always routes straight east from the walker.
struct EastboundService;

impl RoutingClient for EastboundService {
    fn recalculate(&self, request: RecalculationRequest) -> BoxFuture<'static, Result<UpdatedRoute, TransportError>> {
        async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            let from = request.current_location;
            let path = vec![
                from,
                GpsPoint::new(from.latitude, from.longitude + 0.004),
                GpsPoint::new(from.latitude + 0.002, from.longitude + 0.006),
            ];
            Ok(UpdatedRoute {
                title: "Back streets to the shrine".to_string(),
                estimated_duration_minutes: 12,
                estimated_distance_meters: 750,
                highlights: vec!["Lantern alley".to_string(), "Shrine gate".to_string()],
                route_polyline: polyline::encode(&path),
                generated_story: String::new(),
            })
        }
        .boxed()
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Route north along the river (Kyoto)
    let path: Vec<GpsPoint> = (0..=10)
        .map(|i| GpsPoint::new(35.000 + i as f64 * 0.001, 135.760))
        .collect();
    let route = Route::new("demo-1", "Kamo river walk", polyline::encode(&path))
        .with_estimates(15, 1100)
        .with_highlights(vec!["Bridge".to_string(), "Stepping stones".to_string()]);

    println!("Walk Simulation\n");
    println!("Route: {} ({} points, {}, {})", route.title, route.path.len(), route.distance_label(), route.duration_label());

    let config = TrackingConfig { poll_interval_secs: 1, ..TrackingConfig::default() };
    println!("Deviation threshold: {}m\n", config.deviation_threshold_meters);

    let ambient = FixedAmbient(AmbientContext {
        weather: "sunny".to_string(),
        time_of_day: TimeOfDay::Afternoon,
    });
    let mut navigator = Navigator::new(
        config,
        Arc::new(EastboundService),
        SessionStore::new(MemoryStore::new()),
        Box::new(ambient),
    );
    navigator.start_session(route, WalkMode::Destination, None);

    let (location_tx, location_rx) = mpsc::channel(16);
    let (command_tx, command_rx) = mpsc::channel(16);
    let (event_tx, mut event_rx) = mpsc::channel(16);
    let navigation = tokio::spawn(run_navigation(navigator, location_rx, command_rx, event_tx));

    // Walk north, drifting east by 40m per sample
    for i in 0..8 {
        let lat = 35.0005 + i as f64 * 0.001;
        let lng = 135.760 + (i as f64 * 40.0) / (111_195.0 * lat.to_radians().cos());
        let _ = location_tx.send(GpsPoint::new(lat, lng)).await;
    }

    while let Some(event) = event_rx.recv().await {
        match event {
            NavigationEvent::Deviated(e) => {
                println!("Off route: {:.0}m from segment {}", e.distance_meters, e.segment_index);
                println!("Accepting recalculation...");
                let _ = command_tx.send(WalkCommand::AcceptRecalculation).await;
            }
            NavigationEvent::RouteUpdated(route) => {
                println!("New route: {} ({} points, {})", route.title, route.path.len(), route.distance_label());
                let _ = command_tx.send(WalkCommand::FinishWalk).await;
            }
            NavigationEvent::RecalculationFailed(e) => {
                println!("Recalculation failed: {}", e);
                let _ = command_tx.send(WalkCommand::FinishWalk).await;
            }
            NavigationEvent::WalkFinished(session) => {
                let visited = session.map_or(0, |s| s.visited_pois().len());
                println!("Walk finished ({} POIs visited)", visited);
                break;
            }
        }
    }

    drop(command_tx);
    drop(location_tx);
    let _ = navigation.await;
}
