//! # Navigation Event Loop
//!
//! Single consumer of location samples, walker commands and recalculation
//! results for one [`Navigator`].
//!
//! Location samples and the poll timer run the same deviation check; the timer
//! re-checks the last known position so a walker whose GPS has gone quiet is
//! still evaluated. Recalculation requests run on a spawned task and report
//! back through a channel, so the loop keeps handling samples and commands
//! while a request is outstanding.

use crate::error::{RecalculationError, TransportError};
use crate::monitor::{DeviationEvent, TrackingState};
use crate::navigator::Navigator;
use crate::recalculation::{RecalculationOutcome, RecalculationTicket, RoutingClient, UpdatedRoute};
use crate::session::{Route, RouteSession, VisitedPoi, WalkMode};
use crate::store::KeyValueStore;
use crate::GpsPoint;
use log::{debug, info};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

/// Result of a spawned recalculation, tagged with its session generation.
type RecalculationResult = (u64, Result<UpdatedRoute, TransportError>);

/// Commands from the walker (UI).
#[derive(Debug, Clone)]
pub enum WalkCommand {
    /// Begin a new walk, replacing any current one
    StartWalk {
        route: Route,
        mode: WalkMode,
        destination: Option<GpsPoint>,
    },
    /// Accept the pending deviation prompt
    AcceptRecalculation,
    /// Dismiss the pending deviation prompt
    DismissDeviation,
    /// Recalculate now, prompt or not
    RequestRecalculation,
    MarkVisited(VisitedPoi),
    AdvanceStep,
    FinishWalk,
}

/// Notifications for the walker (UI).
#[derive(Debug, Clone)]
pub enum NavigationEvent {
    /// Walker left the route; show the recalculation prompt
    Deviated(DeviationEvent),
    /// A recalculated route replaced the current one
    RouteUpdated(Route),
    /// Recalculation could not run or failed; the current route stays
    RecalculationFailed(RecalculationError),
    /// The walk ended; carries the finished session if there was one
    WalkFinished(Option<RouteSession>),
}

/// Drive `navigator` until the command channel closes, then hand it back.
///
/// A closed location channel only stops sampling; the poll timer keeps
/// re-checking the last known position. Events are dropped if nobody is
/// listening.
pub async fn run_navigation<C, S>(
    mut navigator: Navigator<C, S>,
    mut locations: mpsc::Receiver<GpsPoint>,
    mut commands: mpsc::Receiver<WalkCommand>,
    events: mpsc::Sender<NavigationEvent>,
) -> Navigator<C, S>
where
    C: RoutingClient,
    S: KeyValueStore,
{
    let mut ticker = tokio::time::interval(navigator.config().poll_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    ticker.tick().await;

    let (result_tx, mut results) = mpsc::channel::<RecalculationResult>(4);
    let mut locations_open = true;

    info!(
        "[Tracker] Navigation loop started (poll every {:?})",
        navigator.config().poll_interval()
    );

    loop {
        let event = tokio::select! {
            biased;

            Some((generation, result)) = results.recv() => {
                match navigator.complete_recalculation(generation, result) {
                    RecalculationOutcome::Applied(route) => Some(NavigationEvent::RouteUpdated(route)),
                    RecalculationOutcome::Failed(e) => Some(NavigationEvent::RecalculationFailed(e)),
                    RecalculationOutcome::Discarded(_) => None,
                }
            }

            command = commands.recv() => {
                match command {
                    Some(command) => handle_command(&mut navigator, command, &result_tx),
                    None => {
                        debug!("[Tracker] Command channel closed");
                        break;
                    }
                }
            }

            sample = locations.recv(), if locations_open => {
                match sample {
                    Some(position) => navigator.on_location(position).map(NavigationEvent::Deviated),
                    None => {
                        debug!("[Tracker] Location channel closed; continuing on the poll timer");
                        locations_open = false;
                        None
                    }
                }
            }

            _ = ticker.tick() => navigator.on_tick().map(NavigationEvent::Deviated),
        };

        if let Some(event) = event {
            if events.send(event).await.is_err() {
                debug!("[Tracker] No event listener; event dropped");
            }
        }
    }

    info!("[Tracker] Navigation loop stopped");
    navigator
}

fn handle_command<C, S>(
    navigator: &mut Navigator<C, S>,
    command: WalkCommand,
    results: &mpsc::Sender<RecalculationResult>,
) -> Option<NavigationEvent>
where
    C: RoutingClient,
    S: KeyValueStore,
{
    match command {
        WalkCommand::StartWalk { route, mode, destination } => {
            navigator.start_session(route, mode, destination);
            None
        }
        WalkCommand::AcceptRecalculation => {
            if navigator.state() != TrackingState::DeviationPending {
                debug!("[Tracker] No deviation prompt pending; accept ignored");
                return None;
            }
            recalculate(navigator, results)
        }
        WalkCommand::RequestRecalculation => recalculate(navigator, results),
        WalkCommand::DismissDeviation => {
            navigator.dismiss_deviation();
            None
        }
        WalkCommand::MarkVisited(poi) => {
            navigator.mark_visited(poi);
            None
        }
        WalkCommand::AdvanceStep => {
            navigator.advance_step();
            None
        }
        WalkCommand::FinishWalk => Some(NavigationEvent::WalkFinished(navigator.finish_walk())),
    }
}

fn recalculate<C, S>(
    navigator: &mut Navigator<C, S>,
    results: &mpsc::Sender<RecalculationResult>,
) -> Option<NavigationEvent>
where
    C: RoutingClient,
    S: KeyValueStore,
{
    match navigator.request_recalculation() {
        Ok(Some(ticket)) => {
            spawn_recalculation(ticket, results.clone());
            None
        }
        Ok(None) => None,
        Err(e) => Some(NavigationEvent::RecalculationFailed(e)),
    }
}

fn spawn_recalculation(ticket: RecalculationTicket, results: mpsc::Sender<RecalculationResult>) {
    let RecalculationTicket { generation, response, .. } = ticket;
    tokio::spawn(async move {
        let result = response.await;
        if results.send((generation, result)).await.is_err() {
            debug!("[Tracker] Loop stopped before recalculation for generation {} finished", generation);
        }
    });
}
