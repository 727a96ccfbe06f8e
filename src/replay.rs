//! Plays a stored action sequence back against a live ragdoll and streams the
//! resulting poses to websocket viewers.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use crate::action::{Action, Actuator, ForceRow, decode_force_schedule};
use crate::candidate::Candidate;
use crate::checkpoint::CheckpointFile;
use crate::error::{Result, SearchError};
use crate::sim::{Ragdoll, RagdollFactory, Simulator, SimulatorFactory, SnapshotFrame};

pub const DEFAULT_REPLAY_TICK: Duration = Duration::from_millis(10);
pub const DEFAULT_REPLAY_PORT: u16 = 8787;
const DEFAULT_BIND_HOST: &str = "0.0.0.0";
const PORT_FALLBACK_ATTEMPTS: u16 = 32;

/// Which stored collection a replay draws from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReplaySource {
    /// Best accepted candidate, or the best open one if none was accepted.
    #[default]
    Best,
    Accepted,
    Frontier,
}

fn best_of(candidates: &[Candidate]) -> Option<&Candidate> {
    candidates
        .iter()
        .min_by(|a, b| a.score().total_cmp(&b.score()))
}

pub fn select_replay_candidate(file: &CheckpointFile, source: ReplaySource) -> Option<&Candidate> {
    match source {
        ReplaySource::Best => best_of(&file.accepted).or_else(|| best_of(&file.frontier)),
        ReplaySource::Accepted => best_of(&file.accepted),
        ReplaySource::Frontier => best_of(&file.frontier),
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReplayEvent {
    ReplayStarted {
        part_sizes: Vec<[f32; 3]>,
        action_count: usize,
        step_count: usize,
    },
    Snapshot {
        frame: SnapshotFrame,
    },
    ReplayComplete {
        distance: f32,
        elapsed: f32,
    },
}

/// Steps a ragdoll through a decoded force schedule, one row per tick.
pub struct ReplaySession {
    factory: RagdollFactory,
    sim: Ragdoll,
    action_count: usize,
    schedule: Vec<ForceRow>,
    cursor: usize,
}

impl ReplaySession {
    pub fn new(factory: RagdollFactory, actions: &[Action]) -> Result<Self> {
        if actions.is_empty() {
            return Err(SearchError::EmptySequence);
        }
        let sim = factory.create()?;
        Ok(Self {
            factory,
            sim,
            action_count: actions.len(),
            schedule: decode_force_schedule(actions),
            cursor: 0,
        })
    }

    pub fn schedule(&self) -> &[ForceRow] {
        &self.schedule
    }

    pub fn is_finished(&self) -> bool {
        self.cursor >= self.schedule.len()
    }

    pub fn started_event(&self) -> ReplayEvent {
        ReplayEvent::ReplayStarted {
            part_sizes: self.sim.part_sizes(),
            action_count: self.action_count,
            step_count: self.schedule.len(),
        }
    }

    pub fn current_frame(&self) -> SnapshotFrame {
        self.sim.current_frame()
    }

    /// Applies the next row and steps once; `None` once the schedule is spent.
    pub fn tick(&mut self) -> Result<Option<SnapshotFrame>> {
        let Some(row) = self.schedule.get(self.cursor) else {
            return Ok(None);
        };
        for actuator in Actuator::ALL {
            let command = row[actuator.index()];
            if command != 0.0 {
                self.sim.apply(actuator, command);
            }
        }
        self.sim.step()?;
        self.cursor += 1;
        Ok(Some(self.sim.current_frame()))
    }

    /// Starts over from a freshly built ragdoll.
    pub fn restart(&mut self) -> Result<()> {
        self.sim = self.factory.create()?;
        self.cursor = 0;
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct ReplayOptions {
    pub tick: Duration,
    pub port: u16,
    /// Stop after one pass instead of looping.
    pub once: bool,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            tick: DEFAULT_REPLAY_TICK,
            port: DEFAULT_REPLAY_PORT,
            once: false,
        }
    }
}

#[derive(Clone)]
struct ReplayState {
    events: broadcast::Sender<ReplayEvent>,
    intro: Arc<Mutex<Option<ReplayEvent>>>,
}

/// Serves `/api/replay/ws` and drives the session on a fixed interval until
/// `shutdown` resolves (or after one pass with `once`).
pub async fn run_replay(
    session: ReplaySession,
    options: ReplayOptions,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    let mut session = session;
    let (events, _) = broadcast::channel(512);
    let state = ReplayState {
        events: events.clone(),
        intro: Arc::new(Mutex::new(None)),
    };

    let app = Router::new()
        .route("/health", get(health))
        .route("/api/replay/ws", get(ws_replay_handler))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state.clone());
    let (listener, addr) = bind_listener(DEFAULT_BIND_HOST, options.port).await?;
    info!("replay viewer stream on ws://{addr}/api/replay/ws");
    let server = tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app).await {
            error!("replay server exited unexpectedly: {err}");
        }
    });

    publish_intro(&state, session.started_event());
    let mut interval = tokio::time::interval(options.tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::pin!(shutdown);

    let outcome = loop {
        tokio::select! {
            _ = &mut shutdown => break Ok(()),
            _ = interval.tick() => {}
        }

        match session.tick() {
            Ok(Some(frame)) => {
                let _ = events.send(ReplayEvent::Snapshot { frame });
            }
            Ok(None) => {
                let frame = session.current_frame();
                info!(
                    "replay pass complete: distance={:.3}m, elapsed={:.2}s",
                    frame.distance, frame.time
                );
                let _ = events.send(ReplayEvent::ReplayComplete {
                    distance: frame.distance,
                    elapsed: frame.time,
                });
                if options.once {
                    break Ok(());
                }
                if let Err(err) = session.restart() {
                    break Err(err);
                }
                publish_intro(&state, session.started_event());
            }
            Err(err) => break Err(err),
        }
    };

    server.abort();
    outcome
}

fn publish_intro(state: &ReplayState, event: ReplayEvent) {
    if let Ok(mut intro) = state.intro.lock() {
        *intro = Some(event.clone());
    }
    let _ = state.events.send(event);
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn ws_replay_handler(
    ws: WebSocketUpgrade,
    State(state): State<ReplayState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_replay_socket(socket, state))
}

async fn handle_replay_socket(socket: WebSocket, state: ReplayState) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut rx = state.events.subscribe();
    let intro = state.intro.lock().ok().and_then(|intro| intro.clone());
    if let Some(event) = intro {
        if send_replay_event(&mut ws_tx, &event).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            incoming = ws_rx.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            event = rx.recv() => match event {
                Ok(event) => {
                    if send_replay_event(&mut ws_tx, &event).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("replay websocket lagged by {skipped} events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
    let _ = ws_tx.close().await;
}

async fn send_replay_event(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    event: &ReplayEvent,
) -> std::result::Result<(), ()> {
    let text = match serde_json::to_string(event) {
        Ok(value) => value,
        Err(err) => {
            error!("failed to serialize replay event: {err}");
            return Err(());
        }
    };
    ws_tx
        .send(Message::Text(text.into()))
        .await
        .map_err(|err| {
            warn!("failed to send replay event: {err}");
        })
}

async fn bind_listener(
    host: &str,
    desired_port: u16,
) -> Result<(tokio::net::TcpListener, SocketAddr)> {
    let prefer_default_port = desired_port == DEFAULT_REPLAY_PORT;
    let bind_err = |port: u16, source: std::io::Error| SearchError::Bind {
        addr: format!("{host}:{port}"),
        source,
    };
    match tokio::net::TcpListener::bind((host, desired_port)).await {
        Ok(listener) => {
            let addr = listener
                .local_addr()
                .map_err(|err| bind_err(desired_port, err))?;
            Ok((listener, addr))
        }
        Err(err) if err.kind() == std::io::ErrorKind::AddrInUse && prefer_default_port => {
            for offset in 1..=PORT_FALLBACK_ATTEMPTS {
                let Some(candidate_port) = desired_port.checked_add(offset) else {
                    break;
                };
                match tokio::net::TcpListener::bind((host, candidate_port)).await {
                    Ok(listener) => {
                        let addr = listener
                            .local_addr()
                            .map_err(|err| bind_err(candidate_port, err))?;
                        warn!(
                            "port {desired_port} is in use, falling back to {addr}; set QWOP_REPLAY_PORT to choose a fixed port"
                        );
                        return Ok((listener, addr));
                    }
                    Err(fallback_err)
                        if fallback_err.kind() == std::io::ErrorKind::AddrInUse =>
                    {
                        continue;
                    }
                    Err(fallback_err) => return Err(bind_err(candidate_port, fallback_err)),
                }
            }
            Err(bind_err(desired_port, err))
        }
        Err(err) => Err(bind_err(desired_port, err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ACTION_REPEAT;
    use crate::evaluate::Evaluation;
    use crate::frontier::SearchOrder;
    use crate::search::SearchReport;

    fn stored(score: f32, actions: &[u8]) -> Candidate {
        serde_json::from_value(serde_json::json!({
            "actions": actions,
            "evaluation": Evaluation {
                score,
                constraint_violated: false,
                distance: 1.0,
                head_angle_error: 0.0,
                violation: None,
            },
        }))
        .unwrap()
    }

    fn file(frontier: Vec<Candidate>, accepted: Vec<Candidate>) -> CheckpointFile {
        CheckpointFile {
            version: 1,
            id: "test".to_string(),
            created_at_unix_ms: 0,
            order: SearchOrder::BestFirst,
            frontier,
            accepted,
            report: SearchReport::default(),
        }
    }

    #[test]
    fn prefers_accepted_candidates() {
        let checkpoint = file(
            vec![stored(-9.0, &[0])],
            vec![stored(-1.0, &[1, 1]), stored(-2.0, &[2, 2])],
        );
        let best = select_replay_candidate(&checkpoint, ReplaySource::Best).unwrap();
        assert_eq!(best.score(), -2.0);
        let open = select_replay_candidate(&checkpoint, ReplaySource::Frontier).unwrap();
        assert_eq!(open.score(), -9.0);
    }

    #[test]
    fn falls_back_to_open_candidates() {
        let checkpoint = file(vec![stored(-3.0, &[3]), stored(-4.0, &[0])], Vec::new());
        let best = select_replay_candidate(&checkpoint, ReplaySource::Best).unwrap();
        assert_eq!(best.score(), -4.0);
        assert!(select_replay_candidate(&checkpoint, ReplaySource::Accepted).is_none());
    }

    #[test]
    fn session_runs_the_whole_schedule_then_restarts() {
        let actions = [Action::ThighsForward, Action::CalvesBackward];
        let mut session = ReplaySession::new(RagdollFactory::default(), &actions).unwrap();
        assert_eq!(session.schedule().len(), 2 * ACTION_REPEAT);

        let mut frames = 0;
        while let Some(frame) = session.tick().unwrap() {
            frames += 1;
            assert_eq!(frame.bodies.len(), 6);
        }
        assert_eq!(frames, 2 * ACTION_REPEAT);
        assert!(session.is_finished());

        session.restart().unwrap();
        assert!(!session.is_finished());
        assert!(session.current_frame().time.abs() < 1e-6);
    }

    #[test]
    fn empty_replay_is_rejected() {
        assert!(matches!(
            ReplaySession::new(RagdollFactory::default(), &[]),
            Err(SearchError::EmptySequence)
        ));
    }
}
