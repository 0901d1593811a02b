//! # Signaling WebSocket Handler
//!
//! Server side of the signaling protocol. Each connection is one actor:
//! registration creates a viewer session in the shared manager, media
//! negotiation is answered through the injected media gateway, and rendered
//! frames flow back out through this connection's `FrameSink`.
//!
//! ## Protocol:
//! 1. **Registration**: `register` is acknowledged with `registered` (or an
//!    `error` when the pool is full or shutting down)
//! 2. **Negotiation**: `offer` is answered with `answer`; `ice_candidate`
//!    messages trickle in both directions, each applied independently
//! 3. **Streaming**: `start_streaming` / `pause` / `resume` / `stop`
//!    commands drive the session state machine; frames are pushed as
//!    `frame` messages

use crate::session::{FrameSink, SessionManager};
use crate::signaling::{PeerType, SignalingMessage, StreamCommand};
use crate::state::AppState;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// How often the connection-liveness ping runs.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
/// A connection silent for this long is dropped.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// Media-engine boundary: turns an incoming offer into an answer and deals
/// in reachability candidates. The real implementation wraps the neural
/// avatar renderer; it is injected so the signaling layer never depends on
/// it directly.
pub trait MediaGateway: Send + Sync {
    fn create_answer(&self, session_id: &str, offer_sdp: &str) -> Result<String, String>;

    /// Apply one remote candidate. Candidates arrive in any order and each
    /// application stands alone, so a failure only affects that candidate.
    fn add_remote_candidate(&self, session_id: &str, candidate: &str) -> Result<(), String>;

    /// Locally gathered candidates to trickle back to the peer.
    fn local_candidates(&self, session_id: &str) -> Vec<String>;
}

/// Gateway for demo and validation sessions with no media engine attached:
/// answers mirror the offer as a receive-only description and no candidates
/// are gathered. Lets mic-less lip-sync demos negotiate end to end.
pub struct LoopbackMediaGateway;

impl MediaGateway for LoopbackMediaGateway {
    fn create_answer(&self, session_id: &str, offer_sdp: &str) -> Result<String, String> {
        if offer_sdp.trim().is_empty() {
            return Err("empty offer".to_string());
        }
        Ok(format!("v=0 loopback-answer session={}", session_id))
    }

    fn add_remote_candidate(&self, session_id: &str, candidate: &str) -> Result<(), String> {
        debug!(session_id = %session_id, candidate = %candidate, "loopback gateway absorbing candidate");
        Ok(())
    }

    fn local_candidates(&self, _session_id: &str) -> Vec<String> {
        Vec::new()
    }
}

/// Outbound transport handle given to the session manager. Delivery goes
/// through the actor mailbox; the shared `open` flag flips when the actor
/// stops so sends against a dead connection are refused cheaply.
pub struct WsFrameSink {
    addr: Addr<SignalingSocket>,
    open: Arc<AtomicBool>,
}

impl FrameSink for WsFrameSink {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn send_text(&self, payload: String) -> Result<(), String> {
        self.addr
            .try_send(SendText(payload))
            .map_err(|e| format!("mailbox send failed: {}", e))
    }

    fn close(&self) -> Result<(), String> {
        self.open.store(false, Ordering::SeqCst);
        self.addr
            .try_send(CloseConnection)
            .map_err(|e| format!("mailbox close failed: {}", e))
    }
}

/// Message for sending text to the WebSocket client.
#[derive(Message)]
#[rtype(result = "()")]
struct SendText(String);

/// Message asking the actor to drop the connection.
#[derive(Message)]
#[rtype(result = "()")]
struct CloseConnection;

/// WebSocket actor for one signaling connection.
pub struct SignalingSocket {
    manager: Arc<SessionManager>,
    gateway: Arc<dyn MediaGateway>,
    app_state: AppState,

    /// Session created at registration, if any (viewer connections)
    session_id: Option<String>,

    /// Session this connection renders frames for (avatar peer connections)
    producer_for: Option<String>,

    /// Shared with the `WsFrameSink` handed to the manager
    open: Arc<AtomicBool>,

    last_heartbeat: Instant,
}

impl SignalingSocket {
    pub fn new(
        manager: Arc<SessionManager>,
        gateway: Arc<dyn MediaGateway>,
        app_state: AppState,
    ) -> Self {
        Self {
            manager,
            gateway,
            app_state,
            session_id: None,
            producer_for: None,
            open: Arc::new(AtomicBool::new(true)),
            last_heartbeat: Instant::now(),
        }
    }

    fn send_message(&self, ctx: &mut ws::WebsocketContext<Self>, message: &SignalingMessage) {
        if let Ok(json) = serde_json::to_string(message) {
            ctx.text(json);
        }
    }

    fn send_error(&self, ctx: &mut ws::WebsocketContext<Self>, message: &str) {
        warn!(session_id = ?self.session_id, message, "signaling error sent to client");
        self.send_message(
            ctx,
            &SignalingMessage::Error {
                message: message.to_string(),
            },
        );
    }

    fn handle_register(
        &mut self,
        ctx: &mut ws::WebsocketContext<Self>,
        peer_type: PeerType,
        session_id: Option<String>,
        metadata: serde_json::Value,
    ) {
        if self.session_id.is_some() || self.producer_for.is_some() {
            self.send_error(ctx, "already registered");
            return;
        }

        debug!(?peer_type, "registration received");
        match peer_type {
            PeerType::Client => {
                let sink = Arc::new(WsFrameSink {
                    addr: ctx.address(),
                    open: self.open.clone(),
                });

                match self.manager.create_session(sink, metadata) {
                    Some(session) => {
                        self.session_id = Some(session.id.clone());
                        self.app_state.increment_active_sessions();
                        self.send_message(
                            ctx,
                            &SignalingMessage::Registered {
                                session_id: session.id.clone(),
                            },
                        );
                    }
                    None => {
                        // Capacity and shutdown are expected conditions; the
                        // client gets the explicit error reply the protocol
                        // promises
                        self.send_error(
                            ctx,
                            "session rejected: server at capacity or shutting down",
                        );
                    }
                }
            }
            PeerType::Avatar => {
                // The renderer attaches to an existing viewer session and
                // pushes frames for it; it owns no session of its own
                let Some(target) = session_id else {
                    self.send_error(ctx, "avatar registration requires a session_id");
                    return;
                };
                if self.manager.get_session(&target).is_none() {
                    self.send_error(ctx, &format!("unknown session '{}'", target));
                    return;
                }

                self.producer_for = Some(target.clone());
                self.send_message(ctx, &SignalingMessage::Registered { session_id: target });
            }
        }
    }

    /// A frame pushed by the renderer peer: buffer it on the target session
    /// and drain the buffer to the viewer's transport.
    fn handle_frame(&mut self, frame: crate::session::FramePayload) {
        let Some(target) = self.producer_for.clone() else {
            warn!("frame received from a non-producer connection");
            return;
        };

        let dropped = self.manager.buffer_frame(&target, frame);
        if dropped > 0 {
            self.app_state.record_frames_dropped(dropped as u64);
        }

        let delivered = self.manager.flush_session(&target);
        if delivered > 0 {
            self.app_state.record_frames_sent(delivered as u64);
        }
    }

    fn handle_offer(&mut self, ctx: &mut ws::WebsocketContext<Self>, sdp: String) {
        let Some(session_id) = self.session_id.clone() else {
            self.send_error(ctx, "offer before registration");
            return;
        };

        match self.gateway.create_answer(&session_id, &sdp) {
            Ok(answer) => {
                self.send_message(ctx, &SignalingMessage::Answer { sdp: answer });
                for candidate in self.gateway.local_candidates(&session_id) {
                    self.send_message(ctx, &SignalingMessage::IceCandidate { candidate });
                }
                self.manager.touch_session(&session_id);
            }
            Err(e) => {
                self.send_error(ctx, &format!("negotiation failed: {}", e));
            }
        }
    }

    fn handle_command(&mut self, ctx: &mut ws::WebsocketContext<Self>, command: StreamCommand) {
        let Some(session_id) = self.session_id.clone() else {
            self.send_error(ctx, "command before registration");
            return;
        };

        match command {
            StreamCommand::Start { width, height, fps } => {
                let base = self.manager.get_session(&session_id).map(|s| s.stream_config());
                let config = base.map(|base| crate::session::StreamConfig {
                    width: width.unwrap_or(base.width),
                    height: height.unwrap_or(base.height),
                    fps: fps.unwrap_or(base.fps),
                });

                match self.manager.start_streaming(&session_id, config) {
                    Ok(()) => self.send_status(ctx, &session_id),
                    Err(e) => self.send_error(ctx, &e.to_string()),
                }
            }
            StreamCommand::Pause => {
                self.manager.pause_streaming(&session_id);
                self.send_status(ctx, &session_id);
            }
            StreamCommand::Resume => {
                self.manager.resume_streaming(&session_id);
                self.send_status(ctx, &session_id);
            }
            StreamCommand::Stop => {
                self.manager.stop_streaming(&session_id);
                self.send_status(ctx, &session_id);
            }
        }
    }

    fn send_status(&self, ctx: &mut ws::WebsocketContext<Self>, session_id: &str) {
        let Some(session) = self.manager.get_session(session_id) else {
            return;
        };
        self.send_message(
            ctx,
            &SignalingMessage::Message {
                payload: serde_json::json!({
                    "kind": "session_status",
                    "session_id": session_id,
                    "state": session.state_label(),
                }),
            },
        );
    }

    fn handle_text(&mut self, ctx: &mut ws::WebsocketContext<Self>, text: &str) {
        // Protocol messages first, then streaming commands
        if let Ok(message) = serde_json::from_str::<SignalingMessage>(text) {
            match message {
                SignalingMessage::Register {
                    peer_type,
                    session_id,
                    metadata,
                } => self.handle_register(ctx, peer_type, session_id, metadata),
                SignalingMessage::Offer { sdp } => self.handle_offer(ctx, sdp),
                SignalingMessage::IceCandidate { candidate } => {
                    if let Some(session_id) = &self.session_id {
                        if let Err(e) = self.gateway.add_remote_candidate(session_id, &candidate) {
                            // One unusable candidate never aborts negotiation
                            warn!(session_id = %session_id, error = %e, "discarding candidate");
                        }
                    }
                }
                SignalingMessage::Message { payload } => {
                    if let Some(session_id) = &self.session_id {
                        if let Some(session) = self.manager.get_session(session_id) {
                            session.record_message_received();
                            session.touch();
                        }
                        debug!(session_id = %session_id, ?payload, "control payload received");
                    }
                }
                SignalingMessage::Frame(frame) => self.handle_frame(frame),
                other => {
                    debug!(?other, "ignoring server-bound message of server-sent type");
                }
            }
            return;
        }

        match serde_json::from_str::<StreamCommand>(text) {
            Ok(command) => self.handle_command(ctx, command),
            Err(e) => self.send_error(ctx, &format!("invalid message: {}", e)),
        }
    }
}

impl Actor for SignalingSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!("signaling connection started");

        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!("signaling heartbeat timeout, closing connection");
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        self.open.store(false, Ordering::SeqCst);

        if let Some(session_id) = self.session_id.take() {
            // Best effort: the session may already be gone if the manager
            // closed it first (timeout, shutdown)
            self.manager.close_session(&session_id, "connection_closed");
            self.app_state.decrement_active_sessions();
        }
        info!("signaling connection stopped");
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for SignalingSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                self.handle_text(ctx, &text);
            }
            Ok(ws::Message::Binary(_)) => {
                // The protocol is JSON text; frames travel base64 inside it
                warn!("unexpected binary frame on signaling connection");
            }
            Ok(ws::Message::Ping(data)) => {
                ctx.pong(&data);
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!(?reason, "signaling connection closed by client");
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!("unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(e) => {
                warn!(error = %e, "signaling protocol error");
                ctx.stop();
            }
        }
    }
}

impl Handler<SendText> for SignalingSocket {
    type Result = ();

    fn handle(&mut self, msg: SendText, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

impl Handler<CloseConnection> for SignalingSocket {
    type Result = ();

    fn handle(&mut self, _msg: CloseConnection, ctx: &mut Self::Context) {
        ctx.stop();
    }
}

/// WebSocket endpoint handler: upgrades the HTTP request and hands the
/// connection to a fresh `SignalingSocket` actor.
pub async fn signaling_websocket(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
    manager: web::Data<SessionManager>,
    gateway: web::Data<dyn MediaGateway>,
) -> ActixResult<HttpResponse> {
    info!(
        peer = ?req.connection_info().peer_addr(),
        "new signaling connection request"
    );

    let socket = SignalingSocket::new(
        manager.into_inner(),
        gateway.into_inner(),
        app_state.get_ref().clone(),
    );

    ws::start(socket, &req, stream)
}
