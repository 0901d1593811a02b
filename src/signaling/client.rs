//! # Signaling Client
//!
//! Client-side counterpart of the signaling protocol: connects the control
//! WebSocket, registers within a bounded window, then drives media
//! negotiation (offer/answer plus incremental candidate trickle) against an
//! injected peer-connection engine.
//!
//! The control connection is only required during setup and for candidate
//! trickle. Once negotiation completes, the peer connection lives on its
//! own: dropping or losing this client does not tear it down.

use crate::config::SignalingConfig;
use crate::error::{AppError, AppResult};
use crate::signaling::{PeerType, SignalingMessage, DATA_CHANNEL_LABEL};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Handle to the local peer-connection engine.
///
/// The engine itself (media capture, encryption, connectivity checks) is an
/// external collaborator; this trait is the exact surface the signaling flow
/// needs from it. Errors are plain strings because every failure here simply
/// aborts establishment.
pub trait MediaPeer: Send {
    /// Create the local media description. With `receive_only` set the offer
    /// carries no outbound audio track, so no microphone permission is ever
    /// requested. Used for lip-sync and demo sessions.
    fn create_offer(&mut self, receive_only: bool) -> Result<String, String>;

    /// Apply the remote description received as the answer.
    fn apply_answer(&mut self, sdp: &str) -> Result<(), String>;

    /// Apply one remote reachability candidate. Candidates arrive in no
    /// particular order and each application stands alone.
    fn apply_remote_candidate(&mut self, candidate: &str) -> Result<(), String>;

    /// Take the locally gathered candidates that still need trickling to the
    /// remote side.
    fn drain_local_candidates(&mut self) -> Vec<String>;

    /// Open the bidirectional data channel used for JSON control and
    /// transcript traffic.
    fn open_data_channel(&mut self, label: &str) -> Result<(), String>;

    /// Whether the peer connection has reached the connected state.
    fn is_connected(&self) -> bool;
}

/// Client side of the control connection.
pub struct SignalingClient {
    ws: WsStream,
    config: SignalingConfig,
    session_id: Option<String>,
}

impl SignalingClient {
    /// Open the control WebSocket.
    pub async fn connect(url: &str, config: SignalingConfig) -> AppResult<Self> {
        let (ws, _) = connect_async(url)
            .await
            .map_err(|e| AppError::Internal(format!("signaling connect failed: {}", e)))?;

        info!(url = %url, "signaling connection established");
        Ok(Self {
            ws,
            config,
            session_id: None,
        })
    }

    /// Session id allocated by the server, once registered.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Phase one: announce this peer and wait for the acknowledgment.
    ///
    /// ## Failure semantics:
    /// - No `registered` reply within the configured window: `Timeout`
    /// - An explicit `error` reply: fails immediately with its message
    pub async fn register(&mut self, metadata: serde_json::Value) -> AppResult<String> {
        self.send(&SignalingMessage::Register {
            peer_type: PeerType::Client,
            session_id: None,
            metadata,
        })
        .await?;

        let window = Duration::from_secs(self.config.register_timeout_secs);
        let reply = tokio::time::timeout(window, self.next_signaling_message())
            .await
            .map_err(|_| {
                AppError::Timeout(format!(
                    "no registration reply within {}s",
                    self.config.register_timeout_secs
                ))
            })??;

        match reply {
            Some(SignalingMessage::Registered { session_id }) => {
                info!(session_id = %session_id, "registered with signaling server");
                self.session_id = Some(session_id.clone());
                Ok(session_id)
            }
            Some(SignalingMessage::Error { message }) => Err(AppError::BadRequest(format!(
                "registration rejected: {}",
                message
            ))),
            Some(other) => Err(AppError::Internal(format!(
                "unexpected reply to register: {:?}",
                other
            ))),
            None => Err(AppError::Internal(
                "signaling connection closed during registration".to_string(),
            )),
        }
    }

    /// Phase two: drive offer/answer and candidate trickle until the peer
    /// connection is established, then open the data channel.
    ///
    /// Microphone capture is configuration-gated: with it disabled the offer
    /// is created receive-only.
    pub async fn negotiate(&mut self, peer: &mut dyn MediaPeer) -> AppResult<()> {
        let receive_only = !self.config.enable_microphone;
        let offer = peer
            .create_offer(receive_only)
            .map_err(AppError::Internal)?;

        self.send(&SignalingMessage::Offer { sdp: offer }).await?;
        self.trickle_local_candidates(peer).await?;

        while !peer.is_connected() {
            let Some(message) = self.next_signaling_message().await? else {
                return Err(AppError::Internal(
                    "signaling connection closed during negotiation".to_string(),
                ));
            };

            match message {
                SignalingMessage::Answer { sdp } => {
                    peer.apply_answer(&sdp).map_err(AppError::Internal)?;
                    debug!("remote description applied");
                }
                SignalingMessage::IceCandidate { candidate } => {
                    // Each candidate stands alone; a bad one is logged and
                    // skipped rather than aborting establishment
                    if let Err(e) = peer.apply_remote_candidate(&candidate) {
                        warn!(error = %e, "discarding unusable remote candidate");
                    }
                }
                SignalingMessage::Error { message } => {
                    return Err(AppError::Internal(format!("negotiation failed: {}", message)));
                }
                other => {
                    debug!(?other, "ignoring non-negotiation message during setup");
                }
            }

            self.trickle_local_candidates(peer).await?;
        }

        peer.open_data_channel(DATA_CHANNEL_LABEL)
            .map_err(AppError::Internal)?;

        info!("peer connection established, data channel open");
        Ok(())
    }

    /// Send one opaque control/transcript payload.
    pub async fn send_payload(&mut self, payload: serde_json::Value) -> AppResult<()> {
        self.send(&SignalingMessage::Message { payload }).await
    }

    /// Receive the next protocol message, skipping transport-level frames.
    /// Returns None when the connection has closed.
    pub async fn next_signaling_message(&mut self) -> AppResult<Option<SignalingMessage>> {
        while let Some(frame) = self.ws.next().await {
            let frame =
                frame.map_err(|e| AppError::Internal(format!("signaling read failed: {}", e)))?;

            match frame {
                WsMessage::Text(text) => {
                    let message = serde_json::from_str::<SignalingMessage>(&text)
                        .map_err(|e| AppError::BadRequest(format!("bad signaling JSON: {}", e)))?;
                    return Ok(Some(message));
                }
                WsMessage::Close(_) => return Ok(None),
                // Pings are answered by the library; binary frames are not
                // part of this protocol
                _ => continue,
            }
        }
        Ok(None)
    }

    async fn trickle_local_candidates(&mut self, peer: &mut dyn MediaPeer) -> AppResult<()> {
        for candidate in peer.drain_local_candidates() {
            self.send(&SignalingMessage::IceCandidate { candidate })
                .await?;
        }
        Ok(())
    }

    async fn send(&mut self, message: &SignalingMessage) -> AppResult<()> {
        let json = serde_json::to_string(message)?;
        self.ws
            .send(WsMessage::Text(json))
            .await
            .map_err(|e| AppError::Internal(format!("signaling send failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    /// Scripted peer engine for negotiation tests.
    struct MockPeer {
        receive_only_requested: Option<bool>,
        answer_applied: bool,
        remote_candidates: Vec<String>,
        pending_local: Vec<String>,
        data_channel: Option<String>,
    }

    impl MockPeer {
        fn new() -> Self {
            Self {
                receive_only_requested: None,
                answer_applied: false,
                remote_candidates: Vec::new(),
                pending_local: vec!["candidate:local-1".to_string()],
                data_channel: None,
            }
        }
    }

    impl MediaPeer for MockPeer {
        fn create_offer(&mut self, receive_only: bool) -> Result<String, String> {
            self.receive_only_requested = Some(receive_only);
            Ok("v=0 mock-offer".to_string())
        }

        fn apply_answer(&mut self, sdp: &str) -> Result<(), String> {
            assert!(sdp.contains("mock-answer"));
            self.answer_applied = true;
            Ok(())
        }

        fn apply_remote_candidate(&mut self, candidate: &str) -> Result<(), String> {
            self.remote_candidates.push(candidate.to_string());
            Ok(())
        }

        fn drain_local_candidates(&mut self) -> Vec<String> {
            std::mem::take(&mut self.pending_local)
        }

        fn open_data_channel(&mut self, label: &str) -> Result<(), String> {
            self.data_channel = Some(label.to_string());
            Ok(())
        }

        fn is_connected(&self) -> bool {
            // Connected once the answer and at least one candidate landed
            self.answer_applied && !self.remote_candidates.is_empty()
        }
    }

    fn test_config(timeout_secs: u64) -> SignalingConfig {
        SignalingConfig {
            register_timeout_secs: timeout_secs,
            enable_microphone: false,
        }
    }

    async fn send_msg(
        ws: &mut WebSocketStream<TcpStream>,
        message: &SignalingMessage,
    ) {
        ws.send(WsMessage::Text(serde_json::to_string(message).unwrap()))
            .await
            .unwrap();
    }

    async fn recv_msg(ws: &mut WebSocketStream<TcpStream>) -> SignalingMessage {
        loop {
            let frame = ws.next().await.unwrap().unwrap();
            if let WsMessage::Text(text) = frame {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_register_and_negotiate_full_flow() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();

            match recv_msg(&mut ws).await {
                SignalingMessage::Register { peer_type, .. } => {
                    assert_eq!(peer_type, PeerType::Client);
                }
                other => panic!("expected register, got {:?}", other),
            }
            send_msg(
                &mut ws,
                &SignalingMessage::Registered {
                    session_id: "deadbeef".to_string(),
                },
            )
            .await;

            // Candidate trickle may interleave with the offer
            let mut saw_offer = false;
            let mut saw_candidate = false;
            while !(saw_offer && saw_candidate) {
                match recv_msg(&mut ws).await {
                    SignalingMessage::Offer { sdp } => {
                        assert_eq!(sdp, "v=0 mock-offer");
                        saw_offer = true;
                    }
                    SignalingMessage::IceCandidate { candidate } => {
                        assert_eq!(candidate, "candidate:local-1");
                        saw_candidate = true;
                    }
                    other => panic!("unexpected message: {:?}", other),
                }
            }

            send_msg(
                &mut ws,
                &SignalingMessage::Answer {
                    sdp: "v=0 mock-answer".to_string(),
                },
            )
            .await;
            send_msg(
                &mut ws,
                &SignalingMessage::IceCandidate {
                    candidate: "candidate:remote-1".to_string(),
                },
            )
            .await;
        });

        let url = format!("ws://{}", addr);
        let mut client = SignalingClient::connect(&url, test_config(5)).await.unwrap();

        let session_id = client.register(serde_json::json!({})).await.unwrap();
        assert_eq!(session_id, "deadbeef");
        assert_eq!(client.session_id(), Some("deadbeef"));

        let mut peer = MockPeer::new();
        client.negotiate(&mut peer).await.unwrap();

        // Microphone is disabled by default, so the offer was receive-only
        assert_eq!(peer.receive_only_requested, Some(true));
        assert_eq!(peer.remote_candidates, vec!["candidate:remote-1"]);
        assert_eq!(peer.data_channel.as_deref(), Some(DATA_CHANNEL_LABEL));

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_register_times_out_without_reply() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // Accept the socket but never answer the registration
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            let _ = recv_msg(&mut ws).await;
            tokio::time::sleep(Duration::from_secs(60)).await;
        });

        let url = format!("ws://{}", addr);
        let mut client = SignalingClient::connect(&url, test_config(0)).await.unwrap();

        let err = client.register(serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, AppError::Timeout(_)));

        server.abort();
    }

    #[tokio::test]
    async fn test_register_fails_on_explicit_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            let _ = recv_msg(&mut ws).await;
            send_msg(
                &mut ws,
                &SignalingMessage::Error {
                    message: "server at capacity".to_string(),
                },
            )
            .await;
        });

        let url = format!("ws://{}", addr);
        let mut client = SignalingClient::connect(&url, test_config(5)).await.unwrap();

        let err = client.register(serde_json::json!({})).await.unwrap_err();
        match err {
            AppError::BadRequest(msg) => assert!(msg.contains("server at capacity")),
            other => panic!("expected BadRequest, got {:?}", other),
        }

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_microphone_enables_sending_offer() {
        // No network needed: only the flag plumbing is under test
        let mut peer = MockPeer::new();
        let _ = peer.create_offer(false);
        assert_eq!(peer.receive_only_requested, Some(false));
    }
}
