//! # Signaling Protocol
//!
//! JSON message protocol spoken over the persistent control connection.
//! Establishment is two-phase:
//!
//! 1. **Registration**: the client announces itself and the server either
//!    acknowledges with `registered` or rejects with `error`
//! 2. **Media negotiation**: `offer` / `answer` exchange followed by
//!    bidirectional `ice_candidate` trickle until the peer connection is up
//!
//! After establishment the same envelope carries opaque `message` payloads
//! (control/transcript traffic on the auxiliary data channel) and `frame`
//! deliveries to viewer sessions.

pub mod client;

pub use client::{MediaPeer, SignalingClient};

use crate::session::FramePayload;
use serde::{Deserialize, Serialize};

/// Label of the auxiliary data channel the client opens once the peer
/// connection is established.
pub const DATA_CHANNEL_LABEL: &str = "talentai";

/// Role a peer announces during registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerType {
    /// A viewing browser client
    Client,
    /// The avatar renderer peer
    Avatar,
}

/// Control-channel message types exchanged between client and server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SignalingMessage {
    /// Peer announcement, first message on every connection
    #[serde(rename = "register")]
    Register {
        peer_type: PeerType,
        /// Present when re-attaching to a known session
        session_id: Option<String>,
        /// Arbitrary caller-supplied metadata stored on the session
        metadata: serde_json::Value,
    },

    /// Successful registration acknowledgment
    #[serde(rename = "registered")]
    Registered {
        /// Identity allocated (or confirmed) by the server
        session_id: String,
    },

    /// Explicit rejection; terminates session establishment
    #[serde(rename = "error")]
    Error { message: String },

    /// Local media description from the offering peer
    #[serde(rename = "offer")]
    Offer { sdp: String },

    /// Remote media description answering an offer
    #[serde(rename = "answer")]
    Answer { sdp: String },

    /// One network reachability candidate. Candidates may arrive in any
    /// order; each is applied independently.
    #[serde(rename = "ice_candidate")]
    IceCandidate { candidate: String },

    /// Opaque control/transcript payload passed through unchanged
    #[serde(rename = "message")]
    Message { payload: serde_json::Value },

    /// One rendered frame destined for a viewer session
    #[serde(rename = "frame")]
    Frame(FramePayload),
}

/// Commands accepted from a registered viewer over the control connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StreamCommand {
    #[serde(rename = "start_streaming")]
    Start {
        width: Option<u32>,
        height: Option<u32>,
        fps: Option<u32>,
    },

    #[serde(rename = "pause_streaming")]
    Pause,

    #[serde(rename = "resume_streaming")]
    Resume,

    #[serde(rename = "stop_streaming")]
    Stop,
}
