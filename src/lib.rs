//! # TalentAI Avatar Backend
//!
//! Session, streaming, animation and encoding pipeline for a synthetic
//! talking avatar used in AI-conducted interviews.
//!
//! ## Architecture:
//! - **session**: pool of connected viewers with capacity limits, bounded
//!   frame buffers and heartbeat garbage collection
//! - **signaling**: the JSON control protocol plus its client-side driver
//! - **websocket**: server-side signaling endpoint feeding the session pool
//! - **animation**: phoneme-to-viseme lip-sync applied to morph targets
//! - **video**: batch ffmpeg encoding and live capture recording
//! - **config / state / health / middleware / handlers**: the service shell
//!
//! The binary in `main.rs` wires these into the HTTP server; the library
//! surface is also consumed directly by the desktop client (recorder,
//! signaling client, animation adapters).

pub mod animation;
pub mod config;
pub mod error;
pub mod handlers;
pub mod health;
pub mod middleware;
pub mod session;
pub mod signaling;
pub mod state;
pub mod video;
pub mod websocket;
