//! # Viewer Session Management
//!
//! One `Session` per connected viewer of the avatar stream. A session owns
//! its transport handle and its bounded frame buffer exclusively for its
//! whole lifetime; every other component goes through the `SessionManager`.
//!
//! ## Session Lifecycle:
//! 1. **Created**: Registered, transport attached, no frames flowing yet
//! 2. **Streaming**: Actively receiving rendered frames
//! 3. **Paused**: Delivery suspended, can be resumed
//! 4. **Closed**: Transport closed, buffers flushed, removed from the table

pub mod frame_buffer;
pub mod manager;

pub use frame_buffer::{FrameBuffer, FramePayload};
pub use manager::SessionManager;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Per-session streaming geometry. Starts from the server-wide default and
/// may be replaced by the client when streaming starts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreamConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl From<&crate::config::StreamingConfig> for StreamConfig {
    fn from(cfg: &crate::config::StreamingConfig) -> Self {
        Self {
            width: cfg.width,
            height: cfg.height,
            fps: cfg.fps,
        }
    }
}

/// Outbound half of a session's transport.
///
/// The signaling WebSocket actor implements this for live connections; tests
/// substitute an in-memory sink. Send and close failures are reported as
/// plain strings because the manager absorbs them into counters rather than
/// propagating them.
pub trait FrameSink: Send + Sync {
    /// Whether the underlying connection can currently accept a send.
    fn is_open(&self) -> bool;

    /// Queue one JSON text payload for delivery.
    fn send_text(&self, payload: String) -> Result<(), String>;

    /// Close the underlying connection.
    fn close(&self) -> Result<(), String>;
}

/// Typed lifecycle notifications dispatched by the manager.
///
/// Dispatched through an injected `SessionObserver` rather than a broadcast
/// bus so the manager's contract stays testable without any event wiring.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Created {
        session_id: String,
    },
    StreamingStarted {
        session_id: String,
    },
    StreamingPaused {
        session_id: String,
    },
    StreamingResumed {
        session_id: String,
    },
    StreamingStopped {
        session_id: String,
    },
    Closed {
        session_id: String,
        reason: String,
        frames_sent: u64,
        errors: u64,
    },
    ShutdownComplete,
}

/// Receiver for session lifecycle events.
pub trait SessionObserver: Send + Sync {
    fn on_event(&self, event: &SessionEvent);
}

/// Default observer: structured logs only.
pub struct LogObserver;

impl SessionObserver for LogObserver {
    fn on_event(&self, event: &SessionEvent) {
        tracing::debug!(?event, "session lifecycle event");
    }
}

/// Represents a single connected viewer.
///
/// ## Ownership:
/// The transport handle and the frame buffer belong to this session alone.
/// The manager hands out `Arc<Session>` for reading counters and flags, but
/// all mutation funnels through the manager's methods.
pub struct Session {
    /// Opaque 128-bit identifier, hex encoded, fixed at creation
    pub id: String,

    /// Outbound transport, owned exclusively by this session
    transport: Arc<dyn FrameSink>,

    /// Arbitrary caller-supplied metadata (candidate id, interview id, ...)
    pub metadata: serde_json::Value,

    /// When the session was created
    pub created_at: DateTime<Utc>,

    /// Monotonic last-activity marker, refreshed by every successful send
    last_activity: RwLock<Instant>,

    /// Streaming flags. `paused` is only ever true while `active` is true.
    active: AtomicBool,
    paused: AtomicBool,

    /// Streaming geometry, mutable over the session's lifetime
    stream_config: RwLock<StreamConfig>,

    /// Bounded outbound frame queue
    pub buffer: FrameBuffer,

    /// Delivery counters
    frames_sent: AtomicU64,
    messages_received: AtomicU64,
    errors: AtomicU64,
}

impl Session {
    pub fn new(
        transport: Arc<dyn FrameSink>,
        metadata: serde_json::Value,
        stream_config: StreamConfig,
        buffer_capacity: usize,
    ) -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string(),
            transport,
            metadata,
            created_at: Utc::now(),
            last_activity: RwLock::new(Instant::now()),
            active: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            stream_config: RwLock::new(stream_config),
            buffer: FrameBuffer::new(buffer_capacity),
            frames_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    pub fn transport(&self) -> &Arc<dyn FrameSink> {
        &self.transport
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub(crate) fn set_streaming(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
        if !active {
            self.paused.store(false, Ordering::SeqCst);
        }
    }

    /// Pausing a session that is not streaming is a no-op, which keeps the
    /// invariant that `paused` implies `active`.
    pub(crate) fn set_paused(&self, paused: bool) -> bool {
        if paused && !self.is_active() {
            return false;
        }
        self.paused.store(paused, Ordering::SeqCst);
        true
    }

    /// Refresh the activity marker.
    pub fn touch(&self) {
        *self.last_activity.write().unwrap() = Instant::now();
    }

    /// How long this session has been idle.
    pub fn idle_duration(&self) -> Duration {
        self.last_activity.read().unwrap().elapsed()
    }

    pub fn stream_config(&self) -> StreamConfig {
        *self.stream_config.read().unwrap()
    }

    pub(crate) fn set_stream_config(&self, config: StreamConfig) {
        *self.stream_config.write().unwrap() = config;
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::SeqCst)
    }

    pub(crate) fn record_frame_sent(&self) {
        self.frames_sent.fetch_add(1, Ordering::SeqCst);
    }

    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::SeqCst)
    }

    pub fn record_message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::SeqCst);
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::SeqCst)
    }

    pub(crate) fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }

    /// Human-readable state label for status endpoints.
    pub fn state_label(&self) -> &'static str {
        if self.is_paused() {
            "paused"
        } else if self.is_active() {
            "streaming"
        } else {
            "created"
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::MockSink;
    use super::*;

    fn session() -> Session {
        Session::new(
            Arc::new(MockSink::new()),
            serde_json::json!({"candidate": "c-1"}),
            StreamConfig {
                width: 512,
                height: 512,
                fps: 30,
            },
            4,
        )
    }

    #[test]
    fn test_identity_is_128_bit_hex() {
        let s = session();
        assert_eq!(s.id.len(), 32);
        assert!(s.id.chars().all(|c| c.is_ascii_hexdigit()));

        // Identities are unique across sessions
        assert_ne!(s.id, session().id);
    }

    #[test]
    fn test_paused_implies_active() {
        let s = session();

        // Cannot pause a session that never started streaming
        assert!(!s.set_paused(true));
        assert!(!s.is_paused());

        s.set_streaming(true);
        assert!(s.set_paused(true));
        assert!(s.is_paused());
        assert!(s.is_active());

        // Stopping the stream clears the pause flag too
        s.set_streaming(false);
        assert!(!s.is_paused());
    }

    #[test]
    fn test_state_labels() {
        let s = session();
        assert_eq!(s.state_label(), "created");
        s.set_streaming(true);
        assert_eq!(s.state_label(), "streaming");
        s.set_paused(true);
        assert_eq!(s.state_label(), "paused");
    }

    #[test]
    fn test_touch_resets_idle_clock() {
        let s = session();
        std::thread::sleep(Duration::from_millis(20));
        assert!(s.idle_duration() >= Duration::from_millis(20));
        s.touch();
        assert!(s.idle_duration() < Duration::from_millis(20));
    }
}
