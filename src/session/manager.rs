//! # Session Manager
//!
//! Owns the table of live viewer sessions. Enforces the capacity limit,
//! drives streaming state transitions, buffers and delivers frames, reaps
//! idle sessions on a heartbeat, and force-closes everything on shutdown.
//!
//! ## Resource Management:
//! - New sessions are rejected (None, not an error) at capacity or during
//!   shutdown, since both are expected steady-state conditions
//! - Each session exclusively owns its transport and frame buffer
//! - The heartbeat bounds resource usage from abandoned connections without
//!   relying on client-side cleanup
//!
//! ## Reentrancy:
//! Observer callbacks and transport closes can re-enter the manager (a close
//! event firing during a heartbeat scan). Every scan therefore collects ids
//! under a short read lock, drops the lock, and then mutates one session at
//! a time.

use crate::config::{SessionConfig, StreamingConfig};
use crate::error::{AppError, AppResult};
use crate::session::{
    FramePayload, FrameSink, Session, SessionEvent, SessionObserver, StreamConfig,
};
use crate::signaling::SignalingMessage;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Close reason attached when the heartbeat evicts an idle session.
pub const REASON_TIMEOUT: &str = "timeout";
/// Close reason attached when the manager is shut down.
pub const REASON_SHUTDOWN: &str = "server_shutdown";

/// Manages the set of live viewer sessions.
///
/// ## Thread Safety:
/// The session table uses RwLock so status reads never block each other;
/// registrations and removals take a short exclusive lock. No lock is ever
/// held across an observer callback or a transport operation.
pub struct SessionManager {
    /// Active sessions mapped by session id
    sessions: Arc<RwLock<HashMap<String, Arc<Session>>>>,

    /// Hard cap on concurrent sessions
    max_sessions: usize,

    /// Idle window after which the heartbeat closes a session
    idle_timeout: Duration,

    /// Heartbeat cadence
    heartbeat_interval: Duration,

    /// Bounded frame queue size for new sessions
    frame_buffer_capacity: usize,

    /// Streaming geometry applied to new sessions
    default_stream: StreamConfig,

    /// Lifecycle event receiver
    observer: Arc<dyn SessionObserver>,

    /// Once set, create_session rejects immediately
    shutting_down: AtomicBool,

    /// Handle of the running heartbeat task, cancelled on shutdown
    heartbeat: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl SessionManager {
    pub fn new(
        session_cfg: &SessionConfig,
        streaming_cfg: &StreamingConfig,
        observer: Arc<dyn SessionObserver>,
    ) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            max_sessions: session_cfg.max_sessions,
            idle_timeout: Duration::from_secs(session_cfg.idle_timeout_secs),
            heartbeat_interval: Duration::from_secs(session_cfg.heartbeat_interval_secs),
            frame_buffer_capacity: session_cfg.frame_buffer_capacity,
            default_stream: StreamConfig::from(streaming_cfg),
            observer,
            shutting_down: AtomicBool::new(false),
            heartbeat: Mutex::new(None),
        }
    }

    /// Register a new viewer session.
    ///
    /// ## Returns:
    /// - **Some(session)**: registered, identity allocated, event emitted
    /// - **None**: manager is shutting down or the pool is at capacity. Both
    ///   are expected conditions, so no error is raised.
    pub fn create_session(
        &self,
        transport: Arc<dyn FrameSink>,
        metadata: serde_json::Value,
    ) -> Option<Arc<Session>> {
        if self.shutting_down.load(Ordering::SeqCst) {
            debug!("rejecting session: manager is shutting down");
            return None;
        }

        let session = {
            let mut sessions = self.sessions.write().unwrap();
            if sessions.len() >= self.max_sessions {
                warn!(
                    max_sessions = self.max_sessions,
                    "rejecting session: pool at capacity"
                );
                return None;
            }

            let session = Arc::new(Session::new(
                transport,
                metadata,
                self.default_stream,
                self.frame_buffer_capacity,
            ));
            sessions.insert(session.id.clone(), session.clone());
            session
        };

        info!(session_id = %session.id, "session created");
        self.observer.on_event(&SessionEvent::Created {
            session_id: session.id.clone(),
        });

        Some(session)
    }

    /// Begin frame delivery for a session.
    ///
    /// Unlike the pause/resume/stop transitions this fails loudly on an
    /// unknown id, because a start against a missing session means the
    /// caller's registration never happened.
    pub fn start_streaming(&self, id: &str, config: Option<StreamConfig>) -> AppResult<()> {
        let session = self
            .get_session(id)
            .ok_or_else(|| AppError::NotFound(format!("session '{}' not found", id)))?;

        if let Some(config) = config {
            session.set_stream_config(config);
        }
        session.set_streaming(true);
        session.touch();

        info!(session_id = %id, "streaming started");
        self.observer.on_event(&SessionEvent::StreamingStarted {
            session_id: id.to_string(),
        });
        Ok(())
    }

    /// Suspend frame delivery. No-op on an unknown id.
    pub fn pause_streaming(&self, id: &str) {
        let Some(session) = self.get_session(id) else {
            return;
        };

        if session.set_paused(true) {
            debug!(session_id = %id, "streaming paused");
            self.observer.on_event(&SessionEvent::StreamingPaused {
                session_id: id.to_string(),
            });
        }
    }

    /// Resume frame delivery. No-op on an unknown id.
    ///
    /// Resuming also refreshes the activity marker, so a viewer that comes
    /// back right before a heartbeat pass is never evicted by it.
    pub fn resume_streaming(&self, id: &str) {
        let Some(session) = self.get_session(id) else {
            return;
        };

        if session.is_paused() {
            session.set_paused(false);
            session.touch();
            debug!(session_id = %id, "streaming resumed");
            self.observer.on_event(&SessionEvent::StreamingResumed {
                session_id: id.to_string(),
            });
        }
    }

    /// End frame delivery without closing the connection. No-op on an
    /// unknown id.
    pub fn stop_streaming(&self, id: &str) {
        let Some(session) = self.get_session(id) else {
            return;
        };

        session.set_streaming(false);
        debug!(session_id = %id, "streaming stopped");
        self.observer.on_event(&SessionEvent::StreamingStopped {
            session_id: id.to_string(),
        });
    }

    /// Append a frame to the session's bounded queue, evicting the oldest
    /// entry when full.
    ///
    /// ## Returns:
    /// The number of frames dropped to make room (0 when the id is unknown).
    pub fn buffer_frame(&self, id: &str, frame: FramePayload) -> usize {
        match self.get_session(id) {
            Some(session) => session.buffer.push(frame),
            None => {
                debug!(session_id = %id, "buffer_frame on unknown session");
                0
            }
        }
    }

    /// Deliver one frame over the session's transport.
    ///
    /// ## Returns:
    /// `false` without effect when the session is unknown, inactive, paused,
    /// or its transport is not open. A transport-level send failure only
    /// bumps the session's error counter; a single bad frame must never take
    /// down a live session.
    pub fn send_frame(&self, id: &str, frame: FramePayload) -> bool {
        let Some(session) = self.get_session(id) else {
            return false;
        };

        if !session.is_active() || session.is_paused() {
            return false;
        }

        if !session.transport().is_open() {
            return false;
        }

        let payload = match serde_json::to_string(&SignalingMessage::Frame(frame)) {
            Ok(payload) => payload,
            Err(e) => {
                session.record_error();
                warn!(session_id = %id, error = %e, "frame serialization failed");
                return false;
            }
        };

        match session.transport().send_text(payload) {
            Ok(()) => {
                session.record_frame_sent();
                session.touch();
                true
            }
            Err(e) => {
                session.record_error();
                debug!(session_id = %id, error = %e, "frame send failed");
                false
            }
        }
    }

    /// Drain the session's buffered frames to the transport in order.
    ///
    /// Stops at the first failed send so a closed transport does not burn
    /// through the whole queue. Returns the number of frames delivered.
    pub fn flush_session(&self, id: &str) -> usize {
        let Some(session) = self.get_session(id) else {
            return 0;
        };

        let mut delivered = 0;
        while let Some(frame) = session.buffer.pop() {
            if self.send_frame(id, frame) {
                delivered += 1;
            } else {
                break;
            }
        }
        delivered
    }

    /// Refresh a session's activity marker (e.g. on an inbound control
    /// message). No-op on an unknown id.
    pub fn touch_session(&self, id: &str) {
        if let Some(session) = self.get_session(id) {
            session.touch();
        }
    }

    /// Close a session and remove it from the table.
    ///
    /// Idempotent: closing an id that is already gone does nothing. Transport
    /// close errors are swallowed; the session is removed regardless.
    pub fn close_session(&self, id: &str, reason: &str) -> bool {
        let removed = self.sessions.write().unwrap().remove(id);

        let Some(session) = removed else {
            return false;
        };

        session.set_streaming(false);
        session.buffer.clear();

        if let Err(e) = session.transport().close() {
            debug!(session_id = %id, error = %e, "transport close failed");
        }

        info!(session_id = %id, reason = %reason, "session closed");
        self.observer.on_event(&SessionEvent::Closed {
            session_id: id.to_string(),
            reason: reason.to_string(),
            frames_sent: session.frames_sent(),
            errors: session.errors(),
        });
        true
    }

    pub fn get_session(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().unwrap().get(id).cloned()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().unwrap().len()
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.sessions.read().unwrap().keys().cloned().collect()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// One idle-eviction pass over the whole table.
    ///
    /// Candidate ids are collected under a read lock first, then each
    /// session's idle time is re-checked immediately before it is closed.
    /// A resume or send that lands between the scan and the close therefore
    /// always wins over eviction.
    pub fn run_idle_scan(&self) -> usize {
        let stale: Vec<String> = {
            let sessions = self.sessions.read().unwrap();
            sessions
                .iter()
                .filter(|(_, session)| session.idle_duration() >= self.idle_timeout)
                .map(|(id, _)| id.clone())
                .collect()
        };

        let mut closed = 0;
        for id in stale {
            let still_stale = self
                .get_session(&id)
                .map(|s| s.idle_duration() >= self.idle_timeout)
                .unwrap_or(false);

            if still_stale && self.close_session(&id, REASON_TIMEOUT) {
                closed += 1;
            }
        }

        if closed > 0 {
            info!(closed, "idle sessions evicted");
        }
        closed
    }

    /// Start the periodic idle scan. Call once after construction; the task
    /// is cancelled by `shutdown`.
    pub fn start_heartbeat(self: Arc<Self>) {
        let manager = Arc::clone(&self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(manager.heartbeat_interval);
            // The first tick fires immediately; skip it so a fresh manager
            // never scans an empty table
            ticker.tick().await;
            loop {
                ticker.tick().await;
                manager.run_idle_scan();
            }
        });

        *self.heartbeat.lock().unwrap() = Some(handle);
    }

    /// Stop accepting sessions, cancel the heartbeat, and force-close every
    /// live session. The table is guaranteed empty afterwards.
    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);

        if let Some(handle) = self.heartbeat.lock().unwrap().take() {
            handle.abort();
        }

        for id in self.session_ids() {
            self.close_session(&id, REASON_SHUTDOWN);
        }

        info!("session manager shut down");
        self.observer.on_event(&SessionEvent::ShutdownComplete);
    }

    /// Aggregate view for the status endpoint.
    pub fn summary(&self) -> SessionSummary {
        let sessions = self.sessions.read().unwrap();

        let mut states: HashMap<String, usize> = HashMap::new();
        let mut frames_sent = 0;
        let mut errors = 0;

        for session in sessions.values() {
            *states.entry(session.state_label().to_string()).or_insert(0) += 1;
            frames_sent += session.frames_sent();
            errors += session.errors();
        }

        SessionSummary {
            total_sessions: sessions.len(),
            max_sessions: self.max_sessions,
            states,
            frames_sent,
            errors,
        }
    }
}

/// Aggregate session-pool statistics.
#[derive(Debug, Serialize)]
pub struct SessionSummary {
    pub total_sessions: usize,
    pub max_sessions: usize,
    pub states: HashMap<String, usize>,
    pub frames_sent: u64,
    pub errors: u64,
}
