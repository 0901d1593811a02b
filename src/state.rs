//! # Application State Management
//!
//! Shared state accessed by every HTTP request handler. All mutable data sits
//! behind `Arc<RwLock<T>>` so many handlers can read simultaneously while
//! updates take a short exclusive lock.
//!
//! The session table itself is NOT here. It is owned exclusively by the
//! `SessionManager` instance wired in `main`, so independent managers (e.g.
//! in tests) never collide through ambient state. This struct only carries
//! configuration and aggregate counters.

use crate::config::AppConfig;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// The main application state shared across all HTTP request handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Application configuration (can be updated at runtime)
    pub config: Arc<RwLock<AppConfig>>,

    /// Aggregate counters, updated by middleware and the streaming pipeline
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the server started
    pub start_time: Instant,
}

/// Aggregate metrics collected across all requests and sessions.
#[derive(Debug, Default)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Total number of errors encountered since server start
    pub error_count: u64,

    /// Current number of live viewer sessions
    pub active_sessions: u32,

    /// Frames successfully delivered across all sessions
    pub frames_sent: u64,

    /// Frames evicted from session buffers under backpressure
    pub frames_dropped: u64,

    /// Encode jobs that completed successfully
    pub encodes_completed: u64,

    /// Encode jobs that failed (spawn error or nonzero exit)
    pub encodes_failed: u64,

    /// Per-endpoint request statistics, keyed by "METHOD /path"
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Detailed performance metrics for a specific API endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    /// Create a new AppState with the given configuration.
    pub fn new(config: AppConfig) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        }
    }

    /// Get a copy of the current configuration.
    ///
    /// Cloning releases the read lock immediately so other threads are not
    /// blocked while the caller works with the snapshot.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap().clone()
    }

    /// Replace the configuration after validating it.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        match new_config.validate() {
            Ok(_) => {
                *self.config.write().unwrap() = new_config;
                Ok(())
            }
            Err(e) => Err(e.to_string()),
        }
    }

    pub fn increment_request_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.request_count += 1;
    }

    pub fn increment_error_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.error_count += 1;
    }

    /// Record detailed metrics for a specific endpoint.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap();

        let endpoint_metric = metrics
            .endpoint_metrics
            .entry(endpoint.to_string())
            .or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;

        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    pub fn increment_active_sessions(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.active_sessions += 1;
    }

    /// Underflow-guarded: never drops below zero even if close events race.
    pub fn decrement_active_sessions(&self) {
        let mut metrics = self.metrics.write().unwrap();
        if metrics.active_sessions > 0 {
            metrics.active_sessions -= 1;
        }
    }

    pub fn record_frames_sent(&self, count: u64) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.frames_sent += count;
    }

    pub fn record_frames_dropped(&self, count: u64) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.frames_dropped += count;
    }

    pub fn record_encode_result(&self, success: bool) {
        let mut metrics = self.metrics.write().unwrap();
        if success {
            metrics.encodes_completed += 1;
        } else {
            metrics.encodes_failed += 1;
        }
    }

    /// Get a consistent snapshot of current metrics for the metrics endpoints.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        let metrics = self.metrics.read().unwrap();
        AppMetrics {
            request_count: metrics.request_count,
            error_count: metrics.error_count,
            active_sessions: metrics.active_sessions,
            frames_sent: metrics.frames_sent,
            frames_dropped: metrics.frames_dropped,
            encodes_completed: metrics.encodes_completed,
            encodes_failed: metrics.encodes_failed,
            endpoint_metrics: metrics.endpoint_metrics.clone(),
        }
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    /// Average = total duration / request count, zero before any traffic.
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Error rate in [0.0, 1.0], zero before any traffic.
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_counter_underflow_guard() {
        let state = AppState::new(AppConfig::default());
        state.decrement_active_sessions();
        assert_eq!(state.get_metrics_snapshot().active_sessions, 0);

        state.increment_active_sessions();
        state.increment_active_sessions();
        state.decrement_active_sessions();
        assert_eq!(state.get_metrics_snapshot().active_sessions, 1);
    }

    #[test]
    fn test_endpoint_metrics_accumulate() {
        let state = AppState::new(AppConfig::default());
        state.record_endpoint_request("GET /health", 10, false);
        state.record_endpoint_request("GET /health", 30, true);

        let snapshot = state.get_metrics_snapshot();
        let metric = snapshot.endpoint_metrics.get("GET /health").unwrap();
        assert_eq!(metric.request_count, 2);
        assert_eq!(metric.total_duration_ms, 40);
        assert_eq!(metric.error_count, 1);
        assert!((metric.average_duration_ms() - 20.0).abs() < f64::EPSILON);
        assert!((metric.error_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_frame_counters() {
        let state = AppState::new(AppConfig::default());
        state.record_frames_sent(5);
        state.record_frames_dropped(2);
        state.record_encode_result(true);
        state.record_encode_result(false);

        let snapshot = state.get_metrics_snapshot();
        assert_eq!(snapshot.frames_sent, 5);
        assert_eq!(snapshot.frames_dropped, 2);
        assert_eq!(snapshot.encodes_completed, 1);
        assert_eq!(snapshot.encodes_failed, 1);
    }
}
