//! # Configuration Management
//!
//! Loads and manages application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (APP_SERVER_HOST, APP_SESSION_MAXSESSIONS, etc.)
//! 2. Configuration file (config.toml)
//! 3. Default values (defined in the Default impl)
//!
//! Every tunable named by the session, streaming, animation and encoding
//! pipelines lives here so tests and deployments can override them without
//! code changes.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Main application configuration that contains all settings.
///
/// ## Why separate config structs:
/// Breaking configuration into logical groups (server, session, streaming,
/// animation, encoder, signaling) keeps each subsystem's knobs discoverable
/// and lets partial runtime updates target one group at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub session: SessionConfig,
    pub streaming: StreamingConfig,
    pub animation: AnimationConfig,
    pub encoder: EncoderConfig,
    pub signaling: SignalingConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Session pool limits and garbage-collection cadence.
///
/// ## Fields:
/// - `max_sessions`: hard cap on concurrently connected viewers
/// - `idle_timeout_secs`: a session idle longer than this is closed by the
///   heartbeat with reason "timeout"
/// - `heartbeat_interval_secs`: how often the idle scan runs
/// - `frame_buffer_capacity`: bounded per-session frame queue; the oldest
///   frame is evicted when full
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub max_sessions: usize,
    pub idle_timeout_secs: u64,
    pub heartbeat_interval_secs: u64,
    pub frame_buffer_capacity: usize,
}

/// Default streaming geometry applied to newly created sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

/// Lip-sync animation tuning.
///
/// ## Fields:
/// - `transition_duration_secs`: how long a viseme cross-fade takes; clamped
///   to a small minimum at use sites to avoid a zero divisor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnimationConfig {
    pub transition_duration_secs: f64,
}

/// Defaults for the external video encoder invocation.
///
/// ## Fields:
/// - `ffmpeg_path`: encoder binary, resolved through PATH when bare
/// - `video_codec` / `video_bitrate` / `audio_codec` / `format`: default
///   codec pairing; callers may override per encode job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderConfig {
    pub ffmpeg_path: String,
    pub video_codec: String,
    pub video_bitrate: String,
    pub audio_codec: String,
    pub format: String,
}

/// Client-side signaling behavior.
///
/// ## Fields:
/// - `register_timeout_secs`: how long to wait for the server's `registered`
///   reply before the handshake fails
/// - `enable_microphone`: when false, offers are created receive-only so a
///   lip-sync or demo session never triggers a microphone permission prompt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalingConfig {
    pub register_timeout_secs: u64,
    pub enable_microphone: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            session: SessionConfig {
                max_sessions: 10,
                idle_timeout_secs: 300,     // 5 minutes of silence ends a viewer
                heartbeat_interval_secs: 30,
                frame_buffer_capacity: 30,  // one second of video at 30 fps
            },
            streaming: StreamingConfig {
                width: 512,
                height: 512,
                fps: 30,
            },
            animation: AnimationConfig {
                transition_duration_secs: 0.1,
            },
            encoder: EncoderConfig {
                ffmpeg_path: "ffmpeg".to_string(),
                video_codec: "libx264".to_string(),
                video_bitrate: "2M".to_string(),
                audio_codec: "aac".to_string(),
                format: "mp4".to_string(),
            },
            signaling: SignalingConfig {
                register_timeout_secs: 5,
                enable_microphone: false,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Configuration Loading Process:
    /// 1. Start with built-in defaults
    /// 2. Override with values from config.toml (if it exists)
    /// 3. Override with environment variables prefixed with APP_
    /// 4. Handle special cases for HOST and PORT environment variables
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER_HOST=0.0.0.0`: Override server host
    /// - `APP_SESSION_MAXSESSIONS=50`: Override the session cap
    /// - `HOST=0.0.0.0` / `PORT=3000`: Special cases for deployment platforms
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        // Deployment platforms commonly inject these without the APP_ prefix
        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Server port is not 0
    /// - The session pool admits at least one session
    /// - The frame buffer can hold at least one frame
    /// - The heartbeat actually runs
    /// - The streaming geometry and rate are nonzero
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.session.max_sessions == 0 {
            return Err(anyhow::anyhow!("Max sessions must be greater than 0"));
        }

        if self.session.frame_buffer_capacity == 0 {
            return Err(anyhow::anyhow!(
                "Frame buffer capacity must be greater than 0"
            ));
        }

        if self.session.heartbeat_interval_secs == 0 {
            return Err(anyhow::anyhow!(
                "Heartbeat interval must be greater than 0"
            ));
        }

        if self.streaming.width == 0 || self.streaming.height == 0 {
            return Err(anyhow::anyhow!("Streaming resolution must be nonzero"));
        }

        if self.streaming.fps == 0 {
            return Err(anyhow::anyhow!("Streaming fps must be greater than 0"));
        }

        if self.animation.transition_duration_secs <= 0.0 {
            return Err(anyhow::anyhow!(
                "Transition duration must be greater than 0"
            ));
        }

        Ok(())
    }

    /// Update configuration from a JSON string (used for runtime config updates).
    ///
    /// ## Partial updates:
    /// Only the fields present in the JSON are touched. For example,
    /// `{"session": {"max_sessions": 50}}` changes just the session cap.
    /// The updated configuration is re-validated before it is accepted.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(server) = partial.get("server") {
            if let Some(host) = server.get("host").and_then(|v| v.as_str()) {
                self.server.host = host.to_string();
            }
            if let Some(port) = server.get("port").and_then(|v| v.as_u64()) {
                self.server.port = port as u16;
            }
        }

        if let Some(session) = partial.get("session") {
            if let Some(max) = session.get("max_sessions").and_then(|v| v.as_u64()) {
                self.session.max_sessions = max as usize;
            }
            if let Some(idle) = session.get("idle_timeout_secs").and_then(|v| v.as_u64()) {
                self.session.idle_timeout_secs = idle;
            }
            if let Some(hb) = session
                .get("heartbeat_interval_secs")
                .and_then(|v| v.as_u64())
            {
                self.session.heartbeat_interval_secs = hb;
            }
            if let Some(cap) = session
                .get("frame_buffer_capacity")
                .and_then(|v| v.as_u64())
            {
                self.session.frame_buffer_capacity = cap as usize;
            }
        }

        if let Some(streaming) = partial.get("streaming") {
            if let Some(width) = streaming.get("width").and_then(|v| v.as_u64()) {
                self.streaming.width = width as u32;
            }
            if let Some(height) = streaming.get("height").and_then(|v| v.as_u64()) {
                self.streaming.height = height as u32;
            }
            if let Some(fps) = streaming.get("fps").and_then(|v| v.as_u64()) {
                self.streaming.fps = fps as u32;
            }
        }

        if let Some(animation) = partial.get("animation") {
            if let Some(d) = animation
                .get("transition_duration_secs")
                .and_then(|v| v.as_f64())
            {
                self.animation.transition_duration_secs = d;
            }
        }

        if let Some(encoder) = partial.get("encoder") {
            if let Some(path) = encoder.get("ffmpeg_path").and_then(|v| v.as_str()) {
                self.encoder.ffmpeg_path = path.to_string();
            }
            if let Some(codec) = encoder.get("video_codec").and_then(|v| v.as_str()) {
                self.encoder.video_codec = codec.to_string();
            }
            if let Some(bitrate) = encoder.get("video_bitrate").and_then(|v| v.as_str()) {
                self.encoder.video_bitrate = bitrate.to_string();
            }
            if let Some(codec) = encoder.get("audio_codec").and_then(|v| v.as_str()) {
                self.encoder.audio_codec = codec.to_string();
            }
            if let Some(format) = encoder.get("format").and_then(|v| v.as_str()) {
                self.encoder.format = format.to_string();
            }
        }

        if let Some(signaling) = partial.get("signaling") {
            if let Some(t) = signaling
                .get("register_timeout_secs")
                .and_then(|v| v.as_u64())
            {
                self.signaling.register_timeout_secs = t;
            }
            if let Some(mic) = signaling.get("enable_microphone").and_then(|v| v.as_bool()) {
                self.signaling.enable_microphone = mic;
            }
        }

        self.validate()?;
        Ok(())
    }
}
