//! # Error Handling
//!
//! Custom error types for the avatar backend and their conversion into HTTP
//! responses. The taxonomy follows how failures are actually consumed:
//!
//! ## Error Categories:
//! - **Internal**: Server-side problems (500 errors)
//! - **BadRequest**: Client sent invalid data (400 errors)
//! - **NotFound**: Unknown session or resource (404 errors)
//! - **ConfigError**: Configuration problems (500 errors)
//! - **ValidationError**: Data validation failed (400 errors)
//! - **Timeout**: A bounded handshake did not complete in time (408 errors)
//! - **Encode**: The external video encoder failed (500 errors)
//!
//! Transport-level hiccups on a live session are deliberately NOT represented
//! here. A single failed frame send must never crash a session, so those are
//! absorbed into per-session counters and a boolean return instead. Only
//! discrete, awaited units of work (an encode job, a registration handshake)
//! propagate an error to their caller.

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Custom error types for the application.
///
/// ## Usage Example:
/// ```rust
/// # use talentai_avatar_backend::error::AppError;
/// # fn demo() -> Result<(), AppError> {
/// return Err(AppError::BadRequest("Invalid JSON".to_string()));
/// # }
/// ```
#[derive(Debug)]
pub enum AppError {
    /// Internal server errors (file system failures, poisoned state, etc.)
    Internal(String),

    /// Client sent invalid or malformed data
    BadRequest(String),

    /// Requested session or resource was not found
    NotFound(String),

    /// Configuration file or environment variable problems
    ConfigError(String),

    /// User input failed validation rules
    ValidationError(String),

    /// A bounded wait (e.g. the signaling registration handshake) expired
    Timeout(String),

    /// The external encoder process failed; carries exit detail and a bounded
    /// tail of its diagnostic output
    Encode(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::Timeout(msg) => write!(f, "Timed out: {}", msg),
            AppError::Encode(msg) => write!(f, "Encoding failed: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

/// Converts application errors into the JSON error envelope returned to
/// HTTP clients.
///
/// ## JSON Response Format:
/// ```json
/// {
///   "error": {
///     "type": "encode_error",
///     "message": "ffmpeg exited with status 1: ...",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        use actix_web::http::StatusCode;

        match self {
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
            AppError::Encode(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let (error_type, message) = match self {
            AppError::Internal(msg) => ("internal_error", msg.clone()),
            AppError::BadRequest(msg) => ("bad_request", msg.clone()),
            AppError::NotFound(msg) => ("not_found", msg.clone()),
            AppError::ConfigError(msg) => ("config_error", msg.clone()),
            AppError::ValidationError(msg) => ("validation_error", msg.clone()),
            AppError::Timeout(msg) => ("timeout", msg.clone()),
            AppError::Encode(msg) => ("encode_error", msg.clone()),
        };

        HttpResponse::build(self.status_code()).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// JSON parsing errors are almost always the client's fault, so they map to
/// a 400 rather than a 500.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

/// File system failures during frame staging or encode output handling.
impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// Type alias for Results that use our custom error type.
pub type AppResult<T> = Result<T, AppError>;
