use crate::session::SessionManager;
use actix_web::{web, HttpResponse};
use serde_json::json;

/// ## Endpoint: `GET /api/v1/sessions`
///
/// Aggregate view of the session pool: totals, per-state tally, delivery
/// counters. Individual sessions stay private to the manager.
pub async fn list_sessions(manager: web::Data<SessionManager>) -> HttpResponse {
    let summary = manager.summary();

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "shutting_down": manager.is_shutting_down(),
        "sessions": summary,
    }))
}
