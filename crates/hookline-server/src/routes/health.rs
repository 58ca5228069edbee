//! Health, readiness and liveness handlers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde_json::json;

use crate::state::AppState;

/// GET /health
///
/// Reports per-component state; 503 when the delivery queue is stopped.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let queue_status = state.queue.status();
    let counts = state.registry.counts();
    let dlq_stats = state.dead_letters.stats();
    let healthy = queue_status.running;

    let body = json!({
        "status": if healthy { "healthy" } else { "unhealthy" },
        "version": env!("CARGO_PKG_VERSION"),
        "uptimeSecs": (Utc::now() - state.started_at).num_seconds(),
        "components": {
            "queue": {
                "running": queue_status.running,
                "queuedByPriority": queue_status.queued_by_priority,
                "processing": queue_status.processing,
            },
            "registry": {
                "active": counts.active,
                "inactive": counts.inactive,
                "total": counts.total(),
            },
            "deadLetters": dlq_stats,
        },
    });

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

/// GET /health/ready
pub async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    if state.queue.status().running {
        (StatusCode::OK, Json(json!({"status": "ready"})))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "not ready"})),
        )
    }
}

/// GET /health/live
pub async fn live() -> impl IntoResponse {
    Json(json!({"status": "alive"}))
}

/// GET /api/stats
///
/// Pipeline-wide counters: queue, routing and delivery statistics.
pub async fn stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "deliveries": state.service.stats().snapshot(),
        "routing": state.service.routing_stats().snapshot(),
        "queue": state.queue.status(),
        "deadLetters": state.dead_letters.stats(),
    }))
}
