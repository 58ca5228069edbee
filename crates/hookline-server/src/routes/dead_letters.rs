//! Dead-letter queue operator handlers.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use hookline_relay::DeadLetterFilter;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

/// Query parameters for listing dead-letter entries
#[derive(Debug, Default, Deserialize)]
pub struct DeadLettersQuery {
    /// Only entries for this subscription
    pub subscription_id: Option<Uuid>,
    /// Only entries for this event type
    pub event_type: Option<String>,
    /// Page size (1..=200, default 50)
    pub limit: Option<u32>,
    /// Page offset
    pub offset: Option<u32>,
}

impl DeadLettersQuery {
    fn into_filter(self) -> DeadLetterFilter {
        DeadLetterFilter {
            subscription_id: self.subscription_id,
            event_type: self.event_type,
            limit: Some(self.limit.unwrap_or(50).clamp(1, 200)),
            offset: self.offset,
        }
    }
}

/// GET /api/dead-letters
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<DeadLettersQuery>,
) -> impl IntoResponse {
    let entries = state.dead_letters.list(&query.into_filter());
    Json(json!({ "items": entries }))
}

/// GET /api/dead-letters/stats
pub async fn stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.dead_letters.stats())
}

/// POST /api/dead-letters/{id}/retry
pub async fn retry(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let item = state.queue.retry_from_dead_letter(id)?;
    Ok(Json(json!({
        "deliveryId": item.id,
        "subscriptionId": item.subscription_id,
        "status": item.status,
    })))
}

/// POST /api/dead-letters/retry-all
pub async fn retry_all(
    State(state): State<AppState>,
    Query(query): Query<DeadLettersQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let items = state.dead_letters.retry_all(&query.into_filter());
    let mut enqueued = 0;
    for item in items {
        state.queue.enqueue(item)?;
        enqueued += 1;
    }
    Ok(Json(json!({ "enqueued": enqueued })))
}

/// DELETE /api/dead-letters/{id}
pub async fn remove(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state.dead_letters.remove(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/dead-letters
pub async fn clear(State(state): State<AppState>) -> impl IntoResponse {
    state.queue.clear_dead_letter().await;
    StatusCode::NO_CONTENT
}

/// POST /api/dead-letters/purge-expired
pub async fn purge_expired(State(state): State<AppState>) -> impl IntoResponse {
    let purged = state.dead_letters.purge_expired().await;
    Json(json!({ "purged": purged }))
}
