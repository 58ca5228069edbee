//! Event log, replay and catalog handlers.

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use hookline_core::classifier::Classifier;
use hookline_relay::EventLogFilter;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

/// Query parameters for listing events
#[derive(Debug, Default, Deserialize)]
pub struct EventsQuery {
    /// Only events of this type
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    /// Only events from this collection
    pub collection: Option<String>,
    /// Page size (1..=200, default 50)
    pub limit: Option<u32>,
    /// Page offset
    pub offset: Option<u32>,
}

/// Body for replaying an event
#[derive(Debug, Default, Deserialize)]
pub struct ReplayRequest {
    /// Target subscriptions; empty replays to every matching one
    #[serde(default)]
    pub subscription_ids: Vec<Uuid>,
}

/// GET /api/events
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let log = state
        .service
        .event_log()
        .ok_or_else(|| ApiError::not_found("event log is disabled"))?;

    let filter = EventLogFilter {
        event_type: query.event_type,
        collection: query.collection,
        limit: Some(query.limit.unwrap_or(50).clamp(1, 200)),
        offset: query.offset,
    };
    let entries = log.list(&filter).await?;

    let items: Vec<serde_json::Value> = entries
        .iter()
        .map(|e| {
            json!({
                "event": e.event,
                "sourceId": e.source_id,
                "processedAt": e.processed_at,
            })
        })
        .collect();
    Ok(Json(json!({ "items": items })))
}

/// POST /api/events/{id}/replay
pub async fn replay(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
    Json(request): Json<ReplayRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let enqueued = state
        .service
        .replay_event(&event_id, &request.subscription_ids)
        .await?;
    Ok(Json(json!({ "enqueued": enqueued })))
}

/// GET /api/event-types
pub async fn catalog() -> impl IntoResponse {
    Json(json!({ "eventTypes": Classifier::event_type_catalog() }))
}

/// GET /api/unroutable
pub async fn unroutable(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(json!({ "items": state.service.unroutable_records() })))
}
