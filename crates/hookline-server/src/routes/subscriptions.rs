//! Subscription management handlers.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use hookline_core::error::RelayError;
use hookline_core::pattern::EventPattern;
use hookline_core::subscription::{
    PayloadMode, RetryPolicy, Subscription, SubscriptionFilters, SubscriptionListFilter,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

/// Query parameters for listing subscriptions
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    /// Only subscriptions with this active flag
    pub active: Option<bool>,
    /// Only subscriptions selecting this event type
    pub event: Option<String>,
    /// Case-insensitive name substring
    pub name: Option<String>,
    /// Page size (1..=200, default 50)
    pub limit: Option<u32>,
    /// Page offset
    pub offset: Option<u32>,
}

/// Body for creating a subscription
#[derive(Debug, Deserialize)]
pub struct CreateSubscriptionRequest {
    /// Unique display name
    pub name: String,
    /// Target URL
    pub url: String,
    /// Shared secret for signing
    #[serde(default)]
    pub secret: Option<String>,
    /// Event patterns (non-empty)
    pub events: Vec<String>,
    /// Document filters
    #[serde(default)]
    pub filters: SubscriptionFilters,
    /// Payload shaping mode
    #[serde(default)]
    pub payload_mode: PayloadMode,
    /// Active flag (default true)
    #[serde(default = "default_active")]
    pub active: bool,
    /// Retry policy override
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
    /// Per-attempt timeout override in seconds
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Custom request headers
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

const fn default_active() -> bool {
    true
}

/// Body for updating a subscription; absent fields keep their value
#[derive(Debug, Default, Deserialize)]
pub struct UpdateSubscriptionRequest {
    /// New display name
    pub name: Option<String>,
    /// New target URL
    pub url: Option<String>,
    /// New secret (empty string clears it)
    pub secret: Option<String>,
    /// New event patterns
    pub events: Option<Vec<String>>,
    /// New document filters
    pub filters: Option<SubscriptionFilters>,
    /// New payload mode
    pub payload_mode: Option<PayloadMode>,
    /// New active flag
    pub active: Option<bool>,
    /// New retry policy
    pub retry: Option<RetryPolicy>,
    /// New per-attempt timeout in seconds
    pub timeout_secs: Option<u64>,
    /// New custom headers (replaces the map)
    pub headers: Option<HashMap<String, String>>,
}

fn parse_patterns(raw: &[String]) -> Result<Vec<EventPattern>, ApiError> {
    raw.iter()
        .map(|p| EventPattern::parse(p).map_err(ApiError::from))
        .collect()
}

/// GET /api/subscriptions
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let filter = SubscriptionListFilter {
        active: query.active,
        event: query.event,
        name_contains: query.name,
    };
    let limit = query.limit.unwrap_or(50).clamp(1, 200) as usize;
    let offset = query.offset.unwrap_or(0) as usize;

    let total = state.registry.count(&filter);
    let items = state.registry.list(&filter, limit, offset);

    Ok(Json(json!({
        "items": items.iter().map(|s| s.as_ref()).collect::<Vec<_>>(),
        "total": total,
        "limit": limit,
        "offset": offset,
    })))
}

/// GET /api/subscriptions/{id}
pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let subscription = state
        .registry
        .find_by_id(id)
        .ok_or_else(|| ApiError::from(RelayError::not_found("subscription", id)))?;
    Ok(Json(subscription.as_ref().clone()))
}

/// POST /api/subscriptions
pub async fn create(
    State(state): State<AppState>,
    Json(request): Json<CreateSubscriptionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let events = parse_patterns(&request.events)?;

    let mut subscription = Subscription::new(request.name, request.url, events);
    subscription.secret = request.secret;
    subscription.filters = request.filters;
    subscription.payload_mode = request.payload_mode;
    subscription.active = request.active;
    if let Some(retry) = request.retry {
        subscription.retry = retry;
    }
    if let Some(timeout_secs) = request.timeout_secs {
        subscription.timeout_secs = timeout_secs;
    }
    subscription.headers = request.headers;

    let created = state.registry.upsert(subscription).await?;
    Ok((StatusCode::CREATED, Json(created.as_ref().clone())))
}

/// PATCH /api/subscriptions/{id}
pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateSubscriptionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let existing = state
        .registry
        .find_by_id(id)
        .ok_or_else(|| ApiError::from(RelayError::not_found("subscription", id)))?;

    let mut updated = existing.as_ref().clone();
    if let Some(name) = request.name {
        updated.name = name;
    }
    if let Some(url) = request.url {
        updated.url = url;
    }
    if let Some(secret) = request.secret {
        updated.secret = if secret.is_empty() { None } else { Some(secret) };
    }
    if let Some(events) = request.events {
        updated.events = parse_patterns(&events)?;
    }
    if let Some(filters) = request.filters {
        updated.filters = filters;
    }
    if let Some(payload_mode) = request.payload_mode {
        updated.payload_mode = payload_mode;
    }
    if let Some(active) = request.active {
        updated.active = active;
    }
    if let Some(retry) = request.retry {
        updated.retry = retry;
    }
    if let Some(timeout_secs) = request.timeout_secs {
        updated.timeout_secs = timeout_secs;
    }
    if let Some(headers) = request.headers {
        updated.headers = headers;
    }
    updated.updated_at = Utc::now();

    let stored = state.registry.upsert(updated).await?;
    Ok(Json(stored.as_ref().clone()))
}

/// DELETE /api/subscriptions/{id}
pub async fn remove(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state.registry.remove(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/subscriptions/{id}/test
pub async fn test_delivery(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state.service.test_delivery(id).await?;
    Ok(Json(json!({
        "success": outcome.success,
        "statusCode": outcome.status_code,
        "durationMs": outcome.duration_ms,
        "error": outcome.error,
        "errorCategory": outcome.error_category,
        "retryable": outcome.retryable,
        "bodyPrefix": outcome.body_prefix,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_request_minimal_json() {
        let request: CreateSubscriptionRequest = serde_json::from_str(
            r#"{"name": "s1", "url": "https://h.example/w", "events": ["issue.*"]}"#,
        )
        .unwrap();

        assert!(request.active);
        assert!(request.secret.is_none());
        assert!(request.retry.is_none());
        assert_eq!(request.events, vec!["issue.*".to_string()]);
    }

    #[test]
    fn test_update_request_all_optional() {
        let request: UpdateSubscriptionRequest = serde_json::from_str("{}").unwrap();
        assert!(request.name.is_none());
        assert!(request.active.is_none());
    }

    #[test]
    fn test_parse_patterns_rejects_invalid() {
        assert!(parse_patterns(&["a.b.c".to_string()]).is_err());
        assert!(parse_patterns(&["issue.*".to_string(), "*".to_string()]).is_ok());
    }
}
