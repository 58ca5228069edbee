//! Delivery history and statistics handlers.

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use hookline_core::error::RelayError;
use hookline_core::period::parse_period;
use hookline_relay::HistoryFilter;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

/// Query parameters for listing delivery attempts
#[derive(Debug, Default, Deserialize)]
pub struct DeliveriesQuery {
    /// `success` or `failure`
    pub status: Option<String>,
    /// RFC-3339 inclusive lower bound
    pub from: Option<String>,
    /// RFC-3339 inclusive upper bound
    pub to: Option<String>,
    /// Page size (1..=200, default 50)
    pub limit: Option<u32>,
    /// Page offset
    pub offset: Option<u32>,
}

/// Query parameters for subscription statistics
#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    /// Aggregation window (`^\d+[hdwmy]$`, default `7d`)
    pub period: Option<String>,
}

fn parse_timestamp(raw: &str, field: &str) -> Result<DateTime<Utc>, ApiError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ApiError::validation(format!("invalid {field} timestamp '{raw}': {e}")))
}

fn parse_status(raw: &str) -> Result<bool, ApiError> {
    match raw {
        "success" => Ok(true),
        "failure" => Ok(false),
        other => Err(ApiError::validation(format!(
            "invalid status '{other}': expected success or failure"
        ))),
    }
}

/// GET /api/subscriptions/{id}/deliveries
pub async fn list(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<DeliveriesQuery>,
) -> Result<impl IntoResponse, ApiError> {
    if state.registry.find_by_id(id).is_none() {
        return Err(RelayError::not_found("subscription", id).into());
    }

    let filter = HistoryFilter {
        success: query.status.as_deref().map(parse_status).transpose()?,
        from: query
            .from
            .as_deref()
            .map(|raw| parse_timestamp(raw, "from"))
            .transpose()?,
        to: query
            .to
            .as_deref()
            .map(|raw| parse_timestamp(raw, "to"))
            .transpose()?,
        limit: Some(query.limit.unwrap_or(50).clamp(1, 200)),
        offset: query.offset,
    };

    let items = state.history.list_by_subscription(id, &filter).await?;
    let total = state.history.count(id, &filter).await?;

    Ok(Json(json!({
        "items": items,
        "total": total,
    })))
}

/// GET /api/subscriptions/{id}/stats
pub async fn stats(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<StatsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let subscription = state
        .registry
        .find_by_id(id)
        .ok_or_else(|| ApiError::from(RelayError::not_found("subscription", id)))?;

    let period = parse_period(query.period.as_deref().unwrap_or("7d"))?;
    let to = Utc::now();
    let from = to
        - chrono::Duration::from_std(period)
            .map_err(|e| ApiError::validation(format!("period out of range: {e}")))?;

    let stats = state.history.stats_for_subscription(id, from, to).await?;

    Ok(Json(json!({
        "subscriptionId": id,
        "period": {
            "from": from.to_rfc3339(),
            "to": to.to_rfc3339(),
        },
        "window": stats,
        "lifetime": {
            "totalDeliveries": subscription.total_deliveries,
            "failedDeliveries": subscription.failed_deliveries,
            "lastDeliveryAt": subscription.last_delivery_at,
        },
    })))
}
