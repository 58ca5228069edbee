//! Management API route tree.

pub mod dead_letters;
pub mod deliveries;
pub mod events;
pub mod health;
pub mod subscriptions;

use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the full management router over the shared state.
#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/subscriptions",
            get(subscriptions::list).post(subscriptions::create),
        )
        .route(
            "/api/subscriptions/{id}",
            get(subscriptions::get)
                .patch(subscriptions::update)
                .delete(subscriptions::remove),
        )
        .route(
            "/api/subscriptions/{id}/test",
            post(subscriptions::test_delivery),
        )
        .route(
            "/api/subscriptions/{id}/deliveries",
            get(deliveries::list),
        )
        .route("/api/subscriptions/{id}/stats", get(deliveries::stats))
        .route("/api/events", get(events::list))
        .route("/api/events/{id}/replay", post(events::replay))
        .route("/api/event-types", get(events::catalog))
        .route("/api/unroutable", get(events::unroutable))
        .route(
            "/api/dead-letters",
            get(dead_letters::list).delete(dead_letters::clear),
        )
        .route("/api/dead-letters/stats", get(dead_letters::stats))
        .route("/api/dead-letters/{id}/retry", post(dead_letters::retry))
        .route("/api/dead-letters/retry-all", post(dead_letters::retry_all))
        .route(
            "/api/dead-letters/{id}",
            delete(dead_letters::remove),
        )
        .route(
            "/api/dead-letters/purge-expired",
            post(dead_letters::purge_expired),
        )
        .route("/api/stats", get(health::stats))
        .route("/health", get(health::health))
        .route("/health/ready", get(health::ready))
        .route("/health/live", get(health::live))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
