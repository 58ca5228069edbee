//! Management API tests over an in-memory pipeline.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use hookline_core::config::RelayConfig;
use hookline_relay::{
    CursorStore, DeadLetterQueue, DeliveryHistoryStore, DeliveryQueue, HttpDispatcher,
    InMemoryCursorStore, InMemoryEventLog, InMemoryHistoryStore, InMemorySubscriptionStore,
    RelayService, RelayStats, SubscriptionRegistry,
};
use hookline_server::{routes, AppState};
use serde_json::{json, Value};
use tower::util::ServiceExt;

fn app() -> Router {
    let config = RelayConfig::default();
    let registry = Arc::new(SubscriptionRegistry::new(Arc::new(
        InMemorySubscriptionStore::new(),
    )));
    let stats = Arc::new(RelayStats::new());
    let history: Arc<InMemoryHistoryStore> = Arc::new(InMemoryHistoryStore::new());
    let dlq = Arc::new(DeadLetterQueue::new(100, 30, None));
    let dispatcher = HttpDispatcher::new(&config.delivery, None).unwrap();
    let queue = DeliveryQueue::new(
        config.queue.clone(),
        Duration::from_secs(5),
        dispatcher.clone(),
        Arc::clone(&history) as Arc<dyn DeliveryHistoryStore>,
        dlq,
        Arc::clone(&stats),
        Some(Arc::clone(&registry)),
    );
    let service = Arc::new(RelayService::new(
        config,
        "api-test",
        registry,
        queue,
        dispatcher,
        Arc::new(InMemoryCursorStore::new()) as Arc<dyn CursorStore>,
        Some(Arc::new(InMemoryEventLog::new())),
        stats,
    ));
    routes::router(AppState::new(
        service,
        history as Arc<dyn DeliveryHistoryStore>,
    ))
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn create_list_and_delete_subscription() {
    let app = app();

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/subscriptions",
            json!({
                "name": "orders",
                "url": "https://h.example/w",
                "secret": "x1x2x3x4x5",
                "events": ["issue.*"],
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    let id = created["id"].as_str().unwrap().to_string();
    assert_eq!(created["name"], "orders");
    assert!(created["active"].as_bool().unwrap());

    let response = app
        .clone()
        .oneshot(get("/api/subscriptions?active=true"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let listed = body_json(response).await;
    assert_eq!(listed["total"], 1);
    assert_eq!(listed["items"][0]["name"], "orders");

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/subscriptions/{id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .oneshot(get(&format!("/api/subscriptions/{id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn invalid_subscription_returns_structured_error() {
    let app = app();

    let response = app
        .oneshot(post_json(
            "/api/subscriptions",
            json!({
                "name": "bad",
                "url": "ftp://h.example/w",
                "events": ["issue.*"],
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = body_json(response).await;
    assert_eq!(body["status"], "error");
    assert_eq!(body["code"], "validation_error");
    assert!(body["message"].as_str().unwrap().contains("scheme"));
    assert!(body.get("timestamp").is_some());
    assert!(body.get("request_id").is_some());
}

#[tokio::test]
async fn duplicate_name_conflicts() {
    let app = app();
    let body = json!({
        "name": "dup",
        "url": "https://h.example/w",
        "events": ["*"],
    });

    let first = app
        .clone()
        .oneshot(post_json("/api/subscriptions", body.clone()))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::CREATED);

    let second = app
        .oneshot(post_json("/api/subscriptions", body))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(second).await["code"], "conflict");
}

#[tokio::test]
async fn update_merges_fields() {
    let app = app();

    let created = body_json(
        app.clone()
            .oneshot(post_json(
                "/api/subscriptions",
                json!({
                    "name": "patchable",
                    "url": "https://h.example/w",
                    "events": ["issue.*"],
                }),
            ))
            .await
            .unwrap(),
    )
    .await;
    let id = created["id"].as_str().unwrap();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PATCH")
                .uri(format!("/api/subscriptions/{id}"))
                .header("content-type", "application/json")
                .body(Body::from(json!({"active": false}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let updated = body_json(response).await;
    assert_eq!(updated["active"], false);
    assert_eq!(updated["name"], "patchable");
    assert_eq!(updated["url"], "https://h.example/w");
}

#[tokio::test]
async fn stats_rejects_malformed_period() {
    let app = app();

    let created = body_json(
        app.clone()
            .oneshot(post_json(
                "/api/subscriptions",
                json!({
                    "name": "stats",
                    "url": "https://h.example/w",
                    "events": ["*"],
                }),
            ))
            .await
            .unwrap(),
    )
    .await;
    let id = created["id"].as_str().unwrap();

    let ok = app
        .clone()
        .oneshot(get(&format!("/api/subscriptions/{id}/stats?period=7d")))
        .await
        .unwrap();
    assert_eq!(ok.status(), StatusCode::OK);

    let bad = app
        .oneshot(get(&format!("/api/subscriptions/{id}/stats?period=7x")))
        .await
        .unwrap();
    assert_eq!(bad.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn event_type_catalog_lists_known_types() {
    let response = app().oneshot(get("/api/event-types")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    let types: Vec<&str> = body["eventTypes"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(Value::as_str)
        .collect();
    assert!(types.contains(&"issue.created"));
    assert!(types.contains(&"issue.status_changed"));
    assert!(types.contains(&"comment.added"));
}

#[tokio::test]
async fn health_reports_queue_state() {
    // queue was never started → unhealthy
    let response = app().oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let body = body_json(response).await;
    assert_eq!(body["status"], "unhealthy");
    assert_eq!(body["components"]["queue"]["running"], false);

    let live = app().oneshot(get("/health/live")).await.unwrap();
    assert_eq!(live.status(), StatusCode::OK);
}

#[tokio::test]
async fn dead_letters_empty_listing() {
    let response = app().oneshot(get("/api/dead-letters")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["items"].as_array().unwrap().len(), 0);

    let stats = app().oneshot(get("/api/dead-letters/stats")).await.unwrap();
    let body = body_json(stats).await;
    assert_eq!(body["total_entries"], 0);
}
