//! hookline server binary.
//!
//! Usage: `hookline [config.toml]`. Missing config runs with defaults
//! plus `HOOKLINE_*` environment overrides.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use hookline_relay::{
    CursorStore, DeadLetterQueue, DeadLetterStore, DeliveryHistoryStore, DeliveryQueue,
    EventLogStore, HttpDispatcher, PostgresChangeSource, PostgresCursorStore,
    PostgresDeadLetterStore, PostgresEventLog, PostgresHistoryStore, PostgresSubscriptionStore,
    RelayService, RelayStats, SubscriptionRegistry,
};
use hookline_server::{config, routes, AppState};
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hookline=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("hookline v{}", env!("CARGO_PKG_VERSION"));

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = config::load(config_path.as_deref())?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.store.url)
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    // Stores
    let subscription_store = Arc::new(PostgresSubscriptionStore::new(pool.clone()));
    let history: Arc<dyn DeliveryHistoryStore> =
        Arc::new(PostgresHistoryStore::new(pool.clone()));
    let cursor_store: Arc<dyn CursorStore> = Arc::new(PostgresCursorStore::new(pool.clone()));
    let dead_letter_store: Option<Arc<dyn DeadLetterStore>> = config
        .dead_letter
        .persistence
        .then(|| Arc::new(PostgresDeadLetterStore::new(pool.clone())) as Arc<dyn DeadLetterStore>);
    let event_log: Option<Arc<dyn EventLogStore>> = config
        .event_log_enabled
        .then(|| Arc::new(PostgresEventLog::new(pool.clone())) as Arc<dyn EventLogStore>);

    // Registry and dead-letter queue hydrate before the pipeline starts.
    let registry = Arc::new(SubscriptionRegistry::new(subscription_store));
    registry.hydrate().await?;

    let dlq = Arc::new(DeadLetterQueue::new(
        config.queue.dead_letter_max_size,
        config.dead_letter.retention_days,
        dead_letter_store,
    ));
    dlq.hydrate().await?;

    // Delivery engine
    let stats = Arc::new(RelayStats::new());
    let dispatcher = HttpDispatcher::new(&config.delivery, config.webhook_secret_salt.clone())?;
    let queue = DeliveryQueue::new(
        config.queue.clone(),
        Duration::from_millis(config.delivery.timeout_ms),
        dispatcher.clone(),
        Arc::clone(&history),
        Arc::clone(&dlq),
        Arc::clone(&stats),
        Some(Arc::clone(&registry)),
    );
    queue.start();

    if config.dead_letter.auto_cleanup {
        let purge_dlq = Arc::clone(&dlq);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(3_600)).await;
                purge_dlq.purge_expired().await;
            }
        });
    }

    let instance = std::env::var("HOSTNAME")
        .unwrap_or_else(|_| format!("hookline-{}", uuid::Uuid::new_v4().simple()));
    let service = Arc::new(RelayService::new(
        config.clone(),
        instance,
        Arc::clone(&registry),
        queue,
        dispatcher,
        cursor_store.clone(),
        event_log,
        stats,
    ));

    // Change feed consumer
    let resume_from = cursor_store.load().await?;
    match &resume_from {
        Some(token) => info!(resume_token = %token, "resuming change feed"),
        None => info!("starting change feed from the log head"),
    }
    let source = PostgresChangeSource::open(pool, config.source.clone(), resume_from.as_ref())?;
    let pipeline = Arc::clone(&service);
    tokio::spawn(async move {
        if let Err(e) = pipeline.run(source).await {
            error!(error = %e, "relay pipeline terminated");
        }
    });

    // Management API
    let state = AppState::new(Arc::clone(&service), history);
    let app = routes::router(state);
    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr).await?;
    info!(addr = %config.server.bind_addr, "management API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutting down");
    service.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
