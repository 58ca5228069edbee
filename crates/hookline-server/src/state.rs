//! Shared handler state.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use hookline_relay::{
    DeadLetterQueue, DeliveryHistoryStore, DeliveryQueue, RelayService, SubscriptionRegistry,
};

/// Service handles shared by every management handler.
#[derive(Clone)]
pub struct AppState {
    /// The pipeline service
    pub service: Arc<RelayService>,
    /// Subscription registry
    pub registry: Arc<SubscriptionRegistry>,
    /// Delivery queue
    pub queue: DeliveryQueue,
    /// Delivery attempt audit
    pub history: Arc<dyn DeliveryHistoryStore>,
    /// Dead-letter queue
    pub dead_letters: Arc<DeadLetterQueue>,
    /// Server start time (uptime reporting)
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Bundle the pipeline handles for the router.
    #[must_use]
    pub fn new(
        service: Arc<RelayService>,
        history: Arc<dyn DeliveryHistoryStore>,
    ) -> Self {
        let registry = service.registry();
        let queue = service.queue();
        let dead_letters = queue.dead_letter_queue();
        Self {
            service,
            registry,
            queue,
            history,
            dead_letters,
            started_at: Utc::now(),
        }
    }
}
