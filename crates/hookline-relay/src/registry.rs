//! In-memory subscription registry.
//!
//! Hydrates from the durable store at startup, writes through on every
//! mutation, and publishes a change signal the router side uses to
//! refresh its snapshot. Reads are lock-free clones of `Arc`s; writes
//! take the exclusive lock briefly and never across store I/O.

use std::collections::HashMap;
use std::sync::Arc;

use hookline_core::error::{RelayError, Result};
use hookline_core::subscription::{Subscription, SubscriptionListFilter};
use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::info;
use uuid::Uuid;

use crate::store::SubscriptionStore;

/// Subscription counts by active flag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionCounts {
    /// Subscriptions receiving deliveries
    pub active: usize,
    /// Disabled subscriptions
    pub inactive: usize,
}

impl SubscriptionCounts {
    /// Total subscriptions
    #[must_use]
    pub const fn total(self) -> usize {
        self.active + self.inactive
    }
}

/// Cache of active subscriptions over a durable store.
pub struct SubscriptionRegistry {
    store: Arc<dyn SubscriptionStore>,
    cache: RwLock<HashMap<Uuid, Arc<Subscription>>>,
    changed_tx: watch::Sender<u64>,
}

impl SubscriptionRegistry {
    /// Create an empty registry over a store. Call [`Self::hydrate`]
    /// before routing.
    #[must_use]
    pub fn new(store: Arc<dyn SubscriptionStore>) -> Self {
        let (changed_tx, _) = watch::channel(0);
        Self {
            store,
            cache: RwLock::new(HashMap::new()),
            changed_tx,
        }
    }

    /// Load every stored subscription into the cache.
    ///
    /// # Errors
    ///
    /// Returns an error when the store cannot be read.
    pub async fn hydrate(&self) -> Result<()> {
        let subscriptions = self.store.load_all().await?;
        let count = subscriptions.len();
        {
            let mut cache = self.cache.write();
            cache.clear();
            for sub in subscriptions {
                cache.insert(sub.id, Arc::new(sub));
            }
        }
        self.notify();
        info!(subscriptions = count, "subscription registry hydrated");
        Ok(())
    }

    /// Find one subscription by id.
    #[must_use]
    pub fn find_by_id(&self, id: Uuid) -> Option<Arc<Subscription>> {
        self.cache.read().get(&id).cloned()
    }

    /// Find one subscription by its unique name.
    #[must_use]
    pub fn find_by_name(&self, name: &str) -> Option<Arc<Subscription>> {
        self.cache
            .read()
            .values()
            .find(|s| s.name == name)
            .cloned()
    }

    /// List subscriptions passing the filter, sorted by creation time.
    #[must_use]
    pub fn list(
        &self,
        filter: &SubscriptionListFilter,
        limit: usize,
        offset: usize,
    ) -> Vec<Arc<Subscription>> {
        let mut matches: Vec<Arc<Subscription>> = self
            .cache
            .read()
            .values()
            .filter(|s| filter.accepts(s))
            .cloned()
            .collect();
        matches.sort_by_key(|s| s.created_at);
        matches.into_iter().skip(offset).take(limit).collect()
    }

    /// Count subscriptions passing the filter.
    #[must_use]
    pub fn count(&self, filter: &SubscriptionListFilter) -> usize {
        self.cache
            .read()
            .values()
            .filter(|s| filter.accepts(s))
            .count()
    }

    /// Counts by active flag; `active + inactive == total` always.
    #[must_use]
    pub fn counts(&self) -> SubscriptionCounts {
        let cache = self.cache.read();
        let active = cache.values().filter(|s| s.active).count();
        SubscriptionCounts {
            active,
            inactive: cache.len() - active,
        }
    }

    /// Validate, persist and cache one subscription, publishing the
    /// change signal.
    ///
    /// # Errors
    ///
    /// Returns validation errors, [`RelayError::Conflict`] on duplicate
    /// names, or storage errors.
    pub async fn upsert(&self, subscription: Subscription) -> Result<Arc<Subscription>> {
        subscription.validate()?;

        // Fast-path conflict check; the store's conditional write is the
        // authoritative one.
        if let Some(existing) = self.find_by_name(&subscription.name) {
            if existing.id != subscription.id {
                return Err(RelayError::conflict(format!(
                    "subscription name '{}' already exists",
                    subscription.name
                )));
            }
        }

        self.store.upsert(&subscription).await?;

        let shared = Arc::new(subscription);
        self.cache.write().insert(shared.id, Arc::clone(&shared));
        self.notify();
        Ok(shared)
    }

    /// Remove one subscription, publishing the change signal.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::NotFound`] for unknown ids or storage
    /// errors.
    pub async fn remove(&self, id: Uuid) -> Result<()> {
        self.store.remove(id).await?;
        self.cache.write().remove(&id);
        self.notify();
        Ok(())
    }

    /// Bump a subscription's running delivery counters after a terminal
    /// outcome. Cache-only: the counters ride along with the next
    /// write-through, and no change signal fires (routing is unaffected).
    pub fn record_delivery_outcome(&self, id: Uuid, success: bool) {
        let mut cache = self.cache.write();
        if let Some(entry) = cache.get_mut(&id) {
            let mut updated = (**entry).clone();
            updated.total_deliveries += 1;
            if success {
                updated.last_delivery_at = Some(chrono::Utc::now());
            } else {
                updated.failed_deliveries += 1;
            }
            *entry = Arc::new(updated);
        }
    }

    /// Read-only snapshot of every cached subscription, in unspecified
    /// order. The router filters on the active flag itself.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<Subscription>> {
        self.cache.read().values().cloned().collect()
    }

    /// Subscribe to cache invalidation signals.
    #[must_use]
    pub fn subscribe_changes(&self) -> watch::Receiver<u64> {
        self.changed_tx.subscribe()
    }

    fn notify(&self) {
        self.changed_tx.send_modify(|version| *version += 1);
    }
}
