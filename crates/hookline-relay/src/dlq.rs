//! Dead-letter queue for deliveries whose retries are exhausted.
//!
//! The working set is a bounded in-memory list (oldest entry evicted to
//! the log on overflow); entries are mirrored to a durable store when
//! persistence is enabled. Retention is enforced by an hourly purge
//! task driven by the pipeline service. Persistence calls never run
//! while the in-memory mutex is held, and persistence failures are
//! logged and swallowed.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use hookline_core::error::{RelayError, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::queue::{DeliveryItem, DeliveryStatus};

/// One dead-lettered delivery.
///
/// The entry id is the delivery id: there is exactly one entry per
/// dead-lettered delivery until an operator removes it or a replay
/// succeeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    /// Entry id (== delivery id)
    pub id: Uuid,
    /// The original delivery item
    pub item: DeliveryItem,
    /// Why the delivery was dead-lettered
    pub reason: String,
    /// Attempts consumed before dead-lettering
    pub original_attempts: u32,
    /// When the entry was created
    pub dead_lettered_at: DateTime<Utc>,
    /// Operator-triggered replays so far
    pub retry_count: u32,
    /// Outcome of the most recent replay, if any
    pub last_retry_outcome: Option<String>,
}

/// Filter for listing dead-letter entries
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeadLetterFilter {
    /// Only entries for this subscription
    pub subscription_id: Option<Uuid>,
    /// Only entries for this event type
    pub event_type: Option<String>,
    /// Page size (default 50)
    pub limit: Option<u32>,
    /// Page offset
    pub offset: Option<u32>,
}

impl DeadLetterFilter {
    fn accepts(&self, entry: &DeadLetterEntry) -> bool {
        if let Some(id) = self.subscription_id {
            if entry.item.subscription_id != id {
                return false;
            }
        }
        if let Some(event_type) = &self.event_type {
            if entry.item.event_type != *event_type {
                return false;
            }
        }
        true
    }
}

/// Dead-letter statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterStats {
    /// Entries currently held
    pub total_entries: usize,
    /// Entries evicted or purged since start
    pub total_purged: u64,
    /// Creation time of the oldest held entry
    pub oldest_entry_at: Option<DateTime<Utc>>,
}

/// Durable mirror for dead-letter entries.
#[async_trait]
pub trait DeadLetterStore: Send + Sync {
    /// Insert or replace one entry.
    ///
    /// # Errors
    ///
    /// Returns an error when the backing store rejects the write.
    async fn upsert(&self, entry: &DeadLetterEntry) -> Result<()>;

    /// Remove one entry.
    ///
    /// # Errors
    ///
    /// Returns an error when the backing store fails.
    async fn remove(&self, id: Uuid) -> Result<()>;

    /// Remove entries older than the cutoff, returning how many.
    ///
    /// # Errors
    ///
    /// Returns an error when the backing store fails.
    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    /// Load every persisted entry (startup recovery), oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error when the backing store fails.
    async fn load_all(&self) -> Result<Vec<DeadLetterEntry>>;
}

/// Bounded in-memory dead-letter queue with optional durable mirror.
pub struct DeadLetterQueue {
    max_size: usize,
    retention: Duration,
    entries: Mutex<VecDeque<DeadLetterEntry>>,
    store: Option<Arc<dyn DeadLetterStore>>,
    total_purged: AtomicU64,
}

impl DeadLetterQueue {
    /// Create a dead-letter queue.
    ///
    /// `store` is the durable mirror; pass `None` when persistence is
    /// disabled.
    #[must_use]
    pub fn new(
        max_size: usize,
        retention_days: u32,
        store: Option<Arc<dyn DeadLetterStore>>,
    ) -> Self {
        Self {
            max_size: max_size.max(1),
            retention: Duration::days(i64::from(retention_days)),
            entries: Mutex::new(VecDeque::new()),
            store,
            total_purged: AtomicU64::new(0),
        }
    }

    /// Recover persisted entries into memory (newest `max_size` kept).
    ///
    /// # Errors
    ///
    /// Returns an error when the durable store cannot be read.
    pub async fn hydrate(&self) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let mut persisted = store.load_all().await?;
        let overflow = persisted.len().saturating_sub(self.max_size);
        let kept: VecDeque<DeadLetterEntry> = persisted.drain(overflow..).collect();

        let mut entries = self.entries.lock();
        *entries = kept;
        info!(entries = entries.len(), "dead-letter queue hydrated");
        Ok(())
    }

    /// Add a dead-lettered delivery.
    ///
    /// On overflow the oldest entry is evicted to the log and the purge
    /// counter advances.
    pub async fn add(&self, mut item: DeliveryItem, reason: impl Into<String>) {
        item.status = DeliveryStatus::DeadLettered;
        let reason = reason.into();
        let entry = DeadLetterEntry {
            id: item.id,
            original_attempts: item.attempts,
            reason: reason.clone(),
            dead_lettered_at: Utc::now(),
            retry_count: 0,
            last_retry_outcome: None,
            item,
        };

        let evicted = {
            let mut entries = self.entries.lock();
            let evicted = if entries.len() >= self.max_size {
                entries.pop_front()
            } else {
                None
            };
            entries.push_back(entry.clone());
            evicted
        };

        if let Some(old) = &evicted {
            self.total_purged.fetch_add(1, Ordering::Relaxed);
            warn!(
                entry = %old.id,
                subscription = %old.item.subscription_id,
                reason = %old.reason,
                "dead-letter queue full; evicted oldest entry"
            );
        }

        if let Some(store) = &self.store {
            if let Err(e) = store.upsert(&entry).await {
                warn!(entry = %entry.id, error = %e, "failed to persist dead-letter entry");
            }
            if let Some(old) = evicted {
                if let Err(e) = store.remove(old.id).await {
                    warn!(entry = %old.id, error = %e, "failed to remove evicted dead-letter entry");
                }
            }
        }
    }

    /// Produce a replayable delivery for one entry.
    ///
    /// The returned item has `attempts = 0` and is annotated as a
    /// dead-letter replay; the entry itself stays until the replay
    /// succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::NotFound`] for unknown entry ids.
    pub fn retry(&self, id: Uuid) -> Result<DeliveryItem> {
        let mut entries = self.entries.lock();
        let entry = entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| RelayError::not_found("dead-letter entry", id))?;

        entry.retry_count += 1;

        let mut item = entry.item.clone();
        item.attempts = 0;
        item.status = DeliveryStatus::Queued;
        item.next_eligible_at = None;
        item.last_error = None;
        item.retry_from_dead_letter = true;
        Ok(item)
    }

    /// Produce replayable deliveries for every entry passing the filter.
    #[must_use]
    pub fn retry_all(&self, filter: &DeadLetterFilter) -> Vec<DeliveryItem> {
        let ids: Vec<Uuid> = {
            let entries = self.entries.lock();
            entries
                .iter()
                .filter(|e| filter.accepts(e))
                .map(|e| e.id)
                .collect()
        };
        ids.into_iter().filter_map(|id| self.retry(id).ok()).collect()
    }

    /// Record the outcome of a replay: success removes the entry,
    /// failure keeps it with the outcome noted.
    pub async fn record_replay_outcome(&self, id: Uuid, success: bool, outcome: &str) {
        if success {
            let removed = {
                let mut entries = self.entries.lock();
                let before = entries.len();
                entries.retain(|e| e.id != id);
                before != entries.len()
            };
            if removed {
                if let Some(store) = &self.store {
                    if let Err(e) = store.remove(id).await {
                        warn!(entry = %id, error = %e, "failed to remove replayed dead-letter entry");
                    }
                }
            }
            return;
        }

        let updated = {
            let mut entries = self.entries.lock();
            entries.iter_mut().find(|e| e.id == id).map(|entry| {
                entry.last_retry_outcome = Some(outcome.to_string());
                entry.clone()
            })
        };
        if let (Some(entry), Some(store)) = (updated, &self.store) {
            if let Err(e) = store.upsert(&entry).await {
                warn!(entry = %entry.id, error = %e, "failed to persist dead-letter entry");
            }
        }
    }

    /// Remove one entry.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::NotFound`] for unknown entry ids.
    pub async fn remove(&self, id: Uuid) -> Result<()> {
        let removed = {
            let mut entries = self.entries.lock();
            let before = entries.len();
            entries.retain(|e| e.id != id);
            before != entries.len()
        };
        if !removed {
            return Err(RelayError::not_found("dead-letter entry", id));
        }
        if let Some(store) = &self.store {
            if let Err(e) = store.remove(id).await {
                warn!(entry = %id, error = %e, "failed to remove dead-letter entry");
            }
        }
        Ok(())
    }

    /// List entries passing the filter, newest first.
    #[must_use]
    pub fn list(&self, filter: &DeadLetterFilter) -> Vec<DeadLetterEntry> {
        let entries = self.entries.lock();
        let offset = filter.offset.unwrap_or(0) as usize;
        let limit = filter.limit.unwrap_or(50) as usize;
        entries
            .iter()
            .rev()
            .filter(|e| filter.accepts(e))
            .skip(offset)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Fetch one entry by id.
    #[must_use]
    pub fn get(&self, id: Uuid) -> Option<DeadLetterEntry> {
        self.entries.lock().iter().find(|e| e.id == id).cloned()
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> DeadLetterStats {
        let entries = self.entries.lock();
        DeadLetterStats {
            total_entries: entries.len(),
            total_purged: self.total_purged.load(Ordering::Relaxed),
            oldest_entry_at: entries.front().map(|e| e.dead_lettered_at),
        }
    }

    /// Purge entries older than the retention window, returning how many
    /// were removed.
    pub async fn purge_expired(&self) -> u64 {
        let cutoff = Utc::now() - self.retention;
        let purged = {
            let mut entries = self.entries.lock();
            let before = entries.len();
            entries.retain(|e| e.dead_lettered_at >= cutoff);
            (before - entries.len()) as u64
        };
        if purged > 0 {
            self.total_purged.fetch_add(purged, Ordering::Relaxed);
            info!(purged, "purged expired dead-letter entries");
        }

        if let Some(store) = &self.store {
            if let Err(e) = store.purge_older_than(cutoff).await {
                warn!(error = %e, "failed to purge persisted dead-letter entries");
            }
        }
        purged
    }

    /// Remove every entry.
    pub async fn clear(&self) {
        let drained = {
            let mut entries = self.entries.lock();
            let ids: Vec<Uuid> = entries.iter().map(|e| e.id).collect();
            entries.clear();
            ids
        };
        if let Some(store) = &self.store {
            for id in drained {
                if let Err(e) = store.remove(id).await {
                    warn!(entry = %id, error = %e, "failed to remove dead-letter entry");
                }
            }
        }
    }

    /// Number of entries currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// True when no entries are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Postgres-backed dead-letter mirror.
#[derive(Debug, Clone)]
pub struct PostgresDeadLetterStore {
    pool: PgPool,
}

impl PostgresDeadLetterStore {
    /// Create a store over an existing pool
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeadLetterStore for PostgresDeadLetterStore {
    async fn upsert(&self, entry: &DeadLetterEntry) -> Result<()> {
        let doc = serde_json::to_value(entry)?;
        sqlx::query(
            r"
            INSERT INTO dead_letters (id, subscription_id, event_type, dead_lettered_at, doc)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE SET doc = EXCLUDED.doc
            ",
        )
        .bind(entry.id)
        .bind(entry.item.subscription_id)
        .bind(&entry.item.event_type)
        .bind(entry.dead_lettered_at)
        .bind(doc)
        .execute(&self.pool)
        .await
        .map_err(RelayError::storage)?;
        Ok(())
    }

    async fn remove(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM dead_letters WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(RelayError::storage)?;
        Ok(())
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM dead_letters WHERE dead_lettered_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(RelayError::storage)?;
        Ok(result.rows_affected())
    }

    async fn load_all(&self) -> Result<Vec<DeadLetterEntry>> {
        let rows: Vec<(serde_json::Value,)> =
            sqlx::query_as("SELECT doc FROM dead_letters ORDER BY dead_lettered_at ASC")
                .fetch_all(&self.pool)
                .await
                .map_err(RelayError::storage)?;

        let mut entries = Vec::with_capacity(rows.len());
        for (doc,) in rows {
            entries.push(serde_json::from_value(doc)?);
        }
        Ok(entries)
    }
}
