//! Append-only audit of delivery attempts.
//!
//! The queue records every attempt here fire-and-forget: history errors
//! are logged by the caller and never propagate into the delivery
//! pipeline. The management API reads it back per subscription with
//! filters and aggregates.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hookline_core::error::{RelayError, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

/// One recorded delivery attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryAttemptRecord {
    /// Delivery the attempt belongs to
    pub delivery_id: Uuid,
    /// Owning subscription
    pub subscription_id: Uuid,
    /// Event that produced the delivery
    pub event_id: String,
    /// Attempt number (1-based)
    pub attempt: u32,
    /// When the attempt started
    pub started_at: DateTime<Utc>,
    /// Wall time of the attempt in milliseconds
    pub duration_ms: f64,
    /// Whether the attempt succeeded
    pub success: bool,
    /// HTTP status, when a response arrived
    pub status_code: Option<u16>,
    /// Failure category, when the attempt failed
    pub error_category: Option<String>,
    /// When the next attempt is scheduled, if any
    pub next_retry_at: Option<DateTime<Utc>>,
    /// First bytes of the response body (<= 1000 bytes)
    pub body_prefix: Option<String>,
}

/// Filter for listing attempts
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryFilter {
    /// Only attempts with this outcome
    pub success: Option<bool>,
    /// Inclusive lower bound on `started_at`
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `started_at`
    pub to: Option<DateTime<Utc>>,
    /// Page size (default 50)
    pub limit: Option<u32>,
    /// Page offset
    pub offset: Option<u32>,
}

impl HistoryFilter {
    fn accepts(&self, record: &DeliveryAttemptRecord) -> bool {
        if let Some(success) = self.success {
            if record.success != success {
                return false;
            }
        }
        if let Some(from) = self.from {
            if record.started_at < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if record.started_at > to {
                return false;
            }
        }
        true
    }
}

/// Aggregated attempt statistics for one subscription over a window
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeliveryStats {
    /// Attempts in the window
    pub total_attempts: u64,
    /// Successful attempts
    pub successes: u64,
    /// Failed attempts
    pub failures: u64,
    /// Mean attempt duration in milliseconds
    pub avg_duration_ms: Option<f64>,
}

/// Durable, append-only store of delivery attempts.
///
/// Object-safe; the pipeline holds it as `Arc<dyn DeliveryHistoryStore>`.
#[async_trait]
pub trait DeliveryHistoryStore: Send + Sync {
    /// Append one attempt record.
    ///
    /// # Errors
    ///
    /// Returns an error when the backing store rejects the write; the
    /// pipeline logs and swallows it.
    async fn record(&self, record: DeliveryAttemptRecord) -> Result<()>;

    /// List attempts for one subscription, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error when the backing store fails.
    async fn list_by_subscription(
        &self,
        subscription_id: Uuid,
        filter: &HistoryFilter,
    ) -> Result<Vec<DeliveryAttemptRecord>>;

    /// Count attempts for one subscription under a filter.
    ///
    /// # Errors
    ///
    /// Returns an error when the backing store fails.
    async fn count(&self, subscription_id: Uuid, filter: &HistoryFilter) -> Result<u64>;

    /// Aggregate attempts for one subscription over a time window.
    ///
    /// # Errors
    ///
    /// Returns an error when the backing store fails.
    async fn stats_for_subscription(
        &self,
        subscription_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<DeliveryStats>;
}

/// In-memory history store for tests and embedded use.
#[derive(Debug, Default)]
pub struct InMemoryHistoryStore {
    records: Mutex<Vec<DeliveryAttemptRecord>>,
}

impl InMemoryHistoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total records across all subscriptions (test helper)
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// True when no records were written
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl DeliveryHistoryStore for InMemoryHistoryStore {
    async fn record(&self, record: DeliveryAttemptRecord) -> Result<()> {
        self.records.lock().push(record);
        Ok(())
    }

    async fn list_by_subscription(
        &self,
        subscription_id: Uuid,
        filter: &HistoryFilter,
    ) -> Result<Vec<DeliveryAttemptRecord>> {
        let mut matches: Vec<DeliveryAttemptRecord> = self
            .records
            .lock()
            .iter()
            .filter(|r| r.subscription_id == subscription_id && filter.accepts(r))
            .cloned()
            .collect();
        matches.sort_by(|a, b| b.started_at.cmp(&a.started_at));

        let offset = filter.offset.unwrap_or(0) as usize;
        let limit = filter.limit.unwrap_or(50) as usize;
        Ok(matches.into_iter().skip(offset).take(limit).collect())
    }

    async fn count(&self, subscription_id: Uuid, filter: &HistoryFilter) -> Result<u64> {
        Ok(self
            .records
            .lock()
            .iter()
            .filter(|r| r.subscription_id == subscription_id && filter.accepts(r))
            .count() as u64)
    }

    async fn stats_for_subscription(
        &self,
        subscription_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<DeliveryStats> {
        let records = self.records.lock();
        let window: Vec<&DeliveryAttemptRecord> = records
            .iter()
            .filter(|r| {
                r.subscription_id == subscription_id && r.started_at >= from && r.started_at <= to
            })
            .collect();

        let total = window.len() as u64;
        let successes = window.iter().filter(|r| r.success).count() as u64;
        let avg = if window.is_empty() {
            None
        } else {
            Some(window.iter().map(|r| r.duration_ms).sum::<f64>() / window.len() as f64)
        };

        Ok(DeliveryStats {
            total_attempts: total,
            successes,
            failures: total - successes,
            avg_duration_ms: avg,
        })
    }
}

/// Postgres-backed history store.
#[derive(Debug, Clone)]
pub struct PostgresHistoryStore {
    pool: PgPool,
}

impl PostgresHistoryStore {
    /// Create a store over an existing pool
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeliveryHistoryStore for PostgresHistoryStore {
    async fn record(&self, record: DeliveryAttemptRecord) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO delivery_attempts
                (delivery_id, subscription_id, event_id, attempt, started_at,
                 duration_ms, success, status_code, error_category, next_retry_at, body_prefix)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ",
        )
        .bind(record.delivery_id)
        .bind(record.subscription_id)
        .bind(&record.event_id)
        .bind(i32::try_from(record.attempt).unwrap_or(i32::MAX))
        .bind(record.started_at)
        .bind(record.duration_ms)
        .bind(record.success)
        .bind(record.status_code.map(i32::from))
        .bind(&record.error_category)
        .bind(record.next_retry_at)
        .bind(&record.body_prefix)
        .execute(&self.pool)
        .await
        .map_err(RelayError::storage)?;
        Ok(())
    }

    async fn list_by_subscription(
        &self,
        subscription_id: Uuid,
        filter: &HistoryFilter,
    ) -> Result<Vec<DeliveryAttemptRecord>> {
        let rows: Vec<AttemptRow> = sqlx::query_as(
            r"
            SELECT delivery_id, subscription_id, event_id, attempt, started_at,
                   duration_ms, success, status_code, error_category, next_retry_at, body_prefix
            FROM delivery_attempts
            WHERE subscription_id = $1
              AND ($2::boolean IS NULL OR success = $2)
              AND ($3::timestamptz IS NULL OR started_at >= $3)
              AND ($4::timestamptz IS NULL OR started_at <= $4)
            ORDER BY started_at DESC
            LIMIT $5 OFFSET $6
            ",
        )
        .bind(subscription_id)
        .bind(filter.success)
        .bind(filter.from)
        .bind(filter.to)
        .bind(i64::from(filter.limit.unwrap_or(50)))
        .bind(i64::from(filter.offset.unwrap_or(0)))
        .fetch_all(&self.pool)
        .await
        .map_err(RelayError::storage)?;

        Ok(rows.into_iter().map(AttemptRow::into_record).collect())
    }

    async fn count(&self, subscription_id: Uuid, filter: &HistoryFilter) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            r"
            SELECT COUNT(*)
            FROM delivery_attempts
            WHERE subscription_id = $1
              AND ($2::boolean IS NULL OR success = $2)
              AND ($3::timestamptz IS NULL OR started_at >= $3)
              AND ($4::timestamptz IS NULL OR started_at <= $4)
            ",
        )
        .bind(subscription_id)
        .bind(filter.success)
        .bind(filter.from)
        .bind(filter.to)
        .fetch_one(&self.pool)
        .await
        .map_err(RelayError::storage)?;

        Ok(count.max(0) as u64)
    }

    async fn stats_for_subscription(
        &self,
        subscription_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<DeliveryStats> {
        let row: (i64, i64, Option<f64>) = sqlx::query_as(
            r"
            SELECT COUNT(*),
                   COUNT(*) FILTER (WHERE success),
                   AVG(duration_ms)
            FROM delivery_attempts
            WHERE subscription_id = $1 AND started_at >= $2 AND started_at <= $3
            ",
        )
        .bind(subscription_id)
        .bind(from)
        .bind(to)
        .fetch_one(&self.pool)
        .await
        .map_err(RelayError::storage)?;

        let total = row.0.max(0) as u64;
        let successes = row.1.max(0) as u64;
        Ok(DeliveryStats {
            total_attempts: total,
            successes,
            failures: total - successes,
            avg_duration_ms: row.2,
        })
    }
}

/// Row shape for `delivery_attempts`
#[derive(sqlx::FromRow)]
struct AttemptRow {
    delivery_id: Uuid,
    subscription_id: Uuid,
    event_id: String,
    attempt: i32,
    started_at: DateTime<Utc>,
    duration_ms: f64,
    success: bool,
    status_code: Option<i32>,
    error_category: Option<String>,
    next_retry_at: Option<DateTime<Utc>>,
    body_prefix: Option<String>,
}

impl AttemptRow {
    fn into_record(self) -> DeliveryAttemptRecord {
        DeliveryAttemptRecord {
            delivery_id: self.delivery_id,
            subscription_id: self.subscription_id,
            event_id: self.event_id,
            attempt: self.attempt.max(0) as u32,
            started_at: self.started_at,
            duration_ms: self.duration_ms,
            success: self.success,
            status_code: self.status_code.and_then(|s| u16::try_from(s).ok()),
            error_category: self.error_category,
            next_retry_at: self.next_retry_at,
            body_prefix: self.body_prefix,
        }
    }
}
