//! Optional event log with fingerprint deduplication.
//!
//! When enabled, every classified event is appended with a unique
//! `(source_id, event_type, fingerprint)` key. A duplicate fingerprint
//! means the mutation was already processed (at-least-once redelivery
//! after a restart) and the append reports it without failing. The log
//! also backs the management API's event listing and replay.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hookline_core::error::{RelayError, Result};
use hookline_core::event::{Event, MutationRecord};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

/// One logged event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    /// The classified event
    pub event: Event,
    /// The mutation that produced it (kept for replay)
    pub record: MutationRecord,
    /// Document key of the mutated entity
    pub source_id: String,
    /// When the pipeline processed the event
    pub processed_at: DateTime<Utc>,
}

/// Filter for listing logged events
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventLogFilter {
    /// Only events of this type
    pub event_type: Option<String>,
    /// Only events from this collection
    pub collection: Option<String>,
    /// Page size (default 50)
    pub limit: Option<u32>,
    /// Page offset
    pub offset: Option<u32>,
}

impl EventLogFilter {
    fn accepts(&self, entry: &EventLogEntry) -> bool {
        if let Some(event_type) = &self.event_type {
            if entry.event.event_type != *event_type {
                return false;
            }
        }
        if let Some(collection) = &self.collection {
            if entry.event.collection != *collection {
                return false;
            }
        }
        true
    }
}

/// Durable event log.
///
/// Object-safe; the pipeline holds it as `Arc<dyn EventLogStore>`.
#[async_trait]
pub trait EventLogStore: Send + Sync {
    /// Append one event. Returns false when the fingerprint was already
    /// logged (duplicate).
    ///
    /// # Errors
    ///
    /// Returns an error when the backing store fails.
    async fn append(&self, entry: EventLogEntry) -> Result<bool>;

    /// True when the dedup key was already logged.
    ///
    /// # Errors
    ///
    /// Returns an error when the backing store fails.
    async fn contains(&self, source_id: &str, event_type: &str, fingerprint: &str)
        -> Result<bool>;

    /// List logged events, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error when the backing store fails.
    async fn list(&self, filter: &EventLogFilter) -> Result<Vec<EventLogEntry>>;

    /// Fetch one event by its event id.
    ///
    /// # Errors
    ///
    /// Returns an error when the backing store fails.
    async fn find(&self, event_id: &str) -> Result<Option<EventLogEntry>>;
}

/// In-memory event log for tests and embedded use.
#[derive(Debug, Default)]
pub struct InMemoryEventLog {
    entries: Mutex<Vec<EventLogEntry>>,
}

impl InMemoryEventLog {
    /// Create an empty log
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventLogStore for InMemoryEventLog {
    async fn append(&self, entry: EventLogEntry) -> Result<bool> {
        let mut entries = self.entries.lock();
        let duplicate = entries.iter().any(|e| {
            e.source_id == entry.source_id
                && e.event.event_type == entry.event.event_type
                && e.event.fingerprint == entry.event.fingerprint
        });
        if duplicate {
            return Ok(false);
        }
        entries.push(entry);
        Ok(true)
    }

    async fn contains(
        &self,
        source_id: &str,
        event_type: &str,
        fingerprint: &str,
    ) -> Result<bool> {
        Ok(self.entries.lock().iter().any(|e| {
            e.source_id == source_id
                && e.event.event_type == event_type
                && e.event.fingerprint == fingerprint
        }))
    }

    async fn list(&self, filter: &EventLogFilter) -> Result<Vec<EventLogEntry>> {
        let entries = self.entries.lock();
        let offset = filter.offset.unwrap_or(0) as usize;
        let limit = filter.limit.unwrap_or(50) as usize;
        Ok(entries
            .iter()
            .rev()
            .filter(|e| filter.accepts(e))
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn find(&self, event_id: &str) -> Result<Option<EventLogEntry>> {
        Ok(self
            .entries
            .lock()
            .iter()
            .find(|e| e.event.id == event_id)
            .cloned())
    }
}

/// Postgres-backed event log.
#[derive(Debug, Clone)]
pub struct PostgresEventLog {
    pool: PgPool,
}

impl PostgresEventLog {
    /// Create a log over an existing pool
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventLogStore for PostgresEventLog {
    async fn append(&self, entry: EventLogEntry) -> Result<bool> {
        let doc = serde_json::to_value(&entry)?;
        let result = sqlx::query(
            r"
            INSERT INTO events (event_id, source_id, event_type, fingerprint, processed_at, doc)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (source_id, event_type, fingerprint) DO NOTHING
            ",
        )
        .bind(&entry.event.id)
        .bind(&entry.source_id)
        .bind(&entry.event.event_type)
        .bind(&entry.event.fingerprint)
        .bind(entry.processed_at)
        .bind(doc)
        .execute(&self.pool)
        .await
        .map_err(RelayError::storage)?;

        Ok(result.rows_affected() > 0)
    }

    async fn contains(
        &self,
        source_id: &str,
        event_type: &str,
        fingerprint: &str,
    ) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            r"
            SELECT COUNT(*)
            FROM events
            WHERE source_id = $1 AND event_type = $2 AND fingerprint = $3
            ",
        )
        .bind(source_id)
        .bind(event_type)
        .bind(fingerprint)
        .fetch_one(&self.pool)
        .await
        .map_err(RelayError::storage)?;
        Ok(count > 0)
    }

    async fn list(&self, filter: &EventLogFilter) -> Result<Vec<EventLogEntry>> {
        let rows: Vec<(serde_json::Value,)> = sqlx::query_as(
            r"
            SELECT doc
            FROM events
            WHERE ($1::text IS NULL OR event_type = $1)
            ORDER BY processed_at DESC
            LIMIT $2 OFFSET $3
            ",
        )
        .bind(&filter.event_type)
        .bind(i64::from(filter.limit.unwrap_or(50)))
        .bind(i64::from(filter.offset.unwrap_or(0)))
        .fetch_all(&self.pool)
        .await
        .map_err(RelayError::storage)?;

        let mut entries = Vec::with_capacity(rows.len());
        for (doc,) in rows {
            let entry: EventLogEntry = serde_json::from_value(doc)?;
            if filter
                .collection
                .as_ref()
                .is_none_or(|c| entry.event.collection == *c)
            {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    async fn find(&self, event_id: &str) -> Result<Option<EventLogEntry>> {
        let row: Option<(serde_json::Value,)> =
            sqlx::query_as("SELECT doc FROM events WHERE event_id = $1")
                .bind(event_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(RelayError::storage)?;

        match row {
            None => Ok(None),
            Some((doc,)) => Ok(Some(serde_json::from_value(doc)?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hookline_core::event::Operation;

    fn entry(event_id: &str, fingerprint: &str) -> EventLogEntry {
        EventLogEntry {
            event: Event {
                id: event_id.to_string(),
                event_type: "issue.created".to_string(),
                entity_kind: "issue".to_string(),
                timestamp: Utc::now(),
                collection: "issues".to_string(),
                operation: Operation::Insert,
                fingerprint: fingerprint.to_string(),
            },
            record: MutationRecord {
                resume_token: hookline_core::event::ResumeToken::new("1"),
                cluster_time: Utc::now(),
                collection: "issues".to_string(),
                operation: Operation::Insert,
                document_key: "I1".to_string(),
                post_image: Some(serde_json::json!({"_id": "I1"})),
                pre_image: None,
                update_description: None,
            },
            source_id: "I1".to_string(),
            processed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_append_and_find() {
        let log = InMemoryEventLog::new();
        assert!(log.append(entry("e1", "f1")).await.unwrap());

        let found = log.find("e1").await.unwrap().unwrap();
        assert_eq!(found.event.fingerprint, "f1");
        assert!(log.find("e2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_fingerprint_detected() {
        let log = InMemoryEventLog::new();
        assert!(log.append(entry("e1", "f1")).await.unwrap());
        assert!(!log.append(entry("e2", "f1")).await.unwrap());
        assert!(log.append(entry("e3", "f2")).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_filters() {
        let log = InMemoryEventLog::new();
        log.append(entry("e1", "f1")).await.unwrap();
        log.append(entry("e2", "f2")).await.unwrap();

        let all = log.list(&EventLogFilter::default()).await.unwrap();
        assert_eq!(all.len(), 2);
        // newest first
        assert_eq!(all[0].event.id, "e2");

        let none = log
            .list(&EventLogFilter {
                event_type: Some("project.created".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(none.is_empty());
    }
}
