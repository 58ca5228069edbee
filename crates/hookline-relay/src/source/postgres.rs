//! Change source tailing the Postgres `change_log` table.
//!
//! The table is append-only with a `bigserial` sequence column; the
//! sequence number, rendered as a decimal string, is the opaque resume
//! token the rest of the pipeline carries. Polling keeps a batch
//! buffered; transient query failures reconnect with bounded
//! exponential backoff plus jitter before escalating.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hookline_core::error::{RelayError, Result};
use hookline_core::event::{MutationRecord, Operation, ResumeToken, UpdateDescription};
use hookline_core::config::SourceConfig;
use rand::Rng;
use sqlx::PgPool;
use tracing::{debug, warn};

use super::ChangeSource;

/// Reconnection attempts before a transient failure escalates
const MAX_RECONNECT_ATTEMPTS: u32 = 10;
/// Base reconnection delay
const RECONNECT_BASE_MS: u64 = 500;
/// Reconnection delay ceiling
const RECONNECT_MAX_MS: u64 = 30_000;

/// Change source polling the `change_log` table.
#[derive(Debug)]
pub struct PostgresChangeSource {
    pool: PgPool,
    config: SourceConfig,
    /// Last sequence handed out (read position)
    cursor: Option<i64>,
    buffer: VecDeque<MutationRecord>,
    cursor_verified: bool,
}

impl PostgresChangeSource {
    /// Open the source, resuming after `cursor` when given.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::CursorExpired`] when the token cannot be
    /// interpreted.
    pub fn open(pool: PgPool, config: SourceConfig, cursor: Option<&ResumeToken>) -> Result<Self> {
        let cursor = match cursor {
            None => None,
            Some(token) => Some(token.as_str().parse::<i64>().map_err(|_| {
                RelayError::CursorExpired {
                    token: token.as_str().to_string(),
                }
            })?),
        };

        Ok(Self {
            pool,
            config,
            cursor,
            buffer: VecDeque::new(),
            cursor_verified: false,
        })
    }

    /// Detect an unrecoverable gap: a resume position that predates the
    /// retained tail of the change log.
    async fn verify_cursor(&mut self) -> Result<()> {
        let Some(cursor) = self.cursor else {
            self.cursor_verified = true;
            return Ok(());
        };

        let min_seq: Option<i64> = sqlx::query_scalar("SELECT MIN(seq) FROM change_log")
            .fetch_one(&self.pool)
            .await
            .map_err(RelayError::storage)?;

        if let Some(min_seq) = min_seq {
            if cursor + 1 < min_seq {
                return Err(RelayError::CursorExpired {
                    token: cursor.to_string(),
                });
            }
        }
        self.cursor_verified = true;
        Ok(())
    }

    async fn fetch_batch(&mut self) -> Result<usize> {
        if !self.cursor_verified {
            self.verify_cursor().await?;
        }

        let rows: Vec<ChangeLogRow> = sqlx::query_as(
            r"
            SELECT seq, cluster_time, collection, operation, document_key,
                   post_image, pre_image, update_description
            FROM change_log
            WHERE seq > $1
            ORDER BY seq ASC
            LIMIT $2
            ",
        )
        .bind(self.cursor.unwrap_or(0))
        .bind(self.config.batch_size as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(RelayError::storage)?;

        let fetched = rows.len();
        for row in rows {
            let seq = row.seq;
            match row.into_record() {
                Ok(record) => self.buffer.push_back(record),
                Err(e) => {
                    // One malformed row must not wedge the stream.
                    warn!(seq, error = %e, "skipping malformed change log row");
                }
            }
            self.cursor = Some(seq);
        }

        debug!(fetched, "fetched change log batch");
        Ok(fetched)
    }
}

#[async_trait]
impl ChangeSource for PostgresChangeSource {
    async fn next(&mut self) -> Result<Option<MutationRecord>> {
        let mut failures: u32 = 0;

        loop {
            if let Some(record) = self.buffer.pop_front() {
                return Ok(Some(record));
            }

            match self.fetch_batch().await {
                Ok(0) => {
                    tokio::time::sleep(Duration::from_millis(self.config.poll_interval_ms)).await;
                }
                Ok(_) => {
                    failures = 0;
                }
                Err(e @ RelayError::CursorExpired { .. }) => return Err(e),
                Err(e) => {
                    failures += 1;
                    if failures >= MAX_RECONNECT_ATTEMPTS {
                        return Err(RelayError::transient(format!(
                            "change log poll failed {failures} times: {e}"
                        )));
                    }
                    let backoff = reconnect_delay(failures);
                    warn!(
                        attempt = failures,
                        delay_ms = backoff.as_millis() as u64,
                        error = %e,
                        "change log poll failed; reconnecting"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

/// Bounded exponential reconnection delay with jitter.
fn reconnect_delay(attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(10);
    let base = RECONNECT_BASE_MS.saturating_mul(1_u64 << exponent);
    let capped = base.min(RECONNECT_MAX_MS);
    let jitter = rand::thread_rng().gen_range(0..=capped / 4);
    Duration::from_millis(capped + jitter)
}

/// Row shape for `change_log`
#[derive(sqlx::FromRow)]
struct ChangeLogRow {
    seq: i64,
    cluster_time: DateTime<Utc>,
    collection: String,
    operation: String,
    document_key: String,
    post_image: Option<serde_json::Value>,
    pre_image: Option<serde_json::Value>,
    update_description: Option<serde_json::Value>,
}

impl ChangeLogRow {
    fn into_record(self) -> Result<MutationRecord> {
        let operation = match self.operation.as_str() {
            "insert" => Operation::Insert,
            "update" => Operation::Update,
            "delete" => Operation::Delete,
            other => {
                return Err(RelayError::Serialization(format!(
                    "unknown change log operation '{other}'"
                )));
            }
        };

        let update_description: Option<UpdateDescription> = self
            .update_description
            .map(serde_json::from_value)
            .transpose()?;

        Ok(MutationRecord {
            resume_token: ResumeToken::new(self.seq.to_string()),
            cluster_time: self.cluster_time,
            collection: self.collection,
            operation,
            document_key: self.document_key,
            post_image: self.post_image,
            pre_image: self.pre_image,
            update_description,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconnect_delay_bounds() {
        for attempt in 1..=20 {
            let delay = reconnect_delay(attempt).as_millis() as u64;
            assert!(delay >= RECONNECT_BASE_MS.min(RECONNECT_MAX_MS));
            assert!(delay <= RECONNECT_MAX_MS + RECONNECT_MAX_MS / 4);
        }
    }

    #[test]
    fn test_row_mapping() {
        let row = ChangeLogRow {
            seq: 42,
            cluster_time: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            collection: "issues".to_string(),
            operation: "update".to_string(),
            document_key: "I1".to_string(),
            post_image: Some(serde_json::json!({"status": "done"})),
            pre_image: Some(serde_json::json!({"status": "open"})),
            update_description: Some(serde_json::json!({
                "updated_fields": {"status": "done"},
                "removed_fields": [],
                "truncated_arrays": [],
            })),
        };

        let record = row.into_record().unwrap();
        assert_eq!(record.resume_token.as_str(), "42");
        assert_eq!(record.operation, Operation::Update);
        assert!(record
            .update_description
            .as_ref()
            .unwrap()
            .touches("status"));
    }

    #[test]
    fn test_unknown_operation_rejected() {
        let row = ChangeLogRow {
            seq: 1,
            cluster_time: Utc::now(),
            collection: "issues".to_string(),
            operation: "truncate".to_string(),
            document_key: "I1".to_string(),
            post_image: None,
            pre_image: None,
            update_description: None,
        };
        assert!(row.into_record().is_err());
    }

    #[tokio::test]
    async fn test_open_rejects_garbage_cursor() {
        let pool = PgPool::connect_lazy("postgres://localhost/hookline").unwrap();
        let err = PostgresChangeSource::open(
            pool,
            SourceConfig::default(),
            Some(&ResumeToken::new("not-a-seq")),
        )
        .unwrap_err();
        assert!(matches!(err, RelayError::CursorExpired { .. }));
    }
}
