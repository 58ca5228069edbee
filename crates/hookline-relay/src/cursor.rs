//! Durable resume cursor for the change feed.
//!
//! One opaque token, overwritten in place. The pipeline saves it only
//! after every delivery for a mutation has been enqueued (or explicitly
//! dropped under the overflow policy), so a restart re-reads at most the
//! mutations whose fanout was incomplete.

use async_trait::async_trait;
use hookline_core::error::{RelayError, Result};
use hookline_core::event::ResumeToken;
use parking_lot::Mutex;
use sqlx::PgPool;

/// Durable storage for the relay's resume position.
///
/// Object-safe; the pipeline holds it as `Arc<dyn CursorStore>`.
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Load the persisted cursor, `None` on first start.
    ///
    /// # Errors
    ///
    /// Returns an error when the backing store fails.
    async fn load(&self) -> Result<Option<ResumeToken>>;

    /// Overwrite the persisted cursor.
    ///
    /// # Errors
    ///
    /// Returns an error when the backing store fails.
    async fn save(&self, token: &ResumeToken) -> Result<()>;

    /// Drop the persisted cursor (operator reset).
    ///
    /// # Errors
    ///
    /// Returns an error when the backing store fails.
    async fn clear(&self) -> Result<()>;
}

/// In-memory cursor store for tests and embedded use.
#[derive(Debug, Default)]
pub struct InMemoryCursorStore {
    token: Mutex<Option<ResumeToken>>,
}

impl InMemoryCursorStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CursorStore for InMemoryCursorStore {
    async fn load(&self) -> Result<Option<ResumeToken>> {
        Ok(self.token.lock().clone())
    }

    async fn save(&self, token: &ResumeToken) -> Result<()> {
        *self.token.lock() = Some(token.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        *self.token.lock() = None;
        Ok(())
    }
}

/// Postgres-backed cursor store: a single-row table overwritten in place.
#[derive(Debug, Clone)]
pub struct PostgresCursorStore {
    pool: PgPool,
}

impl PostgresCursorStore {
    /// Create a store over an existing pool
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CursorStore for PostgresCursorStore {
    async fn load(&self) -> Result<Option<ResumeToken>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT token FROM relay_cursor WHERE id = 0")
                .fetch_optional(&self.pool)
                .await
                .map_err(RelayError::storage)?;
        Ok(row.map(|(token,)| ResumeToken::new(token)))
    }

    async fn save(&self, token: &ResumeToken) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO relay_cursor (id, token, updated_at)
            VALUES (0, $1, now())
            ON CONFLICT (id) DO UPDATE SET token = EXCLUDED.token, updated_at = now()
            ",
        )
        .bind(token.as_str())
        .execute(&self.pool)
        .await
        .map_err(RelayError::storage)?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        sqlx::query("DELETE FROM relay_cursor WHERE id = 0")
            .execute(&self.pool)
            .await
            .map_err(RelayError::storage)?;
        Ok(())
    }
}
