//! Durable subscription storage.
//!
//! The registry hydrates from here at startup and writes through on
//! every mutation. Name uniqueness is enforced by the store (unique
//! index in Postgres, explicit check in memory) and surfaces as
//! [`RelayError::Conflict`].

use async_trait::async_trait;
use hookline_core::error::{RelayError, Result};
use hookline_core::subscription::Subscription;
use parking_lot::Mutex;
use sqlx::PgPool;
use uuid::Uuid;

/// Durable subscription repository.
///
/// Object-safe; the registry holds it as `Arc<dyn SubscriptionStore>`.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Load every subscription (startup hydration).
    ///
    /// # Errors
    ///
    /// Returns an error when the backing store fails.
    async fn load_all(&self) -> Result<Vec<Subscription>>;

    /// Insert or update one subscription.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Conflict`] when another subscription holds
    /// the same name, or a storage error.
    async fn upsert(&self, subscription: &Subscription) -> Result<()>;

    /// Remove one subscription.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::NotFound`] for unknown ids, or a storage
    /// error.
    async fn remove(&self, id: Uuid) -> Result<()>;
}

/// In-memory subscription store for tests and embedded use.
#[derive(Debug, Default)]
pub struct InMemorySubscriptionStore {
    subscriptions: Mutex<Vec<Subscription>>,
}

impl InMemorySubscriptionStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SubscriptionStore for InMemorySubscriptionStore {
    async fn load_all(&self) -> Result<Vec<Subscription>> {
        Ok(self.subscriptions.lock().clone())
    }

    async fn upsert(&self, subscription: &Subscription) -> Result<()> {
        let mut subscriptions = self.subscriptions.lock();
        if subscriptions
            .iter()
            .any(|s| s.name == subscription.name && s.id != subscription.id)
        {
            return Err(RelayError::conflict(format!(
                "subscription name '{}' already exists",
                subscription.name
            )));
        }
        match subscriptions.iter_mut().find(|s| s.id == subscription.id) {
            Some(existing) => *existing = subscription.clone(),
            None => subscriptions.push(subscription.clone()),
        }
        Ok(())
    }

    async fn remove(&self, id: Uuid) -> Result<()> {
        let mut subscriptions = self.subscriptions.lock();
        let before = subscriptions.len();
        subscriptions.retain(|s| s.id != id);
        if subscriptions.len() == before {
            return Err(RelayError::not_found("subscription", id));
        }
        Ok(())
    }
}

/// Postgres-backed subscription store.
///
/// The full model is stored as JSONB with the name extracted into a
/// uniquely-indexed column; the conditional write doubles as the
/// uniqueness check.
#[derive(Debug, Clone)]
pub struct PostgresSubscriptionStore {
    pool: PgPool,
}

impl PostgresSubscriptionStore {
    /// Create a store over an existing pool
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubscriptionStore for PostgresSubscriptionStore {
    async fn load_all(&self) -> Result<Vec<Subscription>> {
        let rows: Vec<(serde_json::Value,)> =
            sqlx::query_as("SELECT doc FROM subscriptions ORDER BY created_at ASC")
                .fetch_all(&self.pool)
                .await
                .map_err(RelayError::storage)?;

        let mut subscriptions = Vec::with_capacity(rows.len());
        for (doc,) in rows {
            subscriptions.push(serde_json::from_value(doc)?);
        }
        Ok(subscriptions)
    }

    async fn upsert(&self, subscription: &Subscription) -> Result<()> {
        let doc = serde_json::to_value(subscription)?;
        let result = sqlx::query(
            r"
            INSERT INTO subscriptions (id, name, created_at, doc)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name, doc = EXCLUDED.doc
            ",
        )
        .bind(subscription.id)
        .bind(&subscription.name)
        .bind(subscription.created_at)
        .bind(doc)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(RelayError::conflict(format!(
                    "subscription name '{}' already exists",
                    subscription.name
                )))
            }
            Err(e) => Err(RelayError::storage(e)),
        }
    }

    async fn remove(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM subscriptions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(RelayError::storage)?;
        if result.rows_affected() == 0 {
            return Err(RelayError::not_found("subscription", id));
        }
        Ok(())
    }
}
