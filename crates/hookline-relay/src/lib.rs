#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_sign_loss)]

//! hookline relay: change ingestion and the delivery engine.
//!
//! This crate owns everything stateful in the pipeline:
//!
//! ```text
//! ChangeSource (postgres change_log / in-memory)
//!     ↓
//! RelayService: classify → dedup → route → transform → enqueue
//!     ↓                                        (cursor advances here)
//! DeliveryQueue: 3 priority lanes, scheduled retries, worker pool
//!     ↓
//! HttpDispatcher: signed POST, streamed response, outcome classification
//!     ├─ success  → DeliveryHistory (append-only audit)
//!     ├─ failure  → backoff reschedule
//!     └─ exhausted → DeadLetterQueue (bounded, mirrored, replayable)
//! ```
//!
//! Every storage seam (`CursorStore`, `SubscriptionStore`,
//! `DeliveryHistoryStore`, `DeadLetterStore`, `EventLogStore`) has a
//! Postgres implementation and an in-memory one for tests.

pub mod cursor;
pub mod dispatch;
pub mod dlq;
pub mod event_log;
pub mod history;
pub mod queue;
pub mod registry;
pub mod service;
pub mod signature;
pub mod source;
pub mod stats;
pub mod store;

// Re-export common types at crate level
pub use cursor::{CursorStore, InMemoryCursorStore, PostgresCursorStore};
pub use dispatch::{AttemptOutcome, HttpDispatcher};
pub use dlq::{
    DeadLetterEntry, DeadLetterFilter, DeadLetterQueue, DeadLetterStats, DeadLetterStore,
    PostgresDeadLetterStore,
};
pub use event_log::{
    EventLogEntry, EventLogFilter, EventLogStore, InMemoryEventLog, PostgresEventLog,
};
pub use history::{
    DeliveryAttemptRecord, DeliveryHistoryStore, DeliveryStats, HistoryFilter,
    InMemoryHistoryStore, PostgresHistoryStore,
};
pub use queue::{DeliveryItem, DeliveryQueue, DeliveryStatus, QueueStatus};
pub use registry::{SubscriptionCounts, SubscriptionRegistry};
pub use service::{RelayService, UnroutableRecord};
pub use source::{ChangeSource, MemoryChangeSource, PostgresChangeSource};
pub use stats::{RelayStats, StatsSnapshot};
pub use store::{InMemorySubscriptionStore, PostgresSubscriptionStore, SubscriptionStore};
