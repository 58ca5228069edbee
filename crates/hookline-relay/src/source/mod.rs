//! Change feed ingestion.
//!
//! A [`ChangeSource`] yields the store's mutation records strictly
//! ordered by resume token, resuming from a persisted cursor. The
//! Postgres source tails the `change_log` table; the in-memory source
//! feeds scripted records for tests and embedded use.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use hookline_core::error::Result;
use hookline_core::event::MutationRecord;

pub use memory::{MemoryChangeHandle, MemoryChangeSource};
pub use postgres::PostgresChangeSource;

/// An ordered, resumable stream of mutation records.
///
/// `next` suspends until a record is available. `Ok(None)` means the
/// source is closed (clean shutdown); transient I/O is handled inside
/// the source with bounded reconnection and only escalates after the
/// retry budget is exhausted. An unrecoverable gap (the cursor predates
/// the retained log) surfaces as
/// [`hookline_core::RelayError::CursorExpired`] so the operator can
/// choose between snapshot replay and skipping.
#[async_trait]
pub trait ChangeSource: Send {
    /// Await the next mutation record.
    ///
    /// # Errors
    ///
    /// Returns [`hookline_core::RelayError::CursorExpired`] on an
    /// unrecoverable gap, or [`hookline_core::RelayError::TransientIo`]
    /// after reconnection attempts are exhausted.
    async fn next(&mut self) -> Result<Option<MutationRecord>>;
}
