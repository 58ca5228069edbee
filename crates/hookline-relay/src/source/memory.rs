//! In-memory change source for tests and embedded pipelines.

use async_trait::async_trait;
use hookline_core::error::Result;
use hookline_core::event::MutationRecord;
use tokio::sync::mpsc;

use super::ChangeSource;

/// Push side of an in-memory change feed.
#[derive(Debug, Clone)]
pub struct MemoryChangeHandle {
    tx: mpsc::UnboundedSender<MutationRecord>,
}

impl MemoryChangeHandle {
    /// Feed one record into the source. Returns false when the source
    /// was dropped.
    pub fn push(&self, record: MutationRecord) -> bool {
        self.tx.send(record).is_ok()
    }
}

/// Change source backed by an unbounded channel.
#[derive(Debug)]
pub struct MemoryChangeSource {
    rx: mpsc::UnboundedReceiver<MutationRecord>,
}

impl MemoryChangeSource {
    /// Create a source and its push handle.
    #[must_use]
    pub fn channel() -> (MemoryChangeHandle, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (MemoryChangeHandle { tx }, Self { rx })
    }

    /// Create a source pre-loaded with records that closes afterwards.
    #[must_use]
    pub fn from_records(records: Vec<MutationRecord>) -> Self {
        let (handle, source) = Self::channel();
        for record in records {
            let _ = handle.push(record);
        }
        source
    }
}

#[async_trait]
impl ChangeSource for MemoryChangeSource {
    async fn next(&mut self) -> Result<Option<MutationRecord>> {
        Ok(self.rx.recv().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use hookline_core::event::{Operation, ResumeToken};

    fn record(token: &str) -> MutationRecord {
        MutationRecord {
            resume_token: ResumeToken::new(token),
            cluster_time: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            collection: "issues".to_string(),
            operation: Operation::Insert,
            document_key: "I1".to_string(),
            post_image: None,
            pre_image: None,
            update_description: None,
        }
    }

    #[tokio::test]
    async fn test_preloaded_source_yields_then_closes() {
        let mut source = MemoryChangeSource::from_records(vec![record("1"), record("2")]);

        assert_eq!(
            source.next().await.unwrap().unwrap().resume_token.as_str(),
            "1"
        );
        assert_eq!(
            source.next().await.unwrap().unwrap().resume_token.as_str(),
            "2"
        );
        assert!(source.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_push_after_creation() {
        let (handle, mut source) = MemoryChangeSource::channel();
        assert!(handle.push(record("5")));

        let got = source.next().await.unwrap().unwrap();
        assert_eq!(got.resume_token.as_str(), "5");
    }
}
