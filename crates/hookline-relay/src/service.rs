//! Pipeline orchestration.
//!
//! One consumer task drains the change source and, per mutation:
//! classify → dedupe (event log fingerprint, when enabled) → route
//! against the current registry snapshot → transform per subscription
//! in parallel → enqueue. The cursor is persisted only after every
//! matching subscription has its item enqueued (or the record was
//! explicitly dropped under the overflow policy), so a restart replays
//! at most the mutations whose fanout was incomplete.
//!
//! Per-record failures hold the stream back and retry the record; after
//! `max_record_failures` the record is promoted to the unroutable log
//! and the stream moves on.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use hookline_core::classifier::Classifier;
use hookline_core::config::{OverflowPolicy, RelayConfig};
use hookline_core::error::{RelayError, Result};
use hookline_core::event::{MutationRecord, Operation, ResumeToken};
use hookline_core::router::Router;
use hookline_core::subscription::Subscription;
use hookline_core::transform::{DeliveryContext, Transformer};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::cursor::CursorStore;
use crate::dispatch::{AttemptOutcome, HttpDispatcher};
use crate::event_log::{EventLogEntry, EventLogStore};
use crate::queue::{DeliveryItem, DeliveryQueue};
use crate::registry::SubscriptionRegistry;
use crate::source::ChangeSource;
use crate::stats::RelayStats;

/// Unroutable log capacity
const UNROUTABLE_CAPACITY: usize = 1_000;

/// A mutation the pipeline gave up on
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnroutableRecord {
    /// The mutation itself
    pub record: MutationRecord,
    /// Why it was given up on
    pub reason: String,
    /// When it was promoted to this log
    pub failed_at: DateTime<Utc>,
}

/// The relay pipeline: change feed in, signed deliveries out.
pub struct RelayService {
    classifier: Classifier,
    router: Router,
    transformer: Transformer,
    registry: Arc<SubscriptionRegistry>,
    queue: DeliveryQueue,
    dispatcher: HttpDispatcher,
    cursor_store: Arc<dyn CursorStore>,
    event_log: Option<Arc<dyn EventLogStore>>,
    stats: Arc<RelayStats>,
    config: RelayConfig,
    unroutable: Mutex<VecDeque<UnroutableRecord>>,
    shutdown_tx: watch::Sender<bool>,
}

impl RelayService {
    /// Wire the pipeline together. The queue is expected to be started
    /// by the caller (it has its own lifecycle).
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        config: RelayConfig,
        instance: impl Into<String>,
        registry: Arc<SubscriptionRegistry>,
        queue: DeliveryQueue,
        dispatcher: HttpDispatcher,
        cursor_store: Arc<dyn CursorStore>,
        event_log: Option<Arc<dyn EventLogStore>>,
        stats: Arc<RelayStats>,
    ) -> Self {
        let transformer = Transformer::new(
            "hookline",
            env!("CARGO_PKG_VERSION"),
            instance,
            config.store.database.clone(),
        );
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            classifier: Classifier::new(),
            router: Router::new(),
            transformer,
            registry,
            queue,
            dispatcher,
            cursor_store,
            event_log,
            stats,
            config,
            unroutable: Mutex::new(VecDeque::new()),
            shutdown_tx,
        }
    }

    /// Consume the change source until it closes or [`Self::shutdown`]
    /// is called.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::CursorExpired`] or escalated transient
    /// errors from the source; per-record errors are absorbed.
    pub async fn run(&self, mut source: impl ChangeSource) -> Result<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut changes_rx = self.registry.subscribe_changes();
        let mut snapshot = self.registry.snapshot();

        info!("relay pipeline started");
        loop {
            let record = tokio::select! {
                record = source.next() => record?,
                _ = shutdown_rx.changed() => break,
            };
            let Some(record) = record else {
                info!("change source closed");
                break;
            };

            if changes_rx.has_changed().unwrap_or(false) {
                changes_rx.borrow_and_update();
                snapshot = self.registry.snapshot();
            }

            self.ingest(record, &snapshot, &mut shutdown_rx).await;

            if *shutdown_rx.borrow() {
                break;
            }
        }
        info!("relay pipeline stopped");
        Ok(())
    }

    /// Signal the run loop to exit and stop the delivery queue, giving
    /// in-flight deliveries the configured grace period. The cursor was
    /// already persisted per record; nothing further to flush.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        self.queue
            .stop(Duration::from_secs(self.config.shutdown_grace_secs))
            .await;
    }

    /// Process one record, retrying in place on transient pipeline
    /// failures until it is fanned out, dropped, or promoted to the
    /// unroutable log.
    async fn ingest(
        &self,
        record: MutationRecord,
        snapshot: &[Arc<Subscription>],
        shutdown_rx: &mut watch::Receiver<bool>,
    ) {
        let mut failures: u32 = 0;
        loop {
            match self.process_record(&record, snapshot).await {
                Ok(()) => return,
                Err(RelayError::CapacityExhausted { .. })
                    if self.config.source.overflow_policy == OverflowPolicy::Drop =>
                {
                    self.push_unroutable(record.clone(), "delivery queue full (drop policy)");
                    self.advance_cursor(&record.resume_token).await;
                    return;
                }
                Err(e @ RelayError::CapacityExhausted { .. }) => {
                    // Hold policy: the cursor stays put and the record is
                    // retried until the queue drains (or shutdown; then
                    // the record is redelivered on restart).
                    warn!(
                        resume_token = %record.resume_token,
                        error = %e,
                        "delivery queue full; holding cursor"
                    );
                    tokio::select! {
                        () = tokio::time::sleep(Duration::from_millis(500)) => {}
                        _ = shutdown_rx.changed() => return,
                    }
                }
                Err(e) => {
                    failures += 1;
                    self.router.stats().record_error();
                    if failures >= self.config.source.max_record_failures {
                        error!(
                            resume_token = %record.resume_token,
                            error = %e,
                            failures,
                            "record repeatedly failed; promoting to unroutable log"
                        );
                        self.push_unroutable(record.clone(), format!("{e}"));
                        self.advance_cursor(&record.resume_token).await;
                        return;
                    }
                    warn!(
                        resume_token = %record.resume_token,
                        error = %e,
                        failures,
                        "record processing failed; holding cursor and retrying"
                    );
                    tokio::select! {
                        () = tokio::time::sleep(Duration::from_millis(
                            250 * u64::from(failures),
                        )) => {}
                        _ = shutdown_rx.changed() => return,
                    }
                }
            }
        }
    }

    /// Classify, dedupe, route, transform and enqueue one record, then
    /// advance the cursor.
    async fn process_record(
        &self,
        record: &MutationRecord,
        snapshot: &[Arc<Subscription>],
    ) -> Result<()> {
        let classification = self.classifier.classify(record);

        if let Some(log) = &self.event_log {
            // Dedup is best-effort: a check failure delivers anyway.
            match log
                .contains(
                    &record.document_key,
                    &classification.event.event_type,
                    &classification.event.fingerprint,
                )
                .await
            {
                Ok(true) => {
                    // Fingerprint already seen: redelivered mutation.
                    info!(
                        event_type = %classification.event.event_type,
                        fingerprint = %classification.event.fingerprint,
                        "duplicate mutation skipped"
                    );
                    self.advance_cursor(&record.resume_token).await;
                    return Ok(());
                }
                Ok(false) => {}
                Err(e) => warn!(error = %e, "event log dedup check failed"),
            }
        }

        let matches = self.router.route(record, &classification.event, snapshot);

        if !matches.is_empty() {
            let items: Vec<DeliveryItem> = matches
                .iter()
                .map(|sub| self.build_item(record, &classification, sub))
                .collect();

            // Fan out in parallel; any enqueue failure holds the cursor.
            let results = join_all(
                items
                    .into_iter()
                    .map(|item| async move { self.queue.enqueue(item) }),
            )
            .await;
            for result in results {
                result?;
            }
        }

        // Log the event only after the fanout is fully enqueued, so a
        // held-and-retried record is not mistaken for a duplicate.
        if let Some(log) = &self.event_log {
            let entry = EventLogEntry {
                event: classification.event.clone(),
                record: record.clone(),
                source_id: record.document_key.clone(),
                processed_at: Utc::now(),
            };
            if let Err(e) = log.append(entry).await {
                warn!(error = %e, "event log append failed");
            }
        }

        self.advance_cursor(&record.resume_token).await;
        Ok(())
    }

    fn build_item(
        &self,
        record: &MutationRecord,
        classification: &hookline_core::classifier::Classification,
        subscription: &Arc<Subscription>,
    ) -> DeliveryItem {
        let delivery_id = Uuid::new_v4();
        let payload = self.transformer.transform(
            record,
            classification,
            subscription,
            &DeliveryContext {
                delivery_id,
                attempt: 1,
                max_attempts: subscription.retry.max_attempts,
            },
        );

        let mut item = DeliveryItem::new(
            subscription.id,
            classification.event.id.clone(),
            classification.event.event_type.clone(),
            Arc::new(payload),
            subscription.url.clone(),
            subscription.headers.clone(),
            subscription.secret.clone(),
            Duration::from_secs(subscription.timeout_secs),
            classification.priority,
            subscription.retry,
        );
        item.id = delivery_id;
        item
    }

    /// Persist the cursor; a failed write is logged and retried with the
    /// next record (re-processing after restart is covered by dedup).
    async fn advance_cursor(&self, token: &ResumeToken) {
        if let Err(e) = self.cursor_store.save(token).await {
            warn!(resume_token = %token, error = %e, "cursor save failed");
        }
    }

    fn push_unroutable(&self, record: MutationRecord, reason: impl Into<String>) {
        self.stats.record_dropped();
        let mut log = self.unroutable.lock();
        if log.len() >= UNROUTABLE_CAPACITY {
            log.pop_front();
        }
        log.push_back(UnroutableRecord {
            record,
            reason: reason.into(),
            failed_at: Utc::now(),
        });
    }

    /// Snapshot of the unroutable log, oldest first.
    #[must_use]
    pub fn unroutable_records(&self) -> Vec<UnroutableRecord> {
        self.unroutable.lock().iter().cloned().collect()
    }

    /// Deliver a synthetic event to exactly one subscription, bypassing
    /// the queue, and report the attempt outcome.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::NotFound`] for unknown subscriptions.
    pub async fn test_delivery(&self, subscription_id: Uuid) -> Result<AttemptOutcome> {
        let subscription = self
            .registry
            .find_by_id(subscription_id)
            .ok_or_else(|| RelayError::not_found("subscription", subscription_id))?;

        let record = MutationRecord {
            resume_token: ResumeToken::new("test"),
            cluster_time: Utc::now(),
            collection: "issues".to_string(),
            operation: Operation::Insert,
            document_key: format!("test-{}", Uuid::new_v4().simple()),
            post_image: Some(json!({
                "_id": "test-issue",
                "title": "Test delivery",
                "status": "open",
            })),
            pre_image: None,
            update_description: None,
        };
        let classification = self.classifier.classify(&record);
        let item = self.build_item(&record, &classification, &subscription);

        Ok(self.dispatcher.attempt(&item).await)
    }

    /// Re-enqueue a logged event for the selected subscriptions (all
    /// matching subscriptions when `subscription_ids` is empty).
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::NotFound`] when the event log is disabled
    /// or the event is unknown; enqueue failures propagate.
    pub async fn replay_event(
        &self,
        event_id: &str,
        subscription_ids: &[Uuid],
    ) -> Result<usize> {
        let log = self
            .event_log
            .as_ref()
            .ok_or_else(|| RelayError::not_found("event", event_id))?;
        let entry = log
            .find(event_id)
            .await?
            .ok_or_else(|| RelayError::not_found("event", event_id))?;

        let classification = self.classifier.classify(&entry.record);
        let snapshot = self.registry.snapshot();
        let matches = self.router.route(&entry.record, &classification.event, &snapshot);

        let selected: Vec<Arc<Subscription>> = if subscription_ids.is_empty() {
            matches
        } else {
            matches
                .into_iter()
                .filter(|s| subscription_ids.contains(&s.id))
                .collect()
        };

        let mut enqueued = 0;
        for subscription in &selected {
            let item = self.build_item(&entry.record, &classification, subscription);
            self.queue.enqueue(item)?;
            enqueued += 1;
        }
        Ok(enqueued)
    }

    /// The router's routing statistics handle.
    #[must_use]
    pub fn routing_stats(&self) -> Arc<hookline_core::router::RoutingStats> {
        self.router.stats()
    }

    /// The shared pipeline statistics handle.
    #[must_use]
    pub fn stats(&self) -> Arc<RelayStats> {
        Arc::clone(&self.stats)
    }

    /// The delivery queue handle.
    #[must_use]
    pub fn queue(&self) -> DeliveryQueue {
        self.queue.clone()
    }

    /// The subscription registry handle.
    #[must_use]
    pub fn registry(&self) -> Arc<SubscriptionRegistry> {
        Arc::clone(&self.registry)
    }

    /// The event log handle, when enabled.
    #[must_use]
    pub fn event_log(&self) -> Option<Arc<dyn EventLogStore>> {
        self.event_log.clone()
    }
}
