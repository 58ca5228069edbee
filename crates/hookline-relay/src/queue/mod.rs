//! Bounded multi-priority delivery queue with scheduled retries.
//!
//! Three FIFO lanes indexed by priority feed a dispatcher task that
//! polls every `processing_interval_ms`. The dispatcher scans lanes
//! 1→3 and pops the head; a head whose `next_eligible_at` has not
//! elapsed is re-queued at the tail and the scan moves on, so ready
//! lower-priority items are never blocked by scheduled higher ones.
//!
//! State machine per item:
//!
//! ```text
//! queued → processing → completed
//!                    → queued (scheduled retry, next_eligible_at set)
//!                    → dead-lettered (attempts == max_attempts)
//! dead-lettered → queued (operator retry only)
//! ```
//!
//! At most `max_concurrent` items are in flight; one attempt is bounded
//! by `delivery_timeout`, whose expiry yields a synthetic 408 outcome
//! that follows the normal retry path.

pub mod backoff;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use hookline_core::classifier::Priority;
use hookline_core::config::QueueConfig;
use hookline_core::error::{RelayError, Result};
use hookline_core::subscription::RetryPolicy;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::dispatch::{AttemptOutcome, HttpDispatcher};
use crate::dlq::DeadLetterQueue;
use crate::history::{DeliveryAttemptRecord, DeliveryHistoryStore};
use crate::registry::SubscriptionRegistry;
use crate::stats::RelayStats;

/// Lifecycle state of a delivery item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeliveryStatus {
    /// Waiting in a priority lane (possibly scheduled for later)
    Queued,
    /// Attempt in flight
    Processing,
    /// Delivered successfully
    Completed,
    /// Retries exhausted; owned by the dead-letter queue
    DeadLettered,
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::DeadLettered => write!(f, "dead-lettered"),
        }
    }
}

/// One enqueued unit of work: a (subscription, event) pair with its
/// immutable payload snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryItem {
    /// Delivery identifier
    pub id: Uuid,
    /// Owning subscription
    pub subscription_id: Uuid,
    /// Event that produced this delivery
    pub event_id: String,
    /// Event type (`entity.operation`)
    pub event_type: String,
    /// Immutable payload snapshot shared across clones
    pub payload: Arc<Value>,
    /// Resolved target URL
    pub url: String,
    /// Subscription's custom headers
    pub headers: HashMap<String, String>,
    /// Subscription secret for signing
    pub secret: Option<String>,
    /// Per-attempt HTTP timeout
    pub timeout: Duration,
    /// Queue lane
    pub priority: Priority,
    /// Attempts made so far
    pub attempts: u32,
    /// Attempt ceiling before dead-lettering
    pub max_attempts: u32,
    /// Retry policy driving the backoff
    pub retry: RetryPolicy,
    /// When the item was created
    pub created_at: DateTime<Utc>,
    /// Earliest instant the next attempt may start
    #[serde(skip)]
    pub next_eligible_at: Option<Instant>,
    /// Most recent failure description
    pub last_error: Option<String>,
    /// Lifecycle state
    pub status: DeliveryStatus,
    /// True when this item is an operator-triggered dead-letter replay
    #[serde(default)]
    pub retry_from_dead_letter: bool,
}

impl DeliveryItem {
    /// Create a queued item with zero attempts.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        subscription_id: Uuid,
        event_id: String,
        event_type: String,
        payload: Arc<Value>,
        url: String,
        headers: HashMap<String, String>,
        secret: Option<String>,
        timeout: Duration,
        priority: Priority,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            subscription_id,
            event_id,
            event_type,
            payload,
            url,
            headers,
            secret,
            timeout,
            priority,
            attempts: 0,
            max_attempts: retry.max_attempts,
            retry,
            created_at: Utc::now(),
            next_eligible_at: None,
            last_error: None,
            status: DeliveryStatus::Queued,
            retry_from_dead_letter: false,
        }
    }

    /// True when the item is queued with a future eligibility time
    #[must_use]
    pub fn is_scheduled(&self) -> bool {
        self.status == DeliveryStatus::Queued
            && self.next_eligible_at.is_some_and(|t| t > Instant::now())
    }
}

/// Queue lane and in-flight bookkeeping
struct QueueState {
    lanes: [VecDeque<DeliveryItem>; 3],
    processing: HashMap<Uuid, InFlight>,
}

struct InFlight {
    item: DeliveryItem,
    abort: AbortHandle,
}

impl QueueState {
    fn total(&self) -> usize {
        self.lanes.iter().map(VecDeque::len).sum::<usize>() + self.processing.len()
    }

    /// Scan lanes 1→3 and pop the first ready head. A head that is not
    /// yet eligible goes to its lane's tail and the scan moves on.
    fn pop_ready(&mut self) -> Option<DeliveryItem> {
        let now = Instant::now();
        for lane in &mut self.lanes {
            if let Some(head) = lane.pop_front() {
                if head.next_eligible_at.is_none_or(|t| t <= now) {
                    return Some(head);
                }
                lane.push_back(head);
            }
        }
        None
    }
}

/// Current queue occupancy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStatus {
    /// Queued items per priority lane (high, medium, low)
    pub queued_by_priority: [usize; 3],
    /// Items currently in flight
    pub processing: usize,
    /// Whether the dispatcher is running
    pub running: bool,
}

struct QueueInner {
    config: QueueConfig,
    delivery_timeout: Duration,
    dispatcher: HttpDispatcher,
    history: Arc<dyn DeliveryHistoryStore>,
    dlq: Arc<DeadLetterQueue>,
    stats: Arc<RelayStats>,
    /// Updated with per-subscription delivery counters on terminal outcomes
    registry: Option<Arc<SubscriptionRegistry>>,
    state: Mutex<QueueState>,
    shutdown_tx: watch::Sender<bool>,
    dispatcher_handle: Mutex<Option<JoinHandle<()>>>,
}

/// The delivery queue. Cheap to clone; all clones share one state.
#[derive(Clone)]
pub struct DeliveryQueue {
    inner: Arc<QueueInner>,
}

impl DeliveryQueue {
    /// Create a stopped queue.
    ///
    /// `registry` is optional: when given, terminal outcomes bump the
    /// owning subscription's running delivery counters.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        config: QueueConfig,
        delivery_timeout: Duration,
        dispatcher: HttpDispatcher,
        history: Arc<dyn DeliveryHistoryStore>,
        dlq: Arc<DeadLetterQueue>,
        stats: Arc<RelayStats>,
        registry: Option<Arc<SubscriptionRegistry>>,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(QueueInner {
                config,
                delivery_timeout,
                dispatcher,
                history,
                dlq,
                stats,
                registry,
                state: Mutex::new(QueueState {
                    lanes: [VecDeque::new(), VecDeque::new(), VecDeque::new()],
                    processing: HashMap::new(),
                }),
                shutdown_tx,
                dispatcher_handle: Mutex::new(None),
            }),
        }
    }

    /// Start the dispatcher task. Idempotent.
    pub fn start(&self) {
        let mut handle = self.inner.dispatcher_handle.lock();
        if handle.is_some() {
            return;
        }
        let _ = self.inner.shutdown_tx.send(false);
        let inner = Arc::clone(&self.inner);
        *handle = Some(tokio::spawn(run_dispatcher(inner)));
        info!(
            max_concurrent = self.inner.config.max_concurrent,
            interval_ms = self.inner.config.processing_interval_ms,
            "delivery queue started"
        );
    }

    /// Stop the dispatcher, give in-flight deliveries `grace` to finish,
    /// then cancel stragglers. Cancelled items re-queue or dead-letter
    /// depending on their attempt count.
    pub async fn stop(&self, grace: Duration) {
        let _ = self.inner.shutdown_tx.send(true);

        let handle = self.inner.dispatcher_handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        let deadline = Instant::now() + grace;
        loop {
            if self.inner.state.lock().processing.is_empty() {
                break;
            }
            if Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }

        // Cancel whatever outlived the grace period.
        let stragglers: Vec<InFlight> = {
            let mut state = self.inner.state.lock();
            state.processing.drain().map(|(_, v)| v).collect()
        };
        for inflight in stragglers {
            inflight.abort.abort();
            let mut item = inflight.item;
            warn!(delivery_id = %item.id, "delivery cancelled at shutdown");
            if item.attempts >= item.max_attempts {
                self.inner.stats.record_dead_lettered();
                self.inner
                    .dlq
                    .add(item, "cancelled at shutdown with attempts exhausted")
                    .await;
            } else {
                item.status = DeliveryStatus::Queued;
                item.next_eligible_at = None;
                let lane = item.priority.ordinal() - 1;
                self.inner.state.lock().lanes[lane].push_back(item);
            }
        }
        info!("delivery queue stopped");
    }

    /// Enqueue an item onto its priority lane.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::CapacityExhausted`] when the queue holds
    /// `max_size` items.
    pub fn enqueue(&self, item: DeliveryItem) -> Result<()> {
        let mut state = self.inner.state.lock();
        if state.total() >= self.inner.config.max_size {
            drop(state);
            self.inner.stats.record_dropped();
            return Err(RelayError::CapacityExhausted {
                what: "queue-full".to_string(),
            });
        }
        debug!(
            delivery_id = %item.id,
            subscription = %item.subscription_id,
            priority = item.priority.ordinal(),
            "delivery enqueued"
        );
        let lane = item.priority.ordinal() - 1;
        state.lanes[lane].push_back(item);
        drop(state);
        self.inner.stats.record_enqueued();
        Ok(())
    }

    /// Pull one dead-letter entry back into the queue.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::NotFound`] for unknown entries and
    /// [`RelayError::CapacityExhausted`] when the queue is full.
    pub fn retry_from_dead_letter(&self, entry_id: Uuid) -> Result<DeliveryItem> {
        let item = self.inner.dlq.retry(entry_id)?;
        self.enqueue(item.clone())?;
        Ok(item)
    }

    /// Remove every dead-letter entry.
    pub async fn clear_dead_letter(&self) {
        self.inner.dlq.clear().await;
    }

    /// Current occupancy.
    #[must_use]
    pub fn status(&self) -> QueueStatus {
        let state = self.inner.state.lock();
        QueueStatus {
            queued_by_priority: [
                state.lanes[0].len(),
                state.lanes[1].len(),
                state.lanes[2].len(),
            ],
            processing: state.processing.len(),
            running: self.inner.dispatcher_handle.lock().is_some(),
        }
    }

    /// Snapshot of the shared statistics.
    #[must_use]
    pub fn statistics(&self) -> crate::stats::StatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Snapshot items currently owned by the queue in the given state.
    ///
    /// `Completed` items are not retained; `DeadLettered` items are
    /// listed from the dead-letter queue.
    #[must_use]
    pub fn items_by_status(&self, status: DeliveryStatus) -> Vec<DeliveryItem> {
        match status {
            DeliveryStatus::Queued => {
                let state = self.inner.state.lock();
                state
                    .lanes
                    .iter()
                    .flat_map(|lane| lane.iter().cloned())
                    .collect()
            }
            DeliveryStatus::Processing => {
                let state = self.inner.state.lock();
                state.processing.values().map(|p| p.item.clone()).collect()
            }
            DeliveryStatus::DeadLettered => self
                .inner
                .dlq
                .list(&crate::dlq::DeadLetterFilter::default())
                .into_iter()
                .map(|e| e.item)
                .collect(),
            DeliveryStatus::Completed => Vec::new(),
        }
    }

    /// The dead-letter queue handle.
    #[must_use]
    pub fn dead_letter_queue(&self) -> Arc<DeadLetterQueue> {
        Arc::clone(&self.inner.dlq)
    }
}

/// Dispatcher loop: claim ready items up to the concurrency limit,
/// spawn a worker per item, sleep for the processing interval.
async fn run_dispatcher(inner: Arc<QueueInner>) {
    let interval = Duration::from_millis(inner.config.processing_interval_ms.max(1));
    let mut shutdown_rx = inner.shutdown_tx.subscribe();

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        loop {
            // The lock is held across spawn + insert so the worker's own
            // removal cannot run before its entry exists.
            let mut state = inner.state.lock();
            if state.processing.len() >= inner.config.max_concurrent {
                break;
            }
            let Some(mut item) = state.pop_ready() else { break };

            item.status = DeliveryStatus::Processing;
            item.attempts += 1;
            item.next_eligible_at = None;

            let worker_inner = Arc::clone(&inner);
            let worker_item = item.clone();
            let task = tokio::spawn(async move {
                process_item(worker_inner, worker_item).await;
            });
            state.processing.insert(
                item.id,
                InFlight {
                    item,
                    abort: task.abort_handle(),
                },
            );
            drop(state);
        }

        tokio::select! {
            () = tokio::time::sleep(interval) => {}
            _ = shutdown_rx.changed() => {}
        }
    }
}

/// One worker execution: bounded attempt plus outcome handling.
async fn process_item(inner: Arc<QueueInner>, item: DeliveryItem) {
    let started_at = Utc::now();
    let outcome =
        match tokio::time::timeout(inner.delivery_timeout, inner.dispatcher.attempt(&item)).await {
            Ok(outcome) => outcome,
            Err(_) => AttemptOutcome::timed_out(inner.delivery_timeout.as_secs_f64() * 1000.0),
        };

    handle_outcome(&inner, item, started_at, outcome).await;
}

async fn handle_outcome(
    inner: &Arc<QueueInner>,
    mut item: DeliveryItem,
    started_at: DateTime<Utc>,
    outcome: AttemptOutcome,
) {
    inner.state.lock().processing.remove(&item.id);
    inner.stats.record_duration(outcome.duration_ms);

    let will_retry = !outcome.success && item.attempts < item.max_attempts;
    let retry_delay = will_retry.then(|| {
        backoff::retry_delay(
            item.attempts,
            item.retry.initial_delay_ms,
            item.retry.backoff_multiplier,
            inner.config.jitter_cap_ms,
            inner.config.max_retry_delay_ms,
        )
    });

    let record = DeliveryAttemptRecord {
        delivery_id: item.id,
        subscription_id: item.subscription_id,
        event_id: item.event_id.clone(),
        attempt: item.attempts,
        started_at,
        duration_ms: outcome.duration_ms,
        success: outcome.success,
        status_code: outcome.status_code,
        error_category: outcome.error_category.map(str::to_string),
        next_retry_at: retry_delay
            .map(|d| Utc::now() + chrono::Duration::milliseconds(d.as_millis() as i64)),
        body_prefix: outcome.body_prefix.clone(),
    };
    // Audit loss is preferred over stalling the pipeline.
    if let Err(e) = inner.history.record(record).await {
        error!(delivery_id = %item.id, error = %e, "failed to record delivery attempt");
    }

    if outcome.success {
        item.status = DeliveryStatus::Completed;
        inner.stats.record_completed();
        if let Some(registry) = &inner.registry {
            registry.record_delivery_outcome(item.subscription_id, true);
        }
        debug!(
            delivery_id = %item.id,
            attempt = item.attempts,
            status = outcome.status_code,
            "delivery completed"
        );
        if item.retry_from_dead_letter {
            inner
                .dlq
                .record_replay_outcome(item.id, true, "replay delivered")
                .await;
        }
        return;
    }

    inner.stats.record_failed_attempt();
    item.last_error.clone_from(&outcome.error);

    if let Some(delay) = retry_delay {
        item.status = DeliveryStatus::Queued;
        item.next_eligible_at = Some(Instant::now() + delay);
        inner.stats.record_retried();
        warn!(
            delivery_id = %item.id,
            attempt = item.attempts,
            max_attempts = item.max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = outcome.error.as_deref().unwrap_or("unknown"),
            "delivery failed; retry scheduled"
        );
        let lane = item.priority.ordinal() - 1;
        inner.state.lock().lanes[lane].push_back(item);
        return;
    }

    // Attempts exhausted.
    let reason = outcome
        .error
        .unwrap_or_else(|| "delivery failed".to_string());
    item.status = DeliveryStatus::DeadLettered;
    inner.stats.record_dead_lettered();
    if let Some(registry) = &inner.registry {
        registry.record_delivery_outcome(item.subscription_id, false);
    }
    error!(
        delivery_id = %item.id,
        subscription = %item.subscription_id,
        attempts = item.attempts,
        reason = %reason,
        "delivery exhausted; dead-lettering"
    );
    if item.retry_from_dead_letter {
        inner.dlq.record_replay_outcome(item.id, false, &reason).await;
    } else {
        inner.dlq.add(item, reason).await;
    }
}
