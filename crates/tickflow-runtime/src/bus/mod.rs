//! The event bus: priority dispatch, retries and dead letters.
//!
//! Publishers hand events to a single dispatch task over a channel;
//! the task batches them (bounded by size and interval), orders each
//! batch by event priority and delivers every event to each matching
//! subscription, higher-priority subscriptions first. Delivery
//! concurrency is bounded by `max_in_flight`. A failing delivery is
//! requeued with exponential backoff — the dispatch loop keeps
//! serving other events while the retry waits — until its
//! subscription's budget is exhausted, then the (event, subscription)
//! pair is dead-lettered.
//!
//! ```text
//! publish ──► channel ──► dispatch task ──► per-subscription delivery
//!                ▲           │  batch,            │ fail: requeue w/ backoff
//!                │           │  priority sort     ▼
//!       retry (delayed)      │               dead letters ──► EventSink
//!                            └── EventSink (published record)
//! ```
//!
//! Dead letters can be requeued manually or purged after a
//! retention window.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tickflow_event::{DeadLetterEvent, EventSubscription, GameEvent};
use tickflow_types::{ErrorCode, EventId, SubscriptionId};
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Bus tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Events per dispatch batch.
    pub batch_size: usize,
    /// Longest an event waits before a partial batch dispatches.
    pub batch_interval: Duration,
    /// First retry delay; doubles per attempt.
    pub retry_base_delay: Duration,
    /// Publish channel depth.
    pub queue_depth: usize,
    /// Concurrent handler deliveries at any moment.
    pub max_in_flight: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            batch_size: 16,
            batch_interval: Duration::from_millis(50),
            retry_base_delay: Duration::from_millis(25),
            queue_depth: 1024,
            max_in_flight: 16,
        }
    }
}

/// Bus operation errors.
///
/// # Error Codes
///
/// | Variant | Code | Recoverable |
/// |---------|------|-------------|
/// | `InvalidEvent` | `BUS_INVALID_EVENT` | No |
/// | `QueueClosed` | `BUS_QUEUE_CLOSED` | No |
/// | `QueueFull` | `BUS_QUEUE_FULL` | Yes |
/// | `UnknownSubscription` | `BUS_UNKNOWN_SUBSCRIPTION` | No |
/// | `UnknownDeadLetter` | `BUS_UNKNOWN_DEAD_LETTER` | No |
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// The event failed publish validation.
    #[error("invalid event: {reason}")]
    InvalidEvent {
        /// What validation rejected.
        reason: String,
    },

    /// The bus has shut down.
    #[error("event queue closed")]
    QueueClosed,

    /// The publish channel is full.
    #[error("event queue full")]
    QueueFull,

    /// No subscription with this id.
    #[error("unknown subscription: {id}")]
    UnknownSubscription {
        /// The unknown id.
        id: String,
    },

    /// No dead letter for this event id.
    #[error("no dead letter for event {id}")]
    UnknownDeadLetter {
        /// The unknown event id.
        id: String,
    },
}

impl ErrorCode for BusError {
    fn code(&self) -> &'static str {
        match self {
            Self::InvalidEvent { .. } => "BUS_INVALID_EVENT",
            Self::QueueClosed => "BUS_QUEUE_CLOSED",
            Self::QueueFull => "BUS_QUEUE_FULL",
            Self::UnknownSubscription { .. } => "BUS_UNKNOWN_SUBSCRIPTION",
            Self::UnknownDeadLetter { .. } => "BUS_UNKNOWN_DEAD_LETTER",
        }
    }

    fn is_recoverable(&self) -> bool {
        matches!(self, Self::QueueFull)
    }
}

/// Persistence seam receiving published-event and dead-letter
/// records. Both hooks default to no-ops.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Called once per accepted publish.
    async fn record_event(&self, _event: &GameEvent) {}

    /// Called once per dead-lettered delivery.
    async fn record_dead_letter(&self, _dead: &DeadLetterEvent) {}
}

/// The default sink: keeps nothing.
pub struct NoopSink;

#[async_trait]
impl EventSink for NoopSink {}

/// Delivery accounting.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct BusStats {
    /// Events accepted by `publish`.
    pub published: u64,
    /// Events fully processed (every matching subscription's first
    /// attempt settled).
    pub processed: u64,
    /// Successful handler deliveries.
    pub delivered: u64,
    /// Failed handler attempts, including retried ones.
    pub failed_attempts: u64,
    /// Deliveries that exhausted retries.
    pub dead_lettered: u64,
}

struct RetryDelivery {
    event: GameEvent,
    subscription: SubscriptionId,
    attempt: u32,
    first_failure: SystemTime,
}

enum Command {
    Publish(GameEvent),
    Retry(RetryDelivery),
    Flush(oneshot::Sender<()>),
}

struct Shared {
    config: BusConfig,
    subscriptions: RwLock<Vec<Arc<EventSubscription>>>,
    dead_letters: Mutex<Vec<DeadLetterEvent>>,
    sink: Arc<dyn EventSink>,
    stats: Mutex<BusStats>,
    delivery_limit: Arc<Semaphore>,
    // retries scheduled but not yet settled; flush waits on this
    pending_retries: AtomicUsize,
}

/// The event bus. Construction spawns the dispatch task, so a tokio
/// runtime must be current.
pub struct EventBus {
    tx: mpsc::Sender<Command>,
    shared: Arc<Shared>,
    shutdown: CancellationToken,
}

impl EventBus {
    /// Creates a bus with the no-op sink.
    #[must_use]
    pub fn new(config: BusConfig) -> Self {
        Self::with_sink(config, Arc::new(NoopSink))
    }

    /// Creates a bus recording to `sink`.
    #[must_use]
    pub fn with_sink(config: BusConfig, sink: Arc<dyn EventSink>) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_depth);
        let delivery_limit = Arc::new(Semaphore::new(config.max_in_flight.max(1)));
        let shared = Arc::new(Shared {
            config,
            subscriptions: RwLock::new(Vec::new()),
            dead_letters: Mutex::new(Vec::new()),
            sink,
            stats: Mutex::new(BusStats::default()),
            delivery_limit,
            pending_retries: AtomicUsize::new(0),
        });
        let shutdown = CancellationToken::new();
        tokio::spawn(dispatch_loop(
            rx,
            tx.clone(),
            Arc::clone(&shared),
            shutdown.clone(),
        ));
        Self {
            tx,
            shared,
            shutdown,
        }
    }

    /// Registers a subscription. Returns its id.
    pub fn subscribe(&self, subscription: EventSubscription) -> SubscriptionId {
        let id = subscription.id;
        debug!(subscription = %id, subscriber = %subscription.subscriber, "subscribed");
        self.shared.subscriptions.write().push(Arc::new(subscription));
        id
    }

    /// Removes a subscription.
    pub fn unsubscribe(&self, id: SubscriptionId) -> Result<(), BusError> {
        let mut subs = self.shared.subscriptions.write();
        let before = subs.len();
        subs.retain(|s| s.id != id);
        if subs.len() == before {
            return Err(BusError::UnknownSubscription { id: id.to_string() });
        }
        Ok(())
    }

    /// Validates and enqueues an event for dispatch.
    pub fn publish(&self, event: GameEvent) -> Result<(), BusError> {
        if !event.is_valid() {
            return Err(BusError::InvalidEvent {
                reason: "event type and source must be non-empty".into(),
            });
        }
        if self.shutdown.is_cancelled() {
            return Err(BusError::QueueClosed);
        }
        match self.tx.try_send(Command::Publish(event)) {
            Ok(()) => {
                let mut stats = self.shared.stats.lock();
                stats.published += 1;
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => Err(BusError::QueueFull),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(BusError::QueueClosed),
        }
    }

    /// Waits until every event published so far has been dispatched
    /// and all its deliveries — including backoff retries — have
    /// settled.
    pub async fn flush(&self) -> Result<(), BusError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(Command::Flush(ack_tx))
            .await
            .map_err(|_| BusError::QueueClosed)?;
        ack_rx.await.map_err(|_| BusError::QueueClosed)
    }

    /// Current dead letters, oldest first.
    #[must_use]
    pub fn dead_letters(&self) -> Vec<DeadLetterEvent> {
        self.shared.dead_letters.lock().clone()
    }

    /// Requeues a dead letter for a fresh delivery round and removes
    /// it from the store.
    pub fn requeue_dead_letter(&self, event_id: EventId) -> Result<(), BusError> {
        let dead = {
            let mut letters = self.shared.dead_letters.lock();
            let pos = letters
                .iter()
                .position(|d| d.event.id == event_id)
                .ok_or_else(|| BusError::UnknownDeadLetter {
                    id: event_id.to_string(),
                })?;
            letters.remove(pos)
        };
        info!(event = %event_id, "dead letter requeued");
        self.publish(dead.event)
    }

    /// Removes dead letters whose final failure is older than
    /// `retention`. Returns the number removed.
    pub fn purge_dead_letters(&self, retention: Duration) -> usize {
        let cutoff = SystemTime::now() - retention;
        let mut letters = self.shared.dead_letters.lock();
        let before = letters.len();
        letters.retain(|d| d.last_failure > cutoff);
        before - letters.len()
    }

    /// Snapshot of the delivery accounting.
    #[must_use]
    pub fn stats(&self) -> BusStats {
        *self.shared.stats.lock()
    }

    /// Stops the dispatch task. Later publishes fail with
    /// `QueueClosed`.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

/// Backoff for retry `attempt` (0-based): base × 2^attempt, with the
/// exponent capped so large retry budgets never overflow.
fn retry_backoff(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt.min(16)))
}

async fn dispatch_loop(
    mut rx: mpsc::Receiver<Command>,
    tx: mpsc::Sender<Command>,
    shared: Arc<Shared>,
    shutdown: CancellationToken,
) {
    let mut buffer: Vec<GameEvent> = Vec::new();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            cmd = rx.recv() => match cmd {
                None => break,
                Some(Command::Publish(event)) => {
                    buffer.push(event);
                    if buffer.len() >= shared.config.batch_size {
                        dispatch_batch(&mut buffer, &shared, &tx).await;
                    }
                }
                Some(Command::Retry(retry)) => {
                    run_retry(retry, &shared, &tx).await;
                }
                Some(Command::Flush(ack)) => {
                    run_flush(&mut rx, &mut buffer, &shared, &tx, ack).await;
                }
            },
            _ = tokio::time::sleep(shared.config.batch_interval), if !buffer.is_empty() => {
                dispatch_batch(&mut buffer, &shared, &tx).await;
            }
        }
    }
    debug!("event bus dispatch loop stopped");
}

/// Drains the queue and keeps serving retry commands until nothing
/// is buffered and no retry is outstanding, then acks.
async fn run_flush(
    rx: &mut mpsc::Receiver<Command>,
    buffer: &mut Vec<GameEvent>,
    shared: &Arc<Shared>,
    tx: &mpsc::Sender<Command>,
    ack: oneshot::Sender<()>,
) {
    let mut acks = vec![ack];
    loop {
        while let Ok(cmd) = rx.try_recv() {
            match cmd {
                Command::Publish(event) => buffer.push(event),
                Command::Retry(retry) => run_retry(retry, shared, tx).await,
                Command::Flush(later) => acks.push(later),
            }
        }
        dispatch_batch(buffer, shared, tx).await;
        if buffer.is_empty() && shared.pending_retries.load(Ordering::SeqCst) == 0 {
            break;
        }
        // an outstanding retry is sleeping; wait for its command
        match rx.recv().await {
            Some(Command::Publish(event)) => buffer.push(event),
            Some(Command::Retry(retry)) => run_retry(retry, shared, tx).await,
            Some(Command::Flush(later)) => acks.push(later),
            None => break,
        }
    }
    for ack in acks {
        let _ = ack.send(());
    }
}

async fn dispatch_batch(
    buffer: &mut Vec<GameEvent>,
    shared: &Arc<Shared>,
    tx: &mpsc::Sender<Command>,
) {
    if buffer.is_empty() {
        return;
    }
    // stable sort keeps publish order within a priority
    buffer.sort_by(|a, b| b.priority.cmp(&a.priority));
    for mut event in buffer.drain(..) {
        shared.sink.record_event(&event).await;
        deliver_event(&event, shared, tx).await;
        event.processed = true;
        shared.stats.lock().processed += 1;
    }
}

/// Delivers one event: matching subscriptions grouped by descending
/// subscription priority, each group's first attempts running
/// concurrently under the in-flight bound, groups in order.
async fn deliver_event(event: &GameEvent, shared: &Arc<Shared>, tx: &mpsc::Sender<Command>) {
    let mut matching: Vec<Arc<EventSubscription>> = shared
        .subscriptions
        .read()
        .iter()
        .filter(|s| s.matches(event))
        .cloned()
        .collect();
    // stable sort keeps subscribe order within a priority
    matching.sort_by(|a, b| b.priority.cmp(&a.priority));

    let mut idx = 0;
    while idx < matching.len() {
        let priority = matching[idx].priority;
        let mut group = JoinSet::new();
        while idx < matching.len() && matching[idx].priority == priority {
            let subscription = Arc::clone(&matching[idx]);
            let event = event.clone();
            let shared = Arc::clone(shared);
            let tx = tx.clone();
            group.spawn(async move {
                attempt_delivery(&event, &subscription, 0, None, &shared, &tx).await;
            });
            idx += 1;
        }
        while group.join_next().await.is_some() {}
    }
}

/// One handler attempt, gated by the in-flight permit. Failure
/// schedules a delayed requeue through the command channel instead
/// of sleeping inline, or dead-letters the pair once the budget is
/// spent.
async fn attempt_delivery(
    event: &GameEvent,
    subscription: &Arc<EventSubscription>,
    attempt: u32,
    first_failure: Option<SystemTime>,
    shared: &Arc<Shared>,
    tx: &mpsc::Sender<Command>,
) {
    let Ok(_permit) = Arc::clone(&shared.delivery_limit).acquire_owned().await else {
        return;
    };
    match subscription.handler.handle(event).await {
        Ok(()) => {
            subscription.record_processed();
            shared.stats.lock().delivered += 1;
        }
        Err(err) => {
            shared.stats.lock().failed_attempts += 1;
            let first_failure = first_failure.unwrap_or_else(SystemTime::now);
            warn!(
                event = %event.id,
                subscription = %subscription.id,
                attempt = attempt + 1,
                error = %err,
                "delivery failed"
            );
            if attempt < subscription.max_retries {
                schedule_retry(event, subscription, attempt, first_failure, shared, tx);
            } else {
                dead_letter(event, subscription, err.to_string(), attempt + 1, first_failure, shared)
                    .await;
            }
        }
    }
}

fn schedule_retry(
    event: &GameEvent,
    subscription: &Arc<EventSubscription>,
    failed_attempt: u32,
    first_failure: SystemTime,
    shared: &Arc<Shared>,
    tx: &mpsc::Sender<Command>,
) {
    let delay = retry_backoff(shared.config.retry_base_delay, failed_attempt);
    shared.pending_retries.fetch_add(1, Ordering::SeqCst);
    let retry = RetryDelivery {
        event: event.clone(),
        subscription: subscription.id,
        attempt: failed_attempt + 1,
        first_failure,
    };
    let shared = Arc::clone(shared);
    let tx = tx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if tx.send(Command::Retry(retry)).await.is_err() {
            // bus shut down while we slept
            shared.pending_retries.fetch_sub(1, Ordering::SeqCst);
        }
    });
}

async fn run_retry(retry: RetryDelivery, shared: &Arc<Shared>, tx: &mpsc::Sender<Command>) {
    let subscription = shared
        .subscriptions
        .read()
        .iter()
        .find(|s| s.id == retry.subscription)
        .cloned();
    match subscription {
        Some(subscription) => {
            attempt_delivery(
                &retry.event,
                &subscription,
                retry.attempt,
                Some(retry.first_failure),
                shared,
                tx,
            )
            .await;
        }
        None => {
            debug!(
                event = %retry.event.id,
                subscription = %retry.subscription,
                "retry dropped, subscription gone"
            );
        }
    }
    shared.pending_retries.fetch_sub(1, Ordering::SeqCst);
}

async fn dead_letter(
    event: &GameEvent,
    subscription: &Arc<EventSubscription>,
    reason: String,
    attempts: u32,
    first_failure: SystemTime,
    shared: &Arc<Shared>,
) {
    subscription.record_error();
    let dead = DeadLetterEvent::new(event.clone(), subscription.id, reason, attempts, first_failure);
    shared.sink.record_dead_letter(&dead).await;
    shared.stats.lock().dead_lettered += 1;
    warn!(
        event = %event.id,
        subscription = %subscription.id,
        attempts,
        "delivery dead-lettered"
    );
    shared.dead_letters.lock().push(dead);
}
