//! Request scheduling: priority queue, batching and throttling.
//!
//! Requests are scored 0-100 at enqueue time and dequeued in
//! descending score order, FIFO within a score. Dequeue happens in
//! batches of same-category, similar-score requests bounded by size
//! and cumulative estimated cost, and pauses entirely while the
//! per-minute dispatch throttle is exhausted.

use super::engine::TaskRequest;
use super::template::TaskTemplate;
use super::InferenceError;
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering as AtomicOrdering};
use std::time::{Duration, Instant};
use tickflow_types::Priority;
use tracing::debug;

/// Scheduler tuning.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Queue depth before new requests are rejected.
    pub max_queue: usize,
    /// Requests per batch.
    pub batch_max_size: usize,
    /// Cumulative estimated cost per batch.
    pub batch_max_cost: Duration,
    /// Largest score gap inside one batch.
    pub batch_score_spread: u8,
    /// Dispatches allowed per rolling minute; dequeue pauses beyond
    /// this.
    pub throttle_per_minute: usize,
    /// Queue depth past which adaptive scoring kicks in.
    pub adaptive_depth: usize,
    /// Default retry budget per request.
    pub default_max_retries: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_queue: 256,
            batch_max_size: 4,
            batch_max_cost: Duration::from_secs(4),
            batch_score_spread: 20,
            throttle_per_minute: 60,
            adaptive_depth: 50,
            default_max_retries: 2,
        }
    }
}

/// A queued request with its computed score.
#[derive(Debug, Clone)]
pub struct ScheduledRequest {
    /// The request itself.
    pub request: TaskRequest,
    /// Scheduling score, 0-100.
    pub score: u8,
    /// Enqueue sequence, breaking score ties FIFO.
    pub seq: u64,
    /// Retries consumed so far.
    pub retries: u32,
    /// Retry budget.
    pub max_retries: u32,
    /// The template's cost estimate, for batch bounding.
    pub estimated_cost: Duration,
    /// The template's category, for batch grouping.
    pub category: String,
}

impl PartialEq for ScheduledRequest {
    fn eq(&self, other: &Self) -> bool {
        self.score == other.score && self.seq == other.seq
    }
}

impl Eq for ScheduledRequest {}

impl PartialOrd for ScheduledRequest {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledRequest {
    fn cmp(&self, other: &Self) -> Ordering {
        // max-heap: highest score first, then earliest seq
        self.score
            .cmp(&other.score)
            .then(other.seq.cmp(&self.seq))
    }
}

/// A dispatchable group of similar requests.
#[derive(Debug)]
pub struct ExecutionBatch {
    /// The shared category.
    pub category: String,
    /// Members, in dequeue order.
    pub requests: Vec<ScheduledRequest>,
    /// Sum of the members' cost estimates.
    pub estimated_total: Duration,
}

/// Priority scheduler for inference requests.
pub struct TaskScheduler {
    config: SchedulerConfig,
    queue: Mutex<BinaryHeap<ScheduledRequest>>,
    seq: AtomicU64,
    dispatched: Mutex<VecDeque<Instant>>,
    degradation: AtomicU8,
}

impl TaskScheduler {
    /// Creates an empty scheduler.
    #[must_use]
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            queue: Mutex::new(BinaryHeap::new()),
            seq: AtomicU64::new(0),
            dispatched: Mutex::new(VecDeque::new()),
            degradation: AtomicU8::new(0),
        }
    }

    /// Sets the degradation level consulted by scoring (0 = none).
    pub fn set_degradation(&self, level: u8) {
        self.degradation.store(level, AtomicOrdering::Relaxed);
    }

    /// Computes the scheduling score for a request.
    ///
    /// Base by requester priority, adjusted for task cost and, in
    /// adaptive mode, for queue depth. During degradation,
    /// low-priority requests sink further.
    #[must_use]
    pub fn score(&self, request: &TaskRequest, template: &TaskTemplate) -> u8 {
        let mut score = i32::from(request.priority.weight());

        // cheap tasks rise, expensive ones sink
        if template.estimated_cost > Duration::from_secs(1) {
            score -= 10;
        } else if template.estimated_cost < Duration::from_millis(100) {
            score += 5;
        }

        if self.queue.lock().len() >= self.config.adaptive_depth
            && request.priority <= Priority::Medium
        {
            score -= 10;
        }

        let degradation = self.degradation.load(AtomicOrdering::Relaxed);
        if degradation > 0 && request.priority == Priority::Low {
            score -= 15 * i32::from(degradation);
        }

        score.clamp(0, 100) as u8
    }

    /// Enqueues a request. Returns its score.
    pub fn enqueue(
        &self,
        request: TaskRequest,
        template: &TaskTemplate,
    ) -> Result<u8, InferenceError> {
        let score = self.score(&request, template);
        let mut queue = self.queue.lock();
        if queue.len() >= self.config.max_queue {
            return Err(InferenceError::QueueFull { depth: queue.len() });
        }
        let seq = self.seq.fetch_add(1, AtomicOrdering::Relaxed);
        debug!(task = %request.task, score, seq, "request enqueued");
        queue.push(ScheduledRequest {
            request,
            score,
            seq,
            retries: 0,
            max_retries: self.config.default_max_retries,
            estimated_cost: template.estimated_cost,
            category: template.category.clone(),
        });
        Ok(score)
    }

    /// Forms the next batch, or `None` when the queue is empty or
    /// the throttle is exhausted.
    #[must_use]
    pub fn next_batch(&self) -> Option<ExecutionBatch> {
        if self.throttled() {
            return None;
        }

        let mut queue = self.queue.lock();
        let head = queue.pop()?;
        let category = head.category.clone();
        let head_score = head.score;
        let mut total = head.estimated_cost;
        let mut requests = vec![head];

        while requests.len() < self.config.batch_max_size {
            let matches = queue.peek().is_some_and(|next| {
                next.category == category
                    && head_score.saturating_sub(next.score) <= self.config.batch_score_spread
                    && total + next.estimated_cost <= self.config.batch_max_cost
            });
            if !matches {
                break;
            }
            let next = queue.pop().expect("peeked above");
            total += next.estimated_cost;
            requests.push(next);
        }
        drop(queue);

        let now = Instant::now();
        let mut dispatched = self.dispatched.lock();
        for _ in 0..requests.len() {
            dispatched.push_back(now);
        }

        Some(ExecutionBatch {
            category,
            requests,
            estimated_total: total,
        })
    }

    fn throttled(&self) -> bool {
        let mut dispatched = self.dispatched.lock();
        let cutoff = Instant::now() - Duration::from_secs(60);
        while dispatched.front().is_some_and(|t| *t < cutoff) {
            dispatched.pop_front();
        }
        dispatched.len() >= self.config.throttle_per_minute
    }

    /// Returns a failed request to the queue, consuming one retry.
    /// Fails when the budget is exhausted.
    pub fn requeue(&self, mut scheduled: ScheduledRequest) -> Result<(), InferenceError> {
        if scheduled.retries >= scheduled.max_retries {
            return Err(InferenceError::RetriesExhausted {
                task: scheduled.request.task.to_string(),
            });
        }
        scheduled.retries += 1;
        scheduled.score = scheduled.score.saturating_sub(5);
        scheduled.seq = self.seq.fetch_add(1, AtomicOrdering::Relaxed);
        self.queue.lock().push(scheduled);
        Ok(())
    }

    /// Current queue depth.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.queue.lock().len()
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}
