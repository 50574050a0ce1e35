//! AI-backed task pipeline.
//!
//! ```text
//!          submit                 next_batch
//! System ─────────► TaskScheduler ──────────► InferencePipeline
//!                                                │
//!                        ┌───────────────────────┤
//!                        ▼                       ▼
//!                    TaskCache ──miss──► InferenceEngine ──fail──► FallbackManager
//!                        ▲                       │
//!                        └────────── put ────────┘
//! ```
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`template`] | [`TaskTemplate`], typed [`TaskVariables`] |
//! | [`engine`] | [`InferenceEngine`], providers, parsing |
//! | [`cache`] | [`TaskCache`], adaptive TTLs |
//! | [`scheduler`] | [`TaskScheduler`], batching, throttle |
//! | [`fallback`] | [`FallbackManager`], degradation levels |

pub mod cache;
pub mod engine;
pub mod fallback;
pub mod scheduler;
pub mod template;

pub use cache::{cache_key, CacheConfig, CacheStats, TaskCache};
pub use engine::{
    CompletionProvider, EntityFingerprint, InferenceEngine, ParseStatus, ParsedOutput,
    TaskOutcome, TaskRequest,
};
pub use fallback::{
    Calculator, FallbackConfig, FallbackHealth, FallbackLevel, FallbackManager, FallbackStats,
    FallbackStrategy,
};
pub use scheduler::{ExecutionBatch, ScheduledRequest, SchedulerConfig, TaskScheduler};
pub use template::{OutputFormat, TaskTemplate, TaskValue, TaskVariables};

use std::sync::Arc;
use tickflow_types::ErrorCode;
use tracing::{debug, warn};

/// Errors raised across the inference pipeline.
///
/// # Error Codes
///
/// | Variant | Code | Recoverable |
/// |---------|------|-------------|
/// | `UnknownTask` | `INFERENCE_UNKNOWN_TASK` | No |
/// | `DuplicateTask` | `INFERENCE_DUPLICATE_TASK` | No |
/// | `UndeclaredPlaceholder` | `INFERENCE_UNDECLARED_PLACEHOLDER` | No |
/// | `MissingVariable` | `INFERENCE_MISSING_VARIABLE` | No |
/// | `ProviderUnavailable` | `INFERENCE_PROVIDER_UNAVAILABLE` | Yes |
/// | `ProviderFailed` | `INFERENCE_PROVIDER_FAILED` | Yes |
/// | `QueueFull` | `INFERENCE_QUEUE_FULL` | Yes |
/// | `RetriesExhausted` | `INFERENCE_RETRIES_EXHAUSTED` | No |
/// | `FallbackExhausted` | `INFERENCE_FALLBACK_EXHAUSTED` | No |
#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    /// No template registered under this task id.
    #[error("unknown task: {task}")]
    UnknownTask {
        /// The unknown task id.
        task: String,
    },

    /// A template with this id is already registered.
    #[error("task already registered: {task}")]
    DuplicateTask {
        /// The duplicate task id.
        task: String,
    },

    /// The prompt uses a placeholder the template never declares.
    #[error("task {task}: placeholder {{{name}}} is not declared")]
    UndeclaredPlaceholder {
        /// The offending template.
        task: String,
        /// The undeclared placeholder.
        name: String,
    },

    /// A required variable was not bound.
    #[error("task {task}: required variable {name} is not bound")]
    MissingVariable {
        /// The template being bound.
        task: String,
        /// The missing variable.
        name: String,
    },

    /// No provider serves the requested model and no default is set.
    #[error("no provider for model {model}")]
    ProviderUnavailable {
        /// The requested model.
        model: String,
    },

    /// The provider returned an error.
    #[error("provider failed: {reason}")]
    ProviderFailed {
        /// The provider's error message.
        reason: String,
    },

    /// The scheduler queue is at capacity.
    #[error("scheduler queue full at depth {depth}")]
    QueueFull {
        /// Depth at rejection time.
        depth: usize,
    },

    /// The request consumed its whole retry budget.
    #[error("retries exhausted for {task}")]
    RetriesExhausted {
        /// The failing task.
        task: String,
    },

    /// Every fallback level came up empty.
    #[error("all fallback levels exhausted for {task}")]
    FallbackExhausted {
        /// The task with no degraded answer.
        task: String,
    },
}

impl ErrorCode for InferenceError {
    fn code(&self) -> &'static str {
        match self {
            Self::UnknownTask { .. } => "INFERENCE_UNKNOWN_TASK",
            Self::DuplicateTask { .. } => "INFERENCE_DUPLICATE_TASK",
            Self::UndeclaredPlaceholder { .. } => "INFERENCE_UNDECLARED_PLACEHOLDER",
            Self::MissingVariable { .. } => "INFERENCE_MISSING_VARIABLE",
            Self::ProviderUnavailable { .. } => "INFERENCE_PROVIDER_UNAVAILABLE",
            Self::ProviderFailed { .. } => "INFERENCE_PROVIDER_FAILED",
            Self::QueueFull { .. } => "INFERENCE_QUEUE_FULL",
            Self::RetriesExhausted { .. } => "INFERENCE_RETRIES_EXHAUSTED",
            Self::FallbackExhausted { .. } => "INFERENCE_FALLBACK_EXHAUSTED",
        }
    }

    fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ProviderUnavailable { .. } | Self::ProviderFailed { .. } | Self::QueueFull { .. }
        )
    }
}

/// The wired pipeline: scheduler in front, cache first, engine for
/// misses, fallback when the engine fails.
pub struct InferencePipeline {
    engine: InferenceEngine,
    cache: Arc<TaskCache>,
    scheduler: Arc<TaskScheduler>,
    fallback: Arc<FallbackManager>,
}

impl InferencePipeline {
    /// Wires the pipeline from its parts.
    #[must_use]
    pub fn new(
        engine: InferenceEngine,
        cache: Arc<TaskCache>,
        scheduler: Arc<TaskScheduler>,
        fallback: Arc<FallbackManager>,
    ) -> Self {
        Self {
            engine,
            cache,
            scheduler,
            fallback,
        }
    }

    /// The shared cache, for tick-time tag invalidation.
    #[must_use]
    pub fn cache(&self) -> &Arc<TaskCache> {
        &self.cache
    }

    /// The shared fallback manager.
    #[must_use]
    pub fn fallback(&self) -> &Arc<FallbackManager> {
        &self.fallback
    }

    /// Queues a request for batched execution.
    pub fn submit(&self, request: TaskRequest) -> Result<u8, InferenceError> {
        let template =
            self.engine
                .template(&request.task)
                .ok_or_else(|| InferenceError::UnknownTask {
                    task: request.task.to_string(),
                })?;
        self.scheduler.enqueue(request, template)
    }

    /// Executes one request end to end: cache, engine, fallback.
    pub async fn execute(&self, request: &TaskRequest) -> Result<TaskOutcome, InferenceError> {
        let template = self
            .engine
            .template(&request.task)
            .ok_or_else(|| InferenceError::UnknownTask {
                task: request.task.to_string(),
            })?
            .clone();

        let key = cache_key(request);
        if template.cacheable {
            if let Some(hit) = self.cache.get(&key) {
                debug!(task = %request.task, "cache hit");
                return Ok(hit);
            }
        }

        match self.engine.run(request).await {
            Ok(outcome) if outcome.success => {
                self.fallback.note_primary_success();
                self.scheduler.set_degradation(0);
                let tags = vec![request.requester.name().to_string(), template.category.clone()];
                self.cache.put(&template, key, outcome.clone(), tags);
                Ok(outcome)
            }
            Ok(failed_parse) => {
                warn!(task = %request.task, "parse failed, serving fallback");
                let degraded = match self
                    .fallback
                    .execute(request, &template, &self.cache, Some(&self.engine))
                    .await
                {
                    Ok(degraded) => degraded,
                    Err(_) => failed_parse,
                };
                self.scheduler
                    .set_degradation(self.fallback.degradation_level());
                Ok(degraded)
            }
            Err(err) if err.is_recoverable() => {
                warn!(task = %request.task, error = %err, "primary inference failed, serving fallback");
                let degraded = self
                    .fallback
                    .execute(request, &template, &self.cache, Some(&self.engine))
                    .await?;
                self.scheduler
                    .set_degradation(self.fallback.degradation_level());
                Ok(degraded)
            }
            Err(err) => Err(err),
        }
    }

    /// Dequeues and executes one batch. Returns the outcomes, or
    /// `None` when the queue is empty or throttled.
    pub async fn run_next_batch(&self) -> Option<Vec<Result<TaskOutcome, InferenceError>>> {
        let batch = self.scheduler.next_batch()?;
        debug!(
            category = %batch.category,
            size = batch.requests.len(),
            "executing batch"
        );
        let mut outcomes = Vec::with_capacity(batch.requests.len());
        for scheduled in batch.requests {
            outcomes.push(self.execute(&scheduled.request).await);
        }
        Some(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tickflow_types::{assert_error_codes, Priority, SystemId, TaskId, TickId};

    struct CountingProvider {
        calls: AtomicU32,
        fail: bool,
    }

    #[async_trait]
    impl CompletionProvider for CountingProvider {
        fn model(&self) -> &str {
            "stub"
        }

        async fn complete(&self, _prompt: &str, _t: f32) -> Result<String, InferenceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(InferenceError::ProviderFailed {
                    reason: "offline".into(),
                })
            } else {
                Ok(r#"{"answer": 42}"#.to_string())
            }
        }
    }

    fn pipeline(fail: bool) -> (InferencePipeline, Arc<CountingProvider>) {
        let provider = Arc::new(CountingProvider {
            calls: AtomicU32::new(0),
            fail,
        });
        let mut engine = InferenceEngine::new();
        engine
            .register_template(
                TaskTemplate::new("forecast", "analysis", "Forecast")
                    .with_format(OutputFormat::Structured),
            )
            .unwrap();
        engine.set_default_provider(Arc::clone(&provider) as Arc<dyn CompletionProvider>);

        let mut fallback = FallbackManager::default();
        fallback.register_default("analysis", json!({"answer": 0}));

        let pipeline = InferencePipeline::new(
            engine,
            Arc::new(TaskCache::default()),
            Arc::new(TaskScheduler::default()),
            Arc::new(fallback),
        );
        (pipeline, provider)
    }

    fn request() -> TaskRequest {
        TaskRequest::new(
            TaskId::named("forecast"),
            TaskVariables::new(),
            SystemId::named("economy"),
            TickId(1),
        )
        .with_priority(Priority::Medium)
    }

    #[tokio::test]
    async fn second_execution_is_a_cache_hit() {
        let (p, provider) = pipeline(false);
        let first = p.execute(&request()).await.unwrap();
        assert!(!first.cache_hit);
        let second = p.execute(&request()).await.unwrap();
        assert!(second.cache_hit);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn provider_failure_serves_fallback() {
        let (p, _provider) = pipeline(true);
        let outcome = p.execute(&request()).await.unwrap();
        assert_eq!(outcome.fallback, Some(FallbackLevel::Default));
        assert!(outcome.quality <= 0.3);
        assert!(p.fallback().degradation_level() > 0);
    }

    #[tokio::test]
    async fn unknown_task_rejected_at_submit() {
        let (p, _provider) = pipeline(false);
        let bad = TaskRequest::new(
            TaskId::named("missing"),
            TaskVariables::new(),
            SystemId::named("economy"),
            TickId(1),
        );
        assert!(matches!(
            p.submit(bad),
            Err(InferenceError::UnknownTask { .. })
        ));
    }

    #[tokio::test]
    async fn batch_run_drains_queue() {
        let (p, provider) = pipeline(false);
        p.submit(request()).unwrap();
        let outcomes = p.run_next_batch().await.unwrap();
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].as_ref().unwrap().success);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert!(p.run_next_batch().await.is_none());
    }

    #[test]
    fn error_codes_follow_convention() {
        assert_error_codes(
            &[
                InferenceError::UnknownTask { task: "t".into() },
                InferenceError::DuplicateTask { task: "t".into() },
                InferenceError::UndeclaredPlaceholder {
                    task: "t".into(),
                    name: "n".into(),
                },
                InferenceError::MissingVariable {
                    task: "t".into(),
                    name: "n".into(),
                },
                InferenceError::ProviderUnavailable { model: "m".into() },
                InferenceError::ProviderFailed { reason: "r".into() },
                InferenceError::QueueFull { depth: 9 },
                InferenceError::RetriesExhausted { task: "t".into() },
                InferenceError::FallbackExhausted { task: "t".into() },
            ],
            "INFERENCE_",
        );
    }
}
