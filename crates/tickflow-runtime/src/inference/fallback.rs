//! Graceful degradation when inference is slow or unavailable.
//!
//! Four strategies, tried strictly in ascending level order:
//!
//! | Level | Strategy | Quality ceiling |
//! |-------|----------|-----------------|
//! | 1 | Cached — serve the last cached result, even expired | 0.9 |
//! | 2 | Simplified — re-run with a shortened prompt on a cheaper model | 0.7 |
//! | 3 | Deterministic — closed-form calculator registered for the task | 0.5 |
//! | 4 | Default — default value registered for the category | 0.3 |
//!
//! A result's reported quality never exceeds the ceiling of the
//! level that produced it, and every fallback outcome is tagged with
//! that level. Under stress (0-1) the manager recommends skipping
//! levels proactively: above the moderate threshold start at
//! Simplified, above the high threshold start at Deterministic;
//! low-priority requests during degradation go one level deeper.

use super::cache::{cache_key, TaskCache};
use super::engine::{InferenceEngine, ParsedOutput, TaskOutcome, TaskRequest};
use super::template::TaskTemplate;
use super::InferenceError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tickflow_types::{Priority, TaskId};
use tracing::{debug, info};

/// Fallback strategy levels, strictly ordered.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum FallbackLevel {
    /// Serve the last cached result, even if expired.
    Cached,
    /// Re-run through the engine with a shortened prompt, routed to
    /// a cheaper model when one is configured.
    Simplified,
    /// Closed-form calculator registered for the task.
    Deterministic,
    /// Default value registered for the category.
    Default,
}

impl FallbackLevel {
    /// The 1-based level number.
    #[must_use]
    pub fn number(self) -> u8 {
        match self {
            Self::Cached => 1,
            Self::Simplified => 2,
            Self::Deterministic => 3,
            Self::Default => 4,
        }
    }

    /// The quality ceiling for results from this level.
    #[must_use]
    pub fn quality_ceiling(self) -> f64 {
        match self {
            Self::Cached => 0.9,
            Self::Simplified => 0.7,
            Self::Deterministic => 0.5,
            Self::Default => 0.3,
        }
    }

    /// The next deeper level, saturating at `Default`.
    #[must_use]
    pub fn deeper(self) -> Self {
        match self {
            Self::Cached => Self::Simplified,
            Self::Simplified => Self::Deterministic,
            Self::Deterministic | Self::Default => Self::Default,
        }
    }

    /// All levels in ascending order.
    #[must_use]
    pub fn all() -> [Self; 4] {
        [Self::Cached, Self::Simplified, Self::Deterministic, Self::Default]
    }
}

impl std::fmt::Display for FallbackLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Cached => "cached",
            Self::Simplified => "simplified",
            Self::Deterministic => "deterministic",
            Self::Default => "default",
        };
        write!(f, "{name}")
    }
}

/// One configured strategy.
#[derive(Debug, Clone)]
pub struct FallbackStrategy {
    /// The level this strategy serves.
    pub level: FallbackLevel,
    /// Quality cap for its results.
    pub quality_ceiling: f64,
    /// Disabled strategies are skipped.
    pub enabled: bool,
}

/// Manager tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    /// Stress above this starts fallbacks at Simplified.
    pub moderate_stress: f64,
    /// Stress above this starts fallbacks at Deterministic.
    pub high_stress: f64,
    /// Model the Simplified level re-runs on; `None` keeps the
    /// template's normal routing.
    pub simplified_model: Option<String>,
    /// Degradation history length.
    pub history_cap: usize,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            moderate_stress: 0.6,
            high_stress: 0.8,
            simplified_model: None,
            history_cap: 100,
        }
    }
}

/// One recorded fallback, oldest dropped past the cap.
#[derive(Debug, Clone)]
pub struct DegradationRecord {
    /// When the fallback happened.
    pub at: SystemTime,
    /// The level that served it.
    pub level: FallbackLevel,
    /// The task that degraded.
    pub task: TaskId,
}

/// Totals per level plus quality accounting.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct FallbackStats {
    /// All fallbacks served.
    pub total: u64,
    /// Served per level, indexed by level number - 1.
    pub by_level: [u64; 4],
    /// Sum of (1 - quality) over served fallbacks.
    quality_degradation_sum: f64,
}

impl FallbackStats {
    /// Mean quality shortfall per served fallback.
    #[must_use]
    pub fn avg_quality_degradation(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.quality_degradation_sum / self.total as f64
        }
    }
}

/// Health snapshot for operators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackHealth {
    /// Current stress, 0-1.
    pub stress: f64,
    /// Current degradation level, 0 when healthy.
    pub degradation_level: u8,
    /// Total fallbacks served.
    pub total_fallbacks: u64,
    /// Served per level.
    pub by_level: [u64; 4],
    /// Mean quality shortfall.
    pub avg_quality_degradation: f64,
}

/// A registered calculator producing a value without a provider.
pub type Calculator = Arc<dyn Fn(&TaskRequest) -> Option<Value> + Send + Sync>;

/// Serves degraded results when primary inference fails or the
/// system is under stress.
pub struct FallbackManager {
    config: FallbackConfig,
    strategies: Vec<FallbackStrategy>,
    stress: Mutex<f64>,
    degradation: AtomicU8,
    deterministic: HashMap<TaskId, Calculator>,
    defaults: HashMap<String, Value>,
    stats: Mutex<FallbackStats>,
    history: Mutex<VecDeque<DegradationRecord>>,
}

impl FallbackManager {
    /// Creates a manager with all four strategies enabled.
    #[must_use]
    pub fn new(config: FallbackConfig) -> Self {
        let strategies = FallbackLevel::all()
            .into_iter()
            .map(|level| FallbackStrategy {
                level,
                quality_ceiling: level.quality_ceiling(),
                enabled: true,
            })
            .collect();
        Self {
            config,
            strategies,
            stress: Mutex::new(0.0),
            degradation: AtomicU8::new(0),
            deterministic: HashMap::new(),
            defaults: HashMap::new(),
            stats: Mutex::new(FallbackStats::default()),
            history: Mutex::new(VecDeque::new()),
        }
    }

    /// Disables one strategy level.
    pub fn disable(&mut self, level: FallbackLevel) {
        if let Some(s) = self.strategies.iter_mut().find(|s| s.level == level) {
            s.enabled = false;
        }
    }

    /// Registers a closed-form calculator for one task.
    pub fn register_deterministic(&mut self, task: TaskId, calc: Calculator) {
        self.deterministic.insert(task, calc);
    }

    /// Registers a default value for a category.
    pub fn register_default(&mut self, category: impl Into<String>, value: Value) {
        self.defaults.insert(category.into(), value);
    }

    /// Updates the stress level, clamped to 0-1.
    pub fn set_stress(&self, stress: f64) {
        *self.stress.lock() = stress.clamp(0.0, 1.0);
    }

    /// Current stress.
    #[must_use]
    pub fn stress(&self) -> f64 {
        *self.stress.lock()
    }

    /// Current degradation level number, 0 when healthy.
    #[must_use]
    pub fn degradation_level(&self) -> u8 {
        self.degradation.load(Ordering::Relaxed)
    }

    /// Clears the degradation level after a primary success.
    pub fn note_primary_success(&self) {
        if self.degradation.swap(0, Ordering::Relaxed) > 0 {
            info!("primary inference recovered, degradation cleared");
        }
    }

    /// The level a new fallback should start at, given current
    /// stress and the request's priority.
    #[must_use]
    pub fn recommend_start(&self, priority: Priority) -> FallbackLevel {
        let stress = self.stress();
        let mut level = if stress > self.config.high_stress {
            FallbackLevel::Deterministic
        } else if stress > self.config.moderate_stress {
            FallbackLevel::Simplified
        } else {
            FallbackLevel::Cached
        };
        if priority == Priority::Low && self.degradation_level() > 0 {
            level = level.deeper();
        }
        level
    }

    /// Serves a degraded result for a failed or skipped primary
    /// call. Tries strategies from the recommended level upward;
    /// fails only when every remaining level comes up empty. The
    /// Simplified level needs `engine` to re-run the prompt and is
    /// skipped without one.
    pub async fn execute(
        &self,
        request: &TaskRequest,
        template: &TaskTemplate,
        cache: &TaskCache,
        engine: Option<&InferenceEngine>,
    ) -> Result<TaskOutcome, InferenceError> {
        let start = self.recommend_start(request.priority);
        for strategy in &self.strategies {
            if !strategy.enabled || strategy.level < start {
                continue;
            }
            if let Some(outcome) = self.try_level(strategy, request, template, cache, engine).await
            {
                self.record(&outcome, strategy.level, &request.task);
                return Ok(outcome);
            }
        }
        Err(InferenceError::FallbackExhausted {
            task: request.task.to_string(),
        })
    }

    async fn try_level(
        &self,
        strategy: &FallbackStrategy,
        request: &TaskRequest,
        template: &TaskTemplate,
        cache: &TaskCache,
        engine: Option<&InferenceEngine>,
    ) -> Option<TaskOutcome> {
        match strategy.level {
            FallbackLevel::Cached => {
                let cached = cache.get_allow_expired(&cache_key(request))?;
                Some(self.degraded(request, cached.parsed.clone(), cached.raw, 0.95, strategy))
            }
            FallbackLevel::Simplified => {
                let engine = engine?;
                let model = self.config.simplified_model.as_deref();
                match engine.run_simplified(request, model).await {
                    Ok(outcome) if outcome.success => Some(self.degraded(
                        request,
                        outcome.parsed,
                        outcome.raw,
                        outcome.quality,
                        strategy,
                    )),
                    Ok(_) => None,
                    Err(err) => {
                        debug!(task = %request.task, error = %err, "simplified re-run failed");
                        None
                    }
                }
            }
            FallbackLevel::Deterministic => {
                let value = self.deterministic.get(&request.task).and_then(|c| c(request))?;
                Some(self.from_value(request, value, 0.5, strategy))
            }
            FallbackLevel::Default => {
                let value = self.defaults.get(&template.category).cloned()?;
                Some(self.from_value(request, value, 0.3, strategy))
            }
        }
    }

    fn from_value(
        &self,
        request: &TaskRequest,
        value: Value,
        own_quality: f64,
        strategy: &FallbackStrategy,
    ) -> TaskOutcome {
        let raw = value.to_string();
        self.degraded(request, ParsedOutput::Structured(value), raw, own_quality, strategy)
    }

    fn degraded(
        &self,
        request: &TaskRequest,
        parsed: ParsedOutput,
        raw: String,
        own_quality: f64,
        strategy: &FallbackStrategy,
    ) -> TaskOutcome {
        TaskOutcome {
            task: request.task.clone(),
            success: true,
            raw,
            parsed,
            quality: own_quality.min(strategy.quality_ceiling),
            confidence: match strategy.level {
                FallbackLevel::Deterministic => 0.9,
                FallbackLevel::Cached => 0.7,
                FallbackLevel::Simplified => 0.6,
                FallbackLevel::Default => 0.5,
            },
            cache_hit: strategy.level == FallbackLevel::Cached,
            fallback: Some(strategy.level),
            duration: Duration::ZERO,
            events: Vec::new(),
        }
    }

    fn record(&self, outcome: &TaskOutcome, level: FallbackLevel, task: &TaskId) {
        debug!(task = %task, %level, quality = outcome.quality, "fallback served");
        {
            let mut stats = self.stats.lock();
            stats.total += 1;
            stats.by_level[usize::from(level.number() - 1)] += 1;
            stats.quality_degradation_sum += 1.0 - outcome.quality;
        }
        self.degradation
            .fetch_max(level.number(), Ordering::Relaxed);
        let mut history = self.history.lock();
        history.push_back(DegradationRecord {
            at: SystemTime::now(),
            level,
            task: task.clone(),
        });
        while history.len() > self.config.history_cap {
            history.pop_front();
        }
    }

    /// Recent degradation records, oldest first.
    #[must_use]
    pub fn history(&self) -> Vec<DegradationRecord> {
        self.history.lock().iter().cloned().collect()
    }

    /// Snapshot of the fallback accounting.
    #[must_use]
    pub fn stats(&self) -> FallbackStats {
        *self.stats.lock()
    }

    /// Health snapshot for operators.
    #[must_use]
    pub fn health(&self) -> FallbackHealth {
        let stats = self.stats();
        FallbackHealth {
            stress: self.stress(),
            degradation_level: self.degradation_level(),
            total_fallbacks: stats.total,
            by_level: stats.by_level,
            avg_quality_degradation: stats.avg_quality_degradation(),
        }
    }
}

impl Default for FallbackManager {
    fn default() -> Self {
        Self::new(FallbackConfig::default())
    }
}
