//! The tick orchestrator: the top-level driver of one simulation
//! tick.
//!
//! Each tick walks a strict phase machine (see [`TickPhase`]):
//!
//! ```text
//! planning      snapshot, validate graph, plan waves   (fatal on error)
//! tier1         (system × entity) fan-out, parallel    (failures isolated)
//! tier2, tier3  dependency order, sequential           (failures isolated)
//! finalization  merge deltas, persist, publish,
//!               invalidate caches
//! ```
//!
//! Every invocation goes breaker → controller → system: an open
//! breaker rejects without execution cost, the controller bounds
//! concurrency and owns the timeout, and the outcome feeds back into
//! the breaker. A failing system never aborts the tick; its failures
//! land in the [`TickResult`] and the successful deltas still merge
//! and persist.
//!
//! The orchestrator is constructed once with its collaborators
//! passed in; it holds no global state.

mod phase;
mod result;

pub use phase::TickPhase;
pub use result::{PhaseTimings, SystemFailure, TickResult};

use crate::breaker::BreakerSet;
use crate::bus::EventBus;
use crate::controller::{ControlError, ControllerStats, ExecutionController};
use crate::inference::TaskCache;
use crate::registry::{DependencyRegistry, GraphError};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tickflow_event::GameEvent;
use tickflow_system::{
    EntityContext, ExecutionContext, ExecutionResult, StateDelta, StateSnapshot, StateStore,
    System, SystemDefinition, SystemError,
};
use tickflow_types::{ErrorCode, SystemId, Tier, TickId};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Orchestrator tuning.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Cadence of the scheduled tick loop.
    pub tick_interval: Duration,
    /// Retry budget handed to each execution context.
    pub default_retry_budget: u32,
    /// Tick results kept in the rolling history.
    pub history_cap: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            default_retry_budget: 0,
            history_cap: 100,
        }
    }
}

/// Errors that abort a tick before or outside system execution.
///
/// Per-system failures are not errors at this level; they land in
/// the [`TickResult`].
///
/// # Error Codes
///
/// | Variant | Code | Recoverable |
/// |---------|------|-------------|
/// | `NotRunning` | `TICK_NOT_RUNNING` | No |
/// | `InFlight` | `TICK_IN_FLIGHT` | Yes |
/// | `ValidationFailed` | `TICK_VALIDATION_FAILED` | No |
/// | `Plan` | `TICK_PLAN_FAILED` | No |
/// | `Store` | `TICK_STORE_FAILURE` | Yes |
#[derive(Debug, thiserror::Error)]
pub enum TickError {
    /// `execute_tick` was called before `start`.
    #[error("orchestrator is not running")]
    NotRunning,

    /// A tick is already in flight; ticks never overlap.
    #[error("a tick is already in flight")]
    InFlight,

    /// Graph validation reported errors; no system ran.
    #[error("dependency validation failed: {errors}")]
    ValidationFailed {
        /// The joined error findings.
        errors: String,
    },

    /// Wave planning failed (cycle or missing dependency).
    #[error("execution planning failed: {0}")]
    Plan(#[from] GraphError),

    /// The state store refused a snapshot or an apply.
    #[error("state store failure: {0}")]
    Store(#[source] SystemError),
}

impl ErrorCode for TickError {
    fn code(&self) -> &'static str {
        match self {
            Self::NotRunning => "TICK_NOT_RUNNING",
            Self::InFlight => "TICK_IN_FLIGHT",
            Self::ValidationFailed { .. } => "TICK_VALIDATION_FAILED",
            Self::Plan(_) => "TICK_PLAN_FAILED",
            Self::Store(_) => "TICK_STORE_FAILURE",
        }
    }

    fn is_recoverable(&self) -> bool {
        matches!(self, Self::InFlight | Self::Store(_))
    }
}

/// Point-in-time view of the orchestrator, for status endpoints.
#[derive(Debug, Clone, serde::Serialize)]
pub struct OrchestratorStatus {
    /// Whether `start` has been called without a matching `stop`.
    pub running: bool,
    /// Whether a tick is executing right now.
    pub tick_in_flight: bool,
    /// Phase of the current (or last) tick.
    pub phase: TickPhase,
    /// Ticks started so far.
    pub ticks_started: u64,
    /// When the last tick completed.
    pub last_tick_at: Option<SystemTime>,
    /// Breaker-derived health score per system, by name.
    pub system_health: HashMap<String, u8>,
    /// Controller running totals.
    pub controller: ControllerStats,
}

/// Drives registered systems through the tick life cycle.
pub struct TickOrchestrator {
    config: OrchestratorConfig,
    registry: Mutex<DependencyRegistry>,
    systems: Mutex<HashMap<SystemId, Arc<dyn System>>>,
    store: Arc<dyn StateStore>,
    controller: Arc<ExecutionController>,
    breakers: Arc<BreakerSet>,
    bus: Arc<EventBus>,
    cache: Option<Arc<TaskCache>>,
    running: AtomicBool,
    in_flight: AtomicBool,
    tick_counter: AtomicU64,
    phase: Mutex<TickPhase>,
    last_tick_at: Mutex<Option<SystemTime>>,
    history: Mutex<VecDeque<TickResult>>,
}

impl TickOrchestrator {
    /// Creates an orchestrator from its collaborators.
    #[must_use]
    pub fn new(
        config: OrchestratorConfig,
        store: Arc<dyn StateStore>,
        controller: Arc<ExecutionController>,
        breakers: Arc<BreakerSet>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            config,
            registry: Mutex::new(DependencyRegistry::new()),
            systems: Mutex::new(HashMap::new()),
            store,
            controller,
            breakers,
            bus,
            cache: None,
            running: AtomicBool::new(false),
            in_flight: AtomicBool::new(false),
            tick_counter: AtomicU64::new(0),
            phase: Mutex::new(TickPhase::Completed),
            last_tick_at: Mutex::new(None),
            history: Mutex::new(VecDeque::new()),
        }
    }

    /// Attaches an inference cache; completed systems invalidate
    /// entries tagged with their names during finalization.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<TaskCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Registers a system: its definition enters the dependency
    /// graph and its implementation becomes invocable.
    pub fn register_system(&self, system: Arc<dyn System>) -> Result<(), GraphError> {
        let definition = system.definition().clone();
        let id = definition.id.clone();
        self.registry.lock().register(definition)?;
        self.systems.lock().insert(id, system);
        Ok(())
    }

    /// Removes a system. Fails while other systems depend on it.
    pub fn unregister_system(&self, id: &SystemId) -> Result<(), GraphError> {
        self.registry.lock().unregister(id)?;
        self.systems.lock().remove(id);
        Ok(())
    }

    /// Allows ticks to run.
    pub fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
        info!("orchestrator started");
    }

    /// Stops the orchestrator and cancels every in-flight execution.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.controller.cancel_all();
        info!("orchestrator stopped");
    }

    /// Returns `true` between `start` and `stop`.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Runs ticks on [`OrchestratorConfig::tick_interval`] until
    /// `shutdown` trips or `stop` is called. Tick-level errors are
    /// logged, not propagated; the loop keeps its cadence.
    pub async fn run_scheduled(&self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.tick_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }
            if !self.is_running() {
                break;
            }
            match self.execute_tick().await {
                Ok(result) if result.success => {
                    debug!(tick = %result.tick, "tick completed");
                }
                Ok(result) => {
                    warn!(
                        tick = %result.tick,
                        failures = result.failures.len(),
                        "tick completed with failures"
                    );
                }
                Err(err) => {
                    error!(code = err.code(), error = %err, "tick aborted");
                }
            }
        }
    }

    /// Executes one full tick.
    ///
    /// Fatal planning errors abort before any system runs. Per-system
    /// failures are collected into the result; successful deltas are
    /// merged in completion order and persisted even when other
    /// systems failed.
    pub async fn execute_tick(&self) -> Result<TickResult, TickError> {
        if !self.is_running() {
            return Err(TickError::NotRunning);
        }
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(TickError::InFlight);
        }
        let _guard = FlagGuard(&self.in_flight);

        let tick = TickId(self.tick_counter.fetch_add(1, Ordering::SeqCst) + 1);
        let tick_started = Instant::now();
        let mut timings = PhaseTimings::default();
        debug!(%tick, "tick begins");

        // planning
        self.set_phase(TickPhase::Planning);
        let phase_started = Instant::now();
        let snapshot = Arc::new(self.store.snapshot(tick).await.map_err(TickError::Store)?);
        let (warnings, plan) = self.plan()?;
        timings.planning = phase_started.elapsed();

        let mut merged = StateDelta::new();
        let mut events: Vec<GameEvent> = Vec::new();
        let mut failures: Vec<SystemFailure> = Vec::new();
        let mut executed: Vec<SystemId> = Vec::new();
        let mut skipped: Vec<SystemId> = Vec::new();

        // tier 1: parallel (system × entity) fan-out
        self.set_phase(TickPhase::Tier1);
        let phase_started = Instant::now();
        for wave in &plan.tier1 {
            let mut tasks = JoinSet::new();
            let mut candidates: Vec<SystemId> = Vec::new();
            for definition in wave {
                if !definition.frequency.is_due(tick) {
                    skipped.push(definition.id.clone());
                    continue;
                }
                let Some(system) = self.system_impl(&definition.id) else {
                    continue;
                };
                if !snapshot.entities.is_empty() {
                    candidates.push(definition.id.clone());
                }
                for entity in &snapshot.entities {
                    let id = definition.id.clone();
                    let invocation = invoke(
                        Arc::clone(&self.controller),
                        Arc::clone(&self.breakers),
                        Arc::clone(&system),
                        definition.clone(),
                        Arc::clone(&snapshot),
                        tick,
                        Some(entity.clone()),
                        self.config.default_retry_budget,
                    );
                    tasks.spawn(async move { (id, invocation.await) });
                }
            }
            // all-settled: every pair completes or fails independently
            let mut succeeded: Vec<SystemId> = Vec::new();
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((id, Ok(result))) => {
                        merged.merge(result.delta);
                        events.extend(result.events);
                        if !succeeded.contains(&id) {
                            succeeded.push(id);
                        }
                    }
                    Ok((_, Err(failure))) => failures.push(failure),
                    Err(join_err) => {
                        error!(error = %join_err, "tier-1 task panicked");
                    }
                }
            }
            // a system counts as executed only if at least one of its
            // entity invocations produced a result
            executed.extend(candidates.into_iter().filter(|id| succeeded.contains(id)));
        }
        timings.tier1 = phase_started.elapsed();

        // tiers 2 and 3: sequential in dependency order
        for (phase, waves) in [
            (TickPhase::Tier2, &plan.tier2),
            (TickPhase::Tier3, &plan.tier3),
        ] {
            self.set_phase(phase);
            let phase_started = Instant::now();
            for wave in waves {
                for definition in wave {
                    if !definition.frequency.is_due(tick) {
                        skipped.push(definition.id.clone());
                        continue;
                    }
                    let Some(system) = self.system_impl(&definition.id) else {
                        continue;
                    };
                    let outcome = invoke(
                        Arc::clone(&self.controller),
                        Arc::clone(&self.breakers),
                        system,
                        definition.clone(),
                        Arc::clone(&snapshot),
                        tick,
                        None,
                        self.config.default_retry_budget,
                    )
                    .await;
                    match outcome {
                        Ok(result) => {
                            executed.push(definition.id.clone());
                            merged.merge(result.delta);
                            events.extend(result.events);
                        }
                        Err(failure) => failures.push(failure),
                    }
                }
            }
            match phase {
                TickPhase::Tier2 => timings.tier2 = phase_started.elapsed(),
                _ => timings.tier3 = phase_started.elapsed(),
            }
        }

        // finalization: single writer for the whole tick
        self.set_phase(TickPhase::Finalization);
        let phase_started = Instant::now();
        self.store
            .apply(tick, &merged)
            .await
            .map_err(TickError::Store)?;

        let mut events_published = 0;
        for event in events {
            match self.bus.publish(event) {
                Ok(()) => events_published += 1,
                Err(err) => warn!(code = err.code(), error = %err, "event publish failed"),
            }
        }

        if let Some(cache) = &self.cache {
            let tags: Vec<String> = executed.iter().map(|id| id.name().to_string()).collect();
            let removed = cache.invalidate_tags(&tags);
            if removed > 0 {
                debug!(%tick, removed, "stale inference results invalidated");
            }
        }
        timings.finalization = phase_started.elapsed();
        timings.total = tick_started.elapsed();

        self.set_phase(TickPhase::Completed);
        *self.last_tick_at.lock() = Some(SystemTime::now());

        let result = TickResult {
            tick,
            success: failures.is_empty(),
            executed,
            skipped,
            failures,
            warnings,
            events_published,
            timings,
        };
        self.push_history(result.clone());
        info!(
            %tick,
            success = result.success,
            executed = result.executed.len(),
            failures = result.failures.len(),
            elapsed = ?timings.total,
            "tick finished"
        );
        Ok(result)
    }

    /// Point-in-time status snapshot.
    #[must_use]
    pub fn status(&self) -> OrchestratorStatus {
        OrchestratorStatus {
            running: self.is_running(),
            tick_in_flight: self.in_flight.load(Ordering::SeqCst),
            phase: *self.phase.lock(),
            ticks_started: self.tick_counter.load(Ordering::SeqCst),
            last_tick_at: *self.last_tick_at.lock(),
            system_health: self
                .breakers
                .health()
                .into_iter()
                .map(|(id, score)| (id.name().to_string(), score))
                .collect(),
            controller: self.controller.stats(),
        }
    }

    /// Recent tick results, oldest first, bounded by
    /// [`OrchestratorConfig::history_cap`].
    #[must_use]
    pub fn history(&self) -> Vec<TickResult> {
        self.history.lock().iter().cloned().collect()
    }

    fn plan(&self) -> Result<(Vec<String>, TickPlan), TickError> {
        let mut registry = self.registry.lock();
        let report = registry.validate();
        if !report.is_valid() {
            let errors = report
                .errors
                .iter()
                .map(format_issue)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(TickError::ValidationFailed { errors });
        }
        let warnings = report.warnings.iter().map(format_issue).collect();

        let mut plan = TickPlan::default();
        for (tier, waves) in [
            (Tier::PerEntity, &mut plan.tier1),
            (Tier::CrossEntity, &mut plan.tier2),
            (Tier::Global, &mut plan.tier3),
        ] {
            for wave in registry.tiered_parallel_groups(tier)? {
                let definitions = wave
                    .iter()
                    .filter_map(|id| registry.get(id).cloned())
                    .collect();
                waves.push(definitions);
            }
        }
        Ok((warnings, plan))
    }

    fn system_impl(&self, id: &SystemId) -> Option<Arc<dyn System>> {
        let system = self.systems.lock().get(id).cloned();
        if system.is_none() {
            // definition registered without an implementation
            warn!(system = %id, "no implementation for registered system");
        }
        system
    }

    fn set_phase(&self, phase: TickPhase) {
        debug!(%phase, "phase");
        *self.phase.lock() = phase;
    }

    fn push_history(&self, result: TickResult) {
        let mut history = self.history.lock();
        history.push_back(result);
        while history.len() > self.config.history_cap {
            history.pop_front();
        }
    }
}

#[derive(Default)]
struct TickPlan {
    tier1: Vec<Vec<SystemDefinition>>,
    tier2: Vec<Vec<SystemDefinition>>,
    tier3: Vec<Vec<SystemDefinition>>,
}

fn format_issue(issue: &crate::registry::ValidationIssue) -> String {
    match &issue.system {
        Some(system) => format!("{system}: {}", issue.message),
        None => issue.message.clone(),
    }
}

/// One invocation: breaker gate, controller bounds, outcome fed back
/// into the breaker.
#[allow(clippy::too_many_arguments)]
async fn invoke(
    controller: Arc<ExecutionController>,
    breakers: Arc<BreakerSet>,
    system: Arc<dyn System>,
    definition: SystemDefinition,
    snapshot: Arc<StateSnapshot>,
    tick: TickId,
    entity: Option<EntityContext>,
    retry_budget: u32,
) -> Result<ExecutionResult, SystemFailure> {
    let entity_id = entity.as_ref().map(|e| e.id);
    if let Err(err) = breakers.try_acquire(&definition.id) {
        return Err(SystemFailure {
            system: definition.id.clone(),
            entity: entity_id,
            code: err.code().into(),
            message: err.to_string(),
            recoverable: err.is_recoverable(),
        });
    }

    let started = Instant::now();
    let timeout = definition.timeout;
    let outcome = controller
        .run(&definition.id, timeout, move |token| {
            let mut ctx = ExecutionContext::new(tick, snapshot, timeout, token)
                .with_retry_budget(retry_budget);
            if let Some(entity) = entity {
                ctx = ctx.for_entity(entity);
            }
            async move { system.execute(&ctx).await }
        })
        .await;
    let elapsed = started.elapsed();

    match outcome {
        Ok(result) if result.success => {
            breakers.record(&definition.id, true, elapsed);
            Ok(result)
        }
        Ok(result) => {
            // the system reported failure through its result
            breakers.record(&definition.id, false, elapsed);
            Err(SystemFailure {
                system: definition.id,
                entity: entity_id,
                code: "SYSTEM_EXECUTION_FAILED".into(),
                message: result
                    .error
                    .unwrap_or_else(|| "system reported failure".into()),
                recoverable: true,
            })
        }
        Err(err) => {
            // rejections were never attempted; only real attempts
            // feed the breaker
            if matches!(err, ControlError::Timeout { .. } | ControlError::Failed { .. }) {
                breakers.record(&definition.id, false, elapsed);
            }
            Err(SystemFailure {
                system: definition.id,
                entity: entity_id,
                code: err.code().into(),
                message: err.to_string(),
                recoverable: err.is_recoverable(),
            })
        }
    }
}

struct FlagGuard<'a>(&'a AtomicBool);

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
