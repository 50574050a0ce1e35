//! Tickflow runtime: the orchestration engine.
//!
//! Drives registered simulation systems through a dependency-ordered,
//! three-tier tick, isolates their failures, degrades AI-backed
//! computations gracefully and propagates cross-system notifications
//! through the event bus.
//!
//! ```text
//!                       ┌──────────────────┐
//!                       │ TickOrchestrator │
//!                       └────────┬─────────┘
//!          plan │ run                        │ finalize
//!  ┌────────────▼──────────┐      ┌──────────▼──────────┐
//!  │ DependencyRegistry    │      │ StateStore (seam)   │
//!  └───────────────────────┘      └─────────────────────┘
//!  ┌───────────────────────┐      ┌─────────────────────┐
//!  │ BreakerSet            │      │ EventBus            │
//!  │  └ ExecutionController│      └─────────────────────┘
//!  └───────────────────────┘
//!  ┌──────────────────────────────────────────────────── ┐
//!  │ inference: scheduler → cache → engine → fallback    │
//!  └──────────────────────────────────────────────────── ┘
//! ```
//!
//! # Modules
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`orchestrator`] | [`TickOrchestrator`], tick phases and results |
//! | [`registry`] | [`DependencyRegistry`], validation, wave planning |
//! | [`controller`] | [`ExecutionController`] bounds and timeouts |
//! | [`breaker`] | [`CircuitBreaker`], [`BreakerSet`] |
//! | [`bus`] | [`EventBus`], dead letters, [`EventSink`] |
//! | [`inference`] | task templates, cache, scheduler, fallbacks |
//! | [`config`] | [`RuntimeConfig`] aggregate |

pub mod breaker;
pub mod bus;
pub mod config;
pub mod controller;
pub mod inference;
pub mod orchestrator;
pub mod registry;

pub use breaker::{BreakerConfig, BreakerError, BreakerSet, BreakerState, CircuitBreaker};
pub use bus::{BusConfig, BusError, BusStats, EventBus, EventSink, NoopSink};
pub use config::RuntimeConfig;
pub use controller::{ControlError, ControllerConfig, ControllerStats, ExecutionController};
pub use inference::{
    CacheConfig, CompletionProvider, FallbackConfig, FallbackLevel, FallbackManager,
    InferenceEngine, InferenceError, InferencePipeline, OutputFormat, SchedulerConfig, TaskCache,
    TaskRequest, TaskScheduler, TaskTemplate, TaskValue, TaskVariables,
};
pub use orchestrator::{
    OrchestratorConfig, OrchestratorStatus, PhaseTimings, SystemFailure, TickError,
    TickOrchestrator, TickPhase, TickResult,
};
pub use registry::{DependencyRegistry, GraphError, ValidationIssue, ValidationReport};
