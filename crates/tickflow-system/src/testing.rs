//! Test doubles for the system contract.
//!
//! Shared by this crate's tests and the runtime's integration tests;
//! not intended for production use.

use crate::context::ExecutionContext;
use crate::definition::SystemDefinition;
use crate::error::SystemError;
use crate::result::ExecutionResult;
use crate::state::{EntityContext, StateDelta, StateSnapshot, StateStore};
use crate::traits::System;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tickflow_types::TickId;

/// A scripted [`System`] that records its invocations.
///
/// Each call appends `"name"` (tick-scoped) or `"name:entity"`
/// (entity-scoped) to the shared log, so ordering tests can assert
/// the exact dispatch sequence across systems.
pub struct RecordingSystem {
    definition: SystemDefinition,
    log: Arc<Mutex<Vec<String>>>,
    delta: StateDelta,
    delay: Duration,
    fail: bool,
}

impl RecordingSystem {
    /// Creates a recording system appending to `log`.
    #[must_use]
    pub fn new(definition: SystemDefinition, log: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            definition,
            log,
            delta: StateDelta::new(),
            delay: Duration::ZERO,
            fail: false,
        }
    }

    /// Sets the delta every successful invocation returns.
    #[must_use]
    pub fn with_delta(mut self, delta: StateDelta) -> Self {
        self.delta = delta;
        self
    }

    /// Makes every invocation sleep before returning, for timeout
    /// and concurrency tests.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Makes every invocation fail.
    #[must_use]
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }
}

#[async_trait]
impl System for RecordingSystem {
    fn definition(&self) -> &SystemDefinition {
        &self.definition
    }

    async fn execute(&self, ctx: &ExecutionContext) -> Result<ExecutionResult, SystemError> {
        let entry = match &ctx.entity {
            Some(entity) => format!("{}:{}", self.definition.id.name(), entity.name),
            None => self.definition.id.name().to_string(),
        };
        self.log.lock().push(entry);

        if !self.delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(self.delay) => {}
                _ = ctx.cancellation.cancelled() => return Err(SystemError::Cancelled),
            }
        }

        if self.fail {
            return Err(SystemError::execution(format!(
                "{} scripted failure",
                self.definition.id.name()
            )));
        }
        Ok(ExecutionResult::success(self.delta.clone(), self.delay))
    }
}

/// In-memory [`StateStore`].
pub struct MemoryStateStore {
    world: Mutex<Value>,
    entities: Mutex<Vec<EntityContext>>,
    applied: Mutex<Vec<(TickId, StateDelta)>>,
}

impl MemoryStateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            world: Mutex::new(Value::Object(serde_json::Map::new())),
            entities: Mutex::new(Vec::new()),
            applied: Mutex::new(Vec::new()),
        }
    }

    /// Adds an active entity.
    pub fn add_entity(&self, entity: EntityContext) {
        self.entities.lock().push(entity);
    }

    /// Every delta applied so far, in order.
    #[must_use]
    pub fn applied(&self) -> Vec<(TickId, StateDelta)> {
        self.applied.lock().clone()
    }

    /// Current world value.
    #[must_use]
    pub fn world(&self) -> Value {
        self.world.lock().clone()
    }
}

impl Default for MemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn snapshot(&self, tick: TickId) -> Result<StateSnapshot, SystemError> {
        Ok(StateSnapshot::new(
            tick,
            self.world.lock().clone(),
            self.entities.lock().clone(),
        ))
    }

    async fn apply(&self, tick: TickId, delta: &StateDelta) -> Result<(), SystemError> {
        {
            let mut world = self.world.lock();
            if let Value::Object(map) = &mut *world {
                for (key, value) in &delta.changes {
                    map.insert(key.clone(), value.clone());
                }
            }
        }
        self.applied.lock().push((tick, delta.clone()));
        Ok(())
    }
}

/// A [`StateStore`] whose `apply` always fails, for finalization
/// error paths.
pub struct FailingStateStore;

#[async_trait]
impl StateStore for FailingStateStore {
    async fn snapshot(&self, tick: TickId) -> Result<StateSnapshot, SystemError> {
        Ok(StateSnapshot::new(
            tick,
            Value::Object(serde_json::Map::new()),
            Vec::new(),
        ))
    }

    async fn apply(&self, _tick: TickId, _delta: &StateDelta) -> Result<(), SystemError> {
        Err(SystemError::store("scripted apply failure"))
    }
}
