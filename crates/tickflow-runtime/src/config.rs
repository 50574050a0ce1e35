//! Aggregated runtime configuration.
//!
//! One [`RuntimeConfig`] carries the tuning for every runtime
//! component; each section has working defaults, so a partial config
//! (or none) is always valid. Loading and file formats are the
//! embedder's concern; this module only defines the shape and a
//! JSON helper.

use crate::breaker::BreakerConfig;
use crate::bus::BusConfig;
use crate::controller::ControllerConfig;
use crate::inference::{CacheConfig, FallbackConfig, SchedulerConfig};
use crate::orchestrator::OrchestratorConfig;
use serde::{Deserialize, Serialize};

/// Tuning for the whole runtime, by component.
///
/// # Example
///
/// ```
/// use tickflow_runtime::RuntimeConfig;
///
/// let config: RuntimeConfig = RuntimeConfig::from_json(
///     r#"{ "controller": { "max_concurrent": 4 } }"#,
/// ).unwrap();
/// assert_eq!(config.controller.max_concurrent, 4);
/// // untouched sections keep their defaults
/// assert_eq!(config.breaker.failure_threshold, 5);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Tick life cycle.
    pub orchestrator: OrchestratorConfig,
    /// Concurrency and timeout bounds.
    pub controller: ControllerConfig,
    /// Per-system circuit breakers.
    pub breaker: BreakerConfig,
    /// Event dispatch.
    pub bus: BusConfig,
    /// Inference result cache.
    pub cache: CacheConfig,
    /// Inference request scheduling.
    pub scheduler: SchedulerConfig,
    /// Degradation strategies.
    pub fallback: FallbackConfig,
}

impl RuntimeConfig {
    /// Parses a config from JSON; missing sections and fields fall
    /// back to defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn empty_object_is_all_defaults() {
        let config = RuntimeConfig::from_json("{}").unwrap();
        assert_eq!(config.controller.max_concurrent, 8);
        assert_eq!(config.breaker.failure_threshold, 5);
        assert_eq!(config.cache.capacity, 1024);
        assert_eq!(config.scheduler.batch_max_size, 4);
        assert_eq!(config.orchestrator.tick_interval, Duration::from_secs(1));
    }

    #[test]
    fn partial_section_overrides_only_named_fields() {
        let config = RuntimeConfig::from_json(
            r#"{
                "breaker": { "failure_threshold": 2 },
                "bus": { "batch_size": 32 }
            }"#,
        )
        .unwrap();
        assert_eq!(config.breaker.failure_threshold, 2);
        assert_eq!(config.breaker.success_threshold, 2);
        assert_eq!(config.bus.batch_size, 32);
        assert_eq!(config.bus.queue_depth, 1024);
    }

    #[test]
    fn round_trips_through_json() {
        let config = RuntimeConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back = RuntimeConfig::from_json(&json).unwrap();
        assert_eq!(
            back.controller.max_concurrent,
            config.controller.max_concurrent
        );
        assert_eq!(back.cache.min_ttl, config.cache.min_ttl);
    }
}
