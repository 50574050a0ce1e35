//! Inference pipeline scenarios: adaptive TTLs, fallback ordering
//! and degradation under stress.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tickflow_runtime::inference::{
    cache_key, FallbackConfig, FallbackManager, InferenceEngine, ParsedOutput, TaskOutcome,
    TaskRequest, TaskScheduler, TaskVariables,
};
use tickflow_runtime::{
    CacheConfig, CompletionProvider, FallbackLevel, InferenceError, InferencePipeline,
    OutputFormat, TaskCache, TaskTemplate, TaskValue,
};
use tickflow_types::{Priority, SystemId, TaskId, TickId};

fn outcome(task: &TaskId, quality: f64) -> TaskOutcome {
    TaskOutcome {
        task: task.clone(),
        success: true,
        raw: "{}".into(),
        parsed: ParsedOutput::Structured(json!({})),
        quality,
        confidence: 0.8,
        cache_hit: false,
        fallback: None,
        duration: Duration::from_millis(50),
        events: Vec::new(),
    }
}

fn request(task: &str) -> TaskRequest {
    TaskRequest::new(
        TaskId::named(task),
        TaskVariables::new(),
        SystemId::named("economy"),
        TickId(1),
    )
}

fn analysis_template() -> TaskTemplate {
    TaskTemplate::new("forecast", "analysis", "Forecast").with_format(OutputFormat::Structured)
}

fn scripted_engine(fail: bool) -> InferenceEngine {
    let mut engine = InferenceEngine::new();
    engine.register_template(analysis_template()).unwrap();
    engine.set_default_provider(Arc::new(ScriptedProvider { fail }));
    engine
}

/// A task with a 300s default TTL: quality 0.9 stores for longer
/// than the default, quality 0.4 for no longer than it, and both
/// stay inside the configured clamp.
#[test]
fn quality_scales_stored_ttl_around_the_default() {
    let default_ttl = Duration::from_secs(300);
    let config = CacheConfig {
        min_ttl: Duration::from_secs(5),
        max_ttl: Duration::from_secs(600),
        ..CacheConfig::default()
    };
    let cache = TaskCache::new(config.clone());
    let template =
        TaskTemplate::new("forecast", "analysis", "Forecast").with_cache(true, default_ttl);

    let high = cache
        .put(&template, "high".into(), outcome(&template.id, 0.9), vec![])
        .unwrap();
    let low = cache
        .put(&template, "low".into(), outcome(&template.id, 0.4), vec![])
        .unwrap();

    assert!(high >= default_ttl, "quality bonus applied: {high:?}");
    assert!(low <= default_ttl, "no bonus for low quality: {low:?}");
    for ttl in [high, low] {
        assert!(ttl >= config.min_ttl && ttl <= config.max_ttl);
    }
}

/// When the cached level has nothing, the simplified level re-runs
/// the prompt through the engine; the result is marked simplified
/// and its quality sits at or under the simplified ceiling, never
/// the cached one.
#[tokio::test]
async fn fallback_marker_and_ceiling_follow_the_producing_level() {
    let manager = FallbackManager::new(FallbackConfig::default());
    let engine = scripted_engine(false);
    let cache = TaskCache::default(); // empty: level 1 has nothing

    let result = manager
        .execute(&request("forecast"), &analysis_template(), &cache, Some(&engine))
        .await
        .unwrap();

    assert_eq!(result.fallback, Some(FallbackLevel::Simplified));
    assert!(result.quality <= FallbackLevel::Simplified.quality_ceiling());
    assert!(result.quality < FallbackLevel::Cached.quality_ceiling());
}

/// Levels are tried strictly in ascending order: with no engine and
/// an empty cache, only the task's deterministic calculator can
/// serve and the result carries its marker.
#[tokio::test]
async fn deterministic_serves_when_earlier_levels_are_empty() {
    let mut manager = FallbackManager::new(FallbackConfig::default());
    manager.register_deterministic(
        TaskId::named("forecast"),
        Arc::new(|_req| Some(json!({"value": 7}))),
    );
    let cache = TaskCache::default();

    let result = manager
        .execute(&request("forecast"), &analysis_template(), &cache, None)
        .await
        .unwrap();
    assert_eq!(result.fallback, Some(FallbackLevel::Deterministic));
    assert!(result.quality <= 0.5);
}

/// A deterministic calculator serves only the task it was registered
/// for; another task in the same category falls through.
#[tokio::test]
async fn deterministic_calculator_bound_to_its_task() {
    let mut manager = FallbackManager::new(FallbackConfig::default());
    manager.register_deterministic(
        TaskId::named("forecast"),
        Arc::new(|_req| Some(json!({"value": 7}))),
    );
    let cache = TaskCache::default();

    let other = TaskTemplate::new("harvest", "analysis", "Estimate the harvest");
    let err = manager
        .execute(&request("harvest"), &other, &cache, None)
        .await
        .unwrap_err();
    assert!(matches!(err, InferenceError::FallbackExhausted { .. }));
}

/// Nothing registered at any level surfaces as a hard failure.
#[tokio::test]
async fn empty_levels_exhaust() {
    let manager = FallbackManager::new(FallbackConfig::default());
    let cache = TaskCache::default();
    let err = manager
        .execute(&request("forecast"), &analysis_template(), &cache, None)
        .await
        .unwrap_err();
    assert!(matches!(err, InferenceError::FallbackExhausted { .. }));
}

/// Stress thresholds move the recommended starting level; a
/// low-priority request during degradation starts one level deeper.
#[tokio::test]
async fn stress_raises_the_starting_level() {
    let mut manager = FallbackManager::new(FallbackConfig::default());
    manager.register_default("analysis", json!({"value": 0}));
    let cache = TaskCache::default();

    assert_eq!(manager.recommend_start(Priority::High), FallbackLevel::Cached);

    manager.set_stress(0.7);
    assert_eq!(
        manager.recommend_start(Priority::High),
        FallbackLevel::Simplified
    );

    manager.set_stress(0.9);
    assert_eq!(
        manager.recommend_start(Priority::High),
        FallbackLevel::Deterministic
    );

    // serve one fallback so the degradation level is non-zero
    manager
        .execute(&request("forecast"), &analysis_template(), &cache, None)
        .await
        .unwrap();
    assert!(manager.degradation_level() > 0);
    assert_eq!(
        manager.recommend_start(Priority::Low),
        FallbackLevel::Default
    );
}

struct ScriptedProvider {
    fail: bool,
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    fn model(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, _prompt: &str, _temperature: f32) -> Result<String, InferenceError> {
        if self.fail {
            Err(InferenceError::ProviderFailed {
                reason: "backend offline".into(),
            })
        } else {
            Ok(r#"{"forecast": "growth"}"#.to_string())
        }
    }
}

fn pipeline(fail: bool) -> InferencePipeline {
    let mut engine = InferenceEngine::new();
    engine
        .register_template(
            TaskTemplate::new("forecast", "analysis", "Forecast {topic}")
                .with_required("topic")
                .with_format(OutputFormat::Structured)
                .with_cache(true, Duration::from_secs(300)),
        )
        .unwrap();
    engine.set_default_provider(Arc::new(ScriptedProvider { fail }));

    let mut fallback = FallbackManager::new(FallbackConfig::default());
    fallback.register_deterministic(
        TaskId::named("forecast"),
        Arc::new(|_req| Some(json!({"forecast": "flat"}))),
    );

    InferencePipeline::new(
        engine,
        Arc::new(TaskCache::default()),
        Arc::new(TaskScheduler::default()),
        Arc::new(fallback),
    )
}

fn bound_request() -> TaskRequest {
    TaskRequest::new(
        TaskId::named("forecast"),
        TaskVariables::new().with("topic", TaskValue::Text("grain prices".into())),
        SystemId::named("economy"),
        TickId(1),
    )
}

/// Healthy provider: first run computes, second is a tagged cache
/// hit, and the stored entry disappears when its requester's tag is
/// invalidated.
#[tokio::test]
async fn cache_round_trip_with_tag_invalidation() {
    let p = pipeline(false);

    let first = p.execute(&bound_request()).await.unwrap();
    assert!(first.success);
    assert!(!first.cache_hit);
    assert!(first.fallback.is_none());

    let second = p.execute(&bound_request()).await.unwrap();
    assert!(second.cache_hit);

    // tick finalization invalidates by requester name
    assert_eq!(p.cache().invalidate_tags(&["economy".into()]), 1);
    let third = p.execute(&bound_request()).await.unwrap();
    assert!(!third.cache_hit);
}

/// Provider outage: the pipeline serves the deterministic fallback
/// and raises the degradation level; a later success clears it.
#[tokio::test]
async fn outage_degrades_then_recovery_clears() {
    let p = pipeline(true);
    let degraded = p.execute(&bound_request()).await.unwrap();
    assert_eq!(degraded.fallback, Some(FallbackLevel::Deterministic));
    assert!(p.fallback().degradation_level() > 0);

    let healthy = pipeline(false);
    let fresh = healthy.execute(&bound_request()).await.unwrap();
    assert!(fresh.fallback.is_none());
    assert_eq!(healthy.fallback().degradation_level(), 0);
}

/// An expired entry is no longer a hit for normal reads, but the
/// cached fallback level may still serve it, capped at its ceiling.
#[tokio::test]
async fn stale_entry_feeds_the_cached_fallback_level() {
    let cache = TaskCache::new(CacheConfig {
        min_ttl: Duration::from_millis(1),
        max_ttl: Duration::from_millis(5),
        ..CacheConfig::default()
    });
    let template = TaskTemplate::new("forecast", "analysis", "Forecast")
        .with_cache(true, Duration::from_millis(1));
    let req = request("forecast");
    let key = cache_key(&req);
    cache.put(&template, key.clone(), outcome(&template.id, 1.0), vec![]);
    std::thread::sleep(Duration::from_millis(10));

    let manager = FallbackManager::new(FallbackConfig::default());
    let served = manager.execute(&req, &template, &cache, None).await.unwrap();
    assert_eq!(served.fallback, Some(FallbackLevel::Cached));
    assert!(served.quality <= FallbackLevel::Cached.quality_ceiling());

    // a normal read still misses, and removes the stale entry
    assert!(cache.get(&key).is_none(), "expired entries never hit");
}
