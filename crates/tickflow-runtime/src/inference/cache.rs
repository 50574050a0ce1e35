//! Outcome cache with adaptive TTLs.
//!
//! Keys combine the task, the bound variables, the tick and (when
//! present) the entity fingerprint, so a cached outcome is only
//! reused for the same computation in the same situation.
//!
//! # TTL Adaptation
//!
//! Base TTL comes from the template, then:
//!
//! | Condition | Factor |
//! |-----------|--------|
//! | quality above the bonus threshold | × 1.5 |
//! | estimated cost above the expensive threshold | × 1.5 |
//! | volatile category | × 0.5 |
//!
//! The result is clamped to `[min_ttl, max_ttl]`. Expired entries
//! are never returned as hits; the fallback layer may still read
//! them explicitly as stale values.

use super::engine::{TaskOutcome, TaskRequest};
use super::template::TaskTemplate;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// Cache tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Entries kept before LRU eviction.
    pub capacity: usize,
    /// TTL floor after adaptation.
    pub min_ttl: Duration,
    /// TTL ceiling after adaptation.
    pub max_ttl: Duration,
    /// Categories whose entries get the volatility penalty.
    pub volatile_categories: Vec<String>,
    /// Quality at or above this earns the quality bonus.
    pub quality_bonus_threshold: f64,
    /// Estimated cost above this earns the expense bonus.
    pub expensive_threshold: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            min_ttl: Duration::from_secs(5),
            max_ttl: Duration::from_secs(600),
            volatile_categories: Vec::new(),
            quality_bonus_threshold: 0.8,
            expensive_threshold: Duration::from_secs(2),
        }
    }
}

/// Hit accounting.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CacheStats {
    /// Lookups that returned a live entry.
    pub hits: u64,
    /// Lookups that found nothing usable.
    pub misses: u64,
    /// Entries evicted by the LRU policy.
    pub evictions: u64,
    /// Entries removed by tag invalidation.
    pub invalidated: u64,
    /// Entries removed by the expiry sweep.
    pub expired: u64,
}

impl CacheStats {
    /// Hits over total lookups, 0 when never queried.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    outcome: TaskOutcome,
    created: Instant,
    last_access: Instant,
    access_count: u64,
    ttl: Duration,
    tags: Vec<String>,
}

impl CacheEntry {
    fn expired(&self) -> bool {
        self.created.elapsed() > self.ttl
    }
}

/// Builds the cache key for a request.
#[must_use]
pub fn cache_key(request: &TaskRequest) -> String {
    let mut key = format!(
        "{}:{:016x}:{}",
        request.task.uuid,
        request.variables.fingerprint(),
        request.tick.value()
    );
    if let Some(entity) = &request.entity {
        key.push_str(&format!(
            ":{}:{}:{:.1}",
            entity.id.uuid(),
            entity.population,
            entity.economic_power
        ));
    }
    key
}

/// LRU outcome cache with adaptive TTLs and tag invalidation.
pub struct TaskCache {
    config: CacheConfig,
    entries: Mutex<HashMap<String, CacheEntry>>,
    stats: Mutex<CacheStats>,
}

impl TaskCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(HashMap::new()),
            stats: Mutex::new(CacheStats::default()),
        }
    }

    /// Looks up a live entry, marking the hit. Expired entries are
    /// removed and counted as misses.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<TaskOutcome> {
        let mut entries = self.entries.lock();
        match entries.get_mut(key) {
            Some(entry) if !entry.expired() => {
                entry.last_access = Instant::now();
                entry.access_count += 1;
                let mut outcome = entry.outcome.clone();
                outcome.cache_hit = true;
                self.stats.lock().hits += 1;
                Some(outcome)
            }
            Some(_) => {
                entries.remove(key);
                let mut stats = self.stats.lock();
                stats.expired += 1;
                stats.misses += 1;
                None
            }
            None => {
                self.stats.lock().misses += 1;
                None
            }
        }
    }

    /// Reads an entry even if expired, for the Cached fallback
    /// level. Does not count as a hit.
    #[must_use]
    pub fn get_allow_expired(&self, key: &str) -> Option<TaskOutcome> {
        self.entries.lock().get(key).map(|entry| {
            let mut outcome = entry.outcome.clone();
            outcome.cache_hit = true;
            outcome
        })
    }

    /// Stores an outcome under the template's policy. Returns the
    /// TTL used, or `None` when the template is not cacheable.
    pub fn put(
        &self,
        template: &TaskTemplate,
        key: String,
        outcome: TaskOutcome,
        tags: Vec<String>,
    ) -> Option<Duration> {
        if !template.cacheable {
            return None;
        }
        let ttl = self.adaptive_ttl(template, outcome.quality);

        let mut entries = self.entries.lock();
        if entries.len() >= self.config.capacity && !entries.contains_key(&key) {
            if let Some(lru_key) = entries
                .iter()
                .min_by_key(|(_, e)| e.last_access)
                .map(|(k, _)| k.clone())
            {
                entries.remove(&lru_key);
                self.stats.lock().evictions += 1;
            }
        }

        let now = Instant::now();
        entries.insert(
            key,
            CacheEntry {
                outcome,
                created: now,
                last_access: now,
                access_count: 0,
                ttl,
                tags,
            },
        );
        Some(ttl)
    }

    fn adaptive_ttl(&self, template: &TaskTemplate, quality: f64) -> Duration {
        let mut ttl = template.cache_ttl.as_secs_f64();
        if quality >= self.config.quality_bonus_threshold {
            ttl *= 1.5;
        }
        if template.estimated_cost > self.config.expensive_threshold {
            ttl *= 1.5;
        }
        if self.config.volatile_categories.contains(&template.category) {
            ttl *= 0.5;
        }
        Duration::from_secs_f64(ttl)
            .clamp(self.config.min_ttl, self.config.max_ttl)
    }

    /// Removes every entry whose tags intersect `tags`. Returns the
    /// number removed.
    pub fn invalidate_tags(&self, tags: &[String]) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| !entry.tags.iter().any(|t| tags.contains(t)));
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, "cache entries invalidated by tag");
            self.stats.lock().invalidated += removed as u64;
        }
        removed
    }

    /// Removes expired entries. Returns the number removed.
    pub fn sweep(&self) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| !entry.expired());
        let removed = before - entries.len();
        if removed > 0 {
            self.stats.lock().expired += removed as u64;
        }
        removed
    }

    /// Live entry count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns `true` if the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Snapshot of the hit accounting.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        *self.stats.lock()
    }
}

impl Default for TaskCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}
