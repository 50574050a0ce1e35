//! Per-system circuit breakers.
//!
//! Each system gets one breaker that trips after repeated failures
//! so a persistently broken system stops consuming its timeout
//! budget every tick.
//!
//! # State Machine
//!
//! ```text
//!              N consecutive failures
//!    CLOSED ──────────────────────────► OPEN
//!      ▲                                  │ recovery interval elapsed
//!      │  M consecutive successes         ▼
//!      └────────────────────────────  HALF_OPEN
//!                                         │ any failure
//!                                         └──────────► OPEN
//! ```
//!
//! OPEN rejects without invoking the wrapped system. Timeouts count
//! as failures. The health score (0-100) combines the recent success
//! ratio, a state multiplier (CLOSED 1.0, HALF_OPEN 0.5, OPEN 0.0)
//! and a slow-call penalty.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tickflow_types::{ErrorCode, SystemId};
use tracing::{debug, warn};

/// Breaker tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures that open the breaker.
    pub failure_threshold: u32,
    /// Consecutive half-open successes that close it again.
    pub success_threshold: u32,
    /// How long the breaker stays open before probing.
    pub recovery_interval: Duration,
    /// Recent calls kept for the health score.
    pub window: usize,
    /// Calls slower than this depress the health score.
    pub slow_call_threshold: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            recovery_interval: Duration::from_secs(30),
            window: 20,
            slow_call_threshold: Duration::from_secs(1),
        }
    }
}

/// Breaker state, owned exclusively by its breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BreakerState {
    /// Calls pass through.
    Closed,
    /// Calls are rejected without invocation.
    Open,
    /// Probe calls pass through; one failure reopens.
    HalfOpen,
}

/// Rejection raised when a breaker is open.
///
/// # Error Codes
///
/// | Variant | Code | Recoverable |
/// |---------|------|-------------|
/// | `Open` | `BREAKER_OPEN` | Yes |
#[derive(Debug, thiserror::Error)]
pub enum BreakerError {
    /// The breaker is open; the call was not made.
    #[error("circuit open for {system}, retry in {retry_in:?}")]
    Open {
        /// The protected system.
        system: String,
        /// Time until the next half-open probe.
        retry_in: Duration,
    },
}

impl ErrorCode for BreakerError {
    fn code(&self) -> &'static str {
        match self {
            Self::Open { .. } => "BREAKER_OPEN",
        }
    }

    fn is_recoverable(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy)]
struct CallRecord {
    success: bool,
    duration: Duration,
}

/// Circuit breaker for one system.
#[derive(Debug)]
pub struct CircuitBreaker {
    system: SystemId,
    config: BreakerConfig,
    state: BreakerState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
    recent: VecDeque<CallRecord>,
}

impl CircuitBreaker {
    /// Creates a closed breaker.
    #[must_use]
    pub fn new(system: SystemId, config: BreakerConfig) -> Self {
        Self {
            system,
            config,
            state: BreakerState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            opened_at: None,
            recent: VecDeque::new(),
        }
    }

    /// Current state, after applying any due open→half-open
    /// transition.
    pub fn state(&mut self) -> BreakerState {
        self.maybe_probe();
        self.state
    }

    /// Asks permission to invoke the protected system.
    pub fn try_acquire(&mut self) -> Result<(), BreakerError> {
        self.maybe_probe();
        match self.state {
            BreakerState::Closed | BreakerState::HalfOpen => Ok(()),
            BreakerState::Open => {
                let elapsed = self
                    .opened_at
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::ZERO);
                let retry_in = self.config.recovery_interval.saturating_sub(elapsed);
                Err(BreakerError::Open {
                    system: self.system.to_string(),
                    retry_in,
                })
            }
        }
    }

    fn maybe_probe(&mut self) {
        if self.state == BreakerState::Open {
            if let Some(opened) = self.opened_at {
                if opened.elapsed() >= self.config.recovery_interval {
                    debug!(system = %self.system, "breaker half-open, probing");
                    self.state = BreakerState::HalfOpen;
                    self.consecutive_successes = 0;
                }
            }
        }
    }

    /// Records a completed call.
    pub fn record_success(&mut self, duration: Duration) {
        self.push_record(CallRecord {
            success: true,
            duration,
        });
        self.consecutive_failures = 0;
        if self.state == BreakerState::HalfOpen {
            self.consecutive_successes += 1;
            if self.consecutive_successes >= self.config.success_threshold {
                debug!(system = %self.system, "breaker closed after recovery");
                self.state = BreakerState::Closed;
                self.opened_at = None;
            }
        }
    }

    /// Records a failed or timed-out call.
    pub fn record_failure(&mut self, duration: Duration) {
        self.push_record(CallRecord {
            success: false,
            duration,
        });
        self.consecutive_successes = 0;
        match self.state {
            BreakerState::HalfOpen => self.open(),
            BreakerState::Closed => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= self.config.failure_threshold {
                    self.open();
                }
            }
            BreakerState::Open => {}
        }
    }

    fn open(&mut self) {
        warn!(system = %self.system, "breaker opened");
        self.state = BreakerState::Open;
        self.opened_at = Some(Instant::now());
        self.consecutive_failures = 0;
        self.consecutive_successes = 0;
    }

    fn push_record(&mut self, record: CallRecord) {
        self.recent.push_back(record);
        while self.recent.len() > self.config.window {
            self.recent.pop_front();
        }
    }

    /// Health score 0-100.
    ///
    /// `success_ratio × state_multiplier × slow_call_penalty`,
    /// rounded. A breaker with no history scores 100 when closed.
    #[must_use]
    pub fn health_score(&self) -> u8 {
        let multiplier = match self.state {
            BreakerState::Closed => 1.0,
            BreakerState::HalfOpen => 0.5,
            BreakerState::Open => 0.0,
        };
        if self.recent.is_empty() {
            return (100.0 * multiplier) as u8;
        }
        let successes = self.recent.iter().filter(|r| r.success).count();
        let ratio = successes as f64 / self.recent.len() as f64;

        let avg_nanos = self
            .recent
            .iter()
            .map(|r| r.duration.as_nanos())
            .sum::<u128>()
            / self.recent.len() as u128;
        let threshold_nanos = self.config.slow_call_threshold.as_nanos().max(1);
        let penalty = if avg_nanos <= threshold_nanos {
            1.0
        } else {
            (threshold_nanos as f64 / avg_nanos as f64).max(0.25)
        };

        (ratio * multiplier * penalty * 100.0).round() as u8
    }
}

/// One breaker per system, created on first use.
#[derive(Debug, Default)]
pub struct BreakerSet {
    config: BreakerConfig,
    breakers: Mutex<HashMap<SystemId, CircuitBreaker>>,
}

impl BreakerSet {
    /// Creates an empty set sharing one config.
    #[must_use]
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// Asks permission to invoke `system`.
    pub fn try_acquire(&self, system: &SystemId) -> Result<(), BreakerError> {
        let mut breakers = self.breakers.lock();
        breakers
            .entry(system.clone())
            .or_insert_with(|| CircuitBreaker::new(system.clone(), self.config.clone()))
            .try_acquire()
    }

    /// Records a call outcome for `system`.
    pub fn record(&self, system: &SystemId, success: bool, duration: Duration) {
        let mut breakers = self.breakers.lock();
        let breaker = breakers
            .entry(system.clone())
            .or_insert_with(|| CircuitBreaker::new(system.clone(), self.config.clone()));
        if success {
            breaker.record_success(duration);
        } else {
            breaker.record_failure(duration);
        }
    }

    /// Health score per system seen so far.
    #[must_use]
    pub fn health(&self) -> HashMap<SystemId, u8> {
        self.breakers
            .lock()
            .iter()
            .map(|(id, b)| (id.clone(), b.health_score()))
            .collect()
    }

    /// Current state for `system`, if it has a breaker.
    #[must_use]
    pub fn state(&self, system: &SystemId) -> Option<BreakerState> {
        self.breakers.lock().get_mut(system).map(|b| b.state())
    }
}
