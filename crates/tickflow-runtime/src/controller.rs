//! Bounded execution of system calls.
//!
//! The [`ExecutionController`] is the only path through which the
//! orchestrator invokes systems. It enforces:
//!
//! - a concurrency ceiling (`Semaphore`-bounded)
//! - a load ceiling: calls arriving while too many are already
//!   admitted are rejected instead of queued
//! - a per-call timeout whose timer owns cancellation: when it
//!   fires, the call's token is cancelled and the callee is expected
//!   to return promptly
//! - [`cancel_all`](ExecutionController::cancel_all), which trips
//!   every in-flight call's token

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tickflow_system::SystemError;
use tickflow_types::{ErrorCode, SystemId};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Controller tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Calls running at once.
    pub max_concurrent: usize,
    /// Calls admitted (running plus waiting) before new ones are
    /// rejected.
    pub max_load: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 8,
            max_load: 64,
        }
    }
}

/// Errors from one controlled call.
///
/// Non-fatal to the tick: the orchestrator collects them per system
/// and keeps going.
///
/// # Error Codes
///
/// | Variant | Code | Recoverable |
/// |---------|------|-------------|
/// | `Timeout` | `CONTROL_TIMEOUT` | Yes |
/// | `Rejected` | `CONTROL_REJECTED` | Yes |
/// | `Cancelled` | `CONTROL_CANCELLED` | No |
/// | `Failed` | `CONTROL_FAILED` | Yes |
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    /// The call exceeded its wall-clock budget and was cancelled.
    #[error("{system} timed out after {timeout:?}")]
    Timeout {
        /// The system that overran.
        system: String,
        /// The budget that was exceeded.
        timeout: Duration,
    },

    /// The call was refused at admission because the controller is
    /// at its load ceiling.
    #[error("rejected at load ceiling: {active} active, limit {limit}")]
    Rejected {
        /// Admitted calls at the time.
        active: usize,
        /// The ceiling.
        limit: usize,
    },

    /// The call was cancelled by `cancel_all` or shutdown.
    #[error("execution cancelled")]
    Cancelled,

    /// The system itself returned an error.
    #[error("{system} failed: {reason}")]
    Failed {
        /// The failing system.
        system: String,
        /// The system's error message.
        reason: String,
    },
}

impl ErrorCode for ControlError {
    fn code(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "CONTROL_TIMEOUT",
            Self::Rejected { .. } => "CONTROL_REJECTED",
            Self::Cancelled => "CONTROL_CANCELLED",
            Self::Failed { .. } => "CONTROL_FAILED",
        }
    }

    fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }
}

/// Running totals, exposed in the orchestrator status snapshot.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ControllerStats {
    /// Calls admitted.
    pub started: u64,
    /// Calls that returned success.
    pub completed: u64,
    /// Calls whose system returned an error.
    pub failed: u64,
    /// Calls cancelled by their timeout.
    pub timed_out: u64,
    /// Calls refused at the load ceiling.
    pub rejected: u64,
    /// Calls cancelled by `cancel_all`.
    pub cancelled: u64,
}

/// Admits, bounds and times system calls.
pub struct ExecutionController {
    config: ControllerConfig,
    semaphore: Arc<Semaphore>,
    admitted: AtomicUsize,
    root: Mutex<CancellationToken>,
    stats: Mutex<ControllerStats>,
}

impl ExecutionController {
    /// Creates a controller.
    #[must_use]
    pub fn new(config: ControllerConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self {
            config,
            semaphore,
            admitted: AtomicUsize::new(0),
            root: Mutex::new(CancellationToken::new()),
            stats: Mutex::new(ControllerStats::default()),
        }
    }

    /// Runs one system call under the controller's bounds.
    ///
    /// `op` receives a child cancellation token; the callee should
    /// poll it between units of work. When the timeout fires the
    /// token is cancelled before the error is returned.
    pub async fn run<T, Fut>(
        &self,
        system: &SystemId,
        timeout: Duration,
        op: impl FnOnce(CancellationToken) -> Fut,
    ) -> Result<T, ControlError>
    where
        Fut: Future<Output = Result<T, SystemError>>,
    {
        let admitted = self.admitted.fetch_add(1, Ordering::SeqCst);
        let _guard = AdmissionGuard(&self.admitted);
        if admitted >= self.config.max_load {
            self.stats.lock().rejected += 1;
            warn!(system = %system, active = admitted, "call rejected at load ceiling");
            return Err(ControlError::Rejected {
                active: admitted,
                limit: self.config.max_load,
            });
        }
        self.stats.lock().started += 1;

        let root = self.root.lock().clone();
        let permit = tokio::select! {
            permit = self.semaphore.acquire() => match permit {
                Ok(p) => p,
                Err(_) => {
                    self.stats.lock().cancelled += 1;
                    return Err(ControlError::Cancelled);
                }
            },
            _ = root.cancelled() => {
                self.stats.lock().cancelled += 1;
                return Err(ControlError::Cancelled);
            }
        };
        let _permit = permit;

        let token = root.child_token();
        let started = Instant::now();
        let outcome = tokio::select! {
            r = tokio::time::timeout(timeout, op(token.clone())) => r,
            _ = root.cancelled() => {
                self.stats.lock().cancelled += 1;
                return Err(ControlError::Cancelled);
            }
        };

        match outcome {
            Ok(Ok(value)) => {
                self.stats.lock().completed += 1;
                debug!(system = %system, elapsed = ?started.elapsed(), "call completed");
                Ok(value)
            }
            Ok(Err(SystemError::Cancelled)) => {
                self.stats.lock().cancelled += 1;
                Err(ControlError::Cancelled)
            }
            Ok(Err(err)) => {
                self.stats.lock().failed += 1;
                Err(ControlError::Failed {
                    system: system.to_string(),
                    reason: err.to_string(),
                })
            }
            Err(_elapsed) => {
                // the timer owns cancellation: trip the callee's token
                token.cancel();
                self.stats.lock().timed_out += 1;
                warn!(system = %system, ?timeout, "call timed out");
                Err(ControlError::Timeout {
                    system: system.to_string(),
                    timeout,
                })
            }
        }
    }

    /// Cancels every in-flight call. The controller stays usable;
    /// later calls get a fresh root token.
    pub fn cancel_all(&self) {
        let mut root = self.root.lock();
        root.cancel();
        *root = CancellationToken::new();
    }

    /// Calls currently admitted (running plus waiting for a permit).
    #[must_use]
    pub fn active(&self) -> usize {
        self.admitted.load(Ordering::SeqCst)
    }

    /// Snapshot of the running totals.
    #[must_use]
    pub fn stats(&self) -> ControllerStats {
        *self.stats.lock()
    }
}

struct AdmissionGuard<'a>(&'a AtomicUsize);

impl Drop for AdmissionGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tickflow_types::assert_error_codes;

    fn controller(max_concurrent: usize, max_load: usize) -> ExecutionController {
        ExecutionController::new(ControllerConfig {
            max_concurrent,
            max_load,
        })
    }

    fn sys() -> SystemId {
        SystemId::named("economy")
    }

    #[tokio::test]
    async fn successful_call_passes_through() {
        let c = controller(2, 8);
        let out = c
            .run(&sys(), Duration::from_secs(1), |_token| async { Ok(42u32) })
            .await
            .unwrap();
        assert_eq!(out, 42);
        let stats = c.stats();
        assert_eq!(stats.started, 1);
        assert_eq!(stats.completed, 1);
    }

    #[tokio::test]
    async fn system_error_becomes_failed() {
        let c = controller(2, 8);
        let err = c
            .run(&sys(), Duration::from_secs(1), |_token| async {
                Err::<u32, _>(SystemError::execution("boom"))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::Failed { .. }));
        assert!(err.to_string().contains("boom"));
        assert_eq!(c.stats().failed, 1);
    }

    #[tokio::test]
    async fn timeout_cancels_the_callee() {
        let c = controller(2, 8);
        let err = c
            .run(&sys(), Duration::from_millis(20), |token| async move {
                token.cancelled().await;
                // observed the timer's cancellation
                Err::<u32, _>(SystemError::Cancelled)
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::Timeout { .. }));
        assert_eq!(c.stats().timed_out, 1);
    }

    #[tokio::test]
    async fn load_ceiling_rejects() {
        let c = Arc::new(controller(1, 2));

        let c1 = Arc::clone(&c);
        let slow1 = tokio::spawn(async move {
            c1.run(&sys(), Duration::from_secs(5), |_t| async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(())
            })
            .await
        });
        let c2 = Arc::clone(&c);
        let slow2 = tokio::spawn(async move {
            c2.run(&sys(), Duration::from_secs(5), |_t| async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(())
            })
            .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let err = c
            .run(&sys(), Duration::from_secs(1), |_t| async { Ok(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::Rejected { .. }));
        assert_eq!(c.stats().rejected, 1);

        slow1.await.unwrap().unwrap();
        slow2.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let c = Arc::new(controller(1, 8));
        let peak = Arc::new(AtomicUsize::new(0));
        let current = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let c = Arc::clone(&c);
            let peak = Arc::clone(&peak);
            let current = Arc::clone(&current);
            handles.push(tokio::spawn(async move {
                c.run(&sys(), Duration::from_secs(5), |_t| async move {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
                .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancel_all_trips_inflight_calls() {
        let c = Arc::new(controller(2, 8));
        let c2 = Arc::clone(&c);
        let pending = tokio::spawn(async move {
            c2.run(&sys(), Duration::from_secs(10), |token| async move {
                token.cancelled().await;
                Err::<u32, _>(SystemError::Cancelled)
            })
            .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        c.cancel_all();

        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(err, ControlError::Cancelled));

        // controller stays usable after cancel_all
        let out = c
            .run(&sys(), Duration::from_secs(1), |_t| async { Ok(7u32) })
            .await
            .unwrap();
        assert_eq!(out, 7);
    }

    #[test]
    fn error_codes_follow_convention() {
        assert_error_codes(
            &[
                ControlError::Timeout {
                    system: "sys:x".into(),
                    timeout: Duration::from_secs(1),
                },
                ControlError::Rejected {
                    active: 9,
                    limit: 8,
                },
                ControlError::Cancelled,
                ControlError::Failed {
                    system: "sys:x".into(),
                    reason: "boom".into(),
                },
            ],
            "CONTROL_",
        );
    }
}
