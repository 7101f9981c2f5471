//! Per-destination-tract failure isolation.
//!
//! A [`CircuitBreaker`] guards the route into one tract. It cycles through
//! three states:
//!
//! ```text
//! Closed ──(failures >= F)──> Open ──(R elapsed)──> HalfOpen
//!   ^                                                  │
//!   └──────────(successes >= S)────────────────────────┘
//!                          (any failure in HalfOpen reopens)
//! ```
//!
//! Callers gate a unit of work with [`CircuitBreaker::try_acquire`] and then
//! report the outcome with [`CircuitBreaker::record_success`] or
//! [`CircuitBreaker::record_failure`]. An open circuit is reported as a
//! value, not an exception — the route boundary turns it into a `-1` id.

use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation; every call executes.
    Closed,
    /// Failures exceeded the threshold; calls are refused.
    Open,
    /// Probing recovery; calls execute, successes accumulate toward Closed.
    HalfOpen,
}

/// Thresholds and timing for a [`CircuitBreaker`].
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// How long the circuit stays open before probing recovery.
    pub recovery_timeout: Duration,
    /// Successes required in HalfOpen before closing again.
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 10,
            recovery_timeout: Duration::from_secs(5),
            success_threshold: 3,
        }
    }
}

/// Returned by [`CircuitBreaker::try_acquire`] when the circuit is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitOpen;

impl std::fmt::Display for CircuitOpen {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("circuit breaker is open")
    }
}

impl std::error::Error for CircuitOpen {}

struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_at: Option<Instant>,
}

/// Circuit breaker for tract isolation.
///
/// State transitions and outcome observations are serialized through one
/// internal mutex, so an acquire and the matching record are each atomic with
/// respect to every other breaker operation.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure_at: None,
            }),
        }
    }

    /// Gate a call. Returns `Err(CircuitOpen)` while the circuit is open and
    /// the recovery timeout has not yet elapsed; otherwise the call may
    /// proceed (transitioning Open → HalfOpen when the timeout has passed).
    pub async fn try_acquire(&self) -> Result<(), CircuitOpen> {
        let mut inner = self.inner.lock().await;
        if inner.state == CircuitState::Open {
            let recovered = inner
                .last_failure_at
                .map(|t| t.elapsed() >= self.config.recovery_timeout)
                .unwrap_or(true);
            if recovered {
                inner.state = CircuitState::HalfOpen;
                inner.success_count = 0;
                log::info!("circuit breaker entering HalfOpen state");
            } else {
                return Err(CircuitOpen);
            }
        }
        Ok(())
    }

    /// Record a successful call.
    ///
    /// In HalfOpen, enough successes close the circuit and reset the failure
    /// counter. In Closed, each success decays the failure counter toward 0.
    pub async fn record_success(&self) {
        let mut inner = self.inner.lock().await;
        match inner.state {
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    log::info!("circuit breaker closed (recovered)");
                }
            }
            CircuitState::Closed => {
                inner.failure_count = inner.failure_count.saturating_sub(1);
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed call.
    ///
    /// Enough consecutive failures open the circuit; any failure during
    /// HalfOpen reopens it immediately.
    pub async fn record_failure(&self) {
        let mut inner = self.inner.lock().await;
        inner.failure_count += 1;
        inner.last_failure_at = Some(Instant::now());

        if inner.failure_count >= self.config.failure_threshold {
            if inner.state != CircuitState::Open {
                log::warn!(
                    "circuit breaker open (failures: {})",
                    inner.failure_count
                );
            }
            inner.state = CircuitState::Open;
        } else if inner.state == CircuitState::HalfOpen {
            inner.state = CircuitState::Open;
            log::warn!("circuit breaker reopened during recovery");
        }
    }

    /// Current state (for stats and tests).
    pub async fn state(&self) -> CircuitState {
        self.inner.lock().await.state
    }
}
