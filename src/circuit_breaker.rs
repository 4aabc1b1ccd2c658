//! Per-subscription circuit breaker: a rolling-window failure tracker and
//! three-state machine with single-probe half-open recovery (§4.4).

use crate::clock::Clock;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    /// Width of the rolling outcome window.
    pub window: Duration,
    /// Minimum samples in the window before the failure fraction is evaluated.
    pub min_samples: usize,
    /// Trip to `open` once the failure fraction strictly exceeds this.
    pub failure_threshold: f64,
    /// How long `open` must elapse before the next admission check may
    /// transition to `half_open`.
    pub open_duration: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            min_samples: 4,
            failure_threshold: 0.5,
            open_duration: Duration::from_secs(30),
        }
    }
}

struct Inner {
    state: CircuitState,
    outcomes: VecDeque<(u64, bool)>,
    opened_at: u64,
    probe_in_flight: bool,
}

/// Circuit breaker owned by the dispatcher on behalf of one subscription.
pub struct CircuitBreaker {
    clock: Arc<dyn Clock>,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_config(clock, CircuitBreakerConfig::default())
    }

    pub fn with_config(clock: Arc<dyn Clock>, config: CircuitBreakerConfig) -> Self {
        Self {
            clock,
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                outcomes: VecDeque::new(),
                opened_at: 0,
                probe_in_flight: false,
            }),
        }
    }

    /// Admission check (§4.4). `true` means the caller may proceed to invoke
    /// the handler; for `open` circuits whose pause has elapsed, or for
    /// `half_open` circuits with no probe in flight, this atomically claims
    /// the single probe slot.
    pub fn may_admit(&self) -> bool {
        let now = self.clock.now_millis();
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");

        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = now.saturating_sub(inner.opened_at);
                if elapsed >= self.config.open_duration.as_millis() as u64 {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    tracing::info!("circuit breaker -> half_open");
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    false
                } else {
                    inner.probe_in_flight = true;
                    true
                }
            }
        }
    }

    /// Record the outcome of an admitted dispatch.
    pub fn record(&self, success: bool) {
        let now = self.clock.now_millis();
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");

        match inner.state {
            CircuitState::HalfOpen => {
                inner.probe_in_flight = false;
                if success {
                    inner.state = CircuitState::Closed;
                    inner.outcomes.clear();
                    tracing::info!("circuit breaker -> closed");
                } else {
                    inner.state = CircuitState::Open;
                    inner.opened_at = now;
                    tracing::warn!("circuit breaker: probe failed -> open");
                }
            }
            CircuitState::Open => {
                // Late completion from before the circuit opened; the
                // outcome no longer reflects current behavior.
            }
            CircuitState::Closed => {
                inner.outcomes.push_back((now, success));
                let window_start = now.saturating_sub(self.config.window.as_millis() as u64);
                while let Some(&(ts, _)) = inner.outcomes.front() {
                    if ts < window_start {
                        inner.outcomes.pop_front();
                    } else {
                        break;
                    }
                }

                if inner.outcomes.len() >= self.config.min_samples {
                    let failures = inner.outcomes.iter().filter(|(_, ok)| !ok).count();
                    let fraction = failures as f64 / inner.outcomes.len() as f64;
                    if fraction > self.config.failure_threshold {
                        inner.state = CircuitState::Open;
                        inner.opened_at = now;
                        tracing::error!(
                            failures,
                            samples = inner.outcomes.len(),
                            "circuit breaker -> open"
                        );
                    }
                }
            }
        }
    }

    /// Clear a leaked `probe_in_flight` for a subscription that was admitted
    /// but never got to run (an earlier handler in the same attempt failed
    /// and aborted the sequence). Idempotent; does nothing outside `half_open`.
    pub fn release_unused_admission(&self) {
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        if inner.state == CircuitState::HalfOpen {
            inner.probe_in_flight = false;
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().expect("circuit breaker mutex poisoned").state
    }
}
