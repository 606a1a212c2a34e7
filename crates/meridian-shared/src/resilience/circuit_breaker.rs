//! Circuit breaker behaviour shared by `RelationalStore::health_probe` and
//! any other component that needs to stop hammering a failing dependency.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl From<u8> for CircuitState {
    fn from(v: u8) -> Self {
        match v {
            1 => Self::Open,
            2 => Self::HalfOpen,
            _ => Self::Closed,
        }
    }
}

impl From<CircuitState> for u8 {
    fn from(s: CircuitState) -> Self {
        match s {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerMetrics {
    pub state: CircuitState,
    pub consecutive_failures: u64,
    pub total_calls: u64,
}

/// A minimal, object-safe circuit breaker: opens after `failure_threshold`
/// consecutive failures, half-opens after `recovery_timeout`, and closes
/// again on the first success while half-open.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u64,
    recovery_timeout: Duration,
    state: AtomicU8,
    consecutive_failures: AtomicU64,
    total_calls: AtomicU64,
    opened_at: Mutex<Option<Instant>>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, failure_threshold: u64, recovery_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            failure_threshold,
            recovery_timeout,
            state: AtomicU8::new(CircuitState::Closed.into()),
            consecutive_failures: AtomicU64::new(0),
            total_calls: AtomicU64::new(0),
            opened_at: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::SeqCst))
    }

    /// Whether the circuit currently allows a call through. Transitions
    /// Open -> HalfOpen once `recovery_timeout` has elapsed.
    pub fn should_allow(&self) -> bool {
        match self.state() {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = self
                    .opened_at
                    .lock()
                    .unwrap()
                    .map(|at| at.elapsed() >= self.recovery_timeout)
                    .unwrap_or(true);
                if elapsed {
                    self.state
                        .store(CircuitState::HalfOpen.into(), Ordering::SeqCst);
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        self.total_calls.fetch_add(1, Ordering::SeqCst);
        self.consecutive_failures.store(0, Ordering::SeqCst);
        self.state.store(CircuitState::Closed.into(), Ordering::SeqCst);
        *self.opened_at.lock().unwrap() = None;
    }

    pub fn record_failure(&self) {
        self.total_calls.fetch_add(1, Ordering::SeqCst);
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures >= self.failure_threshold {
            self.state.store(CircuitState::Open.into(), Ordering::SeqCst);
            *self.opened_at.lock().unwrap() = Some(Instant::now());
        }
    }

    pub fn current_failures(&self) -> u64 {
        self.consecutive_failures.load(Ordering::SeqCst)
    }

    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    pub fn metrics(&self) -> CircuitBreakerMetrics {
        CircuitBreakerMetrics {
            state: self.state(),
            consecutive_failures: self.current_failures(),
            total_calls: self.total_calls.load(Ordering::SeqCst),
        }
    }
}
