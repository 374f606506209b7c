//! Failure-rate circuit breaker.
//!
//! The breaker watches the outcomes of the last `window_size` calls. Once at
//! least `minimum_calls` have been seen and the share of failures reaches
//! `failure_rate_threshold`, it opens and rejects calls without running them.
//! After `open_duration` a single trial call is let through (half-open): success
//! closes the breaker, failure opens it again.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use thiserror::Error;

/// Configuration for the circuit breaker.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Failure share in `[0, 1]` that opens the breaker.
    pub failure_rate_threshold: f64,
    /// Calls needed in the window before the rate is trusted.
    pub minimum_calls: usize,
    /// Number of most recent calls considered.
    pub window_size: usize,
    /// How long the breaker stays open before probing.
    pub open_duration: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_rate_threshold: 0.5,
            minimum_calls: 5,
            window_size: 10,
            open_duration: Duration::from_secs(10),
        }
    }
}

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls flow normally.
    Closed,
    /// Calls are rejected.
    Open,
    /// One trial call is allowed through.
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Returned instead of running the call while the breaker is open.
#[derive(Debug, Clone, Error)]
#[error("Circuit breaker '{name}' is open")]
pub struct CircuitOpenError {
    pub name: String,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    /// `true` marks a failed call.
    window: VecDeque<bool>,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

/// Failure-rate circuit breaker shared by every call to one dependency.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                window: VecDeque::with_capacity(config.window_size),
                opened_at: None,
                trial_in_flight: false,
            }),
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state. An open breaker whose cool-down elapsed still reads
    /// `Open` until the next call tries it.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Asks for permission to make a call.
    pub fn try_acquire(&self) -> Result<(), CircuitOpenError> {
        self.acquire().map(|_| ())
    }

    /// Grants a call, returning `true` when it is the half-open trial call.
    fn acquire(&self) -> Result<bool, CircuitOpenError> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Ok(false),
            CircuitState::Open => {
                let cooled = inner
                    .opened_at
                    .is_some_and(|at| at.elapsed() >= self.config.open_duration);
                if cooled {
                    self.transition(&mut inner, CircuitState::HalfOpen);
                    inner.trial_in_flight = true;
                    Ok(true)
                } else {
                    Err(self.open_error())
                }
            }
            CircuitState::HalfOpen if !inner.trial_in_flight => {
                inner.trial_in_flight = true;
                Ok(true)
            }
            CircuitState::HalfOpen => Err(self.open_error()),
        }
    }

    /// Frees the half-open slot of a trial call that never finished.
    fn release_trial(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.trial_in_flight = false;
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.window.clear();
                self.transition(&mut inner, CircuitState::Closed);
            }
            CircuitState::Closed => self.push(&mut inner, false),
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::HalfOpen => self.transition(&mut inner, CircuitState::Open),
            CircuitState::Closed => {
                self.push(&mut inner, true);
                if self.should_open(&inner) {
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Runs `operation` if the breaker allows it and records the outcome.
    /// Only errors for which `is_failure` holds count against the breaker.
    pub async fn call<T, E, F, Fut>(
        &self,
        operation: F,
        is_failure: impl Fn(&E) -> bool,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<CircuitOpenError>,
    {
        let trial = self.acquire()?;
        let mut guard = TrialGuard {
            breaker: self,
            armed: trial,
        };
        let result = operation().await;
        guard.armed = false;
        match &result {
            Err(err) if is_failure(err) => self.record_failure(),
            _ => self.record_success(),
        }
        result
    }

    fn push(&self, inner: &mut Inner, failed: bool) {
        if inner.window.len() == self.config.window_size.max(1) {
            inner.window.pop_front();
        }
        inner.window.push_back(failed);
    }

    fn should_open(&self, inner: &Inner) -> bool {
        let calls = inner.window.len();
        if calls < self.config.minimum_calls.max(1) {
            return false;
        }
        let failures = inner.window.iter().filter(|failed| **failed).count();
        failures as f64 / calls as f64 >= self.config.failure_rate_threshold
    }

    fn transition(&self, inner: &mut Inner, next: CircuitState) {
        if inner.state == next {
            return;
        }
        let previous = inner.state;
        inner.state = next;
        inner.trial_in_flight = false;
        inner.opened_at = (next == CircuitState::Open).then(Instant::now);

        metrics::counter!("circuit_breaker_transitions_total", "state" => next.as_str())
            .increment(1);
        match next {
            CircuitState::Open => tracing::warn!(
                breaker = %self.name,
                from = %previous,
                open_for_ms = self.config.open_duration.as_millis() as u64,
                "circuit breaker opened"
            ),
            _ => tracing::info!(
                breaker = %self.name,
                from = %previous,
                to = %next,
                "circuit breaker state changed"
            ),
        }
    }

    fn open_error(&self) -> CircuitOpenError {
        CircuitOpenError {
            name: self.name.clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Releases the half-open slot if a trial call is dropped mid-flight.
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.release_trial();
        }
    }
}
