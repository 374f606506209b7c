//! Retry and circuit breaking for calls that leave the process.

pub mod circuit_breaker;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitOpenError, CircuitState};
pub use retry::{Backoff, RetryPolicy, with_retry};
