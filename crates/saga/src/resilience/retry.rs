//! Bounded retry on `backon` backoff builders.

use std::future::Future;
use std::time::Duration;

use backon::{BackoffBuilder, ConstantBuilder, ExponentialBuilder, Retryable};

/// Shape of the wait between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay before every retry.
    Constant,
    /// Delay doubles from the minimum up to the cap.
    Exponential,
}

/// How often and how patiently an operation is retried.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Zero behaves like one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub min_delay: Duration,
    /// Cap on the delay.
    pub max_delay: Duration,
    pub backoff: Backoff,
    /// Adds a random share of the current delay to each wait.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(3, Duration::from_millis(200))
    }
}

impl RetryPolicy {
    /// Same delay between every attempt.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            min_delay: delay,
            max_delay: delay,
            backoff: Backoff::Constant,
            jitter: false,
        }
    }

    /// Doubling delay starting at `min_delay`, capped at `max_delay`, with jitter.
    pub fn exponential(max_attempts: u32, min_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            min_delay,
            max_delay,
            backoff: Backoff::Exponential,
            jitter: true,
        }
    }

    /// Runs the operation once, never retrying.
    pub fn none() -> Self {
        Self::fixed(1, Duration::ZERO)
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    fn retries(&self) -> usize {
        self.max_attempts.saturating_sub(1) as usize
    }

    fn constant_builder(&self) -> ConstantBuilder {
        let builder = ConstantBuilder::default()
            .with_delay(self.min_delay)
            .with_max_times(self.retries());
        if self.jitter {
            builder.with_jitter()
        } else {
            builder
        }
    }

    fn exponential_builder(&self) -> ExponentialBuilder {
        let builder = ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.retries());
        if self.jitter {
            builder.with_jitter()
        } else {
            builder
        }
    }

    /// The waits this policy would sleep between attempts, in order.
    pub fn delays(&self) -> Vec<Duration> {
        match self.backoff {
            Backoff::Constant => self.constant_builder().build().collect(),
            Backoff::Exponential => self.exponential_builder().build().collect(),
        }
    }
}

/// Runs `operation` until it succeeds, fails with an error `should_retry`
/// rejects, or the policy's attempts are used up. The last error is returned.
pub async fn with_retry<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    should_retry: P,
    operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    match policy.backoff {
        Backoff::Constant => {
            run(policy.constant_builder(), policy.max_attempts, should_retry, operation).await
        }
        Backoff::Exponential => {
            run(policy.exponential_builder(), policy.max_attempts, should_retry, operation).await
        }
    }
}

async fn run<B, T, E, F, Fut, P>(
    builder: B,
    max_attempts: u32,
    should_retry: P,
    operation: F,
) -> Result<T, E>
where
    B: BackoffBuilder,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;
    operation
        .retry(builder)
        .when(should_retry)
        .notify(|err: &E, delay: Duration| {
            attempt += 1;
            tracing::warn!(
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "transient failure, retrying"
            );
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::fixed(max_attempts, Duration::from_millis(1))
    }

    #[test]
    fn test_exponential_backoff_is_capped() {
        let policy = RetryPolicy::exponential(
            5,
            Duration::from_millis(100),
            Duration::from_millis(300),
        )
        .without_jitter();

        let delays = policy.delays();
        assert_eq!(delays.len(), 4);
        assert_eq!(delays[0], Duration::from_millis(100));
        assert_eq!(delays[1], Duration::from_millis(200));
        assert!(delays.iter().all(|d| *d <= Duration::from_millis(300)));
        assert_eq!(delays[3], Duration::from_millis(300));
    }

    #[test]
    fn test_fixed_delay_never_grows() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delays(), vec![Duration::from_millis(200); 2]);
    }

    #[test]
    fn test_single_attempt_has_no_delays() {
        assert!(RetryPolicy::none().delays().is_empty());
        assert!(quick(0).delays().is_empty());
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> = with_retry(&quick(3), |_| true, || async {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 { Err(format!("attempt {n}")) } else { Ok(n) }
        })
        .await;

        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = with_retry(&quick(4), |_| true, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err("still broken".to_string())
        })
        .await;

        assert_eq!(result, Err("still broken".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_exponential_policy_retries_with_jitter() {
        let calls = AtomicU32::new(0);
        let policy =
            RetryPolicy::exponential(3, Duration::from_millis(1), Duration::from_millis(4));
        let result: Result<(), String> = with_retry(&policy, |_| true, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err("down".to_string())
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error_stops_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> =
            with_retry(&quick(5), |e: &String| e != "fatal", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("fatal".to_string())
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_attempts_still_runs_once() {
        let calls = AtomicU32::new(0);
        let _: Result<(), String> = with_retry(&quick(0), |_| true, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err("nope".to_string())
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
