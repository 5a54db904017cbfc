//! # Retry Executor
//!
//! Wraps a remote operation with bounded exponential backoff.
//!
//! ## Attempt Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Retry Executor                                   │
//! │                                                                         │
//! │  attempt 1 ──► Ok ───────────────────────────────────────► return Ok   │
//! │      │                                                                  │
//! │      └─ Err ─► kind?                                                    │
//! │                 ├── Unauthorized / ClientError / Validation            │
//! │                 │      └──────────────────────────────────► return Err │
//! │                 └── Retryable                                          │
//! │                        ├── attempts left? ── no ──────────► return Err │
//! │                        └── yes: sleep(base·2ⁿ + jitter), next attempt  │
//! │                                                                         │
//! │  Attempts are strictly sequential. The error returned after the last   │
//! │  attempt is the one the operation produced, unwrapped.                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::RetrySettings;
use crate::error::GatewayResult;

// =============================================================================
// Retry Policy
// =============================================================================

/// Attempt ceiling and delay schedule.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&RetrySettings::default())
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &RetrySettings) -> Self {
        RetryPolicy {
            max_attempts: settings.max_attempts.max(1),
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            max_jitter: Duration::from_millis(settings.max_jitter_ms),
        }
    }

    /// Creates the exponential schedule. Randomization is disabled here;
    /// jitter is added separately so the schedule itself is monotonic.
    fn create_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.base_delay,
            current_interval: self.base_delay,
            max_interval: self.max_delay,
            multiplier: 2.0,
            randomization_factor: 0.0,
            max_elapsed_time: None,
            ..Default::default()
        }
    }

    /// Delays between attempts, jitter excluded.
    pub fn schedule(&self) -> Vec<Duration> {
        let mut backoff = self.create_backoff();
        (1..self.max_attempts)
            .map(|_| backoff.next_backoff().unwrap_or(self.max_delay))
            .collect()
    }

    fn jitter(&self) -> Duration {
        let max = self.max_jitter.as_millis() as u64;
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..=max))
    }
}

// =============================================================================
// Retry Executor
// =============================================================================

/// Runs operations under a [`RetryPolicy`].
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        RetryExecutor { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs `operation` until it succeeds, fails with a non-retryable
    /// error, or the attempt ceiling is reached.
    ///
    /// `context` names the operation in logs.
    pub async fn run<T, F, Fut>(&self, context: &str, mut operation: F) -> GatewayResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = GatewayResult<T>>,
    {
        let mut backoff = self.policy.create_backoff();
        let mut attempt = 1u32;

        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(context, attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => {
                    let kind = err.kind();

                    if !kind.is_retryable() {
                        debug!(context, attempt, %kind, error = %err, "Not retrying");
                        return Err(err);
                    }

                    if attempt >= self.policy.max_attempts {
                        warn!(
                            context,
                            attempts = attempt,
                            error = %err,
                            "Giving up after max attempts"
                        );
                        return Err(err);
                    }

                    let delay = backoff.next_backoff().unwrap_or(self.policy.max_delay)
                        + self.policy.jitter();
                    debug!(context, attempt, ?delay, error = %err, "Retrying after delay");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;
    use skygate_core::ValidationError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn executor() -> RetryExecutor {
        RetryExecutor::new(RetryPolicy::default())
    }

    #[test]
    fn test_schedule_is_non_decreasing() {
        let policy = RetryPolicy {
            max_attempts: 6,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(3000),
            max_jitter: Duration::ZERO,
        };
        let schedule = policy.schedule();
        assert_eq!(schedule.len(), 5);
        assert_eq!(schedule[0], Duration::from_millis(500));
        assert_eq!(schedule[1], Duration::from_millis(1000));
        assert_eq!(schedule[2], Duration::from_millis(2000));
        assert!(schedule.windows(2).all(|pair| pair[0] <= pair[1]));
        assert_eq!(schedule[4], Duration::from_millis(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_failure_stops_at_ceiling() {
        let calls = Arc::new(AtomicU32::new(0));
        let started = tokio::time::Instant::now();

        let counter = calls.clone();
        let result: GatewayResult<()> = executor()
            .run("get-feed", || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(GatewayError::remote(Some(503), None, "Service Unavailable"))
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let err = result.unwrap_err();
        assert_eq!(err.status(), Some(503));
        // 500ms + 1000ms of backoff, jitter on top.
        assert!(started.elapsed() >= Duration::from_millis(1500));
        assert!(started.elapsed() <= Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_kinds_get_one_attempt() {
        for err in [
            GatewayError::remote(Some(401), None, "Unauthorized"),
            GatewayError::remote(Some(404), None, "Not Found"),
            GatewayError::Validation(ValidationError::Required {
                field: "text".into(),
            }),
        ] {
            let calls = Arc::new(AtomicU32::new(0));
            let counter = calls.clone();
            let expected = err.clone();

            let result: GatewayResult<()> = executor()
                .run("op", || {
                    let counter = counter.clone();
                    let err = err.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Err(err)
                    }
                })
                .await;

            assert_eq!(calls.load(Ordering::SeqCst), 1);
            assert_eq!(result.unwrap_err(), expected);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_on_second_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = executor()
            .run("get-timeline", || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(GatewayError::remote(Some(429), None, "Rate Limit Exceeded"))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
