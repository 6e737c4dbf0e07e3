//! Bounded retry around a single upstream call.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::warn;

/// How long to wait before the next attempt.
pub trait BackoffStrategy: Send + Sync {
    /// Delay after the failed attempt number `attempt` (1-based).
    fn delay(&self, attempt: usize) -> Duration;
}

/// Same delay between every attempt.
#[derive(Debug, Clone, Copy)]
pub struct FixedBackoff {
    delay: Duration,
}

impl FixedBackoff {
    #[must_use]
    pub const fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Default for FixedBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl BackoffStrategy for FixedBackoff {
    fn delay(&self, _attempt: usize) -> Duration {
        self.delay
    }
}

/// `step * attempt`, capped at `max`.
#[derive(Debug, Clone, Copy)]
pub struct LinearBackoff {
    step: Duration,
    max: Duration,
}

impl LinearBackoff {
    #[must_use]
    pub const fn new(step: Duration, max: Duration) -> Self {
        Self { step, max }
    }
}

impl BackoffStrategy for LinearBackoff {
    fn delay(&self, attempt: usize) -> Duration {
        let factor = u32::try_from(attempt).unwrap_or(u32::MAX);
        self.step.saturating_mul(factor).min(self.max)
    }
}

/// `base * 2^(attempt - 1)`, capped at `max`.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    base: Duration,
    max: Duration,
}

impl ExponentialBackoff {
    #[must_use]
    pub const fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }
}

impl BackoffStrategy for ExponentialBackoff {
    fn delay(&self, attempt: usize) -> Duration {
        let exponent = u32::try_from(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        let factor = 2_u32.checked_pow(exponent).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }
}

/// Whether a failure is worth another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transient,
    Permanent,
}

pub trait RetryClassifier: Send + Sync {
    fn classify(&self, error: &anyhow::Error) -> ErrorClass;
}

/// Treats every failure as transient.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryAll;

impl RetryClassifier for RetryAll {
    fn classify(&self, _error: &anyhow::Error) -> ErrorClass {
        ErrorClass::Transient
    }
}

/// Fails fast on HTTP 4xx responses except request timeout and rate limiting.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpStatusClassifier;

impl RetryClassifier for HttpStatusClassifier {
    fn classify(&self, error: &anyhow::Error) -> ErrorClass {
        let status = error
            .downcast_ref::<reqwest::Error>()
            .and_then(reqwest::Error::status);

        match status {
            Some(s) if s.is_client_error() && s.as_u16() != 408 && s.as_u16() != 429 => {
                ErrorClass::Permanent
            }
            _ => ErrorClass::Transient,
        }
    }
}

#[derive(Debug, Error)]
pub enum RetryError {
    /// Every attempt failed; carries the last attempt's error verbatim.
    #[error("upstream call failed after {attempts} attempts: {source}")]
    Exhausted {
        attempts: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("upstream call failed permanently on attempt {attempt}: {source}")]
    Permanent {
        attempt: usize,
        #[source]
        source: anyhow::Error,
    },
}

impl RetryError {
    /// Number of attempts made before giving up.
    #[must_use]
    pub const fn attempts(&self) -> usize {
        match self {
            Self::Exhausted { attempts, .. } => *attempts,
            Self::Permanent { attempt, .. } => *attempt,
        }
    }
}

/// Runs an operation up to `max_retries` times, sleeping between attempts.
#[derive(Clone)]
pub struct RetryExecutor {
    max_retries: usize,
    backoff: Arc<dyn BackoffStrategy>,
    classifier: Arc<dyn RetryClassifier>,
}

impl RetryExecutor {
    /// A `max_retries` of zero is treated as a single attempt.
    #[must_use]
    pub fn new(max_retries: usize) -> Self {
        Self {
            max_retries: max_retries.max(1),
            backoff: Arc::new(FixedBackoff::default()),
            classifier: Arc::new(RetryAll),
        }
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: Arc<dyn BackoffStrategy>) -> Self {
        self.backoff = backoff;
        self
    }

    #[must_use]
    pub fn with_classifier(mut self, classifier: Arc<dyn RetryClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    #[must_use]
    pub const fn max_retries(&self) -> usize {
        self.max_retries
    }

    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let mut attempt = 1;
        loop {
            let error = match operation().await {
                Ok(result) => return Ok(result),
                Err(e) => e,
            };

            if self.classifier.classify(&error) == ErrorClass::Permanent {
                return Err(RetryError::Permanent {
                    attempt,
                    source: error,
                });
            }

            if attempt >= self.max_retries {
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    source: error,
                });
            }

            let delay = self.backoff.delay(attempt);
            warn!(
                "Upstream call failed (attempt {}/{}): {error}. Retrying after {}ms...",
                attempt,
                self.max_retries,
                delay.as_millis()
            );
            sleep(delay).await;
            attempt += 1;
        }
    }
}

impl std::fmt::Debug for RetryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Zero-length backoff that counts how often it was asked for a delay.
    #[derive(Default)]
    struct CountingBackoff {
        sleeps: AtomicUsize,
    }

    impl BackoffStrategy for CountingBackoff {
        fn delay(&self, _attempt: usize) -> Duration {
            self.sleeps.fetch_add(1, Ordering::SeqCst);
            Duration::ZERO
        }
    }

    #[tokio::test]
    async fn succeeds_on_first_attempt() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let executor = RetryExecutor::new(3).with_backoff(Arc::new(CountingBackoff::default()));
        let result = executor
            .execute(|| {
                let attempts = attempts.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, anyhow::Error>("ok")
                }
            })
            .await;
        assert_eq!(result.unwrap(), "ok");
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn succeeds_on_third_attempt_after_two_sleeps() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let backoff = Arc::new(CountingBackoff::default());
        let executor = RetryExecutor::new(5).with_backoff(backoff.clone());
        let result = executor
            .execute(|| {
                let attempts = attempts.clone();
                async move {
                    let count = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                    if count < 3 {
                        Err(anyhow::anyhow!("transient failure {count}"))
                    } else {
                        Ok(String::from("third time lucky"))
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), "third time lucky");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(backoff.sleeps.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn exhausts_after_exactly_max_retries() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let backoff = Arc::new(CountingBackoff::default());
        let executor = RetryExecutor::new(4).with_backoff(backoff.clone());
        let result: Result<(), RetryError> = executor
            .execute(|| {
                let attempts = attempts.clone();
                async move {
                    let count = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                    Err(anyhow::anyhow!("failure {count}"))
                }
            })
            .await;

        let err = result.unwrap_err();
        assert!(matches!(err, RetryError::Exhausted { attempts: 4, .. }));
        // The final attempt's error is surfaced verbatim.
        assert!(err.to_string().ends_with("failure 4"));
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        assert_eq!(backoff.sleeps.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn zero_retries_still_attempts_once() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let executor = RetryExecutor::new(0);
        let result: Result<(), RetryError> = executor
            .execute(|| {
                let attempts = attempts.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err(anyhow::anyhow!("nope"))
                }
            })
            .await;
        assert_eq!(result.unwrap_err().attempts(), 1);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    struct NeverRetry;

    impl RetryClassifier for NeverRetry {
        fn classify(&self, _error: &anyhow::Error) -> ErrorClass {
            ErrorClass::Permanent
        }
    }

    #[tokio::test]
    async fn permanent_errors_fail_fast() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let executor = RetryExecutor::new(5).with_classifier(Arc::new(NeverRetry));
        let result: Result<(), RetryError> = executor
            .execute(|| {
                let attempts = attempts.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err(anyhow::anyhow!("malformed input"))
                }
            })
            .await;
        assert!(matches!(
            result.unwrap_err(),
            RetryError::Permanent { attempt: 1, .. }
        ));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backoff_strategies() {
        let fixed = FixedBackoff::default();
        assert_eq!(fixed.delay(1), Duration::from_secs(1));
        assert_eq!(fixed.delay(7), Duration::from_secs(1));

        let linear = LinearBackoff::new(Duration::from_secs(2), Duration::from_secs(10));
        assert_eq!(linear.delay(1), Duration::from_secs(2));
        assert_eq!(linear.delay(4), Duration::from_secs(8));
        assert_eq!(linear.delay(9), Duration::from_secs(10));

        let exponential =
            ExponentialBackoff::new(Duration::from_millis(500), Duration::from_secs(30));
        assert_eq!(exponential.delay(1), Duration::from_millis(500));
        assert_eq!(exponential.delay(3), Duration::from_secs(2));
        assert_eq!(exponential.delay(40), Duration::from_secs(30));
    }

    #[test]
    fn retry_all_never_gives_up_early() {
        let error = anyhow::anyhow!("anything");
        assert_eq!(RetryAll.classify(&error), ErrorClass::Transient);
        assert_eq!(HttpStatusClassifier.classify(&error), ErrorClass::Transient);
    }
}
