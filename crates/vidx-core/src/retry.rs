//! Retry policy for external calls
//!
//! One policy object `{max_attempts, base_delay, max_delay, multiplier,
//! jitter, classifier}` wraps every provider and vector-store call site.
//! Delays grow exponentially, are capped, get random jitter, and respect a
//! provider's `Retry-After` hint.

use crate::config::RetryConfig;
use crate::{ProviderErrorKind, Result, VidxError};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Longest `Retry-After` we are willing to sleep for
const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Exponential backoff with jitter
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter: f64,
    classifier: fn(&VidxError) -> bool,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            multiplier: 2.0,
            jitter: 0.0,
            classifier: VidxError::is_retryable,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        )
        .with_multiplier(config.multiplier)
        .with_jitter(config.jitter)
    }

    /// Single attempt, no retries
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier.max(1.0);
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Replace the default "transient provider or infrastructure" rule
    pub fn with_classifier(mut self, classifier: fn(&VidxError) -> bool) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn should_retry(&self, err: &VidxError) -> bool {
        (self.classifier)(err)
    }

    /// Backoff before retry number `retry` (1-based), without jitter
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = secs.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }

    /// Delay to sleep after `err` ended attempt `retry`
    pub fn delay_for(&self, retry: u32, err: &VidxError) -> Duration {
        let mut delay = self.backoff(retry);
        if self.jitter > 0.0 && !delay.is_zero() {
            let spread = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
            delay = Duration::from_secs_f64((delay.as_secs_f64() * (1.0 + spread)).max(0.0));
        }
        if let VidxError::Provider {
            retry_after: Some(hint),
            ..
        } = err
        {
            delay = delay.max((*hint).min(MAX_RETRY_AFTER));
        }
        delay
    }

    /// Run `operation` until it succeeds, fails permanently, or attempts run out
    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.max_attempts && self.should_retry(&err) => {
                    let delay = self.delay_for(attempt, &err);
                    tracing::warn!(
                        operation,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retrying after transient failure"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    if attempt > 1 {
                        tracing::debug!(operation, attempt, error = %err, "Giving up");
                    }
                    return Err(err);
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// Await `future` with a deadline; expiry becomes a provider timeout
pub async fn with_timeout<T, Fut>(limit: Duration, what: &str, future: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, future).await {
        Ok(result) => result,
        Err(_) => Err(VidxError::provider(
            ProviderErrorKind::Timeout,
            format!("{what} exceeded {}s", limit.as_secs_f64()),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::from_millis(1), Duration::from_millis(5))
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy::new(5, Duration::from_secs(2), Duration::from_secs(10));
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(2), Duration::from_secs(4));
        assert_eq!(policy.backoff(3), Duration::from_secs(8));
        assert_eq!(policy.backoff(4), Duration::from_secs(10));
    }

    #[test]
    fn test_jitter_stays_in_band() {
        let policy = RetryPolicy::new(3, Duration::from_secs(2), Duration::from_secs(10))
            .with_jitter(0.25);
        let err = VidxError::provider(ProviderErrorKind::Unavailable, "503");
        for _ in 0..50 {
            let delay = policy.delay_for(1, &err).as_secs_f64();
            assert!((1.5..=2.5).contains(&delay), "delay {delay} out of band");
        }
    }

    #[test]
    fn test_retry_after_is_honored() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10), Duration::from_millis(50));
        let err = VidxError::Provider {
            kind: ProviderErrorKind::RateLimited,
            message: "429".to_string(),
            retry_after: Some(Duration::from_secs(3)),
        };
        assert_eq!(policy.delay_for(1, &err), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = fast_policy(3)
            .run("flaky", move || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(VidxError::provider(ProviderErrorKind::Unavailable, "503"))
                } else {
                    Ok(n)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_stops_after_max_attempts() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<()> = fast_policy(3)
            .run("down", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(VidxError::provider(ProviderErrorKind::Timeout, "slow"))
            })
            .await;

        assert!(matches!(
            result,
            Err(VidxError::Provider {
                kind: ProviderErrorKind::Timeout,
                ..
            })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_does_not_retry_permanent_errors() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<()> = fast_policy(5)
            .run("auth", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(VidxError::provider(ProviderErrorKind::Unauthorized, "401"))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_custom_classifier() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = fast_policy(3).with_classifier(|_| false);
        let _: Result<()> = policy
            .run("never", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(VidxError::infrastructure("vector store", "down"))
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_maps_to_provider_timeout() {
        let result: Result<()> = with_timeout(Duration::from_millis(5), "describe", async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        })
        .await;
        assert!(matches!(
            result,
            Err(VidxError::Provider {
                kind: ProviderErrorKind::Timeout,
                ..
            })
        ));
    }

    proptest! {
        #[test]
        fn prop_delay_never_exceeds_jittered_cap(
            base_ms in 1u64..2_000,
            max_ms in 1u64..20_000,
            retry in 1u32..12,
            jitter in 0.0f64..0.5,
        ) {
            let policy = RetryPolicy::new(5, Duration::from_millis(base_ms), Duration::from_millis(max_ms))
                .with_jitter(jitter);
            let err = VidxError::provider(ProviderErrorKind::Unavailable, "503");

            let backoff = policy.backoff(retry);
            prop_assert!(backoff <= Duration::from_millis(max_ms));
            prop_assert!(backoff <= policy.backoff(retry + 1));

            let delay = policy.delay_for(retry, &err).as_secs_f64();
            prop_assert!(delay <= backoff.as_secs_f64() * (1.0 + jitter) + 1e-9);
        }
    }
}
