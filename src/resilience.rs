//! Retry with exponential backoff for transient upstream failures.
//!
//! Only errors for which [`ServerError::is_transient`] holds are retried:
//! connect failures, timeouts, HTTP 408/429 and 5xx. Anything else is
//! returned on the first attempt.

use crate::error::ServerError;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, warn};

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Backoff multiplier.
    pub multiplier: f64,
    /// Spread delays by +/- 25%.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Execute once, never retry.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Delay before the given attempt (0-indexed); the first attempt has none.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.initial_delay.as_millis() as f64
            * self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let capped_ms = base_ms.min(self.max_delay.as_millis() as f64);

        let delay_ms = if self.jitter {
            capped_ms * (0.75 + jitter_fraction() * 0.5)
        } else {
            capped_ms
        };

        Duration::from_millis(delay_ms as u64)
    }
}

/// Pseudo-random fraction in `[0, 1)` from the clock's sub-second nanos.
fn jitter_fraction() -> f64 {
    use std::time::SystemTime;

    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);

    f64::from(nanos) / 1_000_000_000.0
}

/// Run `operation` until it succeeds, fails permanently, or attempts run out.
///
/// `label` names the operation in logs.
pub async fn with_retry<F, Fut, T>(
    config: &RetryConfig,
    label: &str,
    operation: F,
) -> Result<T, ServerError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, ServerError>>,
{
    let start = Instant::now();
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        if attempt > 0 {
            let delay = config.delay_for_attempt(attempt);
            debug!("{}: retry attempt {} after {:?}", label, attempt + 1, delay);
            sleep(delay).await;
        }

        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_transient() => return Err(e),
            Err(e) if attempt + 1 >= max_attempts => {
                warn!(
                    "{}: giving up after {} attempts in {:?}: {}",
                    label,
                    attempt + 1,
                    start.elapsed(),
                    e
                );
                return Err(e);
            }
            Err(e) => {
                warn!(
                    "{}: transient error on attempt {}/{}: {}",
                    label,
                    attempt + 1,
                    max_attempts,
                    e
                );
            }
        }

        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            multiplier: 2.0,
            jitter: false,
        }
    }

    #[test]
    fn test_retry_config_defaults() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert!(config.jitter);
        assert_eq!(RetryConfig::no_retry().max_attempts, 1);
    }

    #[test]
    fn test_delay_calculation() {
        let config = RetryConfig {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(300),
            multiplier: 2.0,
            jitter: false,
        };

        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(300));
    }

    #[test]
    fn test_jitter_stays_in_band() {
        let config = RetryConfig {
            initial_delay: Duration::from_millis(1000),
            ..RetryConfig::default()
        };
        let delay = config.delay_for_attempt(1);
        assert!(delay >= Duration::from_millis(750));
        assert!(delay <= Duration::from_millis(1250));
    }

    #[tokio::test]
    async fn test_success_after_transient_failures() {
        let counter = AtomicU32::new(0);

        let result = with_retry(&fast(), "list datasets", || {
            let count = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if count < 3 {
                    Err(ServerError::upstream("BigQuery", Some(503), "backend error"))
                } else {
                    Ok("datasets")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "datasets");
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let counter = AtomicU32::new(0);

        let result = with_retry(&fast(), "get table", || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(ServerError::upstream("BigQuery", Some(403), "denied")) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_attempts_exhausted() {
        let counter = AtomicU32::new(0);

        let result = with_retry(&fast(), "search", || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(ServerError::upstream("Tavily", None, "connection reset")) }
        })
        .await;

        assert!(matches!(result, Err(ServerError::Upstream { .. })));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }
}
