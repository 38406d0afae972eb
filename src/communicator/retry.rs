//! Bounded retry for a single link attempt
//!
//! A failed delivery normally stays in the desired log and is picked up by the
//! next reconcile pass. With `link_retries > 0` a transient transport failure
//! is also retried in place, with exponential backoff, before giving up.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// How often and how patiently to retry a delivery
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Attempts after the first one
    pub max_retries: u32,

    pub initial_backoff: Duration,

    /// Upper bound on any single wait
    pub max_backoff: Duration,

    pub multiplier: f64,

    /// Stretch each wait by up to a quarter so concurrent links spread out
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Single attempt; failures wait for the next reconcile pass
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// `retries` extra attempts starting at `initial_backoff`
    pub fn bounded(retries: u32, initial_backoff: Duration) -> Self {
        Self {
            max_retries: retries,
            initial_backoff,
            ..Default::default()
        }
    }

    /// Wait before retry number `attempt` (zero-based)
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base = self.initial_backoff.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = base.min(self.max_backoff.as_secs_f64());

        let secs = if self.jitter {
            capped * (1.0 + jitter_fraction() * 0.25)
        } else {
            capped
        };

        Duration::from_secs_f64(secs)
    }
}

/// Cheap value in `[0, 1)` taken from the clock's sub-second part
fn jitter_fraction() -> f64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    f64::from(nanos % 1000) / 1000.0
}

/// Whether a failure is worth another attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    /// Permanent; resending the same payload will fail the same way
    NoRetry,
}

/// Errors that know whether they are transient
pub trait RetryableError {
    fn retry_decision(&self) -> RetryDecision;
}

/// Run `operation` until it succeeds, fails permanently, or runs out of retries
///
/// The last error is returned when every attempt fails.
pub async fn with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RetryableError + std::fmt::Display,
{
    let mut attempt = 0;

    loop {
        let e = match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        let backoff = match e.retry_decision() {
            RetryDecision::NoRetry => {
                debug!(operation = operation_name, attempt, error = %e, "Permanent failure");
                return Err(e);
            }
            _ if attempt >= config.max_retries => {
                if config.max_retries > 0 {
                    warn!(
                        operation = operation_name,
                        attempts = attempt + 1,
                        error = %e,
                        "Giving up after retries"
                    );
                }
                return Err(e);
            }
            RetryDecision::Retry => config.backoff_duration(attempt),
        };

        warn!(
            operation = operation_name,
            attempt = attempt + 1,
            max_attempts = config.max_retries + 1,
            backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
            error = %e,
            "Retrying after transient failure"
        );

        sleep(backoff).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[derive(Debug)]
    struct Flaky {
        transient: bool,
    }

    impl std::fmt::Display for Flaky {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "flaky(transient={})", self.transient)
        }
    }

    impl RetryableError for Flaky {
        fn retry_decision(&self) -> RetryDecision {
            if self.transient {
                RetryDecision::Retry
            } else {
                RetryDecision::NoRetry
            }
        }
    }

    fn fast(retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries: retries,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            jitter: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let config = RetryConfig {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(1000),
            multiplier: 2.0,
            jitter: false,
            max_retries: 10,
        };

        assert_eq!(config.backoff_duration(0), Duration::from_millis(100));
        assert_eq!(config.backoff_duration(1), Duration::from_millis(200));
        assert_eq!(config.backoff_duration(3), Duration::from_millis(800));
        assert_eq!(config.backoff_duration(5), Duration::from_millis(1000));
    }

    #[test]
    fn test_jitter_stays_within_a_quarter() {
        let config = RetryConfig {
            initial_backoff: Duration::from_secs(1),
            jitter: true,
            ..Default::default()
        };

        let backoff = config.backoff_duration(0);
        assert!(backoff >= Duration::from_secs(1));
        assert!(backoff <= Duration::from_millis(1250));
    }

    #[test]
    fn test_none_means_single_attempt() {
        assert_eq!(RetryConfig::none().max_retries, 0);
        assert_eq!(
            RetryConfig::bounded(2, Duration::from_millis(10)).initial_backoff,
            Duration::from_millis(10)
        );
    }

    #[tokio::test]
    async fn test_transient_failure_recovers() {
        let attempts = Cell::new(0);

        let result: Result<u32, Flaky> = with_retry(&fast(3), "link", || {
            attempts.set(attempts.get() + 1);
            let n = attempts.get();
            async move {
                if n < 3 {
                    Err(Flaky { transient: true })
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let attempts = Cell::new(0);

        let result: Result<(), Flaky> = with_retry(&fast(2), "link", || {
            attempts.set(attempts.get() + 1);
            async { Err(Flaky { transient: true }) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.get(), 3);
    }

    #[tokio::test]
    async fn test_retry_waits_for_backoff() {
        let attempts = Cell::new(0);
        let start = std::time::Instant::now();

        let result: Result<(), Flaky> = with_retry(&fast(2), "link", || {
            attempts.set(attempts.get() + 1);
            async { Err(Flaky { transient: true }) }
        })
        .await;

        // 1ms then 2ms between the three attempts
        assert!(result.is_err());
        assert!(start.elapsed() >= Duration::from_millis(3));
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let attempts = Cell::new(0);

        let result: Result<(), Flaky> = with_retry(&fast(5), "link", || {
            attempts.set(attempts.get() + 1);
            async { Err(Flaky { transient: false }) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.get(), 1);
    }

    #[tokio::test]
    async fn test_no_retries_configured() {
        let attempts = Cell::new(0);

        let result: Result<(), Flaky> = with_retry(&RetryConfig::none(), "link", || {
            attempts.set(attempts.get() + 1);
            async { Err(Flaky { transient: true }) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.get(), 1);
    }
}
