//! Retry of transient HTTP failures.
//!
//! Both service clients classify their own errors through [`Transient`];
//! this crate owns the backoff schedule and the retry loop they share.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use metrics::counter;
use tracing::warn;

/// Total retries by operation.
pub const RETRIES_TOTAL: &str = "adlens_retries_total";

/// Errors that may succeed when the same request is sent again.
pub trait Transient {
    /// Rate limits, 5xx responses and dropped connections.
    fn is_transient(&self) -> bool;

    /// Wait requested by the server (`Retry-After`), if any.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Exponential backoff schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry, doubled for each later one
    pub base_delay: Duration,
    /// Upper bound for any single delay, server hints included
    pub max_delay: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl Backoff {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            ..Default::default()
        }
    }

    /// Delay before retry number `attempt + 1`.
    pub fn delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let delay = match retry_after {
            Some(after) => after,
            None => self
                .base_delay
                .saturating_mul(2u32.saturating_pow(attempt)),
        };
        delay.min(self.max_delay)
    }
}

/// Parse a `Retry-After` header given in seconds.
///
/// HTTP-date values are ignored; callers fall back to the backoff schedule.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// Run `op` until it succeeds, fails permanently or retries run out.
///
/// The last error is returned unchanged.
pub async fn retry<T, E, F, Fut>(backoff: &Backoff, operation: &str, mut op: F) -> Result<T, E>
where
    E: Transient + Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < backoff.max_retries => {
                let delay = backoff.delay(attempt, e.retry_after());
                warn!(
                    operation,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Request failed, retrying"
                );
                counter!(RETRIES_TOTAL, "operation" => operation.to_string()).increment(1);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    enum FakeError {
        Busy,
        Throttled(Duration),
        Denied,
    }

    impl Display for FakeError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{:?}", self)
        }
    }

    impl Transient for FakeError {
        fn is_transient(&self) -> bool {
            !matches!(self, FakeError::Denied)
        }

        fn retry_after(&self) -> Option<Duration> {
            match self {
                FakeError::Throttled(after) => Some(*after),
                _ => None,
            }
        }
    }

    fn fast() -> Backoff {
        Backoff {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_delay_doubles_up_to_cap() {
        let backoff = Backoff {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };
        assert_eq!(backoff.delay(0, None), Duration::from_millis(100));
        assert_eq!(backoff.delay(1, None), Duration::from_millis(200));
        assert_eq!(backoff.delay(2, None), Duration::from_millis(350));
        assert_eq!(backoff.delay(40, None), Duration::from_millis(350));
    }

    #[test]
    fn test_server_hint_wins_but_is_capped() {
        let backoff = Backoff::new(3, Duration::from_millis(100));
        assert_eq!(
            backoff.delay(0, Some(Duration::from_secs(2))),
            Duration::from_secs(2)
        );
        assert_eq!(
            backoff.delay(0, Some(Duration::from_secs(600))),
            backoff.max_delay
        );
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after(" 3 "), Some(Duration::from_secs(3)));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
        assert_eq!(parse_retry_after(""), None);
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let calls = AtomicU32::new(0);
        let result = retry(&fast(), "test", || async {
            match calls.fetch_add(1, Ordering::SeqCst) {
                0 => Err(FakeError::Busy),
                1 => Err(FakeError::Throttled(Duration::from_millis(1))),
                _ => Ok(7),
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_fails_fast() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry(&fast(), "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(FakeError::Denied)
        })
        .await;

        assert!(matches!(result, Err(FakeError::Denied)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gives_up_with_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry(&fast(), "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(FakeError::Busy)
        })
        .await;

        assert!(matches!(result, Err(FakeError::Busy)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
