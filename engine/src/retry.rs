//! Retry combinator for transient directory-operation failures.
//!
//! Attempts are strictly serial. Backoff is linear: the wait before
//! attempt `n + 1` is `base_delay * n`.

use std::future::Future;
use std::time::Duration;

use crate::error::SyncError;

/// Default attempt bound for mkdir/unlink/rmdir races.
pub const RETRY_ATTEMPTS: u32 = 3;

/// Default base delay between attempts.
pub const RETRY_BASE_DELAY: Duration = Duration::from_millis(100);

/// Invoke `op` up to `attempts` times while `is_transient` classifies the
/// failure as retryable. Non-transient errors, and the last attempt's
/// error, are returned unchanged.
pub async fn retry<T, F, Fut, P>(
    is_transient: P,
    attempts: u32,
    base_delay: Duration,
    mut op: F,
) -> Result<T, SyncError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SyncError>>,
    P: Fn(&SyncError) -> bool,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt >= attempts || !is_transient(&err) {
                    return Err(err);
                }
                tokio::time::sleep(base_delay * attempt).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{EndpointErrorKind, SyncError};
    use std::cell::Cell;

    fn busy() -> SyncError {
        SyncError::endpoint("x", EndpointErrorKind::Busy, "busy")
    }

    fn fatal() -> SyncError {
        SyncError::endpoint("x", EndpointErrorKind::Other, "boom")
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = Cell::new(0u32);
        let result = retry(|_| true, 3, Duration::from_millis(1), || {
            let n = calls.get() + 1;
            calls.set(n);
            async move {
                if n < 3 {
                    Err(busy())
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.expect("third attempt succeeds"), 3);
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn test_non_transient_returns_immediately() {
        let calls = Cell::new(0u32);
        let result: Result<(), _> = retry(
            |err: &SyncError| err.endpoint_kind() == Some(EndpointErrorKind::Busy),
            3,
            Duration::from_millis(1),
            || {
                calls.set(calls.get() + 1);
                async { Err(fatal()) }
            },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_error() {
        let calls = Cell::new(0u32);
        let result: Result<(), _> = retry(|_| true, 3, Duration::from_millis(1), || {
            calls.set(calls.get() + 1);
            async { Err(busy()) }
        })
        .await;

        let err = result.expect_err("exhausted");
        assert_eq!(err.endpoint_kind(), Some(EndpointErrorKind::Busy));
        assert_eq!(calls.get(), 3);
    }
}
