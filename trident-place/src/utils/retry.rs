//! Caller-level placement retry
//!
//! The engine resolves position races at a single parent itself. When every
//! position at that parent is lost it returns `PlacementConflict`, and the
//! caller re-runs the whole placement (fresh candidate selection) here.

use std::time::Duration;

use crate::error::PlacementError;

/// Initial backoff between attempts
const INITIAL_BACKOFF_MS: u64 = 10;

/// Backoff ceiling
const MAX_BACKOFF_MS: u64 = 200;

/// Re-run `operation` while it fails with a retryable placement error.
///
/// **Algorithm:**
/// 1. Attempt operation
/// 2. If successful, return result
/// 3. If `PlacementConflict` and attempts remain: log WARN, backoff, retry
/// 4. Any other error, or attempts exhausted: return the error
///
/// `max_attempts` counts the first call; values below 1 are treated as 1.
pub async fn retry_on_conflict<F, Fut, T>(
    operation_name: &str,
    max_attempts: u32,
    mut operation: F,
) -> Result<T, PlacementError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, PlacementError>>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 0;
    let mut backoff_ms = INITIAL_BACKOFF_MS;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        "Placement succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    max_attempts,
                    backoff_ms,
                    error = %err,
                    "Placement conflict, retrying with fresh candidate selection"
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
            }
            Err(err) => {
                if err.is_retryable() {
                    tracing::error!(
                        operation = operation_name,
                        attempt,
                        "Placement conflict persisted, giving up"
                    );
                }
                return Err(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use trident_common::db::MemberId;

    fn conflict() -> PlacementError {
        PlacementError::PlacementConflict {
            parent_id: MemberId(1),
            attempts: 3,
        }
    }

    #[tokio::test]
    async fn test_retry_succeeds_first_attempt() {
        let result = retry_on_conflict("test_op", 3, || async { Ok::<i32, PlacementError>(42) }).await;

        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_conflicts() {
        let attempts = Cell::new(0);

        let result = retry_on_conflict("test_op", 3, || {
            attempts.set(attempts.get() + 1);
            let current = attempts.get();
            async move {
                if current < 3 {
                    Err(conflict())
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts.get(), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_attempts() {
        let attempts = Cell::new(0);

        let result = retry_on_conflict("test_op", 2, || {
            attempts.set(attempts.get() + 1);
            async { Err::<i32, _>(conflict()) }
        })
        .await;

        assert!(matches!(result, Err(PlacementError::PlacementConflict { .. })));
        assert_eq!(attempts.get(), 2);
    }

    #[tokio::test]
    async fn test_non_conflict_error_fails_immediately() {
        let attempts = Cell::new(0);

        let result = retry_on_conflict("test_op", 5, || {
            attempts.set(attempts.get() + 1);
            async { Err::<i32, _>(PlacementError::UnknownSponsor(MemberId(9))) }
        })
        .await;

        assert_eq!(result.unwrap_err(), PlacementError::UnknownSponsor(MemberId(9)));
        assert_eq!(attempts.get(), 1);
    }
}
