//! Fail-open utilities for graceful degradation
//!
//! For infrastructure operations (activity logging, report cleanup) whose
//! failure must not abort a run. Never use for artifact writes or test
//! execution.

use std::future::Future;
use tracing::warn;

use crate::Result;

/// Execute an operation that should fail open
///
/// Logs the error via `tracing::warn!` on failure and returns `None`.
///
/// ```no_run
/// use parsesmith_core::fail_open::fail_open;
/// use parsesmith_core::Result;
///
/// async fn append_log() -> Result<()> {
///     Ok(())
/// }
///
/// async fn example() {
///     let result = fail_open("activity_logger", || append_log()).await;
///     // None if append_log() failed
/// }
/// ```
pub async fn fail_open<F, Fut, T>(operation_name: &str, f: F) -> Option<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match f().await {
        Ok(val) => Some(val),
        Err(e) => {
            warn!("{} failed (fail-open): {}", operation_name, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ParseSmithError;

    #[tokio::test]
    async fn test_fail_open_success() {
        let result = fail_open("test_op", || async { Ok::<_, ParseSmithError>(42) }).await;
        assert_eq!(result, Some(42));
    }

    #[tokio::test]
    async fn test_fail_open_failure() {
        let result = fail_open("test_op", || async {
            Err::<i32, _>(ParseSmithError::Other("boom".to_string()))
        })
        .await;
        assert_eq!(result, None);
    }
}
