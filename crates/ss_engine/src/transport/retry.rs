//! Bounded exponential backoff for blob-store I/O.
//!
//! The only place in the engine where a failure is retried rather than
//! surfaced (besides per-endpoint substrate publishing).

use std::future::Future;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::RetryPolicy;
use crate::error::TransferError;

/// Run `op` up to `policy.attempts` times with exponential backoff between
/// attempts, observing cancellation during the delays.
pub async fn with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    op_name: &str,
    mut op: F,
) -> Result<T, TransferError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TransferError>>,
{
    let mut delay = policy.base_delay;
    let mut last = TransferError::Transport(format!("{op_name}: no attempts configured"));

    for attempt in 1..=policy.attempts.max(1) {
        if cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }
        match op().await {
            Ok(value) => return Ok(value),
            Err(TransferError::Cancelled) => return Err(TransferError::Cancelled),
            Err(e) => {
                warn!(op = op_name, attempt, error = %e, "operation failed");
                last = e;
            }
        }
        if attempt < policy.attempts {
            tokio::select! {
                _ = cancel.cancelled() => return Err(TransferError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            delay = (delay * 2).min(policy.max_delay);
        }
    }
    Err(last)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let result = with_backoff(&fast_policy(), &cancel, "put", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(TransferError::Transport("transient".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_attempts() {
        let cancel = CancellationToken::new();
        let result: Result<(), _> = with_backoff(&fast_policy(), &cancel, "put", || async {
            Err(TransferError::Transport("permanent".into()))
        })
        .await;
        assert!(matches!(result, Err(TransferError::Transport(_))));
    }

    #[tokio::test]
    async fn cancellation_is_observed() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: Result<(), _> = with_backoff(&fast_policy(), &cancel, "put", || async {
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(TransferError::Cancelled)));
    }
}
