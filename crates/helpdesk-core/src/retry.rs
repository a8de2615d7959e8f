use std::{future::Future, time::Duration};

use tokio::time::sleep;

use crate::Result;

/// Attempts per lifecycle step, including the first.
pub const STEP_ATTEMPTS: usize = 3;
const BACKOFF: Duration = Duration::from_millis(500);

/// Run `op`, retrying while it fails with a transient error.
///
/// Backoff grows linearly (500ms, 1s, ...). Non-transient errors return immediately.
pub async fn with_retry<T, F, Fut>(step: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1usize;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_transient() && attempt < STEP_ATTEMPTS => {
                tracing::warn!("{step} failed (attempt {attempt}/{STEP_ATTEMPTS}): {e}");
                sleep(BACKOFF * attempt as u32).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn retries_transient_errors_until_success() {
        let calls = AtomicUsize::new(0);
        let out = with_retry("test", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(Error::platform("503", true))
            } else {
                Ok(7)
            }
        })
        .await
        .unwrap();
        assert_eq!(out, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_step_attempts() {
        let calls = AtomicUsize::new(0);
        let err = with_retry("test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(Error::platform("503", true))
        })
        .await
        .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), STEP_ATTEMPTS);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicUsize::new(0);
        let _ = with_retry("test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(Error::platform("403", false))
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
