//! Retry driver for remote feed operations.

use std::future::Future;

use chat_core::RetryPolicy;

use crate::feed::FeedError;

/// Run `op` until it succeeds, a non-transient error occurs, or the
/// policy's attempts are exhausted.
///
/// Only transient errors (see [`FeedError::is_transient`]) are retried;
/// validation and permission failures propagate immediately.
pub(crate) async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, FeedError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FeedError>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && !policy.is_exhausted(attempt) => {
                let delay = policy.delay_for(attempt);
                tracing::debug!(
                    "transient remote failure (attempt {}): {}; retrying in {:?}",
                    attempt,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
