use std::{future::Future, pin::Pin, time::Duration};

use tokio::time::sleep;
use tracing::warn;

use crate::{ChainCommunicationError, ChainKind, ChainResult};

/// Attempts made by [`call_and_retry`].
pub const DEFAULT_RETRY_ATTEMPTS: usize = 3;
/// Delay before the first retry; doubles on every further attempt.
pub const DEFAULT_RETRY_BASE: Duration = Duration::from_secs(1);

/// A boxed future producing a chain result.
pub type ChainFuture<T> = Pin<Box<dyn Future<Output = ChainResult<T>> + Send>>;

/// Call `f` up to `n` times with exponential backoff starting at
/// `base_delay` (default [`DEFAULT_RETRY_BASE`]). Non-transient errors are
/// returned immediately.
pub async fn call_and_retry_n_times<T>(
    mut f: impl FnMut() -> ChainFuture<T>,
    n: usize,
    base_delay: Option<Duration>,
) -> ChainResult<T> {
    let attempts = n.max(1);
    let mut delay = base_delay.unwrap_or(DEFAULT_RETRY_BASE);
    let mut attempt = 1;
    loop {
        match f().await {
            Ok(res) => return Ok(res),
            Err(err) if attempt < attempts && err.is_transient() => {
                warn!(?err, attempt, ?delay, "Chain call failed, retrying");
                sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// [`call_and_retry_n_times`] with the default attempt cap and base delay.
pub async fn call_and_retry<T>(f: impl FnMut() -> ChainFuture<T>) -> ChainResult<T> {
    call_and_retry_n_times(f, DEFAULT_RETRY_ATTEMPTS, None).await
}

/// Bound `fut` by `timeout`, reporting an elapsed deadline as
/// [`ChainCommunicationError::Timeout`].
pub async fn call_with_timeout<T>(
    chain: ChainKind,
    timeout: Duration,
    fut: impl Future<Output = ChainResult<T>>,
) -> ChainResult<T> {
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| ChainCommunicationError::Timeout { chain, timeout })?
}
