//! Bounded exponential backoff for single API-server mutations.

use std::future::Future;
use std::time::Duration;

use canopy_core::ClientError;
use tracing::warn;

#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_attempts: 5, initial_delay: Duration::from_millis(200), max_delay: Duration::from_secs(5) }
    }
}

/// Retry `op` while it fails with a transient error or a write conflict.
/// Any other error, or the last transient one, is returned to the caller.
pub async fn retry_transient<F, Fut, T>(config: &RetryConfig, operation: &str, op: F) -> Result<T, ClientError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ClientError>>,
{
    retry_when(config, operation, |e| matches!(e, ClientError::Transient(_) | ClientError::Conflict(_)), op).await
}

/// Like [`retry_transient`], but a conflict is returned on the first attempt.
/// Creates use this: there a conflict means the object already exists.
pub async fn retry_unavailable<F, Fut, T>(config: &RetryConfig, operation: &str, op: F) -> Result<T, ClientError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ClientError>>,
{
    retry_when(config, operation, |e| matches!(e, ClientError::Transient(_)), op).await
}

async fn retry_when<F, Fut, T>(
    config: &RetryConfig,
    operation: &str,
    retryable: impl Fn(&ClientError) -> bool,
    mut op: F,
) -> Result<T, ClientError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ClientError>>,
{
    let mut attempt = 0u32;
    let mut delay = config.initial_delay;
    loop {
        attempt += 1;
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if retryable(&e) && attempt < config.max_attempts.max(1) => {
                warn!(operation = %operation, attempt, error = %e, delay_ms = delay.as_millis() as u64, "retrying");
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(config.max_delay);
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_retried() {
        let calls = AtomicU32::new(0);
        let res = retry_transient(&RetryConfig::default(), "annotate", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(ClientError::Transient("connection reset".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(res, Ok(2));
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_errors_return_immediately() {
        let calls = AtomicU32::new(0);
        let res: Result<(), _> = retry_transient(&RetryConfig::default(), "create", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ClientError::Forbidden("nope".into())) }
        })
        .await;
        assert!(matches!(res, Err(ClientError::Forbidden(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let cfg = RetryConfig { max_attempts: 3, ..Default::default() };
        let res: Result<(), _> = retry_transient(&cfg, "patch", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ClientError::Conflict("stale".into())) }
        })
        .await;
        assert!(matches!(res, Err(ClientError::Conflict(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn create_conflict_is_not_retried() {
        let calls = AtomicU32::new(0);
        let res: Result<(), _> = retry_unavailable(&RetryConfig::default(), "create", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(ClientError::Transient("connection reset".into()))
                } else {
                    Err(ClientError::Conflict("already exists".into()))
                }
            }
        })
        .await;
        assert!(matches!(res, Err(ClientError::Conflict(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
