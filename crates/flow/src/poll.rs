//! Bounded poll loop.
//!
//! The probe runs immediately, then once per interval, until it reports done,
//! aborts, or the deadline or cancellation hits. A hanging probe is bounded by
//! the same deadline and cancellation.

use std::future::Future;
use std::time::Duration;

use canopy_core::{Error, Result};
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug)]
pub enum Probe {
    Done,
    /// Not there yet; the reason is kept as the most recent one.
    Retry(Error),
    /// Stop now and return the reason as-is.
    Abort(Error),
}

impl Probe {
    pub fn retry(message: impl Into<String>) -> Self {
        Self::Retry(Error::minor(message))
    }

    /// Retry on minor errors, abort on severe ones.
    pub fn from_error(e: Error) -> Self {
        if e.is_severe() {
            Self::Abort(e)
        } else {
            Self::Retry(e)
        }
    }
}

pub async fn poll_until<F, Fut>(ctx: &CancellationToken, interval: Duration, timeout: Duration, mut probe: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Probe>,
{
    let deadline = deadline_after(timeout);
    let mut last: Option<Error> = None;
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let outcome = tokio::select! {
            biased;
            _ = ctx.cancelled() => return Err(expired(timeout, true, last)),
            outcome = probe() => outcome,
            _ = sleep_until(deadline) => return Err(expired(timeout, false, last)),
        };
        match outcome {
            Probe::Done => return Ok(()),
            Probe::Abort(e) => {
                debug!(attempt, error = %e, "poll aborted");
                return Err(e);
            }
            Probe::Retry(e) => {
                debug!(attempt, reason = %e, "poll not done, retrying");
                last = Some(e);
            }
        }
        tokio::select! {
            biased;
            _ = ctx.cancelled() => return Err(expired(timeout, true, last)),
            _ = sleep_until(deadline) => return Err(expired(timeout, false, last)),
            _ = sleep(interval) => {}
        }
    }
}

/// `timeout` from now, clamped to a far-off instant when that would overflow.
fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout).unwrap_or_else(|| now + FAR_FUTURE)
}

const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

fn expired(after: Duration, cancelled: bool, last: Option<Error>) -> Error {
    Error::Timeout { after, cancelled, last: last.map(Box::new) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    const SEC: Duration = Duration::from_secs(1);

    #[tokio::test(start_paused = true)]
    async fn done_on_third_attempt() {
        let ctx = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let started = Instant::now();
        let res = poll_until(&ctx, SEC, 60 * SEC, move || {
            let n = c.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n >= 3 {
                    Probe::Done
                } else {
                    Probe::retry("still converging")
                }
            }
        })
        .await;
        assert!(res.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(started.elapsed(), 2 * SEC);
    }

    #[tokio::test(start_paused = true)]
    async fn abort_is_returned_unwrapped() {
        let ctx = CancellationToken::new();
        let err = poll_until(&ctx, SEC, 60 * SEC, || async { Probe::Abort(Error::severe("bad request")) })
            .await
            .unwrap_err();
        assert!(!err.is_timeout());
        assert_eq!(err.to_string(), "bad request");
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_keeps_most_recent_reason() {
        let ctx = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let err = poll_until(&ctx, SEC, 5 * SEC, move || {
            let n = c.fetch_add(1, Ordering::SeqCst);
            async move { Probe::retry(format!("attempt {}", n)) }
        })
        .await
        .unwrap_err();
        assert!(err.is_timeout());
        assert!(!err.is_severe());
        let last = calls.load(Ordering::SeqCst) - 1;
        assert!(err.to_string().contains(&format!("attempt {}", last)), "err={}", err);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_is_severe_timeout() {
        let ctx = CancellationToken::new();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            sleep(3 * SEC).await;
            canceller.cancel();
        });
        let err = poll_until(&ctx, SEC, 60 * SEC, || async { Probe::retry("waiting") }).await.unwrap_err();
        assert!(matches!(err, Error::Timeout { cancelled: true, .. }));
        assert!(err.is_severe());
        assert!(err.to_string().contains("waiting"));
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_probe_is_bounded_by_deadline() {
        let ctx = CancellationToken::new();
        let started = Instant::now();
        let err = poll_until(&ctx, SEC, 10 * SEC, || async {
            sleep(Duration::from_secs(3600)).await;
            Probe::Done
        })
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Timeout { cancelled: false, last: None, .. }));
        assert_eq!(started.elapsed(), 10 * SEC);
    }

    #[tokio::test(start_paused = true)]
    async fn unbounded_timeout_does_not_overflow() {
        let ctx = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let res = poll_until(&ctx, SEC, Duration::MAX, move || {
            let n = c.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Probe::retry("not yet")
                } else {
                    Probe::Done
                }
            }
        })
        .await;
        assert!(res.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
