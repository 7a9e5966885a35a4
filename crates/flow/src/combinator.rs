//! Run independent work units concurrently on one task.
//!
//! Each unit receives a [`CancellationToken`] and owns a single resource
//! identity, so units never need to coordinate with each other.

use canopy_core::{Error, Result};
use futures::future::{join_all, BoxFuture};
use futures::stream::{FuturesUnordered, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub type Unit<'a> = Box<dyn FnOnce(CancellationToken) -> BoxFuture<'a, Result<()>> + Send + 'a>;

/// Box a closure into a [`Unit`].
pub fn unit<'a, F>(f: F) -> Unit<'a>
where
    F: FnOnce(CancellationToken) -> BoxFuture<'a, Result<()>> + Send + 'a,
{
    Box::new(f)
}

/// Run every unit to completion. Failures never cancel siblings; if any unit
/// failed the result is an [`Error::Aggregate`] with one entry per failure.
pub async fn run_all<'a>(ctx: &CancellationToken, units: Vec<Unit<'a>>) -> Result<()> {
    let total = units.len();
    let results = join_all(units.into_iter().map(|u| u(ctx.clone()))).await;
    let errs: Vec<Error> = results.into_iter().filter_map(|r| r.err()).collect();
    debug!(total, failed = errs.len(), "collect-all finished");
    if errs.is_empty() {
        Ok(())
    } else {
        Err(Error::Aggregate(errs))
    }
}

/// Run units until the first failure, then cancel the shared child token and
/// return that failure. Units still in flight are dropped.
pub async fn run_until_first_error<'a>(ctx: &CancellationToken, units: Vec<Unit<'a>>) -> Result<()> {
    let child = ctx.child_token();
    let mut pending: FuturesUnordered<_> = units.into_iter().map(|u| u(child.clone())).collect();
    while let Some(res) = pending.next().await {
        if let Err(e) = res {
            debug!(remaining = pending.len(), error = %e, "unit failed; cancelling siblings");
            child.cancel();
            return Err(e);
        }
    }
    Ok(())
}
