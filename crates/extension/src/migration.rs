//! Fan-out of deployer operations across all components of a shoot.
//!
//! Every phase runs collect-all: one component failing or timing out never
//! cancels its siblings, and the result names every component that failed.

use std::sync::Arc;

use canopy_core::{Error, Result, ShootState};
use canopy_flow::{run_all, unit, CancellationToken, Unit};
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use tracing::{info, instrument, warn};

use crate::deployer::ExtensionDeployer;

pub type Deployers = [Arc<dyn ExtensionDeployer>];

async fn for_each<F>(ctx: &CancellationToken, deployers: &Deployers, phase: &'static str, op: F) -> Result<()>
where
    F: for<'d> Fn(&'d dyn ExtensionDeployer, &'d CancellationToken) -> BoxFuture<'d, Result<()>> + Clone + Send + Sync + 'static,
{
    let units: Vec<Unit<'static>> = deployers
        .iter()
        .cloned()
        .map(|d| {
            let op = op.clone();
            unit(move |token| {
                async move {
                    let res = op(d.as_ref(), &token).await;
                    if let Err(e) = &res {
                        warn!(phase, component = %d.describe(), error = %e, "component failed");
                    }
                    res
                }
                .boxed()
            })
        })
        .collect();
    let res = run_all(ctx, units).await;
    if res.is_ok() {
        info!(phase, components = deployers.len(), "phase complete");
    }
    res
}

/// Create or update every component, then wait for it. Reconcile and wait
/// are sequenced per component; components proceed independently.
#[instrument(skip_all, fields(components = deployers.len()))]
pub async fn reconcile_all(ctx: &CancellationToken, deployers: &Deployers) -> Result<()> {
    for_each(ctx, deployers, "reconcile", |d, ctx| {
        async move {
            d.deploy(ctx).await?;
            d.wait(ctx).await
        }
        .boxed()
    })
    .await
}

/// Write the `migrate` request on every component.
#[instrument(skip_all, fields(components = deployers.len()))]
pub async fn request_migration(ctx: &CancellationToken, deployers: &Deployers) -> Result<()> {
    for_each(ctx, deployers, "migrate", |d, ctx| d.migrate(ctx)).await
}

/// Wait until every component reports a succeeded migration.
#[instrument(skip_all, fields(components = deployers.len()))]
pub async fn await_migrated(ctx: &CancellationToken, deployers: &Deployers) -> Result<()> {
    for_each(ctx, deployers, "wait_migrate", |d, ctx| d.wait_migrate(ctx)).await
}

/// Snapshot `status.state` of every component. Components without state are skipped.
#[instrument(skip_all, fields(components = deployers.len()))]
pub async fn capture_state(ctx: &CancellationToken, deployers: &Deployers) -> Result<ShootState> {
    let results = join_all(deployers.iter().map(|d| d.capture(ctx))).await;
    let mut state = ShootState::default();
    let mut errs = Vec::new();
    for res in results {
        match res {
            Ok(Some(entry)) => state.extensions.push(entry),
            Ok(None) => {}
            Err(e) => errs.push(e),
        }
    }
    if !errs.is_empty() {
        return Err(Error::Aggregate(errs));
    }
    info!(entries = state.extensions.len(), "shoot state captured");
    Ok(state)
}

/// Source side of a control-plane migration: request, wait, then capture.
pub async fn migrate_all(ctx: &CancellationToken, deployers: &Deployers) -> Result<ShootState> {
    request_migration(ctx, deployers).await?;
    await_migrated(ctx, deployers).await?;
    capture_state(ctx, deployers).await
}

/// Destination side: re-create every component from its prior state.
#[instrument(skip_all, fields(components = deployers.len(), entries = state.extensions.len()))]
pub async fn restore_all(ctx: &CancellationToken, deployers: &Deployers, state: &ShootState) -> Result<()> {
    let state = Arc::new(state.clone());
    for_each(ctx, deployers, "restore", move |d, ctx| {
        let state = state.clone();
        async move { d.restore(ctx, &state).await }.boxed()
    })
    .await
}

#[instrument(skip_all, fields(components = deployers.len()))]
pub async fn destroy_all(ctx: &CancellationToken, deployers: &Deployers) -> Result<()> {
    for_each(ctx, deployers, "destroy", |d, ctx| d.destroy(ctx)).await
}

#[instrument(skip_all, fields(components = deployers.len()))]
pub async fn wait_cleanup_all(ctx: &CancellationToken, deployers: &Deployers) -> Result<()> {
    for_each(ctx, deployers, "wait_cleanup", |d, ctx| d.wait_cleanup(ctx)).await
}
