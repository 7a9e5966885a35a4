//! Per-component deployer contract and its generic implementation for one
//! extension resource.

use std::time::Duration;

use canopy_core::{Extension, ExtensionKind, ExtensionState, ObjectKey, Result, ShootState};
use canopy_flow::CancellationToken;
use tracing::debug;

use crate::driver::LifecycleDriver;

/// Operations the orchestrator invokes on every component, whatever it manages.
#[async_trait::async_trait]
pub trait ExtensionDeployer: Send + Sync {
    /// Human-readable identity for logs, e.g. `Worker shoot--dev--a/shoot--dev--a`.
    fn describe(&self) -> String;
    async fn deploy(&self, ctx: &CancellationToken) -> Result<()>;
    async fn wait(&self, ctx: &CancellationToken) -> Result<()>;
    async fn destroy(&self, ctx: &CancellationToken) -> Result<()>;
    async fn wait_cleanup(&self, ctx: &CancellationToken) -> Result<()>;
    async fn migrate(&self, ctx: &CancellationToken) -> Result<()>;
    async fn wait_migrate(&self, ctx: &CancellationToken) -> Result<()>;
    /// Restore from `state`, looking up this component's entry by kind, name and purpose.
    async fn restore(&self, ctx: &CancellationToken, state: &ShootState) -> Result<()>;
    /// Current `status.state` of the managed resource, if it has any.
    async fn capture(&self, ctx: &CancellationToken) -> Result<Option<ExtensionState>>;
}

/// Deployer for a single extension resource, driven through [`LifecycleDriver`].
pub struct GenericDeployer<E: Extension> {
    driver: LifecycleDriver<E>,
    desired: E,
    force: bool,
    timeout: Duration,
}

impl<E: Extension> GenericDeployer<E> {
    pub fn new(driver: LifecycleDriver<E>, desired: E, timeout: Duration) -> Self {
        Self { driver, desired, force: false, timeout }
    }

    /// Request a reconcile on every deploy, e.g. on wake-up or an explicit reconcile.
    pub fn forced(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn key(&self) -> ObjectKey {
        self.desired.key()
    }

    pub fn kind(&self) -> ExtensionKind {
        E::KIND
    }
}

#[async_trait::async_trait]
impl<E: Extension> ExtensionDeployer for GenericDeployer<E> {
    fn describe(&self) -> String {
        format!("{} {}", E::KIND, self.key())
    }

    async fn deploy(&self, _ctx: &CancellationToken) -> Result<()> {
        self.driver.ensure_reconciled(&self.desired, self.force).await?;
        Ok(())
    }

    async fn wait(&self, ctx: &CancellationToken) -> Result<()> {
        self.driver.wait_ready(ctx, &self.key(), self.timeout).await
    }

    async fn destroy(&self, _ctx: &CancellationToken) -> Result<()> {
        self.driver.delete(&self.key()).await
    }

    async fn wait_cleanup(&self, ctx: &CancellationToken) -> Result<()> {
        self.driver.wait_deleted(ctx, &self.key(), self.timeout).await
    }

    async fn migrate(&self, _ctx: &CancellationToken) -> Result<()> {
        self.driver.migrate(&self.key()).await
    }

    async fn wait_migrate(&self, ctx: &CancellationToken) -> Result<()> {
        self.driver.wait_migrated(ctx, &self.key(), self.timeout).await
    }

    async fn restore(&self, _ctx: &CancellationToken, state: &ShootState) -> Result<()> {
        let prior = state.find(E::KIND, &self.key().name, self.desired.purpose());
        if prior.is_none() {
            debug!(component = %self.describe(), "no prior state recorded");
        }
        self.driver.restore(&self.desired, prior).await
    }

    async fn capture(&self, _ctx: &CancellationToken) -> Result<Option<ExtensionState>> {
        let Some(live) = self.driver.client().get(&self.key()).await? else { return Ok(None) };
        let mut snapshot = ShootState::default();
        snapshot.capture(&live);
        Ok(snapshot.extensions.pop())
    }
}
