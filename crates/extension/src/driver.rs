//! Lifecycle driver for one extension resource.
//!
//! The driver writes desired spec and operation annotations, then polls the
//! status written by the extension controller until it converges. It is
//! written purely against [`Extension`] and [`ResourceClient`], so one
//! implementation serves every kind.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use canopy_core::extension::{OPERATION_ANNOTATION, TIMESTAMP_ANNOTATION};
use canopy_core::{
    CanopyConfig, ClientError, Clock, Error, Extension, LastOperationState, LastOperationType,
    ObjectKey, OperationRequest, ResourceClient, Result,
};
use canopy_flow::{poll_until, retry_transient, retry_unavailable, CancellationToken, Probe, RetryConfig};
use kube::ResourceExt;
use metrics::{counter, histogram};
use tracing::{debug, info, instrument};

/// Operation types that count as "ready" after a reconcile request.
const RECONCILED: &[LastOperationType] = &[LastOperationType::Create, LastOperationType::Reconcile, LastOperationType::Restore];
const MIGRATED: &[LastOperationType] = &[LastOperationType::Migrate];

pub struct LifecycleDriver<E: Extension> {
    client: Arc<dyn ResourceClient<E>>,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
    retry: RetryConfig,
}

impl<E: Extension> Clone for LifecycleDriver<E> {
    fn clone(&self) -> Self {
        Self { client: self.client.clone(), clock: self.clock.clone(), poll_interval: self.poll_interval, retry: self.retry.clone() }
    }
}

fn record(kind: &str, operation: &'static str) {
    counter!("canopy_extension_operations_total", 1u64, "kind" => kind.to_string(), "operation" => operation);
}

impl<E: Extension> LifecycleDriver<E> {
    pub fn new(client: Arc<dyn ResourceClient<E>>, clock: Arc<dyn Clock>, config: &CanopyConfig) -> Self {
        Self { client, clock, poll_interval: config.poll_interval, retry: RetryConfig::default() }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn client(&self) -> &Arc<dyn ResourceClient<E>> {
        &self.client
    }

    fn operation_annotations(&self, op: OperationRequest) -> BTreeMap<String, String> {
        BTreeMap::from([
            (OPERATION_ANNOTATION.to_string(), op.as_str().to_string()),
            (TIMESTAMP_ANNOTATION.to_string(), self.clock.now().to_rfc3339()),
        ])
    }

    async fn fetch(&self, key: &ObjectKey) -> Result<Option<E>> {
        Ok(retry_transient(&self.retry, "get", || self.client.get(key)).await?)
    }

    async fn annotate(&self, key: &ObjectKey, op: OperationRequest) -> Result<BTreeMap<String, String>> {
        let annotations = self.operation_annotations(op);
        retry_transient(&self.retry, "annotate", || self.client.annotate(key, &annotations)).await?;
        debug!(kind = %E::KIND, key = %key, operation = op.as_str(), "operation requested");
        Ok(annotations)
    }

    /// Create the resource or bring its spec up to date.
    ///
    /// The `reconcile` annotation is written on creation and when `force` is
    /// set. An unforced update only patches the spec; controllers pick it up
    /// through the generation bump, and [`wait_ready`](Self::wait_ready)
    /// refuses to succeed until that generation is observed.
    #[instrument(skip_all, fields(kind = %E::KIND, key = %desired.key(), force))]
    pub async fn ensure_reconciled(&self, desired: &E, force: bool) -> Result<E> {
        record(E::KIND.as_str(), "reconcile");
        let key = desired.key();
        if self.fetch(&key).await?.is_none() {
            let mut obj = desired.clone();
            obj.annotations_mut().extend(self.operation_annotations(OperationRequest::Reconcile));
            match retry_unavailable(&self.retry, "create", || self.client.create(&obj)).await {
                Ok(created) => {
                    info!("created");
                    return Ok(created);
                }
                Err(ClientError::Conflict(msg)) => debug!(reason = %msg, "create raced with another writer; updating"),
                Err(e) => return Err(e.into()),
            }
        }

        let live = self.fetch(&key).await?.ok_or_else(|| Error::minor(format!("{} {} vanished during update", E::KIND, key)))?;
        let labels_current = desired.labels().iter().all(|(k, v)| live.labels().get(k) == Some(v));
        let mut current = if live.same_spec(desired) && labels_current {
            live
        } else {
            let patched = retry_transient(&self.retry, "patch", || self.client.patch_spec(desired)).await?;
            info!(generation = ?patched.meta().generation, "spec updated");
            patched
        };
        if force {
            let written = self.annotate(&key, OperationRequest::Reconcile).await?;
            current.annotations_mut().extend(written);
        }
        Ok(current)
    }

    /// Wait until the controller reports a succeeded create, reconcile or
    /// restore for the current generation.
    #[instrument(skip_all, fields(kind = %E::KIND, key = %key))]
    pub async fn wait_ready(&self, ctx: &CancellationToken, key: &ObjectKey, timeout: Duration) -> Result<()> {
        self.wait_for(ctx, key, timeout, "wait_ready", RECONCILED, false).await
    }

    /// Request deletion. Deleting an absent resource succeeds.
    #[instrument(skip_all, fields(kind = %E::KIND, key = %key))]
    pub async fn delete(&self, key: &ObjectKey) -> Result<()> {
        record(E::KIND.as_str(), "delete");
        match retry_transient(&self.retry, "delete", || self.client.delete(key)).await {
            Ok(()) => {
                info!("deletion requested");
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Wait until a read returns not-found.
    #[instrument(skip_all, fields(kind = %E::KIND, key = %key))]
    pub async fn wait_deleted(&self, ctx: &CancellationToken, key: &ObjectKey, timeout: Duration) -> Result<()> {
        let started = tokio::time::Instant::now();
        let res = poll_until(ctx, self.poll_interval, timeout, || async move {
            match self.client.get(key).await {
                Ok(None) => Probe::Done,
                Ok(Some(obj)) => match reported_error(&obj) {
                    Some(e) => Probe::from_error(e),
                    None => Probe::retry(format!("{} {} is still present", E::KIND, key)),
                },
                Err(e) => probe_client_error(e),
            }
        })
        .await;
        observe_wait(E::KIND.as_str(), "wait_deleted", started);
        res
    }

    /// Ask the controller to migrate: persist its state and release external resources.
    #[instrument(skip_all, fields(kind = %E::KIND, key = %key))]
    pub async fn migrate(&self, key: &ObjectKey) -> Result<()> {
        record(E::KIND.as_str(), "migrate");
        if self.fetch(key).await?.is_none() {
            debug!("absent; nothing to migrate");
            return Ok(());
        }
        self.annotate(key, OperationRequest::Migrate).await?;
        Ok(())
    }

    /// Wait for a succeeded migrate operation. An absent resource counts as migrated.
    #[instrument(skip_all, fields(kind = %E::KIND, key = %key))]
    pub async fn wait_migrated(&self, ctx: &CancellationToken, key: &ObjectKey, timeout: Duration) -> Result<()> {
        self.wait_for(ctx, key, timeout, "wait_migrated", MIGRATED, true).await
    }

    /// Re-create the resource on the destination and hand it its prior state.
    ///
    /// The object is created parked with `wait-for-state`, the prior state is
    /// written to `status.state`, and only then is `restore` requested.
    #[instrument(skip_all, fields(kind = %E::KIND, key = %desired.key(), has_state = prior.is_some()))]
    pub async fn restore(&self, desired: &E, prior: Option<&serde_json::Value>) -> Result<()> {
        record(E::KIND.as_str(), "restore");
        let key = desired.key();
        let mut obj = desired.clone();
        obj.annotations_mut().extend(self.operation_annotations(OperationRequest::WaitForState));
        let live = match retry_unavailable(&self.retry, "create", || self.client.create(&obj)).await {
            Ok(created) => created,
            Err(ClientError::Conflict(_)) => {
                let patched = retry_transient(&self.retry, "patch", || self.client.patch_spec(desired)).await?;
                self.annotate(&key, OperationRequest::WaitForState).await?;
                patched
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(state) = prior {
            let mut status = live.extension_status().cloned().unwrap_or_default();
            status.state = Some(state.clone());
            retry_transient(&self.retry, "patch_status", || self.client.patch_status(&key, &status)).await?;
            debug!("prior state seeded");
        }

        self.annotate(&key, OperationRequest::Restore).await?;
        info!("restore requested");
        Ok(())
    }

    async fn wait_for(
        &self,
        ctx: &CancellationToken,
        key: &ObjectKey,
        timeout: Duration,
        what: &'static str,
        accepted: &'static [LastOperationType],
        absent_is_done: bool,
    ) -> Result<()> {
        let started = tokio::time::Instant::now();
        let res = poll_until(ctx, self.poll_interval, timeout, || async move {
            match self.client.get(key).await {
                Ok(Some(obj)) => check_converged(&obj, accepted),
                Ok(None) if absent_is_done => Probe::Done,
                Ok(None) => Probe::retry(format!("{} {} not found", E::KIND, key)),
                Err(e) => probe_client_error(e),
            }
        })
        .await;
        observe_wait(E::KIND.as_str(), what, started);
        match &res {
            Ok(()) => info!(operation = what, "converged"),
            Err(e) => debug!(operation = what, error = %e, "did not converge"),
        }
        res
    }
}

fn observe_wait(kind: &str, operation: &'static str, started: tokio::time::Instant) {
    histogram!("canopy_extension_wait_seconds", started.elapsed().as_secs_f64(), "kind" => kind.to_string(), "operation" => operation);
}

/// Not-found and transient failures are worth another poll; anything else aborts.
fn probe_client_error(e: ClientError) -> Probe {
    match e {
        ClientError::NotFound(_) | ClientError::Transient(_) | ClientError::Conflict(_) => Probe::Retry(e.into()),
        other => Probe::Abort(other.into()),
    }
}

fn reported_error<E: Extension>(obj: &E) -> Option<Error> {
    obj.last_error().map(|le| {
        Error::from_reported(format!("{} {} reported: {}", E::KIND, obj.key(), le.description), le.codes.clone())
    })
}

/// Health check for one poll. The most recent reported error is preferred
/// over generic progress messages as the retry reason.
pub fn check_converged<E: Extension>(obj: &E, accepted: &[LastOperationType]) -> Probe {
    if let Some(e) = reported_error(obj) {
        if e.is_severe() {
            return Probe::Abort(e);
        }
    }
    let pending = |generic: String| Probe::Retry(reported_error(obj).unwrap_or_else(|| Error::minor(generic)));

    if let Some(op) = obj.operation_request() {
        return pending(format!("{} {} has not picked up operation {:?} yet", E::KIND, obj.key(), op.as_str()));
    }
    if !obj.generation_observed() {
        let observed = obj.extension_status().and_then(|s| s.observed_generation);
        return pending(format!(
            "{} {} observed generation outdated ({:?}/{:?})",
            E::KIND,
            obj.key(),
            observed,
            obj.meta().generation
        ));
    }
    match obj.last_operation() {
        None => pending(format!("{} {} has no last operation yet", E::KIND, obj.key())),
        Some(op) if op.state == LastOperationState::Succeeded && accepted.contains(&op.type_) => match reported_error(obj) {
            Some(e) => Probe::Retry(e),
            None => Probe::Done,
        },
        Some(op) => pending(format!("{} {} last operation {:?} is {:?}", E::KIND, obj.key(), op.type_, op.state)),
    }
}
