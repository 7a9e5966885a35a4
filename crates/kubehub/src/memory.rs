//! In-memory cluster implementing every client and lister trait.
//!
//! Objects are kept as JSON keyed by kind and namespace/name, so one store
//! serves all extension kinds. Creating an object sets `generation` to 1 and
//! every spec change bumps it, like the API server does.
//!
//! With [`ControllerMode::Conformant`] the cluster also plays a well-behaved
//! extension controller: operation requests and spec changes are answered
//! immediately with a succeeded `lastOperation`, and deletions complete at once.
//! [`ControllerMode::Manual`] leaves all status writes to the test.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::ResourceExt;
use tracing::trace;

use canopy_core::extension::OPERATION_ANNOTATION;
use canopy_core::{
    BackupEntryReader, BackupEntryRef, ClientError, Extension, ExtensionKind, ExtensionStatus,
    LastOperation, LastOperationState, LastOperationType, ObjectKey, OperationRequest,
    ReadinessResource, ResourceClient, WorkloadLister,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControllerMode {
    #[default]
    Manual,
    Conformant,
}

type Slot = (ExtensionKind, ObjectKey);

#[derive(Default)]
struct Inner {
    mode: ControllerMode,
    objects: BTreeMap<Slot, serde_json::Value>,
    operation_writes: BTreeMap<Slot, Vec<String>>,
    journal: Vec<String>,
    injected: VecDeque<ClientError>,
    next_uid: u64,
    deployments: BTreeMap<String, Vec<Deployment>>,
    stateful_sets: BTreeMap<String, Vec<StatefulSet>>,
    daemon_sets: BTreeMap<String, Vec<DaemonSet>>,
    etcds: BTreeMap<String, Vec<ReadinessResource>>,
    nodes: Vec<Node>,
    backup_entries: BTreeMap<String, BackupEntryRef>,
}

#[derive(Default)]
pub struct MemoryCluster {
    inner: Mutex<Inner>,
}

impl MemoryCluster {
    pub fn new(mode: ControllerMode) -> Self {
        Self { inner: Mutex::new(Inner { mode, ..Default::default() }) }
    }

    pub fn conformant() -> Self {
        Self::new(ControllerMode::Conformant)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_mode(&self, mode: ControllerMode) {
        self.lock().mode = mode;
    }

    /// Fail the next extension client call with `err`.
    pub fn inject_error(&self, err: ClientError) {
        self.lock().injected.push_back(err);
    }

    /// Every value written to the operation annotation of one object, in order.
    pub fn operation_writes(&self, kind: ExtensionKind, key: &ObjectKey) -> Vec<String> {
        self.lock().operation_writes.get(&(kind, key.clone())).cloned().unwrap_or_default()
    }

    /// Mutations in the order they were applied, e.g. `status Worker ns/name`.
    pub fn journal(&self) -> Vec<String> {
        self.lock().journal.clone()
    }

    pub fn contains(&self, kind: ExtensionKind, key: &ObjectKey) -> bool {
        self.lock().objects.contains_key(&(kind, key.clone()))
    }

    /// Store an object as-is, bypassing generation bookkeeping and the controller.
    pub fn insert<E: Extension>(&self, obj: &E) -> Result<(), ClientError> {
        let value = to_value(obj)?;
        self.lock().objects.insert((E::KIND, obj.key()), value);
        Ok(())
    }

    /// Apply `f` to a stored object, as an extension controller would.
    pub fn mutate<E: Extension>(&self, key: &ObjectKey, f: impl FnOnce(&mut E)) -> Result<(), ClientError> {
        let mut inner = self.lock();
        let slot = (E::KIND, key.clone());
        let mut obj: E = from_value(inner.objects.get(&slot).ok_or_else(|| not_found::<E>(key))?)?;
        f(&mut obj);
        inner.objects.insert(slot, to_value(&obj)?);
        Ok(())
    }

    /// Report a finished operation: clears the operation annotation, records
    /// `lastOperation` and marks the current generation observed.
    pub fn complete<E: Extension>(&self, key: &ObjectKey, type_: LastOperationType, state: LastOperationState) -> Result<(), ClientError> {
        self.mutate::<E>(key, |obj| finish(obj, type_, state))
    }

    /// Remove an object outright, as the API server does once finalizers are gone.
    pub fn remove(&self, kind: ExtensionKind, key: &ObjectKey) {
        self.lock().objects.remove(&(kind, key.clone()));
    }

    pub fn add_deployment(&self, namespace: &str, d: Deployment) {
        self.lock().deployments.entry(namespace.to_string()).or_default().push(d);
    }

    pub fn add_stateful_set(&self, namespace: &str, s: StatefulSet) {
        self.lock().stateful_sets.entry(namespace.to_string()).or_default().push(s);
    }

    pub fn add_daemon_set(&self, namespace: &str, d: DaemonSet) {
        self.lock().daemon_sets.entry(namespace.to_string()).or_default().push(d);
    }

    pub fn add_etcd(&self, namespace: &str, e: ReadinessResource) {
        self.lock().etcds.entry(namespace.to_string()).or_default().push(e);
    }

    pub fn add_node(&self, n: Node) {
        self.lock().nodes.push(n);
    }

    pub fn add_backup_entry(&self, entry: BackupEntryRef) {
        self.lock().backup_entries.insert(entry.name.clone(), entry);
    }

    fn take_injected(&self) -> Result<(), ClientError> {
        match self.lock().injected.pop_front() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn to_value<E: Extension>(obj: &E) -> Result<serde_json::Value, ClientError> {
    serde_json::to_value(obj).map_err(|e| ClientError::Invalid(e.to_string()))
}

fn from_value<E: Extension>(v: &serde_json::Value) -> Result<E, ClientError> {
    serde_json::from_value(v.clone()).map_err(|e| ClientError::Invalid(e.to_string()))
}

fn not_found<E: Extension>(key: &ObjectKey) -> ClientError {
    ClientError::NotFound(format!("{} {}", E::KIND, key))
}

fn finish<E: Extension>(obj: &mut E, type_: LastOperationType, state: LastOperationState) {
    obj.annotations_mut().remove(OPERATION_ANNOTATION);
    let generation = obj.meta().generation;
    let status = obj.extension_status_mut();
    status.observed_generation = generation;
    let mut op = LastOperation::new(type_, state, format!("{:?} {:?}", type_, state));
    op.last_update_time = Some(Utc::now());
    status.last_operation = Some(op);
    if state == LastOperationState::Succeeded {
        status.last_error = None;
    }
}

/// What a conformant controller does with the object as it stands now.
fn react<E: Extension>(obj: &mut E) {
    let created = obj.last_operation().is_none();
    match obj.operation_request() {
        Some(OperationRequest::WaitForState) => {}
        Some(OperationRequest::Migrate) => finish(obj, LastOperationType::Migrate, LastOperationState::Succeeded),
        Some(OperationRequest::Restore) => finish(obj, LastOperationType::Restore, LastOperationState::Succeeded),
        Some(OperationRequest::Reconcile) | None => {
            let type_ = if created { LastOperationType::Create } else { LastOperationType::Reconcile };
            finish(obj, type_, LastOperationState::Succeeded)
        }
    }
}

impl Inner {
    fn record(&mut self, verb: &str, kind: ExtensionKind, key: &ObjectKey, detail: Option<&str>) {
        let entry = match detail {
            Some(d) => format!("{} {} {} {}", verb, kind, key, d),
            None => format!("{} {} {}", verb, kind, key),
        };
        trace!(entry = %entry, "memory cluster mutation");
        self.journal.push(entry);
    }

    fn record_operation(&mut self, kind: ExtensionKind, key: &ObjectKey, value: &str) {
        self.operation_writes.entry((kind, key.clone())).or_default().push(value.to_string());
    }
}

#[async_trait::async_trait]
impl<E: Extension> ResourceClient<E> for MemoryCluster {
    async fn get(&self, key: &ObjectKey) -> Result<Option<E>, ClientError> {
        self.take_injected()?;
        let inner = self.lock();
        inner.objects.get(&(E::KIND, key.clone())).map(from_value::<E>).transpose()
    }

    async fn list(&self, namespace: &str) -> Result<Vec<E>, ClientError> {
        self.take_injected()?;
        let inner = self.lock();
        inner
            .objects
            .iter()
            .filter(|((kind, key), _)| *kind == E::KIND && key.namespace == namespace)
            .map(|(_, v)| from_value::<E>(v))
            .collect()
    }

    async fn create(&self, obj: &E) -> Result<E, ClientError> {
        self.take_injected()?;
        let mut inner = self.lock();
        let key = obj.key();
        let slot = (E::KIND, key.clone());
        if inner.objects.contains_key(&slot) {
            return Err(ClientError::Conflict(format!("{} {} already exists", E::KIND, key)));
        }
        inner.next_uid += 1;
        let mut fresh = obj.clone();
        fresh.meta_mut().generation = Some(1);
        fresh.meta_mut().uid = Some(format!("uid-{}", inner.next_uid));
        fresh.meta_mut().resource_version = Some(inner.next_uid.to_string());
        fresh.meta_mut().creation_timestamp = Some(Time(Utc::now()));
        if let Some(op) = fresh.annotations().get(OPERATION_ANNOTATION).cloned() {
            inner.record_operation(E::KIND, &key, &op);
        }
        inner.record("create", E::KIND, &key, None);
        if inner.mode == ControllerMode::Conformant {
            react(&mut fresh);
        }
        inner.objects.insert(slot, to_value(&fresh)?);
        Ok(fresh)
    }

    async fn patch_spec(&self, obj: &E) -> Result<E, ClientError> {
        self.take_injected()?;
        let mut inner = self.lock();
        let key = obj.key();
        let slot = (E::KIND, key.clone());
        let live: E = from_value(inner.objects.get(&slot).ok_or_else(|| not_found::<E>(&key))?)?;
        let changed = !live.same_spec(obj);
        let mut updated = obj.clone();
        *updated.meta_mut() = live.meta().clone();
        updated.labels_mut().extend(obj.labels().clone());
        if let Some(status) = live.extension_status().cloned() {
            *updated.extension_status_mut() = status;
        }
        if changed {
            updated.meta_mut().generation = Some(live.meta().generation.unwrap_or(0) + 1);
            inner.record("patch", E::KIND, &key, None);
            if inner.mode == ControllerMode::Conformant {
                react(&mut updated);
            }
        }
        inner.objects.insert(slot, to_value(&updated)?);
        Ok(updated)
    }

    async fn annotate(&self, key: &ObjectKey, annotations: &std::collections::BTreeMap<String, String>) -> Result<(), ClientError> {
        self.take_injected()?;
        let mut inner = self.lock();
        let slot = (E::KIND, key.clone());
        let mut live: E = from_value(inner.objects.get(&slot).ok_or_else(|| not_found::<E>(key))?)?;
        live.annotations_mut().extend(annotations.clone());
        if let Some(op) = annotations.get(OPERATION_ANNOTATION) {
            inner.record_operation(E::KIND, key, op);
            inner.record("annotate", E::KIND, key, Some(op));
            if inner.mode == ControllerMode::Conformant {
                react(&mut live);
            }
        } else {
            inner.record("annotate", E::KIND, key, None);
        }
        inner.objects.insert(slot, to_value(&live)?);
        Ok(())
    }

    async fn patch_status(&self, key: &ObjectKey, status: &ExtensionStatus) -> Result<(), ClientError> {
        self.take_injected()?;
        let mut inner = self.lock();
        let slot = (E::KIND, key.clone());
        let mut live: E = from_value(inner.objects.get(&slot).ok_or_else(|| not_found::<E>(key))?)?;
        *live.extension_status_mut() = status.clone();
        inner.record("status", E::KIND, key, None);
        inner.objects.insert(slot, to_value(&live)?);
        Ok(())
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), ClientError> {
        self.take_injected()?;
        let mut inner = self.lock();
        let slot = (E::KIND, key.clone());
        let mut live: E = from_value(inner.objects.get(&slot).ok_or_else(|| not_found::<E>(key))?)?;
        inner.record("delete", E::KIND, key, None);
        if inner.mode == ControllerMode::Conformant || live.finalizers().is_empty() {
            inner.objects.remove(&slot);
            return Ok(());
        }
        if live.meta().deletion_timestamp.is_none() {
            live.meta_mut().deletion_timestamp = Some(Time(Utc::now()));
            inner.objects.insert(slot, to_value(&live)?);
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl WorkloadLister for MemoryCluster {
    async fn deployments(&self, namespace: &str) -> Result<Vec<Deployment>, ClientError> {
        Ok(self.lock().deployments.get(namespace).cloned().unwrap_or_default())
    }

    async fn stateful_sets(&self, namespace: &str) -> Result<Vec<StatefulSet>, ClientError> {
        Ok(self.lock().stateful_sets.get(namespace).cloned().unwrap_or_default())
    }

    async fn daemon_sets(&self, namespace: &str) -> Result<Vec<DaemonSet>, ClientError> {
        Ok(self.lock().daemon_sets.get(namespace).cloned().unwrap_or_default())
    }

    async fn nodes(&self) -> Result<Vec<Node>, ClientError> {
        Ok(self.lock().nodes.clone())
    }

    async fn etcds(&self, namespace: &str) -> Result<Vec<ReadinessResource>, ClientError> {
        Ok(self.lock().etcds.get(namespace).cloned().unwrap_or_default())
    }
}

#[async_trait::async_trait]
impl BackupEntryReader for MemoryCluster {
    async fn backup_entry(&self, name: &str) -> Result<Option<BackupEntryRef>, ClientError> {
        Ok(self.lock().backup_entries.get(name).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_core::extension::{NetworkSpec, OPERATION_ANNOTATION};
    use canopy_core::{ExtensionPhase, Network};

    fn network(cidr: &str) -> Network {
        let mut n = Network::new(
            "shoot--dev--a",
            NetworkSpec { type_: "calico".into(), provider_config: None, pod_cidr: cidr.into(), service_cidr: "100.64.0.0/13".into() },
        );
        n.metadata.namespace = Some("shoot--dev--a".into());
        n
    }

    #[tokio::test]
    async fn spec_changes_bump_generation() {
        let cluster = MemoryCluster::default();
        let created = ResourceClient::<Network>::create(&cluster, &network("100.96.0.0/11")).await.unwrap();
        assert_eq!(created.metadata.generation, Some(1));

        let same = ResourceClient::<Network>::patch_spec(&cluster, &network("100.96.0.0/11")).await.unwrap();
        assert_eq!(same.metadata.generation, Some(1));

        let changed = ResourceClient::<Network>::patch_spec(&cluster, &network("10.0.0.0/8")).await.unwrap();
        assert_eq!(changed.metadata.generation, Some(2));
        assert_eq!(changed.spec.pod_cidr, "10.0.0.0/8");
    }

    #[tokio::test]
    async fn create_conflicts_when_present() {
        let cluster = MemoryCluster::default();
        ResourceClient::<Network>::create(&cluster, &network("a")).await.unwrap();
        let err = ResourceClient::<Network>::create(&cluster, &network("a")).await.unwrap_err();
        assert!(matches!(err, ClientError::Conflict(_)));
    }

    #[tokio::test]
    async fn conformant_controller_answers_operation_requests() {
        let cluster = MemoryCluster::conformant();
        let obj = network("a");
        let key = obj.key();
        ResourceClient::<Network>::create(&cluster, &obj).await.unwrap();
        let live = ResourceClient::<Network>::get(&cluster, &key).await.unwrap().unwrap();
        assert_eq!(live.phase(), ExtensionPhase::Ready);

        let ann = std::collections::BTreeMap::from([(OPERATION_ANNOTATION.to_string(), "migrate".to_string())]);
        ResourceClient::<Network>::annotate(&cluster, &key, &ann).await.unwrap();
        let live = ResourceClient::<Network>::get(&cluster, &key).await.unwrap().unwrap();
        assert_eq!(live.phase(), ExtensionPhase::Migrated);
        assert_eq!(cluster.operation_writes(ExtensionKind::Network, &key), vec!["migrate".to_string()]);
    }

    #[tokio::test]
    async fn manual_delete_waits_for_finalizers() {
        let cluster = MemoryCluster::default();
        let mut obj = network("a");
        obj.metadata.finalizers = Some(vec!["extensions.canopy.dev/network".into()]);
        let key = obj.key();
        ResourceClient::<Network>::create(&cluster, &obj).await.unwrap();
        ResourceClient::<Network>::delete(&cluster, &key).await.unwrap();
        let live = ResourceClient::<Network>::get(&cluster, &key).await.unwrap().unwrap();
        assert!(live.metadata.deletion_timestamp.is_some());
        cluster.remove(ExtensionKind::Network, &key);
        let gone = ResourceClient::<Network>::get(&cluster, &key).await.unwrap();
        assert!(gone.is_none());
    }

    #[tokio::test]
    async fn injected_errors_fail_one_call() {
        let cluster = MemoryCluster::default();
        cluster.inject_error(ClientError::Transient("etcd leader changed".into()));
        let key = ObjectKey::new("ns", "n");
        assert!(ResourceClient::<Network>::get(&cluster, &key).await.is_err());
        assert!(ResourceClient::<Network>::get(&cluster, &key).await.unwrap().is_none());
    }
}
