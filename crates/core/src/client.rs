//! Seams between the orchestration core and the API server.
//!
//! `canopy-kubehub` implements these against kube-rs and ships an in-memory
//! cluster for tests; the driver and the health engine only see the traits.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::Node;
use serde::{Deserialize, Serialize};

use crate::backup::BackupEntryRef;
use crate::error::ClientError;
use crate::extension::{Extension, ExtensionStatus, ObjectKey};

/// Typed access to one extension kind. Every mutation must be safe to retry.
#[async_trait::async_trait]
pub trait ResourceClient<E: Extension>: Send + Sync {
    /// `Ok(None)` when the object does not exist.
    async fn get(&self, key: &ObjectKey) -> Result<Option<E>, ClientError>;

    async fn list(&self, namespace: &str) -> Result<Vec<E>, ClientError>;

    /// Create with the metadata (labels, annotations) and spec of `obj`.
    /// Fails with `ClientError::Conflict` if the object already exists.
    async fn create(&self, obj: &E) -> Result<E, ClientError>;

    /// Merge the spec and labels of `obj` into the live object; annotations are left alone.
    async fn patch_spec(&self, obj: &E) -> Result<E, ClientError>;

    /// Merge the given annotations into the live object.
    async fn annotate(&self, key: &ObjectKey, annotations: &BTreeMap<String, String>) -> Result<(), ClientError>;

    /// Replace the status subresource.
    async fn patch_status(&self, key: &ObjectKey, status: &ExtensionStatus) -> Result<(), ClientError>;

    /// Request deletion. Returns `ClientError::NotFound` if already gone.
    async fn delete(&self, key: &ObjectKey) -> Result<(), ClientError>;
}

/// A resource that only exposes a readiness flag and its last error (e.g. etcd).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadinessResource {
    pub name: String,
    #[serde(default)]
    pub ready: Option<bool>,
    #[serde(default)]
    pub last_error: Option<String>,
}

/// Read-only listings consumed by the health engine. Implementations never mutate.
#[async_trait::async_trait]
pub trait WorkloadLister: Send + Sync {
    async fn deployments(&self, namespace: &str) -> Result<Vec<Deployment>, ClientError>;
    async fn stateful_sets(&self, namespace: &str) -> Result<Vec<StatefulSet>, ClientError>;
    async fn daemon_sets(&self, namespace: &str) -> Result<Vec<DaemonSet>, ClientError>;
    async fn nodes(&self) -> Result<Vec<Node>, ClientError>;
    async fn etcds(&self, namespace: &str) -> Result<Vec<ReadinessResource>, ClientError>;
}

#[async_trait::async_trait]
pub trait BackupEntryReader: Send + Sync {
    async fn backup_entry(&self, name: &str) -> Result<Option<BackupEntryRef>, ClientError>;
}
