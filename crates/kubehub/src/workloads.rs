use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::Node;
use kube::{
    api::{Api, ListParams},
    core::{ApiResource, DynamicObject},
    Client, ResourceExt,
};
use tokio::sync::OnceCell;

use canopy_core::backup::SOURCE_ENTRY_PREFIX;
use canopy_core::{BackupEntryReader, BackupEntryRef, ClientError, ReadinessResource, WorkloadLister};

use crate::{classify, find_api_resource, parse_gvk_key};

pub const ETCD_GVK: &str = "druid.gardener.cloud/v1alpha1/Etcd";
pub const BACKUP_ENTRY_GVK: &str = "core.gardener.cloud/v1beta1/BackupEntry";

/// Resolve a CRD-backed resource once per process.
async fn resolve(cell: &OnceCell<ApiResource>, client: &Client, key: &str) -> Result<ApiResource, ClientError> {
    cell.get_or_try_init(|| async {
        let gvk = parse_gvk_key(key).map_err(|e| ClientError::Invalid(e.to_string()))?;
        let (ar, _) = find_api_resource(client.clone(), &gvk)
            .await
            .map_err(|e| ClientError::NotFound(e.to_string()))?;
        Ok(ar)
    })
    .await
    .cloned()
}

/// Read-only listings for the health engine.
#[derive(Clone)]
pub struct KubeWorkloadLister {
    client: Client,
    etcd: std::sync::Arc<OnceCell<ApiResource>>,
}

impl KubeWorkloadLister {
    pub fn new(client: Client) -> Self {
        Self { client, etcd: Default::default() }
    }
}

#[async_trait::async_trait]
impl WorkloadLister for KubeWorkloadLister {
    async fn deployments(&self, namespace: &str) -> Result<Vec<Deployment>, ClientError> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await.map_err(classify)?.items)
    }

    async fn stateful_sets(&self, namespace: &str) -> Result<Vec<StatefulSet>, ClientError> {
        let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await.map_err(classify)?.items)
    }

    async fn daemon_sets(&self, namespace: &str) -> Result<Vec<DaemonSet>, ClientError> {
        let api: Api<DaemonSet> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await.map_err(classify)?.items)
    }

    async fn nodes(&self) -> Result<Vec<Node>, ClientError> {
        let api: Api<Node> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await.map_err(classify)?.items)
    }

    async fn etcds(&self, namespace: &str) -> Result<Vec<ReadinessResource>, ClientError> {
        let ar = resolve(&self.etcd, &self.client, ETCD_GVK).await?;
        let api: Api<DynamicObject> = Api::namespaced_with(self.client.clone(), namespace, &ar);
        let list = api.list(&ListParams::default()).await.map_err(classify)?;
        Ok(list.items.iter().map(readiness_of).collect())
    }
}

fn readiness_of(obj: &DynamicObject) -> ReadinessResource {
    let status = obj.data.get("status");
    ReadinessResource {
        name: obj.name_any(),
        ready: status.and_then(|s| s.get("ready")).and_then(|v| v.as_bool()),
        last_error: status.and_then(|s| s.get("lastError")).and_then(|v| v.as_str()).map(str::to_string),
    }
}

/// Cluster-scoped backup entries of the garden.
#[derive(Clone)]
pub struct KubeBackupEntryReader {
    client: Client,
    resource: std::sync::Arc<OnceCell<ApiResource>>,
}

impl KubeBackupEntryReader {
    pub fn new(client: Client) -> Self {
        Self { client, resource: Default::default() }
    }
}

#[async_trait::async_trait]
impl BackupEntryReader for KubeBackupEntryReader {
    async fn backup_entry(&self, name: &str) -> Result<Option<BackupEntryRef>, ClientError> {
        let ar = resolve(&self.resource, &self.client, BACKUP_ENTRY_GVK).await?;
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &ar);
        let Some(obj) = api.get_opt(name).await.map_err(classify)? else { return Ok(None) };
        let bucket_name = obj
            .data
            .get("spec")
            .and_then(|s| s.get("bucketName"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| ClientError::Invalid(format!("backup entry {} has no spec.bucketName", name)))?;
        Ok(Some(BackupEntryRef { name: name.to_string(), bucket_name: bucket_name.to_string(), is_source: name.starts_with(SOURCE_ENTRY_PREFIX) }))
    }
}
