//! Canopy kubehub: the API-server side of the client and lister seams.
//!
//! [`KubeExtensionClient`], [`KubeWorkloadLister`] and [`KubeBackupEntryReader`]
//! talk to a live cluster through kube-rs; [`memory::MemoryCluster`] implements
//! the same traits in memory for tests and dry runs.

#![forbid(unsafe_code)]

use anyhow::{anyhow, Result};
use kube::{
    core::{ApiResource, GroupVersionKind},
    discovery::{Discovery, Scope},
    Client,
};
use tokio::sync::OnceCell;
use tracing::debug;

use canopy_core::ClientError;

mod extension;
pub mod memory;
mod workloads;

pub use extension::KubeExtensionClient;
pub use workloads::{KubeBackupEntryReader, KubeWorkloadLister, BACKUP_ENTRY_GVK, ETCD_GVK};

static CLIENT: OnceCell<Client> = OnceCell::const_new();

/// Shared client built from the default kubeconfig / in-cluster config on first use.
pub async fn get_kube_client() -> Result<Client> {
    let client = CLIENT.get_or_try_init(|| async { Client::try_default().await }).await?;
    Ok(client.clone())
}

pub fn parse_gvk_key(key: &str) -> Result<GroupVersionKind> {
    let parts: Vec<_> = key.split('/').collect();
    match parts.as_slice() {
        [version, kind] => Ok(GroupVersionKind { group: String::new(), version: version.to_string(), kind: kind.to_string() }),
        [group, version, kind] => Ok(GroupVersionKind { group: (*group).to_string(), version: (*version).to_string(), kind: (*kind).to_string() }),
        _ => Err(anyhow!("invalid gvk key: {} (expect v1/Kind or group/v1/Kind)", key)),
    }
}

/// Resolve a GVK against the served API resources. Returns the resource and whether it is namespaced.
pub async fn find_api_resource(client: Client, gvk: &GroupVersionKind) -> Result<(ApiResource, bool)> {
    let discovery = Discovery::new(client).run().await?;
    for group in discovery.groups() {
        for (ar, caps) in group.recommended_resources() {
            if ar.group == gvk.group && ar.version == gvk.version && ar.kind == gvk.kind {
                let namespaced = matches!(caps.scope, Scope::Namespaced);
                debug!(group = %ar.group, version = %ar.version, kind = %ar.kind, namespaced, "resolved api resource");
                return Ok((ar.clone(), namespaced));
            }
        }
    }
    Err(anyhow!("GVK not found: {}/{}/{}", gvk.group, gvk.version, gvk.kind))
}

/// Classify a kube-rs error by what the caller can do about it.
pub fn classify(err: kube::Error) -> ClientError {
    match err {
        kube::Error::Api(ae) => match ae.code {
            404 => ClientError::NotFound(ae.message),
            409 => ClientError::Conflict(ae.message),
            401 | 403 => ClientError::Forbidden(ae.message),
            400 | 422 => ClientError::Invalid(ae.message),
            _ => ClientError::Transient(format!("{} ({})", ae.message, ae.code)),
        },
        kube::Error::SerdeError(e) => ClientError::Invalid(e.to_string()),
        other => ClientError::Transient(other.to_string()),
    }
}
