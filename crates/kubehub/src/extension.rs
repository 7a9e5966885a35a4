use std::collections::BTreeMap;
use std::marker::PhantomData;

use kube::{
    api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams},
    Client, ResourceExt,
};
use metrics::counter;
use serde_json::json;
use tracing::debug;

use canopy_core::{ClientError, Extension, ExtensionStatus, ObjectKey, ResourceClient};

use crate::classify;

/// [`ResourceClient`] for one extension kind backed by the API server.
/// Spec, annotation and status writes are JSON merge patches.
pub struct KubeExtensionClient<E> {
    client: Client,
    _kind: PhantomData<fn() -> E>,
}

impl<E> Clone for KubeExtensionClient<E> {
    fn clone(&self) -> Self {
        Self { client: self.client.clone(), _kind: PhantomData }
    }
}

impl<E: Extension> KubeExtensionClient<E> {
    pub fn new(client: Client) -> Self {
        Self { client, _kind: PhantomData }
    }

    fn api(&self, namespace: &str) -> Api<E> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn api_call(kind: &str, verb: &'static str) {
    counter!("canopy_kube_requests_total", 1u64, "kind" => kind.to_string(), "verb" => verb);
}

#[async_trait::async_trait]
impl<E: Extension> ResourceClient<E> for KubeExtensionClient<E> {
    async fn get(&self, key: &ObjectKey) -> Result<Option<E>, ClientError> {
        api_call(E::KIND.as_str(), "get");
        self.api(&key.namespace).get_opt(&key.name).await.map_err(classify)
    }

    async fn list(&self, namespace: &str) -> Result<Vec<E>, ClientError> {
        api_call(E::KIND.as_str(), "list");
        let list = self.api(namespace).list(&ListParams::default()).await.map_err(classify)?;
        Ok(list.items)
    }

    async fn create(&self, obj: &E) -> Result<E, ClientError> {
        api_call(E::KIND.as_str(), "create");
        let mut fresh = obj.clone();
        let meta = fresh.meta_mut();
        meta.resource_version = None;
        meta.uid = None;
        meta.managed_fields = None;
        let ns = fresh.namespace().unwrap_or_default();
        debug!(kind = %E::KIND, ns = %ns, name = %fresh.name_any(), "create");
        self.api(&ns).create(&PostParams::default(), &fresh).await.map_err(classify)
    }

    async fn patch_spec(&self, obj: &E) -> Result<E, ClientError> {
        api_call(E::KIND.as_str(), "patch");
        let spec = serde_json::to_value(obj)
            .map_err(|e| ClientError::Invalid(e.to_string()))?
            .get("spec")
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        let patch = json!({ "metadata": { "labels": obj.labels() }, "spec": spec });
        let key = obj.key();
        self.api(&key.namespace)
            .patch(&key.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(classify)
    }

    async fn annotate(&self, key: &ObjectKey, annotations: &BTreeMap<String, String>) -> Result<(), ClientError> {
        api_call(E::KIND.as_str(), "annotate");
        let patch = json!({ "metadata": { "annotations": annotations } });
        self.api(&key.namespace)
            .patch(&key.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn patch_status(&self, key: &ObjectKey, status: &ExtensionStatus) -> Result<(), ClientError> {
        api_call(E::KIND.as_str(), "patch_status");
        let patch = json!({ "status": status });
        self.api(&key.namespace)
            .patch_status(&key.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), ClientError> {
        api_call(E::KIND.as_str(), "delete");
        self.api(&key.namespace).delete(&key.name, &DeleteParams::foreground()).await.map_err(classify)?;
        Ok(())
    }
}
