//! Extension resources: the custom resources through which provider-specific
//! work is delegated to external controllers.
//!
//! Every concrete kind shares one status shape and implements the narrow
//! [`Extension`] capability; the lifecycle driver is written purely against it.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use kube::{CustomResource, Resource, ResourceExt};
use k8s_openapi::NamespaceResourceScope;
use schemars::JsonSchema;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::codes::ErrorCode;
use crate::condition::Condition;

pub const GROUP: &str = "extensions.canopy.dev";
pub const VERSION: &str = "v1alpha1";

/// Annotation through which the driver requests work from an extension controller.
pub const OPERATION_ANNOTATION: &str = "canopy.dev/operation";
/// RFC 3339 time of the last operation request, for traceability.
pub const TIMESTAMP_ANNOTATION: &str = "canopy.dev/timestamp";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationRequest {
    Reconcile,
    Migrate,
    Restore,
    /// Parks a freshly created object until its prior state has been seeded.
    WaitForState,
}

impl OperationRequest {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reconcile => "reconcile",
            Self::Migrate => "migrate",
            Self::Restore => "restore",
            Self::WaitForState => "wait-for-state",
        }
    }
}

impl FromStr for OperationRequest {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reconcile" => Ok(Self::Reconcile),
            "migrate" => Ok(Self::Migrate),
            "restore" => Ok(Self::Restore),
            "wait-for-state" => Ok(Self::WaitForState),
            other => Err(format!("unknown operation annotation value: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum LastOperationType {
    Create,
    Reconcile,
    Delete,
    Migrate,
    Restore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum LastOperationState {
    Processing,
    Succeeded,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LastOperation {
    #[serde(rename = "type")]
    pub type_: LastOperationType,
    pub state: LastOperationState,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<DateTime<Utc>>,
}

impl LastOperation {
    pub fn new(type_: LastOperationType, state: LastOperationState, description: impl Into<String>) -> Self {
        Self { type_, state, description: description.into(), last_update_time: None }
    }

    pub fn is_processing(&self) -> bool {
        self.state == LastOperationState::Processing
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LastError {
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub codes: Vec<ErrorCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<DateTime<Utc>>,
}

impl LastError {
    pub fn new(description: impl Into<String>, codes: Vec<ErrorCode>) -> Self {
        Self { description: description.into(), codes, last_update_time: None }
    }
}

/// Status shared by all extension kinds. Written by extension controllers,
/// except for `state`, which the orchestrator seeds during a restore.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_operation: Option<LastOperation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<LastError>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    /// Opaque controller state carried across a migration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_status: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ExtensionKind {
    Infrastructure,
    Worker,
    Network,
    ControlPlane,
}

impl ExtensionKind {
    pub const ALL: [ExtensionKind; 4] = [Self::Infrastructure, Self::Worker, Self::Network, Self::ControlPlane];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Infrastructure => "Infrastructure",
            Self::Worker => "Worker",
            Self::Network => "Network",
            Self::ControlPlane => "ControlPlane",
        }
    }
}

impl fmt::Display for ExtensionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), name: name.into() }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Lifecycle phase of one extension resource, derived from its annotations and status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExtensionPhase {
    Absent,
    PendingReconcile,
    Reconciling,
    Ready,
    Error,
    PendingDelete,
    Deleting,
    PendingMigrate,
    Migrating,
    Migrated,
    PendingRestore,
    Restoring,
    Restored,
}

impl ExtensionPhase {
    pub fn of<E: Extension>(obj: Option<&E>) -> Self {
        let Some(obj) = obj else { return Self::Absent };
        let last = obj.last_operation();
        if obj.meta().deletion_timestamp.is_some() {
            return match last {
                Some(op) if op.type_ == LastOperationType::Delete => match op.state {
                    LastOperationState::Error => Self::Error,
                    _ => Self::Deleting,
                },
                _ => Self::PendingDelete,
            };
        }
        match obj.operation_request() {
            Some(OperationRequest::Reconcile) => return Self::PendingReconcile,
            Some(OperationRequest::Migrate) => return Self::PendingMigrate,
            Some(OperationRequest::Restore) | Some(OperationRequest::WaitForState) => return Self::PendingRestore,
            None => {}
        }
        let Some(op) = last else { return Self::PendingReconcile };
        match (op.type_, op.state) {
            (_, LastOperationState::Error) => Self::Error,
            (LastOperationType::Migrate, LastOperationState::Processing) => Self::Migrating,
            (LastOperationType::Migrate, LastOperationState::Succeeded) => Self::Migrated,
            (LastOperationType::Restore, LastOperationState::Processing) => Self::Restoring,
            (LastOperationType::Restore, LastOperationState::Succeeded) => Self::Restored,
            (LastOperationType::Delete, _) => Self::Deleting,
            (_, LastOperationState::Processing) => Self::Reconciling,
            (_, LastOperationState::Succeeded) if obj.generation_observed() => Self::Ready,
            (_, LastOperationState::Succeeded) => Self::PendingReconcile,
        }
    }
}

/// Narrow capability every extension kind provides to the driver.
pub trait Extension:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + fmt::Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    const KIND: ExtensionKind;

    /// Provider type discriminator (e.g. "aws", "calico").
    fn extension_type(&self) -> &str;

    /// Optional discriminator for kinds that exist more than once per shoot.
    fn purpose(&self) -> Option<&str> {
        None
    }

    fn extension_status(&self) -> Option<&ExtensionStatus>;

    fn extension_status_mut(&mut self) -> &mut ExtensionStatus;

    fn same_spec(&self, other: &Self) -> bool;

    fn key(&self) -> ObjectKey {
        ObjectKey::new(self.namespace().unwrap_or_default(), self.name_any())
    }

    fn last_operation(&self) -> Option<&LastOperation> {
        self.extension_status().and_then(|s| s.last_operation.as_ref())
    }

    fn last_error(&self) -> Option<&LastError> {
        self.extension_status().and_then(|s| s.last_error.as_ref())
    }

    /// True once the controller has observed the current spec generation.
    fn generation_observed(&self) -> bool {
        let observed = self.extension_status().and_then(|s| s.observed_generation);
        match (self.meta().generation, observed) {
            (Some(generation), Some(observed)) => generation == observed,
            (None, _) => true,
            (Some(_), None) => false,
        }
    }

    fn operation_request(&self) -> Option<OperationRequest> {
        self.annotations().get(OPERATION_ANNOTATION).and_then(|v| v.parse().ok())
    }

    fn phase(&self) -> ExtensionPhase {
        ExtensionPhase::of(Some(self))
    }
}

macro_rules! impl_extension {
    ($ty:ident => $kind:expr $(, purpose = $purpose:ident)?) => {
        impl Extension for $ty {
            const KIND: ExtensionKind = $kind;

            fn extension_type(&self) -> &str {
                &self.spec.type_
            }

            $(
            fn purpose(&self) -> Option<&str> {
                self.spec.$purpose.as_deref()
            }
            )?

            fn extension_status(&self) -> Option<&ExtensionStatus> {
                self.status.as_ref()
            }

            fn extension_status_mut(&mut self) -> &mut ExtensionStatus {
                self.status.get_or_insert_with(ExtensionStatus::default)
            }

            fn same_spec(&self, other: &Self) -> bool {
                self.spec == other.spec
            }
        }
    };
}

#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(group = "extensions.canopy.dev", version = "v1alpha1", kind = "Infrastructure", namespaced)]
#[kube(status = "ExtensionStatus")]
#[serde(rename_all = "camelCase")]
pub struct InfrastructureSpec {
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_config: Option<serde_json::Value>,
    pub region: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkerPool {
    pub name: String,
    pub machine_type: String,
    pub minimum: i32,
    pub maximum: i32,
}

#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(group = "extensions.canopy.dev", version = "v1alpha1", kind = "Worker", namespaced)]
#[kube(status = "ExtensionStatus")]
#[serde(rename_all = "camelCase")]
pub struct WorkerSpec {
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_config: Option<serde_json::Value>,
    pub region: String,
    #[serde(default)]
    pub pools: Vec<WorkerPool>,
}

#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(group = "extensions.canopy.dev", version = "v1alpha1", kind = "Network", namespaced)]
#[kube(status = "ExtensionStatus")]
#[serde(rename_all = "camelCase")]
pub struct NetworkSpec {
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_config: Option<serde_json::Value>,
    pub pod_cidr: String,
    pub service_cidr: String,
}

#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(group = "extensions.canopy.dev", version = "v1alpha1", kind = "ControlPlane", namespaced)]
#[kube(status = "ExtensionStatus")]
#[serde(rename_all = "camelCase")]
pub struct ControlPlaneSpec {
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_config: Option<serde_json::Value>,
    pub region: String,
    /// `normal` or `exposure`; absent means `normal`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
}

impl_extension!(Infrastructure => ExtensionKind::Infrastructure);
impl_extension!(Worker => ExtensionKind::Worker);
impl_extension!(Network => ExtensionKind::Network);
impl_extension!(ControlPlane => ExtensionKind::ControlPlane, purpose = purpose);
