//! Health rules for individual workloads and the aggregated resource checks.

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};

use canopy_core::codes::determine_error_codes;
use canopy_core::{ClientError, ErrorCode, ReadinessResource, WorkloadLister};

use crate::profile::Expected;

/// Outcome of one resource check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Healthy,
    Failed { reason: String, message: String, codes: Vec<ErrorCode> },
    /// The check does not apply to this cluster right now.
    NoVerdict,
}

impl Verdict {
    pub fn failed(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed { reason: reason.into(), message: message.into(), codes: Vec::new() }
    }
}

/// A workload that exists but is not healthy: what is wrong with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unhealthy {
    pub message: String,
    pub codes: Vec<ErrorCode>,
}

impl Unhealthy {
    fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), codes: Vec::new() }
    }
}

pub fn check_deployment(d: &Deployment) -> Result<(), Unhealthy> {
    let available = d
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .and_then(|cs| cs.iter().find(|c| c.type_ == "Available"));
    match available {
        Some(c) if c.status == "True" => Ok(()),
        Some(c) => Err(Unhealthy::new(c.message.clone().unwrap_or_else(|| "deployment is not available".into()))),
        None => Err(Unhealthy::new("deployment has no Available condition")),
    }
}

pub fn check_stateful_set(s: &StatefulSet) -> Result<(), Unhealthy> {
    let ready = s.status.as_ref().and_then(|st| st.ready_replicas).unwrap_or(0);
    if ready >= 1 {
        Ok(())
    } else {
        Err(Unhealthy::new("no ready replicas"))
    }
}

pub fn check_daemon_set(d: &DaemonSet) -> Result<(), Unhealthy> {
    let Some(status) = d.status.as_ref() else { return Ok(()) };
    if status.desired_number_scheduled == 0 {
        return Ok(());
    }
    match status.number_unavailable.unwrap_or(0) {
        0 => Ok(()),
        n => Err(Unhealthy::new(format!("{} of {} pods unavailable", n, status.desired_number_scheduled))),
    }
}

pub fn check_etcd(e: &ReadinessResource) -> Result<(), Unhealthy> {
    if e.ready == Some(true) {
        return Ok(());
    }
    match &e.last_error {
        Some(msg) => Err(Unhealthy { message: msg.clone(), codes: determine_error_codes(msg) }),
        None => Err(Unhealthy::new("etcd is not ready")),
    }
}

fn name_of(meta: &k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta) -> &str {
    meta.name.as_deref().unwrap_or_default()
}

/// Check one class of workloads: all missing ones first, then unhealthy ones,
/// each in the expected order.
fn check_class<T>(
    kind: &str,
    expected: &[String],
    actual: &[T],
    name: impl Fn(&T) -> &str,
    rule: impl Fn(&T) -> Result<(), Unhealthy>,
) -> Option<Verdict> {
    for want in expected {
        if !actual.iter().any(|a| name(a) == want.as_str()) {
            return Some(Verdict::failed(format!("{}Missing", kind), format!("Missing required {} {:?}", kind, want)));
        }
    }
    for want in expected {
        if let Some(a) = actual.iter().find(|a| name(a) == want.as_str()) {
            if let Err(u) = rule(a) {
                return Some(Verdict::Failed {
                    reason: format!("{}Unhealthy", kind),
                    message: format!("{} {:?} is unhealthy: {}", kind, want, u.message),
                    codes: u.codes,
                });
            }
        }
    }
    None
}

/// Evaluate `expected` against what `lister` finds in `namespace`.
pub async fn check_workloads(lister: &dyn WorkloadLister, namespace: &str, expected: &Expected) -> Result<Verdict, ClientError> {
    if expected.is_empty() {
        return Ok(Verdict::NoVerdict);
    }
    if !expected.deployments.is_empty() {
        let actual = lister.deployments(namespace).await?;
        if let Some(v) = check_class("Deployment", &expected.deployments, &actual, |d| name_of(&d.metadata), check_deployment) {
            return Ok(v);
        }
    }
    if !expected.stateful_sets.is_empty() {
        let actual = lister.stateful_sets(namespace).await?;
        if let Some(v) = check_class("StatefulSet", &expected.stateful_sets, &actual, |s| name_of(&s.metadata), check_stateful_set) {
            return Ok(v);
        }
    }
    if !expected.daemon_sets.is_empty() {
        let actual = lister.daemon_sets(namespace).await?;
        if let Some(v) = check_class("DaemonSet", &expected.daemon_sets, &actual, |d| name_of(&d.metadata), check_daemon_set) {
            return Ok(v);
        }
    }
    if !expected.etcds.is_empty() {
        let actual = lister.etcds(namespace).await?;
        if let Some(v) = check_class("Etcd", &expected.etcds, &actual, |e| e.name.as_str(), check_etcd) {
            return Ok(v);
        }
    }
    Ok(Verdict::Healthy)
}

#[cfg(test)]
pub(crate) mod fixtures {
    use k8s_openapi::api::apps::v1::{DaemonSet, DaemonSetStatus, Deployment, DeploymentCondition, DeploymentStatus, StatefulSet, StatefulSetStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn meta(name: &str) -> ObjectMeta {
        ObjectMeta { name: Some(name.into()), ..Default::default() }
    }

    pub fn deployment(name: &str, available: bool) -> Deployment {
        Deployment {
            metadata: meta(name),
            status: Some(DeploymentStatus {
                conditions: Some(vec![DeploymentCondition {
                    type_: "Available".into(),
                    status: if available { "True" } else { "False" }.into(),
                    message: Some("Deployment does not have minimum availability.".into()),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub fn stateful_set(name: &str, ready: i32) -> StatefulSet {
        StatefulSet { metadata: meta(name), status: Some(StatefulSetStatus { ready_replicas: Some(ready), ..Default::default() }), ..Default::default() }
    }

    pub fn daemon_set(name: &str, desired: i32, unavailable: i32) -> DaemonSet {
        DaemonSet {
            metadata: meta(name),
            status: Some(DaemonSetStatus { desired_number_scheduled: desired, number_unavailable: Some(unavailable), ..Default::default() }),
            ..Default::default()
        }
    }
}
