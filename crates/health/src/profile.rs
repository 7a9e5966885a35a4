//! What a cluster is expected to run, given its configuration.

use serde::{Deserialize, Serialize};

/// Label carrying the worker pool a node belongs to.
pub const POOL_LABEL: &str = "worker.canopy.dev/pool";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Purpose {
    Evaluation,
    #[default]
    Production,
    Development,
    Testing,
    Infrastructure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolProfile {
    pub name: String,
    pub minimum: i32,
    pub maximum: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Features {
    pub monitoring: bool,
    pub logging: bool,
}

impl Default for Features {
    fn default() -> Self {
        Self { monitoring: true, logging: true }
    }
}

/// Cluster configuration as far as health evaluation needs it. Read from YAML or JSON.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ShootProfile {
    /// Control-plane namespace on the seed.
    pub namespace: String,
    /// Infrastructure provider type, e.g. `aws`.
    pub provider: String,
    pub purpose: Purpose,
    pub hibernated: bool,
    pub workers: Vec<PoolProfile>,
    pub features: Features,
}

/// Deployments some providers run in the control plane in addition to the common set.
pub fn provider_deployment(provider: &str) -> Option<&'static str> {
    match provider {
        "aws" => Some("aws-custom-route-controller"),
        "azure" => Some("remedy-controller-azure"),
        _ => None,
    }
}

pub const KUBE_APISERVER: &str = "kube-apiserver";
pub const ETCD_MAIN: &str = "etcd-main";
pub const ETCD_EVENTS: &str = "etcd-events";

/// Expected workloads of one check, in the order they are reported.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Expected {
    pub deployments: Vec<String>,
    pub stateful_sets: Vec<String>,
    pub daemon_sets: Vec<String>,
    pub etcds: Vec<String>,
}

impl Expected {
    pub fn is_empty(&self) -> bool {
        self.deployments.is_empty() && self.stateful_sets.is_empty() && self.daemon_sets.is_empty() && self.etcds.is_empty()
    }
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

impl ShootProfile {
    pub fn is_workerless(&self) -> bool {
        self.workers.is_empty()
    }

    /// Any pool that can scale needs the cluster autoscaler.
    pub fn wants_autoscaler(&self) -> bool {
        self.workers.iter().any(|p| p.minimum != p.maximum)
    }

    pub fn control_plane(&self) -> Expected {
        let mut deployments = names(&[KUBE_APISERVER, "kube-controller-manager", "resource-manager"]);
        if !self.is_workerless() {
            deployments.push("kube-scheduler".into());
            deployments.push("machine-controller-manager".into());
        }
        if self.wants_autoscaler() {
            deployments.push("cluster-autoscaler".into());
        }
        if let Some(extra) = provider_deployment(&self.provider) {
            deployments.push(extra.into());
        }
        Expected { deployments, etcds: names(&[ETCD_MAIN, ETCD_EVENTS]), ..Default::default() }
    }

    pub fn system_components(&self) -> Expected {
        Expected {
            deployments: names(&["coredns", "metrics-server", "vpn-shoot"]),
            daemon_sets: names(&["kube-proxy"]),
            ..Default::default()
        }
    }

    pub fn observability(&self) -> Expected {
        let mut out = Expected::default();
        if self.features.monitoring {
            out.deployments.extend(names(&["plutono", "kube-state-metrics"]));
            out.stateful_sets.extend(names(&["prometheus", "alertmanager"]));
        }
        if self.features.logging {
            out.stateful_sets.push("vali".into());
        }
        out
    }
}
