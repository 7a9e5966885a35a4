//! One evaluation pass over all shoot conditions.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use tracing::{debug, info, instrument};

use canopy_core::condition::{
    get_or_init, API_SERVER_AVAILABLE, CONTROL_PLANE_HEALTHY, EVERY_NODE_READY, OBSERVABILITY_COMPONENTS_HEALTHY,
    SYSTEM_COMPONENTS_HEALTHY,
};
use canopy_core::{
    CanopyConfig, ClientError, Clock, Condition, ConditionStatus, ConditionThresholds, LastOperation, WorkloadLister,
};

use crate::extensions::{check_extension_condition, ExtensionReport};
use crate::hysteresis::{failed_condition, pardon_condition};
use crate::nodes::check_nodes;
use crate::profile::{Expected, Purpose, ShootProfile, KUBE_APISERVER};
use crate::workloads::{check_workloads, Verdict};

/// Namespace of the system components inside the shoot.
pub const SYSTEM_NAMESPACE: &str = "kube-system";

pub struct HealthEngine {
    /// Lists the control plane, hosted on the seed.
    seed: Arc<dyn WorkloadLister>,
    /// Lists nodes and system components of the shoot itself.
    shoot: Arc<dyn WorkloadLister>,
    clock: Arc<dyn Clock>,
    thresholds: ConditionThresholds,
    stale_after: Duration,
}

impl HealthEngine {
    pub fn new(seed: Arc<dyn WorkloadLister>, shoot: Arc<dyn WorkloadLister>, clock: Arc<dyn Clock>, config: &CanopyConfig) -> Self {
        Self { seed, shoot, clock, thresholds: config.thresholds.clone(), stale_after: config.stale_report_after }
    }

    /// Compute the five shoot conditions from live state.
    ///
    /// `previous` holds the conditions of the last pass; missing ones start
    /// out `Unknown`. The result is in the order of
    /// [`canopy_core::condition::SHOOT_CONDITION_TYPES`].
    #[instrument(skip_all, fields(namespace = %profile.namespace))]
    pub async fn evaluate(
        &self,
        profile: &ShootProfile,
        previous: &[Condition],
        reports: &[ExtensionReport],
        last_operation: Option<&LastOperation>,
    ) -> Vec<Condition> {
        let now = self.clock.now();
        let (api, control_plane, observability, nodes, system) = tokio::join!(
            self.check_api_server(profile),
            self.check_control_plane(profile),
            self.check_observability(profile),
            self.check_every_node(profile),
            self.check_system_components(profile),
        );
        let outcomes = [
            (API_SERVER_AVAILABLE, api, "HealthzRequestSucceeded", "API server /healthz endpoint responded with success status code."),
            (CONTROL_PLANE_HEALTHY, control_plane, "ControlPlaneRunning", "All control plane components are healthy."),
            (
                OBSERVABILITY_COMPONENTS_HEALTHY,
                observability,
                "ObservabilityComponentsRunning",
                "All observability components are healthy.",
            ),
            (EVERY_NODE_READY, nodes, "EveryNodeReady", "All nodes are ready."),
            (SYSTEM_COMPONENTS_HEALTHY, system, "SystemComponentsRunning", "All system components are healthy."),
        ];

        let mut out = Vec::with_capacity(outcomes.len());
        for (type_, outcome, healthy_reason, healthy_message) in outcomes {
            let current = get_or_init(previous, type_, now);
            let next = self.apply(current, outcome, healthy_reason, healthy_message, reports, last_operation, now);
            counter!("canopy_health_evaluations_total", 1u64, "condition" => type_, "status" => next.status.to_string());
            if next.status != ConditionStatus::True {
                info!(condition = type_, status = %next.status, reason = %next.reason, "condition not healthy");
            }
            out.push(next);
        }
        out
    }

    #[allow(clippy::too_many_arguments)]
    fn apply(
        &self,
        current: Condition,
        outcome: Result<Verdict, ClientError>,
        healthy_reason: &str,
        healthy_message: &str,
        reports: &[ExtensionReport],
        last_operation: Option<&LastOperation>,
        now: DateTime<Utc>,
    ) -> Condition {
        match outcome {
            Err(err) => {
                debug!(condition = %current.type_, error = %err, "check could not list resources");
                current.updated(ConditionStatus::Unknown, "EvaluationError", err.to_string(), Vec::new(), now)
            }
            Ok(Verdict::NoVerdict) => current,
            Ok(Verdict::Failed { reason, message, codes }) => {
                let failed = failed_condition(&self.thresholds, now, &current, &reason, &message, codes);
                pardon_condition(last_operation, failed, now)
            }
            Ok(Verdict::Healthy) => match check_extension_condition(&current, reports, self.stale_after, now) {
                Some(from_extension) => pardon_condition(last_operation, from_extension, now),
                None => current.updated(ConditionStatus::True, healthy_reason, healthy_message, Vec::new(), now),
            },
        }
    }

    async fn check_api_server(&self, profile: &ShootProfile) -> Result<Verdict, ClientError> {
        if profile.hibernated {
            return Ok(Verdict::NoVerdict);
        }
        let expected = Expected { deployments: vec![KUBE_APISERVER.to_string()], ..Default::default() };
        Ok(match check_workloads(self.seed.as_ref(), &profile.namespace, &expected).await? {
            Verdict::Failed { message, codes, .. } => Verdict::Failed { reason: "HealthzRequestFailed".into(), message, codes },
            other => other,
        })
    }

    async fn check_control_plane(&self, profile: &ShootProfile) -> Result<Verdict, ClientError> {
        if profile.hibernated {
            return Ok(Verdict::NoVerdict);
        }
        check_workloads(self.seed.as_ref(), &profile.namespace, &profile.control_plane()).await
    }

    async fn check_observability(&self, profile: &ShootProfile) -> Result<Verdict, ClientError> {
        if profile.hibernated || profile.purpose == Purpose::Testing {
            return Ok(Verdict::NoVerdict);
        }
        check_workloads(self.seed.as_ref(), &profile.namespace, &profile.observability()).await
    }

    async fn check_every_node(&self, profile: &ShootProfile) -> Result<Verdict, ClientError> {
        if profile.hibernated || profile.is_workerless() {
            return Ok(Verdict::NoVerdict);
        }
        let nodes = self.shoot.nodes().await?;
        Ok(check_nodes(&profile.workers, &nodes))
    }

    async fn check_system_components(&self, profile: &ShootProfile) -> Result<Verdict, ClientError> {
        if profile.hibernated {
            return Ok(Verdict::NoVerdict);
        }
        check_workloads(self.shoot.as_ref(), SYSTEM_NAMESPACE, &profile.system_components()).await
    }
}
