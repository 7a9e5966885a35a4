//! Node readiness and worker-pool capacity.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Node;

use canopy_core::codes::determine_error_codes;

use crate::profile::{PoolProfile, POOL_LABEL};
use crate::workloads::Verdict;

/// Node conditions that make a node unhealthy when they are `True`.
const PRESSURE_CONDITIONS: [&str; 4] = ["MemoryPressure", "DiskPressure", "PIDPressure", "NetworkUnavailable"];

fn node_name(node: &Node) -> &str {
    node.metadata.name.as_deref().unwrap_or_default()
}

fn node_pool(node: &Node) -> Option<&str> {
    node.metadata.labels.as_ref().and_then(|l| l.get(POOL_LABEL)).map(String::as_str)
}

/// First problem found on `node`: not ready, or under some pressure.
fn node_problem(node: &Node) -> Option<(String, String)> {
    let conditions = node.status.as_ref().and_then(|s| s.conditions.as_deref()).unwrap_or_default();
    match conditions.iter().find(|c| c.type_ == "Ready") {
        Some(c) if c.status == "True" => {}
        Some(c) => {
            let msg = c.message.clone().unwrap_or_else(|| "node is not ready".into());
            return Some(("NodeNotReady".into(), msg));
        }
        None => return Some(("NodeNotReady".into(), "node reports no Ready condition".into())),
    }
    conditions
        .iter()
        .find(|c| PRESSURE_CONDITIONS.contains(&c.type_.as_str()) && c.status == "True")
        .map(|c| (c.type_.clone(), c.message.clone().unwrap_or_default()))
}

/// Every pool must have at least its minimum number of nodes, and every node
/// must be ready without pressure.
pub fn check_nodes(pools: &[PoolProfile], nodes: &[Node]) -> Verdict {
    let mut per_pool: BTreeMap<&str, i32> = BTreeMap::new();
    for node in nodes {
        if let Some(pool) = node_pool(node) {
            *per_pool.entry(pool).or_default() += 1;
        }
    }
    for pool in pools {
        let have = per_pool.get(pool.name.as_str()).copied().unwrap_or(0);
        if have < pool.minimum {
            return Verdict::failed(
                "MissingNodes",
                format!("Too few nodes registered in worker pool {:?} ({}/{})", pool.name, have, pool.minimum),
            );
        }
    }
    for node in nodes {
        if let Some((condition, detail)) = node_problem(node) {
            let codes = determine_error_codes(&detail);
            return Verdict::Failed {
                reason: "NodeUnhealthy".into(),
                message: format!("Node {:?} is unhealthy ({}): {}", node_name(node), condition, detail),
                codes,
            };
        }
    }
    Verdict::Healthy
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    fn pool(name: &str, minimum: i32) -> PoolProfile {
        PoolProfile { name: name.into(), minimum, maximum: minimum + 2 }
    }

    #[test]
    fn ready_nodes_meeting_minimums_are_healthy() {
        let nodes = vec![ready("a", "cpu"), ready("b", "cpu"), ready("c", "gpu")];
        assert_eq!(check_nodes(&[pool("cpu", 2), pool("gpu", 1)], &nodes), Verdict::Healthy);
    }

    #[test]
    fn pool_below_minimum_fails_before_node_conditions() {
        let nodes = vec![node("a", "cpu", &[("Ready", "False")])];
        match check_nodes(&[pool("cpu", 2)], &nodes) {
            Verdict::Failed { reason, message, .. } => {
                assert_eq!(reason, "MissingNodes");
                assert!(message.contains("1/2"), "{}", message);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn pressure_and_not_ready_surface_as_node_unhealthy() {
        let nodes = vec![ready("a", "cpu"), node("b", "cpu", &[("Ready", "True"), ("DiskPressure", "True")])];
        match check_nodes(&[pool("cpu", 1)], &nodes) {
            Verdict::Failed { reason, message, .. } => {
                assert_eq!(reason, "NodeUnhealthy");
                assert!(message.contains("DiskPressure"));
            }
            other => panic!("unexpected {:?}", other),
        }
        let nodes = vec![node("a", "cpu", &[])];
        assert!(matches!(check_nodes(&[], &nodes), Verdict::Failed { .. }));
    }
}
