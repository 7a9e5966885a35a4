#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use canopy_core::extension::{NetworkSpec, WorkerPool, WorkerSpec};
use canopy_core::{
    CanopyConfig, ClientError, ErrorCode, Error, Extension, ExtensionKind, ExtensionStatus, FixedClock,
    LastError, LastOperationState, LastOperationType, Network, ResourceClient, Worker,
};
use canopy_extension::LifecycleDriver;
use canopy_flow::CancellationToken;
use canopy_kubehub::memory::{ControllerMode, MemoryCluster};
use chrono::{TimeZone, Utc};
use kube::ResourceExt;

const NS: &str = "shoot--dev--a";

fn network(pod_cidr: &str) -> Network {
    let mut n = Network::new(
        NS,
        NetworkSpec { type_: "calico".into(), provider_config: None, pod_cidr: pod_cidr.into(), service_cidr: "100.64.0.0/13".into() },
    );
    n.metadata.namespace = Some(NS.into());
    n
}

fn worker() -> Worker {
    let mut w = Worker::new(
        NS,
        WorkerSpec {
            type_: "aws".into(),
            provider_config: None,
            region: "eu-west-1".into(),
            pools: vec![WorkerPool { name: "cpu".into(), machine_type: "m5.large".into(), minimum: 1, maximum: 3 }],
        },
    );
    w.metadata.namespace = Some(NS.into());
    w
}

fn driver<E: Extension>(cluster: &Arc<MemoryCluster>) -> LifecycleDriver<E>
where
    MemoryCluster: ResourceClient<E>,
{
    let client: Arc<dyn ResourceClient<E>> = cluster.clone();
    let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()));
    LifecycleDriver::new(client, clock, &CanopyConfig::default())
}

#[tokio::test(start_paused = true)]
async fn unforced_reconcile_is_idempotent() {
    let cluster = Arc::new(MemoryCluster::new(ControllerMode::Manual));
    let d = driver::<Network>(&cluster);
    let desired = network("100.96.0.0/11");

    d.ensure_reconciled(&desired, false).await.unwrap();
    d.ensure_reconciled(&desired, false).await.unwrap();

    assert_eq!(cluster.operation_writes(ExtensionKind::Network, &desired.key()), vec!["reconcile".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn forced_reconcile_writes_annotation_again() {
    let cluster = Arc::new(MemoryCluster::new(ControllerMode::Manual));
    let d = driver::<Network>(&cluster);
    let desired = network("100.96.0.0/11");

    d.ensure_reconciled(&desired, false).await.unwrap();
    let live = d.ensure_reconciled(&desired, true).await.unwrap();

    assert_eq!(cluster.operation_writes(ExtensionKind::Network, &desired.key()).len(), 2);
    assert_eq!(live.annotations().get("canopy.dev/timestamp").map(String::as_str), Some("2024-05-01T12:00:00+00:00"));
}

#[tokio::test(start_paused = true)]
async fn unforced_spec_change_needs_observed_generation() {
    let cluster = Arc::new(MemoryCluster::new(ControllerMode::Manual));
    let d = driver::<Network>(&cluster);
    let key = network("a").key();

    d.ensure_reconciled(&network("a"), false).await.unwrap();
    cluster.complete::<Network>(&key, LastOperationType::Create, LastOperationState::Succeeded).unwrap();

    let updated = d.ensure_reconciled(&network("b"), false).await.unwrap();
    assert_eq!(updated.metadata.generation, Some(2));
    assert_eq!(cluster.operation_writes(ExtensionKind::Network, &key).len(), 1);

    let ctx = CancellationToken::new();
    let err = d.wait_ready(&ctx, &key, Duration::from_secs(30)).await.unwrap_err();
    assert!(err.is_timeout());
    assert!(err.to_string().contains("observed generation outdated"), "err={}", err);
}

#[tokio::test(start_paused = true)]
async fn wait_ready_converges_once_controller_reports_success() {
    let cluster = Arc::new(MemoryCluster::new(ControllerMode::Manual));
    let d = driver::<Worker>(&cluster);
    let desired = worker();
    let key = desired.key();
    d.ensure_reconciled(&desired, false).await.unwrap();

    let controller = cluster.clone();
    let k = key.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(12)).await;
        controller.complete::<Worker>(&k, LastOperationType::Create, LastOperationState::Succeeded).unwrap();
    });

    let ctx = CancellationToken::new();
    d.wait_ready(&ctx, &key, Duration::from_secs(60)).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn timeout_reports_last_extension_error() {
    let cluster = Arc::new(MemoryCluster::new(ControllerMode::Manual));
    let d = driver::<Worker>(&cluster);
    let desired = worker();
    let key = desired.key();
    d.ensure_reconciled(&desired, false).await.unwrap();
    cluster
        .mutate::<Worker>(&key, |w| {
            w.extension_status_mut().last_error = Some(LastError::new("instance quota for m5.large exhausted in eu-west-1a", Vec::new()));
        })
        .unwrap();

    let ctx = CancellationToken::new();
    let err = d.wait_ready(&ctx, &key, Duration::from_secs(30)).await.unwrap_err();
    assert!(err.is_timeout());
    assert!(!err.is_severe());
    assert!(err.to_string().contains("instance quota for m5.large exhausted"), "err={}", err);
}

#[tokio::test(start_paused = true)]
async fn non_retryable_error_code_aborts_immediately() {
    let cluster = Arc::new(MemoryCluster::new(ControllerMode::Manual));
    let d = driver::<Worker>(&cluster);
    let desired = worker();
    let key = desired.key();
    d.ensure_reconciled(&desired, false).await.unwrap();
    cluster
        .mutate::<Worker>(&key, |w| {
            w.extension_status_mut().last_error = Some(LastError::new("credentials rejected", vec![ErrorCode::InfraUnauthorized]));
        })
        .unwrap();

    let started = tokio::time::Instant::now();
    let ctx = CancellationToken::new();
    let err = d.wait_ready(&ctx, &key, Duration::from_secs(600)).await.unwrap_err();
    assert!(matches!(err, Error::Severe { .. }));
    assert_eq!(err.codes(), vec![ErrorCode::InfraUnauthorized]);
    assert_eq!(started.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn forbidden_fetch_aborts_wait() {
    let cluster = Arc::new(MemoryCluster::new(ControllerMode::Manual));
    let d = driver::<Network>(&cluster);
    let key = network("a").key();
    d.ensure_reconciled(&network("a"), false).await.unwrap();

    cluster.inject_error(ClientError::Forbidden("networks is forbidden".into()));
    let ctx = CancellationToken::new();
    let err = d.wait_ready(&ctx, &key, Duration::from_secs(600)).await.unwrap_err();
    assert!(!err.is_timeout());
    assert!(err.is_severe());
}

#[tokio::test(start_paused = true)]
async fn transient_fetch_errors_are_retried() {
    let cluster = Arc::new(MemoryCluster::new(ControllerMode::Manual));
    let d = driver::<Network>(&cluster);
    let key = network("a").key();
    d.ensure_reconciled(&network("a"), false).await.unwrap();
    cluster.complete::<Network>(&key, LastOperationType::Create, LastOperationState::Succeeded).unwrap();

    cluster.inject_error(ClientError::Transient("connection reset by peer".into()));
    let ctx = CancellationToken::new();
    d.wait_ready(&ctx, &key, Duration::from_secs(60)).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn delete_is_idempotent_and_waits_for_removal() {
    let cluster = Arc::new(MemoryCluster::new(ControllerMode::Manual));
    let d = driver::<Network>(&cluster);
    let mut desired = network("a");
    desired.metadata.finalizers = Some(vec!["extensions.canopy.dev/calico".into()]);
    let key = desired.key();

    d.delete(&key).await.unwrap();

    d.ensure_reconciled(&desired, false).await.unwrap();
    d.delete(&key).await.unwrap();
    d.delete(&key).await.unwrap();

    let controller = cluster.clone();
    let k = key.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(20)).await;
        controller.remove(ExtensionKind::Network, &k);
    });
    let ctx = CancellationToken::new();
    d.wait_deleted(&ctx, &key, Duration::from_secs(60)).await.unwrap();
    assert!(!cluster.contains(ExtensionKind::Network, &key));
}

#[tokio::test(start_paused = true)]
async fn migrate_and_wait_on_absent_resource_succeed() {
    let cluster = Arc::new(MemoryCluster::new(ControllerMode::Manual));
    let d = driver::<Network>(&cluster);
    let key = network("a").key();
    let ctx = CancellationToken::new();

    d.migrate(&key).await.unwrap();
    d.wait_migrated(&ctx, &key, Duration::from_secs(10)).await.unwrap();
    assert!(cluster.operation_writes(ExtensionKind::Network, &key).is_empty());
}

#[tokio::test(start_paused = true)]
async fn restore_seeds_state_before_requesting_restore() {
    let cluster = Arc::new(MemoryCluster::new(ControllerMode::Manual));
    let d = driver::<Worker>(&cluster);
    let desired = worker();
    let key = desired.key();
    let prior = serde_json::json!({ "machines": ["shoot--dev--a-cpu-z1-0"] });

    d.restore(&desired, Some(&prior)).await.unwrap();

    assert_eq!(
        cluster.journal(),
        vec![
            format!("create Worker {}", key),
            format!("status Worker {}", key),
            format!("annotate Worker {} restore", key),
        ]
    );
    assert_eq!(cluster.operation_writes(ExtensionKind::Worker, &key), vec!["wait-for-state".to_string(), "restore".to_string()]);
    let live = ResourceClient::<Worker>::get(cluster.as_ref(), &key).await.unwrap().unwrap();
    assert_eq!(live.status.as_ref().and_then(|s: &ExtensionStatus| s.state.clone()), Some(prior));
}

fn held_by_finalizer(cluster: &Arc<MemoryCluster>, error: LastError) -> canopy_core::ObjectKey {
    let mut obj = network("a");
    obj.metadata.finalizers = Some(vec!["extensions.canopy.dev/calico".into()]);
    cluster.insert(&obj).unwrap();
    let key = obj.key();
    cluster.mutate::<Network>(&key, |n| n.extension_status_mut().last_error = Some(error)).unwrap();
    key
}

#[tokio::test(start_paused = true)]
async fn wait_deleted_times_out_with_reported_error() {
    let cluster = Arc::new(MemoryCluster::new(ControllerMode::Manual));
    let d = driver::<Network>(&cluster);
    let key = held_by_finalizer(&cluster, LastError::new("cannot delete load balancer: still in use", Vec::new()));
    d.delete(&key).await.unwrap();

    let ctx = CancellationToken::new();
    let err = d.wait_deleted(&ctx, &key, Duration::from_secs(30)).await.unwrap_err();
    assert!(err.is_timeout());
    assert!(!err.is_severe());
    assert!(err.to_string().contains("cannot delete load balancer"), "err={}", err);
}

#[tokio::test(start_paused = true)]
async fn wait_deleted_aborts_on_non_retryable_error() {
    let cluster = Arc::new(MemoryCluster::new(ControllerMode::Manual));
    let d = driver::<Network>(&cluster);
    let key = held_by_finalizer(&cluster, LastError::new("AuthorizationFailed on network delete", vec![ErrorCode::InfraUnauthorized]));
    d.delete(&key).await.unwrap();

    let started = tokio::time::Instant::now();
    let ctx = CancellationToken::new();
    let err = d.wait_deleted(&ctx, &key, Duration::from_secs(600)).await.unwrap_err();
    assert!(matches!(err, Error::Severe { .. }));
    assert_eq!(err.codes(), vec![ErrorCode::InfraUnauthorized]);
    assert_eq!(started.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn restore_create_survives_transient_failure() {
    let cluster = Arc::new(MemoryCluster::new(ControllerMode::Manual));
    let d = driver::<Worker>(&cluster);
    let desired = worker();
    let key = desired.key();
    cluster.inject_error(ClientError::Transient("connection reset by peer".into()));

    d.restore(&desired, None).await.unwrap();

    assert_eq!(cluster.journal(), vec![format!("create Worker {}", key), format!("annotate Worker {} restore", key)]);
    assert_eq!(cluster.operation_writes(ExtensionKind::Worker, &key), vec!["wait-for-state".to_string(), "restore".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn restore_over_existing_object_patches_instead_of_retrying_create() {
    let cluster = Arc::new(MemoryCluster::new(ControllerMode::Manual));
    let d = driver::<Worker>(&cluster);
    let desired = worker();
    let key = desired.key();
    cluster.insert(&desired).unwrap();

    d.restore(&desired, None).await.unwrap();

    let journal = cluster.journal();
    assert!(!journal.iter().any(|e| e.starts_with("create ")), "{:?}", journal);
    assert_eq!(journal.last(), Some(&format!("annotate Worker {} restore", key)));
}
