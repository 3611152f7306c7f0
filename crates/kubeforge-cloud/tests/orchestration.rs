use kubeforge_cloud::orchestrator::{self, names};
use kubeforge_cloud::testkit::MockBackend;
use kubeforge_cloud::{
    CloudProvider, ClusterMeta, ClusterPlan, HaPlan, InitOutcome, ManagedPlan, NodePlan,
    ProviderClient, ResourceRequest, ScaleResult, list_clusters,
};
use kubeforge_core::{
    CivoNetwork, Cloud, CloudInfra, ClusterType, ErrorKind, Operation, RetryConfig, Role,
    StorageDocument,
};
use kubeforge_storage::{ClusterFilter, LocalStore, StorageDriver};
use std::path::Path;
use std::time::Duration;
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;
use tracing::Span;

const REGION: &str = "LON1";

fn fast() -> RetryConfig {
    RetryConfig {
        max_attempts: 5,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(2),
        backoff_multiplier: 2.0,
    }
}

fn new_provider(
    mock: &MockBackend,
    name: &str,
    cluster_type: ClusterType,
) -> ProviderClient<MockBackend> {
    let meta = ClusterMeta::new(name, REGION, cluster_type).with_version("1.30");
    ProviderClient::new(mock.clone(), meta, CancellationToken::new(), Span::none())
        .with_retry(fast(), fast())
}

fn new_store(root: &Path, name: &str, cluster_type: ClusterType) -> LocalStore {
    let mut store = LocalStore::new(root, Span::none());
    store.setup(Cloud::Civo, REGION, name, cluster_type).unwrap();
    store
}

fn ha_plan(name: &str, cp: usize, wp: usize, ds: usize) -> HaPlan {
    HaPlan {
        cluster_name: name.to_string(),
        control_planes: NodePlan::new(cp, "g3.medium"),
        worker_planes: NodePlan::new(wp, "g3.medium"),
        data_stores: NodePlan::new(ds, "g3.small"),
        load_balancer_size: "g3.small".to_string(),
    }
}

fn civo(doc: &StorageDocument) -> &CloudInfra<CivoNetwork> {
    doc.cloud_infra.as_ref().unwrap().civo.as_ref().unwrap()
}

#[tokio::test]
async fn test_ha_cluster_with_seven_ten_five() {
    let temp_dir = tempdir().unwrap();
    let store = new_store(temp_dir.path(), "demo", ClusterType::Ha);
    let mock = MockBackend::new();
    let mut provider = new_provider(&mock, "demo", ClusterType::Ha);

    let plan = ClusterPlan::Ha(ha_plan("demo", 7, 10, 5));
    let outcome = orchestrator::create_cluster(&mut provider, &store, &plan)
        .await
        .unwrap();
    assert_eq!(outcome, InitOutcome::Fresh);

    let doc = store.read().await.unwrap();
    let infra = civo(&doc);
    assert_eq!(infra.control_planes.len(), 7);
    assert_eq!(infra.worker_planes.len(), 10);
    assert_eq!(infra.data_stores.len(), 5);
    assert!(infra.control_planes.is_consistent());
    assert!(infra.worker_planes.is_consistent());
    assert!(infra.base.is_completed);
    assert_eq!(mock.live_vms(), 1 + 5 + 7 + 10);

    provider
        .del_vm(&store, Role::WorkerPlane, 9)
        .await
        .unwrap();

    let doc = store.read().await.unwrap();
    let workers = &civo(&doc).worker_planes;
    assert_eq!(workers.len(), 10);
    assert_eq!(workers.names[9], "");
    assert_eq!(workers.vm_ids[9], "");
    assert_eq!(workers.names[8], names::vm("demo", Role::WorkerPlane, 8));
}

#[tokio::test]
async fn test_create_twice_touches_cloud_once() {
    let temp_dir = tempdir().unwrap();
    let store = new_store(temp_dir.path(), "demo", ClusterType::Ha);
    let mock = MockBackend::new();
    let plan = ClusterPlan::Ha(ha_plan("demo", 3, 2, 3));

    let mut first = new_provider(&mock, "demo", ClusterType::Ha);
    orchestrator::create_cluster(&mut first, &store, &plan)
        .await
        .unwrap();
    let calls = mock.mutating_calls();
    let snapshot = store.read().await.unwrap();

    let mut second = new_provider(&mock, "demo", ClusterType::Ha);
    let outcome = orchestrator::create_cluster(&mut second, &store, &plan)
        .await
        .unwrap();

    assert_eq!(outcome, InitOutcome::AlreadyCompleted);
    assert_eq!(mock.mutating_calls(), calls);
    assert_eq!(store.read().await.unwrap(), snapshot);
}

#[tokio::test]
async fn test_repeated_primitives_are_no_ops() {
    let temp_dir = tempdir().unwrap();
    let store = new_store(temp_dir.path(), "demo", ClusterType::Ha);
    let mock = MockBackend::new();
    let mut provider = new_provider(&mock, "demo", ClusterType::Ha);

    provider.init_state(&store, Operation::Create).await.unwrap();
    provider.new_network(&store, "demo-net").await.unwrap();
    provider.new_network(&store, "demo-net").await.unwrap();
    provider
        .create_upload_ssh_key_pair(&store, "demo-ssh")
        .await
        .unwrap();
    provider
        .create_upload_ssh_key_pair(&store, "demo-ssh")
        .await
        .unwrap();
    let fw = ResourceRequest::new("demo-fw-lb", Role::LoadBalancer);
    provider.new_firewall(&store, &fw).await.unwrap();
    provider.new_firewall(&store, &fw).await.unwrap();

    assert_eq!(mock.calls_to("create_network"), 1);
    assert_eq!(mock.calls_to("upload_ssh_key"), 1);
    assert_eq!(mock.calls_to("create_firewall"), 1);

    provider.del_firewall(&store, Role::LoadBalancer).await.unwrap();
    provider.del_firewall(&store, Role::LoadBalancer).await.unwrap();
    assert_eq!(mock.calls_to("delete_firewall"), 1);

    let doc = store.read().await.unwrap();
    assert!(civo(&doc).load_balancer.firewall_id.is_empty());
}

#[tokio::test]
async fn test_resume_after_failure_matches_clean_run() {
    let temp_dir = tempdir().unwrap();
    let store = new_store(temp_dir.path(), "demo", ClusterType::Ha);
    let mock = MockBackend::new();
    let plan = ClusterPlan::Ha(ha_plan("demo", 3, 2, 3));

    mock.fail_next("create_vm", 1);
    let mut first = new_provider(&mock, "demo", ClusterType::Ha);
    let err = orchestrator::create_cluster(&mut first, &store, &plan)
        .await
        .unwrap_err();
    assert!(err.is(ErrorKind::FailedClusterOperation));

    let partial = store.read().await.unwrap();
    assert!(!partial.is_completed());
    assert!(!civo(&partial).network.network_id.is_empty());

    let mut second = new_provider(&mock, "demo", ClusterType::Ha);
    let outcome = orchestrator::create_cluster(&mut second, &store, &plan)
        .await
        .unwrap();
    assert_eq!(outcome, InitOutcome::Resumed);

    assert_eq!(mock.calls_to("create_network"), 1);
    assert_eq!(mock.calls_to("upload_ssh_key"), 1);
    assert_eq!(mock.calls_to("create_firewall"), 4);
    assert_eq!(mock.calls_to("create_vm"), 1 + 3 + 3 + 2);

    let clean_dir = tempdir().unwrap();
    let clean_store = new_store(clean_dir.path(), "demo", ClusterType::Ha);
    let clean_mock = MockBackend::new();
    let mut clean = new_provider(&clean_mock, "demo", ClusterType::Ha);
    orchestrator::create_cluster(&mut clean, &clean_store, &plan)
        .await
        .unwrap();

    let resumed = store.read().await.unwrap();
    let fresh = clean_store.read().await.unwrap();
    assert_eq!(civo(&resumed).control_planes.names, civo(&fresh).control_planes.names);
    assert_eq!(civo(&resumed).worker_planes.names, civo(&fresh).worker_planes.names);
    assert_eq!(civo(&resumed).data_stores.len(), civo(&fresh).data_stores.len());
    assert_eq!(resumed.is_completed(), fresh.is_completed());
}

#[tokio::test]
async fn test_completion_flips_on_last_worker_only() {
    let temp_dir = tempdir().unwrap();
    let store = new_store(temp_dir.path(), "demo", ClusterType::Ha);
    let mock = MockBackend::new();
    let mut provider = new_provider(&mock, "demo", ClusterType::Ha);

    provider.init_state(&store, Operation::Create).await.unwrap();
    provider.new_network(&store, "demo-net").await.unwrap();
    provider.no_of_control_plane(3, true).unwrap();
    provider.no_of_worker_plane(&store, 2, true).await.unwrap();
    provider.no_of_data_store(3, true).unwrap();

    let lb = ResourceRequest::new("demo-vm-lb", Role::LoadBalancer).with_vm_size("g3.small");
    provider.new_vm(&store, &lb, 0).await.unwrap();
    for role in [Role::DataStore, Role::ControlPlane] {
        for i in 0..3 {
            let req = ResourceRequest::new(names::vm("demo", role, i), role).with_vm_size("g3.small");
            provider.new_vm(&store, &req, i).await.unwrap();
            assert!(!store.read().await.unwrap().is_completed());
        }
    }

    let wp0 = ResourceRequest::new("demo-vm-wp-0", Role::WorkerPlane).with_vm_size("g3.small");
    provider.new_vm(&store, &wp0, 0).await.unwrap();
    assert!(!store.read().await.unwrap().is_completed());

    let wp1 = ResourceRequest::new("demo-vm-wp-1", Role::WorkerPlane).with_vm_size("g3.small");
    provider.new_vm(&store, &wp1, 1).await.unwrap();
    assert!(store.read().await.unwrap().is_completed());
}

#[tokio::test]
async fn test_completion_on_last_control_plane_without_workers() {
    let temp_dir = tempdir().unwrap();
    let store = new_store(temp_dir.path(), "demo", ClusterType::Ha);
    let mock = MockBackend::new();
    let mut provider = new_provider(&mock, "demo", ClusterType::Ha);

    let plan = ClusterPlan::Ha(ha_plan("demo", 3, 0, 3));
    orchestrator::create_cluster(&mut provider, &store, &plan)
        .await
        .unwrap();

    let doc = store.read().await.unwrap();
    assert!(doc.is_completed());
    assert!(civo(&doc).worker_planes.is_empty());
}

#[tokio::test]
async fn test_worker_setter_then_getter() {
    let temp_dir = tempdir().unwrap();
    let store = new_store(temp_dir.path(), "demo", ClusterType::Ha);
    let mock = MockBackend::new();
    let mut provider = new_provider(&mock, "demo", ClusterType::Ha);
    provider.init_state(&store, Operation::Create).await.unwrap();

    provider.no_of_worker_plane(&store, 3, true).await.unwrap();
    provider.no_of_worker_plane(&store, 1, true).await.unwrap();
    assert_eq!(provider.no_of_worker_plane(&store, 0, false).await.unwrap(), 1);

    let doc = store.read().await.unwrap();
    assert_eq!(civo(&doc).worker_planes.len(), 1);
    assert!(civo(&doc).worker_planes.is_consistent());
}

#[test]
fn test_counters_require_initialised_state() {
    let mock = MockBackend::new();
    let mut provider = new_provider(&mock, "demo", ClusterType::Ha);

    let err = provider.no_of_control_plane(0, false).unwrap_err();
    assert!(err.is(ErrorKind::Internal));
}

#[tokio::test]
async fn test_quorum_counts_are_validated_and_fixed() {
    let temp_dir = tempdir().unwrap();
    let store = new_store(temp_dir.path(), "demo", ClusterType::Ha);
    let mock = MockBackend::new();
    let mut provider = new_provider(&mock, "demo", ClusterType::Ha);
    provider.init_state(&store, Operation::Create).await.unwrap();

    let err = provider.no_of_control_plane(4, true).unwrap_err();
    assert!(err.is(ErrorKind::InvalidNoOfControlplane));
    let err = provider.no_of_data_store(1, true).unwrap_err();
    assert!(err.is(ErrorKind::InvalidNoOfDatastore));

    provider.no_of_control_plane(3, true).unwrap();
    provider.no_of_control_plane(3, true).unwrap();
    let err = provider.no_of_control_plane(5, true).unwrap_err();
    assert!(err.is(ErrorKind::InvalidNoOfControlplane));
}

#[tokio::test]
async fn test_scale_up_then_down() {
    let temp_dir = tempdir().unwrap();
    let store = new_store(temp_dir.path(), "demo", ClusterType::Ha);
    let mock = MockBackend::new();

    let mut creator = new_provider(&mock, "demo", ClusterType::Ha);
    orchestrator::create_cluster(&mut creator, &store, &ClusterPlan::Ha(ha_plan("demo", 3, 2, 3)))
        .await
        .unwrap();

    let mut scaler = new_provider(&mock, "demo", ClusterType::Ha);
    let result = orchestrator::scale_workers(&mut scaler, &store, 4, "g3.medium")
        .await
        .unwrap();
    assert_eq!(result, ScaleResult::Added { from: 2, to: 4 });

    let doc = store.read().await.unwrap();
    let workers = &civo(&doc).worker_planes;
    assert_eq!(workers.len(), 4);
    assert!(workers.vm_ids.iter().all(|id| !id.is_empty()));
    let control_planes = civo(&doc).control_planes.clone();

    let mut shrinker = new_provider(&mock, "demo", ClusterType::Ha);
    let result = orchestrator::scale_workers(&mut shrinker, &store, 1, "g3.medium")
        .await
        .unwrap();
    assert_eq!(
        result,
        ScaleResult::Removed {
            hostnames: vec![
                "demo-vm-wp-1".to_string(),
                "demo-vm-wp-2".to_string(),
                "demo-vm-wp-3".to_string(),
            ]
        }
    );

    let doc = store.read().await.unwrap();
    assert_eq!(civo(&doc).worker_planes.len(), 1);
    assert_eq!(civo(&doc).worker_planes.names[0], "demo-vm-wp-0");
    assert_eq!(civo(&doc).control_planes, control_planes);
    assert_eq!(mock.live_vms(), 1 + 3 + 3 + 1);
}

#[tokio::test]
async fn test_delete_removes_everything_and_record() {
    let temp_dir = tempdir().unwrap();
    let store = new_store(temp_dir.path(), "demo", ClusterType::Ha);
    let mock = MockBackend::new();

    let mut creator = new_provider(&mock, "demo", ClusterType::Ha);
    orchestrator::create_cluster(&mut creator, &store, &ClusterPlan::Ha(ha_plan("demo", 3, 1, 3)))
        .await
        .unwrap();

    let mut deleter = new_provider(&mock, "demo", ClusterType::Ha);
    orchestrator::delete_cluster(&mut deleter, &store)
        .await
        .unwrap();

    assert_eq!(mock.live_vms(), 0);
    assert_eq!(mock.calls_to("delete_firewall"), 4);
    assert_eq!(mock.calls_to("delete_ssh_key"), 1);
    assert_eq!(mock.calls_to("delete_network"), 1);
    assert!(store.read().await.unwrap_err().is(ErrorKind::NoMatchingRecordsFound));

    let mut again = new_provider(&mock, "demo", ClusterType::Ha);
    let err = orchestrator::delete_cluster(&mut again, &store)
        .await
        .unwrap_err();
    assert!(err.is(ErrorKind::NoMatchingRecordsFound));
}

#[tokio::test]
async fn test_managed_cluster_lifecycle() {
    let temp_dir = tempdir().unwrap();
    let store = new_store(temp_dir.path(), "edge", ClusterType::Managed);
    let mock = MockBackend::new();
    mock.not_ready_polls(2);

    let plan = ClusterPlan::Managed(ManagedPlan {
        cluster_name: "edge".to_string(),
        node_count: 3,
        node_size: Some("g4s.kube.small".to_string()),
    });
    let mut creator = new_provider(&mock, "edge", ClusterType::Managed);
    orchestrator::create_cluster(&mut creator, &store, &plan)
        .await
        .unwrap();

    let doc = store.read().await.unwrap();
    assert!(doc.is_completed());
    assert!(doc.cluster_kubeconfig.starts_with("apiVersion: v1"));
    assert_eq!(civo(&doc).managed.node_count, 3);

    let mut deleter = new_provider(&mock, "edge", ClusterType::Managed);
    orchestrator::delete_cluster(&mut deleter, &store)
        .await
        .unwrap();
    assert_eq!(mock.calls_to("delete_managed_cluster"), 1);
    assert!(store.read().await.is_err());
}

#[tokio::test]
async fn test_invalid_region_fails_before_any_mutation() {
    let temp_dir = tempdir().unwrap();
    let mut store = LocalStore::new(temp_dir.path(), Span::none());
    store.setup(Cloud::Civo, "MARS1", "demo", ClusterType::Ha).unwrap();
    let mock = MockBackend::new();

    let meta = ClusterMeta::new("demo", "MARS1", ClusterType::Ha);
    let mut provider = ProviderClient::new(mock.clone(), meta, CancellationToken::new(), Span::none());
    let err = provider
        .init_state(&store, Operation::Create)
        .await
        .unwrap_err();

    assert!(err.is(ErrorKind::InvalidCloudRegion));
    assert_eq!(mock.mutating_calls(), 0);
    assert!(store.read().await.is_err());
}

#[tokio::test]
async fn test_invalid_version_and_size_are_rejected() {
    let temp_dir = tempdir().unwrap();
    let store = new_store(temp_dir.path(), "demo", ClusterType::Ha);
    let mock = MockBackend::new();

    let meta = ClusterMeta::new("demo", REGION, ClusterType::Ha).with_version("1.12");
    let mut old = ProviderClient::new(mock.clone(), meta, CancellationToken::new(), Span::none());
    let err = old.init_state(&store, Operation::Create).await.unwrap_err();
    assert!(err.is(ErrorKind::InvalidVersion));

    let mut provider = new_provider(&mock, "demo", ClusterType::Ha);
    provider.init_state(&store, Operation::Create).await.unwrap();
    provider.new_network(&store, "demo-net").await.unwrap();
    provider.no_of_control_plane(3, true).unwrap();
    let req = ResourceRequest::new("demo-vm-cp-0", Role::ControlPlane).with_vm_size("x9.huge");
    let err = provider.new_vm(&store, &req, 0).await.unwrap_err();
    assert!(err.is(ErrorKind::InvalidCloudVmSize));
    assert_eq!(mock.calls_to("create_vm"), 0);
}

#[tokio::test]
async fn test_invalid_names_and_operations() {
    let temp_dir = tempdir().unwrap();
    let store = new_store(temp_dir.path(), "demo", ClusterType::Ha);
    let mock = MockBackend::new();
    let mut provider = new_provider(&mock, "demo", ClusterType::Ha);

    let err = provider
        .init_state(&store, Operation::Scale)
        .await
        .unwrap_err();
    assert!(err.is(ErrorKind::InvalidOperation));

    provider.init_state(&store, Operation::Create).await.unwrap();
    let err = provider.new_network(&store, "Bad_Name").await.unwrap_err();
    assert!(err.is(ErrorKind::InvalidResourceName));

    let err = provider
        .del_vm(&store, Role::WorkerPlane, 0)
        .await
        .unwrap_err();
    assert!(err.is(ErrorKind::InvalidNoOfWorkerplane));
}

#[tokio::test]
async fn test_long_cluster_name_fails_before_any_mutation() {
    let name = "a".repeat(45);
    let temp_dir = tempdir().unwrap();
    let store = new_store(temp_dir.path(), &name, ClusterType::Ha);
    let mock = MockBackend::new();
    let mut provider = new_provider(&mock, &name, ClusterType::Ha);

    let plan = ClusterPlan::Ha(ha_plan(&name, 3, 1, 3));
    let err = orchestrator::create_cluster(&mut provider, &store, &plan)
        .await
        .unwrap_err();

    assert!(err.is(ErrorKind::InvalidResourceName));
    assert!(err.to_string().contains("-fw-"));
    assert_eq!(mock.mutating_calls(), 0);
    assert!(store.read().await.is_err());

    // a name that fits every derived name still fails early once the
    // worker index gains a digit
    let name = "b".repeat(42);
    let store = new_store(temp_dir.path(), &name, ClusterType::Ha);
    let mut provider = new_provider(&mock, &name, ClusterType::Ha);
    let plan = ClusterPlan::Ha(ha_plan(&name, 3, 2, 3));
    orchestrator::create_cluster(&mut provider, &store, &plan)
        .await
        .unwrap();
    let calls = mock.mutating_calls();

    let err = orchestrator::scale_workers(&mut provider, &store, 11, "g3.medium")
        .await
        .unwrap_err();
    assert!(err.is(ErrorKind::InvalidResourceName));
    assert_eq!(mock.mutating_calls(), calls);
    assert_eq!(civo(&store.read().await.unwrap()).worker_planes.len(), 2);
}

#[tokio::test]
async fn test_cluster_state_for_bootstrap() {
    let temp_dir = tempdir().unwrap();
    let store = new_store(temp_dir.path(), "demo", ClusterType::Ha);
    let mock = MockBackend::new();
    let mut provider = new_provider(&mock, "demo", ClusterType::Ha);

    orchestrator::create_cluster(&mut provider, &store, &ClusterPlan::Ha(ha_plan("demo", 3, 2, 3)))
        .await
        .unwrap();

    let state = provider.ha_cluster_state().unwrap();
    assert_eq!(state.ssh_user, "root");
    assert!(state.ssh_private_key.contains("OPENSSH PRIVATE KEY"));
    assert_eq!(state.control_planes.private_ips.len(), 3);
    assert_eq!(state.worker_planes.hostnames, provider.worker_hostnames().unwrap());
    assert!(!state.load_balancer_private_ip.is_empty());
}

#[tokio::test]
async fn test_cancelled_provider_stops_waiting() {
    let temp_dir = tempdir().unwrap();
    let store = new_store(temp_dir.path(), "demo", ClusterType::Ha);
    let mock = MockBackend::new();
    mock.not_ready_polls(100);

    let token = CancellationToken::new();
    let meta = ClusterMeta::new("demo", REGION, ClusterType::Ha);
    let mut provider = ProviderClient::new(mock.clone(), meta, token.clone(), Span::none())
        .with_retry(fast(), fast());
    provider.init_state(&store, Operation::Create).await.unwrap();
    provider.new_network(&store, "demo-net").await.unwrap();

    token.cancel();
    let lb = ResourceRequest::new("demo-vm-lb", Role::LoadBalancer).with_vm_size("g3.small");
    let err = provider.new_vm(&store, &lb, 0).await.unwrap_err();
    assert!(err.is(ErrorKind::ContextCancelled));

    let doc = store.read().await.unwrap();
    assert!(!civo(&doc).load_balancer.vm.vm_id.is_empty());
    assert!(civo(&doc).load_balancer.vm.private_ip.is_empty());
}

#[tokio::test]
async fn test_summaries_from_store() {
    let temp_dir = tempdir().unwrap();
    let store = new_store(temp_dir.path(), "demo", ClusterType::Ha);
    let mock = MockBackend::new();
    let mut provider = new_provider(&mock, "demo", ClusterType::Ha);
    orchestrator::create_cluster(&mut provider, &store, &ClusterPlan::Ha(ha_plan("demo", 3, 2, 3)))
        .await
        .unwrap();

    let summaries = list_clusters(&store, &ClusterFilter::default()).await.unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].name, "demo");
    assert_eq!(summaries[0].nodes.worker_planes, 2);
    assert!(summaries[0].completed);
    assert!(summaries[0].nodes.load_balancer);
}
