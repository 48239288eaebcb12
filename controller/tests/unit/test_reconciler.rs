//! Reconciler tests against the in-memory cluster

mod common;

use std::sync::Arc;

use seed_controller::cluster::memory::{ClusterCall, ClusterOp, InjectedFailure, MemoryCluster};
use seed_controller::cluster::resources::{env_value, ServiceExt, WorkloadExt};
use seed_controller::deploy::manifest::{build_service_spec, MODEL_ENV_VAR};
use seed_controller::deploy::ports::MAX_NODE_PORT;
use seed_controller::deploy::reconciler::Reconciler;
use seed_controller::errors::ControllerError;
use seed_controller::models::deployment::{
    DeploymentPatch, DeploymentStatus, DeploymentUpdate, TargetKind,
};
use seed_controller::store::DeploymentStore;

use common::*;

async fn fixture(id: i64, name: &str) -> seed_controller::models::deployment::Deployment {
    let store = seeded_store().await;
    create_with_id(store.as_ref(), id, name, 1, DeploymentStatus::Pending).await
}

#[tokio::test]
async fn test_first_deploy_creates_workload_and_service() {
    let deployment = fixture(7, "myapp").await;
    let cluster = MemoryCluster::new();
    let reconciler = Reconciler::new(registry());
    let target = target(1, TargetKind::Kubernetes, Some("token"));

    let port = reconciler
        .deploy(&deployment, &image(), &target, &cluster)
        .await
        .unwrap();
    assert_eq!(port, 31161);

    let workload = cluster.workload(NAMESPACE, "d-7-myapp").unwrap();
    let container = workload.container().unwrap();
    assert_eq!(
        container.image.as_deref(),
        Some("eubrabigsea/mleap-serving:latest")
    );
    assert_eq!(env_value(container, MODEL_ENV_VAR), Some(MODEL_URI));

    let service = cluster.service(NAMESPACE, "s-7-myapp").unwrap();
    assert_eq!(service.node_port(), Some(31161));

    assert_eq!(
        cluster.calls(),
        vec![
            ClusterCall::ListWorkloads {
                namespace: NAMESPACE.to_string()
            },
            ClusterCall::CreateWorkload {
                namespace: NAMESPACE.to_string(),
                name: "d-7-myapp".to_string()
            },
            ClusterCall::ListServices,
            ClusterCall::CreateService {
                namespace: NAMESPACE.to_string(),
                name: "s-7-myapp".to_string(),
                node_port: Some(31161)
            },
        ]
    );
}

#[tokio::test]
async fn test_port_follows_highest_used_port() {
    let deployment = fixture(2, "other").await;
    let cluster = MemoryCluster::new();
    let target = target(1, TargetKind::Kubernetes, Some("token"));

    let neighbour = build_service_spec(&deployment, &target, 31170);
    cluster.seed_service(NAMESPACE, neighbour);

    let mut fresh = deployment.clone();
    fresh.id = 3;
    fresh.internal_name = Some("d-3-fresh".to_string());

    let port = Reconciler::new(registry())
        .deploy(&fresh, &image(), &target, &cluster)
        .await
        .unwrap();
    assert_eq!(port, 31171);
}

#[tokio::test]
async fn test_redeploy_patches_and_keeps_port() {
    let deployment = fixture(7, "myapp").await;
    let cluster = MemoryCluster::new();
    let reconciler = Reconciler::new(registry());
    let target = target(1, TargetKind::Kubernetes, Some("token"));

    let port = reconciler
        .deploy(&deployment, &image(), &target, &cluster)
        .await
        .unwrap();

    let mut deployed = deployment.clone();
    deployed.port = Some(port);
    deployed.replicas = 3;
    cluster.clear_calls();

    let again = reconciler
        .deploy(&deployed, &image(), &target, &cluster)
        .await
        .unwrap();
    assert_eq!(again, port);

    let calls = cluster.calls();
    assert!(calls.contains(&ClusterCall::PatchWorkload {
        namespace: NAMESPACE.to_string(),
        name: "d-7-myapp".to_string()
    }));
    assert!(calls.contains(&ClusterCall::DeleteService {
        namespace: NAMESPACE.to_string(),
        name: "s-7-myapp".to_string()
    }));
    assert!(!calls
        .iter()
        .any(|c| matches!(c, ClusterCall::CreateWorkload { .. })));
    assert_eq!(
        cluster.workload(NAMESPACE, "d-7-myapp").unwrap().replicas(),
        Some(3)
    );
}

#[tokio::test]
async fn test_redeploy_without_recorded_port_reuses_service_port() {
    let deployment = fixture(7, "myapp").await;
    let cluster = MemoryCluster::new();
    let reconciler = Reconciler::new(registry());
    let target = target(1, TargetKind::Kubernetes, Some("token"));

    // a neighbour below ours must not matter either
    let mut neighbour = deployment.clone();
    neighbour.id = 2;
    neighbour.internal_name = Some("d-2-other".to_string());
    cluster.seed_service(NAMESPACE, build_service_spec(&neighbour, &target, 31161));

    let first = reconciler
        .deploy(&deployment, &image(), &target, &cluster)
        .await
        .unwrap();
    // the port was never persisted, as after a crash between the cluster
    // calls and the store update
    let second = reconciler
        .deploy(&deployment, &image(), &target, &cluster)
        .await
        .unwrap();

    assert_eq!(first, 31162);
    assert_eq!(second, first);
    assert_eq!(
        cluster.service(NAMESPACE, "s-7-myapp").unwrap().node_port(),
        Some(first)
    );
}

#[tokio::test]
async fn test_exhausted_port_range_fails_before_touching_services() {
    let deployment = fixture(7, "myapp").await;
    let cluster = MemoryCluster::new();
    let target = target(1, TargetKind::Kubernetes, Some("token"));

    let mut neighbour = deployment.clone();
    neighbour.id = 2;
    neighbour.internal_name = Some("d-2-other".to_string());
    cluster.seed_service(
        NAMESPACE,
        build_service_spec(&neighbour, &target, MAX_NODE_PORT),
    );

    let err = Reconciler::new(registry())
        .deploy(&deployment, &image(), &target, &cluster)
        .await
        .unwrap_err();
    assert!(matches!(err, ControllerError::PortsExhausted { .. }));
    assert!(!cluster
        .calls()
        .iter()
        .any(|c| matches!(c, ClusterCall::CreateService { .. })));
}

#[tokio::test]
async fn test_service_delete_failure_is_not_fatal() {
    let deployment = fixture(1, "myapp").await;
    let cluster = MemoryCluster::new();
    let reconciler = Reconciler::new(registry());
    let target = target(1, TargetKind::Kubernetes, Some("token"));

    let port = reconciler
        .deploy(&deployment, &image(), &target, &cluster)
        .await
        .unwrap();

    let mut deployed = deployment.clone();
    deployed.port = Some(port);
    cluster.fail_next(
        ClusterOp::DeleteService,
        InjectedFailure::Api {
            status: 500,
            message: "etcd timeout".to_string(),
        },
    );

    // the old service survives, so recreating it conflicts
    let err = reconciler
        .deploy(&deployed, &image(), &target, &cluster)
        .await
        .unwrap_err();
    assert!(err.as_cluster().is_some_and(|e| e.is_conflict()));
}

#[tokio::test]
async fn test_deploy_rejects_other_target_kinds() {
    let deployment = fixture(1, "myapp").await;
    let cluster = MemoryCluster::new();
    let target = target(2, TargetKind::Docker, Some("token"));

    let err = Reconciler::new(registry())
        .deploy(&deployment, &image(), &target, &cluster)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ControllerError::UnsupportedTargetKind(TargetKind::Docker)
    ));
    assert!(cluster.calls().is_empty());
}

#[tokio::test]
async fn test_unknown_model_fails_before_cluster_calls() {
    let mut deployment = fixture(1, "myapp").await;
    deployment.model_id = Some(404);
    let cluster = MemoryCluster::new();
    let target = target(1, TargetKind::Kubernetes, Some("token"));

    let err = Reconciler::new(registry())
        .deploy(&deployment, &image(), &target, &cluster)
        .await
        .unwrap_err();
    assert!(matches!(err, ControllerError::RegistryError(_)));
    assert!(cluster.calls().is_empty());
}

#[tokio::test]
async fn test_undeploy_removes_workload_and_service() {
    let deployment = fixture(7, "myapp").await;
    let cluster = Arc::new(MemoryCluster::new());
    let reconciler = Reconciler::new(registry());
    let target = target(1, TargetKind::Kubernetes, Some("token"));

    reconciler
        .deploy(&deployment, &image(), &target, cluster.as_ref())
        .await
        .unwrap();
    reconciler
        .undeploy(&deployment, &target, cluster.as_ref())
        .await
        .unwrap();

    assert!(cluster.workload(NAMESPACE, "d-7-myapp").is_none());
    assert!(cluster.service(NAMESPACE, "s-7-myapp").is_none());
}

#[tokio::test]
async fn test_undeploy_missing_service_is_tolerated() {
    let deployment = fixture(7, "myapp").await;
    let cluster = MemoryCluster::new();
    let reconciler = Reconciler::new(registry());
    let target = target(1, TargetKind::Kubernetes, Some("token"));

    reconciler
        .deploy(&deployment, &image(), &target, &cluster)
        .await
        .unwrap();
    cluster.fail_next(
        ClusterOp::DeleteService,
        InjectedFailure::NotFound {
            kind: "service".to_string(),
            name: "s-7-myapp".to_string(),
        },
    );

    reconciler
        .undeploy(&deployment, &target, &cluster)
        .await
        .unwrap();
    assert!(cluster.workload(NAMESPACE, "d-7-myapp").is_none());
}

#[tokio::test]
async fn test_undeploy_missing_workload_is_reported() {
    let deployment = fixture(7, "myapp").await;
    let cluster = MemoryCluster::new();
    let target = target(1, TargetKind::Kubernetes, Some("token"));

    let err = Reconciler::new(registry())
        .undeploy(&deployment, &target, &cluster)
        .await
        .unwrap_err();
    assert!(err.as_cluster().is_some_and(|e| e.is_not_found()));
    // the service is left alone when the workload was never there
    assert!(!cluster
        .calls()
        .iter()
        .any(|c| matches!(c, ClusterCall::DeleteService { .. })));
}

#[tokio::test]
async fn test_store_keeps_internal_name_after_rename() {
    let store = seeded_store().await;
    let deployment = create_with_id(store.as_ref(), 7, "myapp", 1, DeploymentStatus::Pending).await;

    assert_eq!(deployment.name, "myapp");

    let update = DeploymentUpdate {
        patch: Some(DeploymentPatch {
            name: Some("renamed".to_string()),
            internal_name: Some("d-7-renamed".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    };
    store.update(7, update).await.unwrap();

    let loaded = store.load(7).await.unwrap().unwrap().deployment;
    assert_eq!(loaded.name, "renamed");
    assert_eq!(loaded.resolved_internal_name(), "d-7-myapp");
}
