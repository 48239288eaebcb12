//! Deployment store tests

mod common;

use seed_controller::filesys::file::File;
use seed_controller::models::deployment::{
    DeploymentStatus, DeploymentUpdate, NewDeploymentLog, TargetKind,
};
use seed_controller::store::{DeploymentStore, FileStore, MemoryStore};

use common::*;

async fn seed(store: &dyn DeploymentStore) {
    store.put_image(image()).await.unwrap();
    store
        .put_target(target(1, TargetKind::Kubernetes, Some("token")))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_file_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("deployments.json");

    {
        let store = FileStore::open(File::new(&path)).await.unwrap();
        seed(&store).await;
        let created = store
            .create(new_deployment("My App", 1), DeploymentStatus::Saved)
            .await
            .unwrap();
        assert_eq!(created.id, 1);
        store
            .update(
                1,
                DeploymentUpdate {
                    current_status: Some(DeploymentStatus::Deployed),
                    port: Some(Some(31161)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        store
            .append_log(NewDeploymentLog {
                deployment_id: 1,
                status: DeploymentStatus::Deployed,
                message: "Successfully deployed as a service (port=31161)".to_string(),
            })
            .await
            .unwrap();
    }

    let store = FileStore::open(File::new(&path)).await.unwrap();
    let record = store.load(1).await.unwrap().unwrap();
    assert_eq!(record.deployment.current_status, DeploymentStatus::Deployed);
    assert_eq!(record.deployment.port, Some(31161));
    assert_eq!(record.deployment.internal_name.as_deref(), Some("d-1-myapp"));
    assert_eq!(record.image.reference(), "eubrabigsea/mleap-serving:latest");
    assert_eq!(record.target.auth_token.unwrap().expose(), "token");

    let logs = store.list_logs(1).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].id, 1);
}

#[tokio::test]
async fn test_file_store_starts_empty() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::open(File::new(dir.path().join("missing.json")))
        .await
        .unwrap();
    assert!(store.load(1).await.unwrap().is_none());
    assert!(!dir.path().join("missing.json").exists());
}

#[tokio::test]
async fn test_failed_mutation_is_not_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("deployments.json");
    let store = FileStore::open(File::new(&path)).await.unwrap();
    seed(&store).await;

    let err = store
        .update(9, DeploymentUpdate::status(DeploymentStatus::Error))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("deployment 9"));

    let reopened = FileStore::open(File::new(&path)).await.unwrap();
    assert!(reopened.load(9).await.unwrap().is_none());
}

#[tokio::test]
async fn test_log_ids_increase_across_deployments() {
    let store = MemoryStore::new();
    seed(&store).await;
    store
        .create(new_deployment("a", 1), DeploymentStatus::Saved)
        .await
        .unwrap();
    store
        .create(new_deployment("b", 1), DeploymentStatus::Saved)
        .await
        .unwrap();

    let mut ids = Vec::new();
    for deployment_id in [1, 2, 1] {
        let entry = store
            .append_log(NewDeploymentLog {
                deployment_id,
                status: DeploymentStatus::Saved,
                message: "edit".to_string(),
            })
            .await
            .unwrap();
        ids.push(entry.id);
    }
    assert_eq!(ids, vec![1, 2, 3]);

    let logs = store.list_logs(1).await.unwrap();
    assert_eq!(logs.iter().map(|l| l.id).collect::<Vec<_>>(), vec![1, 3]);
}

#[tokio::test]
async fn test_create_requires_image_and_target() {
    let store = MemoryStore::new();
    store.put_image(image()).await.unwrap();

    let err = store
        .create(new_deployment("a", 1), DeploymentStatus::Saved)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("target 1"));
}

#[tokio::test]
async fn test_create_takes_base_url_from_target() {
    let store = MemoryStore::new();
    seed(&store).await;
    let created = store
        .create(new_deployment("a", 1), DeploymentStatus::Saved)
        .await
        .unwrap();
    assert_eq!(
        created.base_service_url.as_deref(),
        Some("http://models.local")
    );
    assert_eq!(created.version, 1);
    assert!(created.port.is_none());
}
