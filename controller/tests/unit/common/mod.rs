//! Shared fixtures for the unit test suites

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use seed_controller::cluster::connector::{ClusterConnector, StaticConnector};
use seed_controller::cluster::memory::MemoryCluster;
use seed_controller::deploy::executor::JobExecutor;
use seed_controller::deploy::reconciler::Reconciler;
use seed_controller::errors::ControllerError;
use seed_controller::http::notifier::{Notification, Notifier};
use seed_controller::http::registry::{ArtifactUri, StaticModelRegistry};
use seed_controller::i18n::Catalog;
use seed_controller::models::deployment::{
    AuthToken, Deployment, DeploymentImage, DeploymentStatus, DeploymentTarget, NewDeployment,
    TargetKind,
};
use seed_controller::store::{DeploymentStore, MemoryStore};

pub const NAMESPACE: &str = "seed";
pub const MODEL_ID: i64 = 3;
pub const MODEL_URI: &str = "hdfs://namenode:9000/models/iris.zip";

pub fn image() -> DeploymentImage {
    DeploymentImage {
        id: 1,
        name: "eubrabigsea/mleap-serving".to_string(),
        tag: "latest".to_string(),
        description: String::new(),
        enabled: true,
    }
}

pub fn target(id: i64, kind: TargetKind, token: Option<&str>) -> DeploymentTarget {
    DeploymentTarget {
        id,
        name: format!("cluster-{}", id),
        namespace: NAMESPACE.to_string(),
        url: "https://k8s.local:6443".to_string(),
        base_service_url: "http://models.local".to_string(),
        kind,
        auth_token: token.map(AuthToken::new),
        enabled: true,
    }
}

pub fn new_deployment(name: &str, target_id: i64) -> NewDeployment {
    NewDeployment {
        name: name.to_string(),
        description: None,
        model_id: Some(MODEL_ID),
        model_name: "iris".to_string(),
        user_id: 9,
        user_login: "walter".to_string(),
        user_name: "Walter".to_string(),
        replicas: 1,
        request_memory: "128M".to_string(),
        limit_memory: None,
        request_cpu: Some("500m".to_string()),
        limit_cpu: Some("1000m".to_string()),
        image_id: 1,
        target_id,
    }
}

/// Notifier that records every call and can be told to fail
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<Notification>>,
    pub fail: bool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), ControllerError> {
        self.sent.lock().unwrap().push(notification.clone());
        if self.fail {
            return Err(ControllerError::NotifierError("relay down".to_string()));
        }
        Ok(())
    }
}

/// A store with one image and a Kubernetes target (id 1), a Docker target
/// (id 2) and a Kubernetes target without credentials (id 3)
pub async fn seeded_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.put_image(image()).await.unwrap();
    store
        .put_target(target(1, TargetKind::Kubernetes, Some("token")))
        .await
        .unwrap();
    store
        .put_target(target(2, TargetKind::Docker, Some("token")))
        .await
        .unwrap();
    store
        .put_target(target(3, TargetKind::Kubernetes, None))
        .await
        .unwrap();
    store
}

/// Create fillers on a fresh store so that `name` gets `id`
pub async fn create_with_id(
    store: &dyn DeploymentStore,
    id: i64,
    name: &str,
    target_id: i64,
    status: DeploymentStatus,
) -> Deployment {
    for _ in 1..id {
        store
            .create(new_deployment("filler", target_id), DeploymentStatus::Saved)
            .await
            .unwrap();
    }
    let deployment = store
        .create(new_deployment(name, target_id), status)
        .await
        .unwrap();
    assert_eq!(deployment.id, id);
    deployment
}

pub fn registry() -> Arc<StaticModelRegistry> {
    let uri = ArtifactUri::parse(MODEL_URI).unwrap();
    Arc::new(StaticModelRegistry::new().with_model(MODEL_ID, uri))
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub cluster: Arc<MemoryCluster>,
    pub notifier: Arc<RecordingNotifier>,
    pub executor: JobExecutor,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_notifier(RecordingNotifier::default()).await
    }

    pub async fn with_notifier(notifier: RecordingNotifier) -> Self {
        let store = seeded_store().await;
        let cluster = Arc::new(MemoryCluster::new());
        let notifier = Arc::new(notifier);
        let connector: Arc<dyn ClusterConnector> =
            Arc::new(StaticConnector::new(cluster.clone()));
        let executor = JobExecutor::new(
            store.clone(),
            connector,
            Reconciler::new(registry()),
            notifier.clone(),
            Arc::new(Catalog::builtin()),
        );
        Self {
            store,
            cluster,
            notifier,
            executor,
        }
    }

    pub async fn deployment(&self, id: i64) -> Deployment {
        self.store.load(id).await.unwrap().unwrap().deployment
    }
}
