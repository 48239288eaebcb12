//! Controller operations end to end: requests, queued jobs and the pool

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use seed_controller::app::options::AppOptions;
use seed_controller::app::run::start;
use seed_controller::app::state::{AppState, Components};
use seed_controller::cluster::connector::StaticConnector;
use seed_controller::cluster::memory::MemoryCluster;
use seed_controller::deploy::controller::{DeploymentController, RequestContext};
use seed_controller::deploy::executor::JobOutcome;
use seed_controller::deploy::fsm::JobKind;
use seed_controller::errors::ControllerError;
use seed_controller::i18n::Catalog;
use seed_controller::models::deployment::{
    Deployment, DeploymentId, DeploymentImage, DeploymentLog, DeploymentPatch, DeploymentRecord,
    DeploymentStatus, DeploymentTarget, DeploymentUpdate, NewDeployment, NewDeploymentLog,
};
use seed_controller::store::{DeploymentStore, MemoryStore};
use seed_controller::workers::queue::{JobQueue, JobRegistry, JobState, QueuedJob};
use tokio::sync::mpsc::Receiver;

use common::*;

fn ctx() -> RequestContext {
    RequestContext::new("en", 9)
}

/// The receiver must outlive the test or enqueues fail
async fn controller() -> (DeploymentController, Arc<MemoryStore>, Receiver<QueuedJob>) {
    let store = seeded_store().await;
    let (queue, rx) = JobQueue::new(16, Arc::new(JobRegistry::new()));
    (DeploymentController::new(store.clone(), queue), store, rx)
}

#[tokio::test]
async fn test_create_without_deploy_is_saved() {
    let (controller, _store, _rx) = controller().await;

    let accepted = controller
        .create(&ctx(), new_deployment("myapp", 1), false)
        .await
        .unwrap();
    assert_eq!(accepted.deployment.current_status, DeploymentStatus::Saved);
    assert_eq!(accepted.deployment.version, 1);
    assert!(accepted.deployment.enabled);
    assert!(accepted.job.is_none());
}

#[tokio::test]
async fn test_create_with_deploy_queues_job() {
    let (controller, store, _rx) = controller().await;

    let accepted = controller
        .create(&ctx(), new_deployment("myapp", 1), true)
        .await
        .unwrap();
    assert_eq!(accepted.deployment.current_status, DeploymentStatus::Pending);

    let handle = accepted.job.unwrap();
    assert_eq!(handle.request().kind, JobKind::Deploy);
    assert_eq!(handle.state(), JobState::Queued);

    let stored = store.load(1).await.unwrap().unwrap().deployment;
    assert_eq!(stored.execution_id, Some(handle.id().to_string()));
    assert_eq!(
        accepted.deployment.execution_id,
        Some(handle.id().to_string())
    );
}

#[tokio::test]
async fn test_create_with_unknown_target_fails() {
    let (controller, _store, _rx) = controller().await;
    let err = controller
        .create(&ctx(), new_deployment("myapp", 99), true)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("target 99"));
}

#[tokio::test]
async fn test_redeploy_bumps_version() {
    let (controller, store, _rx) = controller().await;
    create_with_id(store.as_ref(), 1, "myapp", 1, DeploymentStatus::Deployed).await;

    let patch = DeploymentPatch {
        replicas: Some(2),
        ..Default::default()
    };
    let accepted = controller
        .update(&ctx(), 1, patch, true, false)
        .await
        .unwrap();
    assert_eq!(
        accepted.deployment.current_status,
        DeploymentStatus::DeployedOld
    );
    assert_eq!(accepted.deployment.version, 2);
    assert_eq!(accepted.deployment.replicas, 2);
    assert_eq!(accepted.job.unwrap().request().kind, JobKind::Deploy);
}

#[tokio::test]
async fn test_update_undeploy_of_saved_record_is_noop() {
    let (controller, store, _rx) = controller().await;
    create_with_id(store.as_ref(), 1, "myapp", 1, DeploymentStatus::Saved).await;

    let accepted = controller
        .update(&ctx(), 1, DeploymentPatch::default(), false, true)
        .await
        .unwrap();
    assert_eq!(accepted.deployment.current_status, DeploymentStatus::Saved);
    assert!(accepted.job.is_none());
}

#[tokio::test]
async fn test_update_keeps_internal_name() {
    let (controller, store, _rx) = controller().await;
    create_with_id(store.as_ref(), 7, "myapp", 1, DeploymentStatus::Deployed).await;

    let patch = DeploymentPatch {
        name: Some("Renamed".to_string()),
        ..Default::default()
    };
    let accepted = controller
        .update(&ctx(), 7, patch, false, false)
        .await
        .unwrap();
    assert_eq!(accepted.deployment.name, "Renamed");
    assert_eq!(
        accepted.deployment.internal_name.as_deref(),
        Some("d-7-myapp")
    );
}

#[tokio::test]
async fn test_disable_live_deployment_queues_undeploy() {
    let (controller, store, _rx) = controller().await;
    create_with_id(store.as_ref(), 1, "myapp", 1, DeploymentStatus::Deployed).await;

    let accepted = controller.disable(&ctx(), 1).await.unwrap();
    assert!(!accepted.deployment.enabled);
    assert_eq!(
        accepted.deployment.current_status,
        DeploymentStatus::PendingUndeploy
    );
    assert_eq!(accepted.job.unwrap().request().kind, JobKind::Undeploy);
}

#[tokio::test]
async fn test_disable_saved_deployment_suspends() {
    let (controller, store, _rx) = controller().await;
    create_with_id(store.as_ref(), 1, "myapp", 1, DeploymentStatus::Saved).await;

    let accepted = controller.disable(&ctx(), 1).await.unwrap();
    assert!(!accepted.deployment.enabled);
    assert_eq!(
        accepted.deployment.current_status,
        DeploymentStatus::Suspended
    );
    assert!(accepted.job.is_none());
}

#[tokio::test]
async fn test_unknown_deployment() {
    let (controller, _store, _rx) = controller().await;
    let err = controller.disable(&ctx(), 5).await.unwrap_err();
    assert!(err.to_string().contains("deployment 5"));
}

#[tokio::test]
async fn test_enqueue_fails_once_pool_is_gone() {
    let store = seeded_store().await;
    let (queue, rx) = JobQueue::new(4, Arc::new(JobRegistry::new()));
    drop(rx);
    let controller = DeploymentController::new(store.clone(), queue);
    create_with_id(store.as_ref(), 1, "myapp", 1, DeploymentStatus::Saved).await;

    assert!(controller.enqueue_deploy_job(1, "en", 9).await.is_err());
}

#[tokio::test]
async fn test_refused_job_restores_previous_status() {
    let store = seeded_store().await;
    let (queue, rx) = JobQueue::new(4, Arc::new(JobRegistry::new()));
    drop(rx);
    let controller = DeploymentController::new(store.clone(), queue);
    create_with_id(store.as_ref(), 1, "myapp", 1, DeploymentStatus::Deployed).await;

    let patch = DeploymentPatch {
        replicas: Some(4),
        ..Default::default()
    };
    assert!(controller.update(&ctx(), 1, patch, true, false).await.is_err());
    let stored = store.load(1).await.unwrap().unwrap().deployment;
    assert_eq!(stored.current_status, DeploymentStatus::Deployed);
    assert_eq!(stored.version, 1);

    assert!(controller.disable(&ctx(), 1).await.is_err());
    let stored = store.load(1).await.unwrap().unwrap().deployment;
    assert_eq!(stored.current_status, DeploymentStatus::Deployed);

    assert!(controller
        .create(&ctx(), new_deployment("other", 1), true)
        .await
        .is_err());
    let created = store.load(2).await.unwrap().unwrap().deployment;
    assert_eq!(created.current_status, DeploymentStatus::Saved);
}

/// Store that applies a queued write right after each load, as a job
/// finishing between a request's read and its write would
struct InterleavingStore {
    inner: Arc<MemoryStore>,
    pending: Mutex<Option<(DeploymentId, DeploymentUpdate)>>,
}

#[async_trait]
impl DeploymentStore for InterleavingStore {
    async fn load(&self, id: DeploymentId) -> Result<Option<DeploymentRecord>, ControllerError> {
        let record = self.inner.load(id).await?;
        let pending = self.pending.lock().unwrap().take();
        if let Some((id, update)) = pending {
            self.inner.update(id, update).await?;
        }
        Ok(record)
    }

    async fn create(
        &self,
        new: NewDeployment,
        status: DeploymentStatus,
    ) -> Result<Deployment, ControllerError> {
        self.inner.create(new, status).await
    }

    async fn update(
        &self,
        id: DeploymentId,
        update: DeploymentUpdate,
    ) -> Result<Deployment, ControllerError> {
        self.inner.update(id, update).await
    }

    async fn append_log(&self, entry: NewDeploymentLog) -> Result<DeploymentLog, ControllerError> {
        self.inner.append_log(entry).await
    }

    async fn list_logs(&self, id: DeploymentId) -> Result<Vec<DeploymentLog>, ControllerError> {
        self.inner.list_logs(id).await
    }

    async fn put_image(&self, image: DeploymentImage) -> Result<(), ControllerError> {
        self.inner.put_image(image).await
    }

    async fn put_target(&self, target: DeploymentTarget) -> Result<(), ControllerError> {
        self.inner.put_target(target).await
    }
}

#[tokio::test]
async fn test_edit_racing_a_finished_job_keeps_its_port() {
    let inner = seeded_store().await;
    create_with_id(inner.as_ref(), 1, "myapp", 1, DeploymentStatus::Pending).await;
    let store = Arc::new(InterleavingStore {
        inner: inner.clone(),
        pending: Mutex::new(None),
    });
    let (queue, _rx) = JobQueue::new(4, Arc::new(JobRegistry::new()));
    let controller = DeploymentController::new(store.clone(), queue);

    let job_result = DeploymentUpdate {
        current_status: Some(DeploymentStatus::Deployed),
        port: Some(Some(31161)),
        ..Default::default()
    };
    *store.pending.lock().unwrap() = Some((1, job_result));

    let patch = DeploymentPatch {
        description: Some("edited".to_string()),
        ..Default::default()
    };
    let accepted = controller
        .update(&ctx(), 1, patch, false, false)
        .await
        .unwrap();
    assert_eq!(accepted.deployment.port, Some(31161));

    let stored = inner.load(1).await.unwrap().unwrap().deployment;
    assert_eq!(stored.port, Some(31161));
    assert_eq!(stored.description.as_deref(), Some("edited"));
}

async fn app() -> (Arc<AppState>, Arc<MemoryCluster>, AppOptions, Receiver<QueuedJob>) {
    let store = seeded_store().await;
    let cluster = Arc::new(MemoryCluster::new());
    let components = Components {
        store,
        registry: registry(),
        connector: Arc::new(StaticConnector::new(cluster.clone())),
        notifier: Arc::new(RecordingNotifier::default()),
        formatter: Arc::new(Catalog::builtin()),
    };
    let mut options = AppOptions::default();
    options.pool.workers = 2;
    options.lifecycle.max_shutdown_delay = Duration::from_secs(5);

    let (state, rx) = AppState::assemble(components, &options);
    (Arc::new(state), cluster, options, rx)
}

#[tokio::test]
async fn test_deploy_then_disable_through_the_pool() {
    let (state, cluster, options, rx) = app().await;
    let mut runtime = start(&options, state.clone(), rx).unwrap();

    let accepted = state
        .controller
        .create(&ctx(), new_deployment("myapp", 1), true)
        .await
        .unwrap();
    let id = accepted.deployment.id;
    let mut handle = accepted.job.unwrap();
    assert_eq!(
        handle.wait().await,
        JobState::Finished {
            outcome: JobOutcome::Deployed { port: 31161 }
        }
    );
    let deployed = state.store.load(id).await.unwrap().unwrap().deployment;
    assert_eq!(deployed.current_status, DeploymentStatus::Deployed);
    assert_eq!(deployed.port, Some(31161));

    let accepted = state.controller.disable(&ctx(), id).await.unwrap();
    let mut handle = accepted.job.unwrap();
    assert_eq!(
        handle.wait().await,
        JobState::Finished {
            outcome: JobOutcome::Undeployed
        }
    );
    assert!(cluster.workload(NAMESPACE, "d-1-myapp").is_none());

    let record = state.store.load(id).await.unwrap().unwrap().deployment;
    assert_eq!(record.current_status, DeploymentStatus::Suspended);
    assert!(!record.enabled);

    let logs = state.controller.logs(id).await.unwrap();
    assert_eq!(logs.len(), 2);
    assert!(logs[0].id < logs[1].id);

    runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_jobs_are_findable_by_id() {
    let (state, _cluster, options, rx) = app().await;
    let mut runtime = start(&options, state.clone(), rx).unwrap();

    create_with_id(state.store.as_ref(), 1, "myapp", 1, DeploymentStatus::Saved).await;
    let handle = state
        .controller
        .enqueue_deploy_job(1, "en", 9)
        .await
        .unwrap();

    let mut found = state.jobs.get(&handle.id()).unwrap();
    assert!(found.wait().await.is_terminal());

    runtime.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_job_waiting_past_start_timeout_expires_into_error() {
    let (state, cluster, options, rx) = app().await;
    create_with_id(state.store.as_ref(), 1, "myapp", 1, DeploymentStatus::Pending).await;
    let mut handle = state
        .controller
        .enqueue_deploy_job(1, "en", 9)
        .await
        .unwrap();

    tokio::time::advance(options.pool.start_timeout + Duration::from_secs(1)).await;
    let mut runtime = start(&options, state.clone(), rx).unwrap();

    assert_eq!(handle.wait().await, JobState::Expired);
    let record = state.store.load(1).await.unwrap().unwrap().deployment;
    assert_eq!(record.current_status, DeploymentStatus::Error);

    let logs = state.controller.logs(1).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, DeploymentStatus::Error);
    assert!(cluster.calls().is_empty());

    runtime.shutdown().await.unwrap();
}
