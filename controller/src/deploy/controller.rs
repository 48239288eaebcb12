//! Request-side deployment operations
//!
//! Each operation moves the stored status through the state machine and
//! queues the job the transition asks for. Cluster work only happens in jobs.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::deploy::executor::JobRequest;
use crate::deploy::fsm::{DeploymentEvent, DeploymentFsm, JobKind};
use crate::errors::ControllerError;
use crate::models::deployment::{
    Deployment, DeploymentId, DeploymentLog, DeploymentPatch, DeploymentRecord,
    DeploymentStatus, DeploymentUpdate, NewDeployment,
};
use crate::store::DeploymentStore;
use crate::workers::queue::{JobHandle, JobQueue};

/// Caller of an operation
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub locale: String,
    pub user_id: i64,
}

impl RequestContext {
    pub fn new(locale: impl Into<String>, user_id: i64) -> Self {
        Self {
            locale: locale.into(),
            user_id,
        }
    }
}

/// Result of an operation: the stored record and the job it queued
#[derive(Debug)]
pub struct Accepted {
    pub deployment: Deployment,
    pub job: Option<JobHandle>,
}

pub struct DeploymentController {
    store: Arc<dyn DeploymentStore>,
    queue: JobQueue,
}

impl DeploymentController {
    pub fn new(store: Arc<dyn DeploymentStore>, queue: JobQueue) -> Self {
        Self { store, queue }
    }

    /// Create a deployment, optionally deploying it right away
    pub async fn create(
        &self,
        ctx: &RequestContext,
        new: NewDeployment,
        deploy: bool,
    ) -> Result<Accepted, ControllerError> {
        let mut fsm = DeploymentFsm::new();
        let job = fsm.process(DeploymentEvent::Create { deploy });

        let deployment = self.store.create(new, fsm.state()).await?;
        info!(
            "Created deployment {} ({}) as {}",
            deployment.id,
            deployment.resolved_internal_name(),
            deployment.current_status
        );

        let revert = DeploymentUpdate::status(DeploymentStatus::Saved);
        self.dispatch(ctx, deployment, job, revert).await
    }

    /// Edit a deployment and optionally redeploy or undeploy it
    pub async fn update(
        &self,
        ctx: &RequestContext,
        id: DeploymentId,
        patch: DeploymentPatch,
        deploy: bool,
        undeploy: bool,
    ) -> Result<Accepted, ControllerError> {
        let record = self.load(id).await?;
        let loaded = record.deployment;
        let previous = loaded.current_status;

        let mut fsm = DeploymentFsm::from_status(previous);
        let job = fsm.process(DeploymentEvent::Update { deploy, undeploy });

        let mut update = DeploymentUpdate {
            current_status: Some(fsm.state()),
            base_service_url: Some(record.target.base_service_url.clone()),
            patch: Some(patch),
            ..Default::default()
        };
        // a redeploy of a live deployment rolls out a new version
        if job == Some(JobKind::Deploy) && previous.is_deployed() {
            update.version = Some(loaded.version + 1);
        }

        let deployment = self.store.update(id, update).await?;
        info!(
            "Updated deployment {}: {} -> {}",
            id, previous, deployment.current_status
        );

        let revert = DeploymentUpdate {
            current_status: Some(previous),
            version: Some(loaded.version),
            ..Default::default()
        };
        self.dispatch(ctx, deployment, job, revert).await
    }

    /// Soft-delete: undeploy if live, then mark the record disabled
    pub async fn disable(
        &self,
        ctx: &RequestContext,
        id: DeploymentId,
    ) -> Result<Accepted, ControllerError> {
        let record = self.load(id).await?;
        let previous = record.deployment.current_status;

        let mut fsm = DeploymentFsm::from_status(previous);
        let job = fsm.process(DeploymentEvent::Disable);

        let mut update = DeploymentUpdate {
            enabled: Some(false),
            ..Default::default()
        };
        if fsm.state() != previous {
            update.current_status = Some(fsm.state());
        }
        let deployment = self.store.update(id, update).await?;
        info!("Disabled deployment {}: {} -> {}", id, previous, fsm.state());

        self.dispatch(ctx, deployment, job, DeploymentUpdate::status(previous))
            .await
    }

    /// Log entries of a deployment, oldest first
    pub async fn logs(&self, id: DeploymentId) -> Result<Vec<DeploymentLog>, ControllerError> {
        self.store.list_logs(id).await
    }

    pub async fn enqueue_deploy_job(
        &self,
        id: DeploymentId,
        locale: &str,
        user_id: i64,
    ) -> Result<JobHandle, ControllerError> {
        self.enqueue(id, JobKind::Deploy, locale, user_id).await
    }

    pub async fn enqueue_undeploy_job(
        &self,
        id: DeploymentId,
        locale: &str,
        user_id: i64,
    ) -> Result<JobHandle, ControllerError> {
        self.enqueue(id, JobKind::Undeploy, locale, user_id).await
    }

    async fn enqueue(
        &self,
        id: DeploymentId,
        kind: JobKind,
        locale: &str,
        user_id: i64,
    ) -> Result<JobHandle, ControllerError> {
        let handle = self
            .queue
            .enqueue(JobRequest {
                deployment_id: id,
                kind,
                locale: locale.to_string(),
                user_id,
            })
            .await?;

        let update = DeploymentUpdate {
            execution_id: Some(handle.id().to_string()),
            ..Default::default()
        };
        // the job is already queued; it runs either way
        if let Err(e) = self.store.update(id, update).await {
            warn!("Unable to record job {} on deployment {}: {}", handle.id(), id, e);
        }
        Ok(handle)
    }

    /// Queue the job a transition asked for. When the queue refuses it,
    /// `revert` restores the status persisted before the transition.
    async fn dispatch(
        &self,
        ctx: &RequestContext,
        deployment: Deployment,
        job: Option<JobKind>,
        revert: DeploymentUpdate,
    ) -> Result<Accepted, ControllerError> {
        let mut deployment = deployment;
        let handle = match job {
            Some(kind) => {
                let handle = match self
                    .enqueue(deployment.id, kind, &ctx.locale, ctx.user_id)
                    .await
                {
                    Ok(handle) => handle,
                    Err(e) => {
                        warn!(
                            "Unable to queue {} job for deployment {}: {}",
                            kind, deployment.id, e
                        );
                        if let Err(revert_err) = self.store.update(deployment.id, revert).await {
                            error!(
                                "Unable to restore deployment {}: {}",
                                deployment.id, revert_err
                            );
                        }
                        return Err(e);
                    }
                };
                deployment.execution_id = Some(handle.id().to_string());
                Some(handle)
            }
            None => None,
        };

        Ok(Accepted {
            deployment,
            job: handle,
        })
    }

    async fn load(&self, id: DeploymentId) -> Result<DeploymentRecord, ControllerError> {
        self.store
            .load(id)
            .await?
            .ok_or_else(|| ControllerError::NotFound(format!("deployment {}", id)))
    }
}
