//! Deployment job execution
//!
//! Runs one deploy or undeploy job end to end and is the only place where
//! failures are classified into statuses and log entries.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cluster::connector::ClusterConnector;
use crate::cluster::ClusterError;
use crate::deploy::fsm::{DeploymentEvent, DeploymentFsm, JobKind};
use crate::deploy::reconciler::Reconciler;
use crate::errors::ControllerError;
use crate::http::notifier::{Notification, Notifier};
use crate::i18n::messages::Message;
use crate::i18n::MessageFormatter;
use crate::models::deployment::{
    DeploymentId, DeploymentRecord, DeploymentStatus, DeploymentUpdate, NewDeploymentLog,
    TargetKind,
};
use crate::store::DeploymentStore;

/// What a queued job should do
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    pub deployment_id: DeploymentId,
    pub kind: JobKind,
    pub locale: String,
    pub user_id: i64,
}

/// How a job ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobOutcome {
    Deployed { port: u16 },
    Undeployed,

    /// Undeploy found nothing to remove
    AlreadyAbsent,

    /// A resource already existed; status left as it was
    Conflict { message: String },

    Failed { message: String },

    /// The deployment no longer exists
    Skipped,
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            JobOutcome::Deployed { .. } | JobOutcome::Undeployed | JobOutcome::AlreadyAbsent
        )
    }
}

/// Executes deployment jobs
pub struct JobExecutor {
    store: Arc<dyn DeploymentStore>,
    connector: Arc<dyn ClusterConnector>,
    reconciler: Reconciler,
    notifier: Arc<dyn Notifier>,
    formatter: Arc<dyn MessageFormatter>,
}

impl JobExecutor {
    pub fn new(
        store: Arc<dyn DeploymentStore>,
        connector: Arc<dyn ClusterConnector>,
        reconciler: Reconciler,
        notifier: Arc<dyn Notifier>,
        formatter: Arc<dyn MessageFormatter>,
    ) -> Self {
        Self {
            store,
            connector,
            reconciler,
            notifier,
            formatter,
        }
    }

    /// Run a job. Never fails: every outcome lands in the deployment's
    /// status and log, and the owner is notified either way.
    pub async fn execute(&self, request: &JobRequest) -> JobOutcome {
        let outcome = self.execute_impl(request).await;

        let notification = Notification::refresh(request.user_id);
        if let Err(e) = self.notifier.notify(&notification).await {
            warn!("Unable to notify user {}: {}", request.user_id, e);
        }

        outcome
    }

    /// Settle a deployment whose job expired before it ran. The record moves
    /// to ERROR with one log entry, unless a newer job has replaced it.
    pub async fn expire(&self, job_id: Uuid, request: &JobRequest) {
        let id = request.deployment_id;
        let record = match self.store.load(id).await {
            Ok(Some(record)) => record,
            Ok(None) => return,
            Err(e) => {
                error!("Unable to load deployment {}: {}", id, e);
                return;
            }
        };

        let deployment = &record.deployment;
        let job_id = job_id.to_string();
        if deployment.execution_id.as_deref() != Some(job_id.as_str()) {
            debug!("Expired job {} for deployment {} was superseded", job_id, id);
            return;
        }

        let mut fsm = DeploymentFsm::from_status(deployment.current_status);
        fsm.process(DeploymentEvent::JobExpired);
        warn!("Job {} for deployment {} expired", job_id, id);
        self.record_result(
            request,
            fsm.state(),
            DeploymentUpdate::status(fsm.state()),
            &Message::JobExpired { id },
        )
        .await;

        let notification = Notification::refresh(request.user_id);
        if let Err(e) = self.notifier.notify(&notification).await {
            warn!("Unable to notify user {}: {}", request.user_id, e);
        }
    }

    async fn execute_impl(&self, request: &JobRequest) -> JobOutcome {
        let locale = request.locale.as_str();
        let id = request.deployment_id;

        let record = match self.store.load(id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                warn!(
                    "{}",
                    Message::DeploymentMissing { id }.render(self.formatter.as_ref(), locale)
                );
                return JobOutcome::Skipped;
            }
            Err(e) => {
                error!("Unable to load deployment {}: {}", id, e);
                let message = Message::DeploymentFailed {
                    error: e.to_string(),
                };
                let text = self.render(&message, request);
                self.record_result(
                    request,
                    DeploymentStatus::Error,
                    DeploymentUpdate::status(DeploymentStatus::Error),
                    &message,
                )
                .await;
                return JobOutcome::Failed { message: text };
            }
        };

        info!(
            deployment_id = id,
            kind = %request.kind,
            "{}",
            Message::RunningJob { id }.render(self.formatter.as_ref(), locale)
        );

        let result = self.reconcile(request.kind, &record).await;
        self.settle(request, &record, result).await
    }

    async fn reconcile(
        &self,
        kind: JobKind,
        record: &DeploymentRecord,
    ) -> Result<Option<u16>, ControllerError> {
        let target = &record.target;
        // checked before connecting so credential errors cannot mask it
        if target.kind != TargetKind::Kubernetes {
            return Err(ControllerError::UnsupportedTargetKind(target.kind));
        }

        let cluster = self.connector.connect(target).await?;
        match kind {
            JobKind::Deploy => {
                let port = self
                    .reconciler
                    .deploy(&record.deployment, &record.image, target, cluster.as_ref())
                    .await?;
                Ok(Some(port))
            }
            JobKind::Undeploy => {
                self.reconciler
                    .undeploy(&record.deployment, target, cluster.as_ref())
                    .await?;
                Ok(None)
            }
        }
    }

    /// Classify a job result, then persist the status and append one log entry
    async fn settle(
        &self,
        request: &JobRequest,
        record: &DeploymentRecord,
        result: Result<Option<u16>, ControllerError>,
    ) -> JobOutcome {
        let deployment = &record.deployment;
        let current = deployment.current_status;
        let mut fsm = DeploymentFsm::from_status(current);
        let mut update = DeploymentUpdate::default();

        let (message, outcome) = match (&result, request.kind) {
            (Ok(port), JobKind::Deploy) => {
                fsm.process(DeploymentEvent::JobSucceeded(JobKind::Deploy));
                let port = port.or(deployment.port).unwrap_or_default();
                update.port = Some(Some(port));
                update.internal_name = Some(deployment.resolved_internal_name());
                update.base_service_url = Some(record.target.base_service_url.clone());
                (Message::Deployed { port }, JobOutcome::Deployed { port })
            }
            (Ok(_), JobKind::Undeploy) => {
                fsm.process(DeploymentEvent::JobSucceeded(JobKind::Undeploy));
                (Message::Undeployed, JobOutcome::Undeployed)
            }
            (Err(e), kind) => match e.as_cluster() {
                Some(ClusterError::Conflict { kind: res, name }) => {
                    fsm.process(DeploymentEvent::JobConflict);
                    let message = Message::ResourceExists {
                        kind: res.clone(),
                        name: name.clone(),
                    };
                    let text = self.render(&message, request);
                    (message, JobOutcome::Conflict { message: text })
                }
                Some(ClusterError::NotFound { kind: res, name }) if kind == JobKind::Undeploy => {
                    fsm.process(DeploymentEvent::WorkloadAbsent);
                    let message = Message::ResourceNotFound {
                        kind: res.clone(),
                        name: name.clone(),
                    };
                    (message, JobOutcome::AlreadyAbsent)
                }
                _ => {
                    fsm.process(DeploymentEvent::JobFailed);
                    let message = failure_message(e);
                    let text = self.render(&message, request);
                    error!(
                        deployment_id = deployment.id,
                        kind = %request.kind,
                        "Job failed: {}", e
                    );
                    (message, JobOutcome::Failed { message: text })
                }
            },
        };

        let status = fsm.state();
        if status != current {
            update.current_status = Some(status);
        }
        self.record_result(request, status, update, &message).await;

        if status == DeploymentStatus::Error {
            warn!("Deployment {} moved to {}", deployment.id, status);
        } else {
            info!("Deployment {} is {}", deployment.id, status);
        }
        outcome
    }

    /// Persist a job's effect on the deployment and append one log entry
    /// carrying the resulting status. Store failures are only logged.
    async fn record_result(
        &self,
        request: &JobRequest,
        status: DeploymentStatus,
        update: DeploymentUpdate,
        message: &Message,
    ) {
        let id = request.deployment_id;
        if let Err(e) = self.store.update(id, update).await {
            error!("Unable to persist deployment {}: {}", id, e);
        }

        let entry = NewDeploymentLog {
            deployment_id: id,
            status,
            message: self.render(message, request),
        };
        if let Err(e) = self.store.append_log(entry).await {
            error!("Unable to append log for deployment {}: {}", id, e);
        }
    }

    fn render(&self, message: &Message, request: &JobRequest) -> String {
        message.render(self.formatter.as_ref(), &request.locale)
    }
}

fn failure_message(error: &ControllerError) -> Message {
    match error {
        ControllerError::UnsupportedTargetKind(kind) => Message::UnsupportedTarget {
            kind: kind.to_string(),
        },
        ControllerError::CredentialMissing(_) => Message::CredentialMissing,
        ControllerError::Cluster(ClusterError::NotFound { kind, name }) => {
            Message::ResourceNotFound {
                kind: kind.clone(),
                name: name.clone(),
            }
        }
        other => Message::DeploymentFailed {
            error: other.to_string(),
        },
    }
}
