//! Worker pool running deployment jobs

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{info, warn, Instrument};
use uuid::Uuid;

use crate::deploy::executor::{JobExecutor, JobOutcome, JobRequest};
use crate::models::deployment::DeploymentId;
use crate::workers::queue::{JobRegistry, JobState, QueuedJob};

/// Something that runs a job to completion
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, request: &JobRequest) -> JobOutcome;

    /// Record that a queued job will never run
    async fn expire(&self, job_id: Uuid, request: &JobRequest);
}

#[async_trait]
impl JobRunner for JobExecutor {
    async fn run(&self, request: &JobRequest) -> JobOutcome {
        self.execute(request).await
    }

    async fn expire(&self, job_id: Uuid, request: &JobRequest) {
        JobExecutor::expire(self, job_id, request).await
    }
}

/// Worker pool options
#[derive(Debug, Clone)]
pub struct Options {
    /// Jobs running at the same time
    pub workers: usize,

    /// Jobs not started within this window expire. The window covers the
    /// wait for a worker and for the deployment's lock.
    pub start_timeout: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            workers: 4,
            start_timeout: Duration::from_secs(60),
        }
    }
}

/// One lock per deployment so its jobs never overlap
#[derive(Default)]
pub struct DeploymentLocks {
    locks: Mutex<HashMap<DeploymentId, Arc<tokio::sync::Mutex<()>>>>,
}

impl DeploymentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock_for(&self, id: DeploymentId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        // drop locks nobody holds or waits on
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks.entry(id).or_default().clone()
    }
}

async fn expire(runner: &dyn JobRunner, registry: &JobRegistry, job: &QueuedJob) {
    runner.expire(job.id, &job.request).await;
    registry.set_state(&job.id, JobState::Expired);
}

/// Run the worker pool until shutdown, then drain the jobs in flight
pub async fn run(
    options: &Options,
    mut jobs: mpsc::Receiver<QueuedJob>,
    runner: Arc<dyn JobRunner>,
    registry: Arc<JobRegistry>,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) {
    info!("Worker pool starting with {} workers...", options.workers);

    let permits = Arc::new(Semaphore::new(options.workers.max(1)));
    let locks = Arc::new(DeploymentLocks::new());
    let mut running = JoinSet::new();

    loop {
        let job = tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Worker pool shutting down...");
                break;
            }
            job = jobs.recv() => match job {
                Some(job) => job,
                None => {
                    info!("Job queue closed, worker pool stopping...");
                    break;
                }
            },
            // reap finished tasks so the set does not grow
            Some(_) = running.join_next(), if !running.is_empty() => continue,
        };

        let permit = tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Worker pool shutting down...");
                expire(runner.as_ref(), &registry, &job).await;
                break;
            }
            permit = permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let start_timeout = options.start_timeout;
        let runner = runner.clone();
        let registry = registry.clone();
        let lock = locks.lock_for(job.request.deployment_id);
        let span = tracing::info_span!(
            "job",
            job_id = %job.id,
            deployment_id = job.request.deployment_id,
            kind = %job.request.kind
        );

        running.spawn(
            async move {
                let _permit = permit;
                let _guard = lock.lock().await;

                let waited = registry
                    .enqueued_at(&job.id)
                    .map(|at| at.elapsed())
                    .unwrap_or_default();
                if waited > start_timeout {
                    warn!(
                        "Job {} for deployment {} not started within {:?}, expiring",
                        job.id, job.request.deployment_id, start_timeout
                    );
                    expire(runner.as_ref(), &registry, &job).await;
                    return;
                }

                registry.set_state(&job.id, JobState::Running);
                let outcome = runner.run(&job.request).await;
                info!("Job finished: {:?}", outcome);
                registry.set_state(&job.id, JobState::Finished { outcome });
            }
            .instrument(span),
        );
    }

    // jobs still queued will not run
    jobs.close();
    while let Ok(job) = jobs.try_recv() {
        expire(runner.as_ref(), &registry, &job).await;
    }

    while let Some(result) = running.join_next().await {
        if let Err(e) = result {
            warn!("Job task failed: {}", e);
        }
    }
    info!("Worker pool stopped");
}
