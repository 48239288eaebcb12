//! Job queue, registry and handles

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::deploy::executor::{JobOutcome, JobRequest};
use crate::errors::ControllerError;

/// Lifecycle of a queued job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Finished { outcome: JobOutcome },

    /// No worker picked the job up within the start timeout
    Expired,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Finished { .. } | JobState::Expired)
    }
}

/// Pollable reference to a queued job
#[derive(Debug, Clone)]
pub struct JobHandle {
    id: Uuid,
    request: JobRequest,
    state: watch::Receiver<JobState>,
}

impl JobHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn request(&self) -> &JobRequest {
        &self.request
    }

    /// Current state without waiting
    pub fn state(&self) -> JobState {
        self.state.borrow().clone()
    }

    /// Wait until the job finishes or expires
    pub async fn wait(&mut self) -> JobState {
        loop {
            let state = self.state.borrow_and_update().clone();
            if state.is_terminal() {
                return state;
            }
            // registry entry dropped by the janitor or at shutdown
            if self.state.changed().await.is_err() {
                return self.state.borrow().clone();
            }
        }
    }
}

struct JobEntry {
    request: JobRequest,
    state: watch::Sender<JobState>,
    enqueued_at: Instant,
    finished_at: Option<Instant>,
}

/// Every job the process knows about, until its result expires
#[derive(Default)]
pub struct JobRegistry {
    entries: RwLock<HashMap<Uuid, JobEntry>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, request: JobRequest) -> JobHandle {
        let id = Uuid::new_v4();
        let (tx, rx) = watch::channel(JobState::Queued);
        let entry = JobEntry {
            request: request.clone(),
            state: tx,
            enqueued_at: Instant::now(),
            finished_at: None,
        };

        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(id, entry);
        JobHandle {
            id,
            request,
            state: rx,
        }
    }

    /// Look up a job by id
    pub fn get(&self, id: &Uuid) -> Option<JobHandle> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(id).map(|entry| JobHandle {
            id: *id,
            request: entry.request.clone(),
            state: entry.state.subscribe(),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn enqueued_at(&self, id: &Uuid) -> Option<Instant> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(id).map(|entry| entry.enqueued_at)
    }

    pub(crate) fn set_state(&self, id: &Uuid, state: JobState) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = entries.get_mut(id) {
            if state.is_terminal() {
                entry.finished_at = Some(Instant::now());
            }
            entry.state.send_replace(state);
        }
    }

    /// Drop terminal jobs whose results are older than `ttl`
    pub fn purge(&self, ttl: Duration) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|_, entry| match entry.finished_at {
            Some(at) => now.duration_since(at) < ttl,
            None => true,
        });
        let purged = before - entries.len();
        if purged > 0 {
            debug!("Purged {} expired job results", purged);
        }
        purged
    }
}

/// A job travelling from the queue to the pool
#[derive(Debug)]
pub struct QueuedJob {
    pub id: Uuid,
    pub request: JobRequest,
}

/// Producer side of the job queue
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<QueuedJob>,
    registry: Arc<JobRegistry>,
}

impl JobQueue {
    /// Create a queue and the receiver the worker pool consumes
    pub fn new(capacity: usize, registry: Arc<JobRegistry>) -> (Self, mpsc::Receiver<QueuedJob>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx, registry }, rx)
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// Queue a job and return its handle without waiting for it to run
    pub async fn enqueue(&self, request: JobRequest) -> Result<JobHandle, ControllerError> {
        let handle = self.registry.register(request.clone());
        debug!(
            "Queued {} job {} for deployment {}",
            request.kind,
            handle.id(),
            request.deployment_id
        );

        let sent = self
            .tx
            .send(QueuedJob {
                id: handle.id(),
                request,
            })
            .await;
        if sent.is_err() {
            self.registry.set_state(&handle.id(), JobState::Expired);
            return Err(ControllerError::QueueError(
                "worker pool is not running".to_string(),
            ));
        }
        Ok(handle)
    }
}
