//! Finite state machine for deployment lifecycles

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::deployment::DeploymentStatus;

/// Asynchronous job a transition asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Deploy,
    Undeploy,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKind::Deploy => f.write_str("deploy"),
            JobKind::Undeploy => f.write_str("undeploy"),
        }
    }
}

/// Deployment event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentEvent {
    /// Record created, optionally with an immediate deploy
    Create { deploy: bool },

    /// Record edited; `deploy` wins over `undeploy` when both are set
    Update { deploy: bool, undeploy: bool },

    /// Soft delete
    Disable,

    /// A job reconciled the cluster
    JobSucceeded(JobKind),

    /// Undeploy found no workload to remove
    WorkloadAbsent,

    /// The cluster reported a resource that already exists
    JobConflict,

    /// Any other job failure
    JobFailed,

    /// The job never ran
    JobExpired,
}

/// Deployment FSM
#[derive(Debug, Clone)]
pub struct DeploymentFsm {
    state: DeploymentStatus,
}

impl DeploymentFsm {
    /// FSM for a record about to be created
    pub fn new() -> Self {
        Self {
            state: DeploymentStatus::Editing,
        }
    }

    /// FSM positioned at a stored status
    pub fn from_status(state: DeploymentStatus) -> Self {
        Self { state }
    }

    /// Get current state
    pub fn state(&self) -> DeploymentStatus {
        self.state
    }

    /// Apply an event, returning the job it triggers (if any).
    ///
    /// Events never fail: requests that do not apply in the current state
    /// leave it untouched.
    pub fn process(&mut self, event: DeploymentEvent) -> Option<JobKind> {
        use DeploymentStatus::*;

        let (next, job) = match (self.state, event) {
            (_, DeploymentEvent::Create { deploy: true }) => (Pending, Some(JobKind::Deploy)),
            (_, DeploymentEvent::Create { deploy: false }) => (Saved, None),

            (Deployed | DeployedOld | PendingUndeploy, DeploymentEvent::Update { deploy: true, .. }) => {
                (DeployedOld, Some(JobKind::Deploy))
            }
            (_, DeploymentEvent::Update { deploy: true, .. }) => (Pending, Some(JobKind::Deploy)),
            (
                Deployed | DeployedOld | PendingUndeploy,
                DeploymentEvent::Update { undeploy: true, .. },
            ) => {
                (PendingUndeploy, Some(JobKind::Undeploy))
            }
            (state, DeploymentEvent::Update { undeploy: true, .. }) => (state, None),
            (_, DeploymentEvent::Update { .. }) => (DeployedOld, None),

            (Deployed | DeployedOld, DeploymentEvent::Disable) => {
                (PendingUndeploy, Some(JobKind::Undeploy))
            }
            (PendingUndeploy, DeploymentEvent::Disable) => (PendingUndeploy, None),
            (_, DeploymentEvent::Disable) => (Suspended, None),

            (_, DeploymentEvent::JobSucceeded(JobKind::Deploy)) => (Deployed, None),
            (_, DeploymentEvent::JobSucceeded(JobKind::Undeploy)) => (Suspended, None),
            (_, DeploymentEvent::WorkloadAbsent) => (Suspended, None),
            (state, DeploymentEvent::JobConflict) => (state, None),
            (_, DeploymentEvent::JobFailed | DeploymentEvent::JobExpired) => (Error, None),
        };

        self.state = next;
        job
    }
}

impl Default for DeploymentFsm {
    fn default() -> Self {
        Self::new()
    }
}
