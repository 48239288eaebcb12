//! Error types for the seed controller

use thiserror::Error;

use crate::cluster::ClusterError;
use crate::models::deployment::TargetKind;

/// Main error type for the controller
#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("HTTP status {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),

    #[error("Deployment target {0} not supported")]
    UnsupportedTargetKind(TargetKind),

    #[error("No free external port between {from} and {to}")]
    PortsExhausted { from: u16, to: u16 },

    #[error("No authentication info configured in deployment target {0}")]
    CredentialMissing(String),

    #[error("Model registry error: {0}")]
    RegistryError(String),

    #[error("Notifier error: {0}")]
    NotifierError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Queue error: {0}")]
    QueueError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl ControllerError {
    /// The cluster error behind this failure, if the cluster raised it
    pub fn as_cluster(&self) -> Option<&ClusterError> {
        match self {
            ControllerError::Cluster(e) => Some(e),
            _ => None,
        }
    }
}
