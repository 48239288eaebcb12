//! Cluster client adapter
//!
//! A narrow capability set over the orchestrator's API. The reconciler only
//! talks to [`ClusterApi`], so API versions and credentials stay inside the
//! implementations.

pub mod connector;
pub mod kubernetes;
pub mod memory;
pub mod resources;

use async_trait::async_trait;
use kube::api::DeleteParams;
use kube::ResourceExt;
use thiserror::Error;

use crate::cluster::resources::{ServiceExt, ServiceResource, WorkloadResource};

/// Errors raised by the cluster API
#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("{kind} {name} not found")]
    NotFound { kind: String, name: String },

    #[error("{kind} {name} already exists")]
    Conflict { kind: String, name: String },

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Kubernetes client error: {0}")]
    Client(#[source] kube::Error),

    #[error("Kubernetes configuration error: {0}")]
    Config(String),
}

impl ClusterError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ClusterError::Conflict { .. })
    }
}

/// A network service as seen in the cluster-wide scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSummary {
    pub name: String,
    pub namespace: String,

    /// Every `port` the service exposes
    pub ports: Vec<u16>,

    /// Every `nodePort` the service exposes
    pub node_ports: Vec<u16>,
}

impl ServiceSummary {
    pub fn from_service(service: &ServiceResource) -> Self {
        Self {
            name: service.name_any(),
            namespace: service.namespace().unwrap_or_default(),
            ports: service.ports(),
            node_ports: service.node_ports(),
        }
    }

    /// Every port in use, node ports included
    pub fn all_ports(&self) -> impl Iterator<Item = u16> + '_ {
        self.ports.iter().chain(self.node_ports.iter()).copied()
    }
}

/// Operations the controller needs from an orchestrator
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Names of the workloads in a namespace
    async fn list_workloads(&self, namespace: &str) -> Result<Vec<String>, ClusterError>;

    async fn create_workload(
        &self,
        namespace: &str,
        workload: &WorkloadResource,
    ) -> Result<(), ClusterError>;

    async fn patch_workload(
        &self,
        namespace: &str,
        workload: &WorkloadResource,
    ) -> Result<(), ClusterError>;

    async fn delete_workload(
        &self,
        namespace: &str,
        name: &str,
        params: &DeleteParams,
    ) -> Result<(), ClusterError>;

    /// Services in every namespace the controller allocates ports across
    async fn list_services(&self) -> Result<Vec<ServiceSummary>, ClusterError>;

    async fn create_service(
        &self,
        namespace: &str,
        service: &ServiceResource,
    ) -> Result<(), ClusterError>;

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<(), ClusterError>;
}
