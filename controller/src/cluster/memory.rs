//! In-memory cluster
//!
//! Behaves like the API server for the calls the controller makes (conflicts
//! on duplicate creates, not-found on missing deletes, node port collisions)
//! and records every call. Backs dry-run mode and the test suites.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;
use kube::api::DeleteParams;
use kube::ResourceExt;
use tracing::info;

use crate::cluster::resources::{ServiceExt, ServiceResource, WorkloadResource};
use crate::cluster::{ClusterApi, ClusterError, ServiceSummary};

/// Operation kinds, used to inject failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClusterOp {
    ListWorkloads,
    CreateWorkload,
    PatchWorkload,
    DeleteWorkload,
    ListServices,
    CreateService,
    DeleteService,
}

/// A call as recorded by [`MemoryCluster`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterCall {
    ListWorkloads { namespace: String },
    CreateWorkload { namespace: String, name: String },
    PatchWorkload { namespace: String, name: String },
    DeleteWorkload { namespace: String, name: String },
    ListServices,
    CreateService { namespace: String, name: String, node_port: Option<u16> },
    DeleteService { namespace: String, name: String },
}

/// Failure returned by the next call of an operation
#[derive(Debug, Clone)]
pub enum InjectedFailure {
    NotFound { kind: String, name: String },
    Conflict { kind: String, name: String },
    Api { status: u16, message: String },
}

impl InjectedFailure {
    fn into_error(self) -> ClusterError {
        match self {
            InjectedFailure::NotFound { kind, name } => ClusterError::NotFound { kind, name },
            InjectedFailure::Conflict { kind, name } => ClusterError::Conflict { kind, name },
            InjectedFailure::Api { status, message } => ClusterError::Api { status, message },
        }
    }
}

type Key = (String, String);

#[derive(Debug, Default)]
struct State {
    workloads: BTreeMap<Key, WorkloadResource>,
    services: BTreeMap<Key, ServiceResource>,
    calls: Vec<ClusterCall>,
    failures: HashMap<ClusterOp, InjectedFailure>,
}

/// Cluster held entirely in memory
#[derive(Debug, Default)]
pub struct MemoryCluster {
    state: RwLock<State>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next call of `op` fail
    pub fn fail_next(&self, op: ClusterOp, failure: InjectedFailure) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.failures.insert(op, failure);
    }

    /// Place a service in the cluster without recording a call
    pub fn seed_service(&self, namespace: &str, service: ServiceResource) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.services.insert(key(namespace, &service.name_any()), service);
    }

    /// Place a workload in the cluster without recording a call
    pub fn seed_workload(&self, namespace: &str, workload: WorkloadResource) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.workloads.insert(key(namespace, &workload.name_any()), workload);
    }

    pub fn workload(&self, namespace: &str, name: &str) -> Option<WorkloadResource> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state
            .workloads
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn service(&self, namespace: &str, name: &str) -> Option<ServiceResource> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state
            .services
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Every call made so far, oldest first
    pub fn calls(&self) -> Vec<ClusterCall> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.calls.clone()
    }

    pub fn clear_calls(&self) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.calls.clear();
    }

    fn begin(&self, op: ClusterOp, call: ClusterCall) -> Result<(), ClusterError> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        info!("Cluster call: {:?}", call);
        state.calls.push(call);
        match state.failures.remove(&op) {
            Some(failure) => Err(failure.into_error()),
            None => Ok(()),
        }
    }
}

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

#[async_trait]
impl ClusterApi for MemoryCluster {
    async fn list_workloads(&self, namespace: &str) -> Result<Vec<String>, ClusterError> {
        self.begin(
            ClusterOp::ListWorkloads,
            ClusterCall::ListWorkloads {
                namespace: namespace.to_string(),
            },
        )?;

        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        Ok(state
            .workloads
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, name)| name.clone())
            .collect())
    }

    async fn create_workload(
        &self,
        namespace: &str,
        workload: &WorkloadResource,
    ) -> Result<(), ClusterError> {
        let name = workload.name_any();
        self.begin(
            ClusterOp::CreateWorkload,
            ClusterCall::CreateWorkload {
                namespace: namespace.to_string(),
                name: name.clone(),
            },
        )?;

        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        let key = key(namespace, &name);
        if state.workloads.contains_key(&key) {
            return Err(ClusterError::Conflict {
                kind: "deployment".to_string(),
                name,
            });
        }
        state.workloads.insert(key, workload.clone());
        Ok(())
    }

    async fn patch_workload(
        &self,
        namespace: &str,
        workload: &WorkloadResource,
    ) -> Result<(), ClusterError> {
        let name = workload.name_any();
        self.begin(
            ClusterOp::PatchWorkload,
            ClusterCall::PatchWorkload {
                namespace: namespace.to_string(),
                name: name.clone(),
            },
        )?;

        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        match state.workloads.get_mut(&key(namespace, &name)) {
            Some(existing) => {
                *existing = workload.clone();
                Ok(())
            }
            None => Err(ClusterError::NotFound {
                kind: "deployment".to_string(),
                name,
            }),
        }
    }

    async fn delete_workload(
        &self,
        namespace: &str,
        name: &str,
        _params: &DeleteParams,
    ) -> Result<(), ClusterError> {
        self.begin(
            ClusterOp::DeleteWorkload,
            ClusterCall::DeleteWorkload {
                namespace: namespace.to_string(),
                name: name.to_string(),
            },
        )?;

        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        match state.workloads.remove(&key(namespace, name)) {
            Some(_) => Ok(()),
            None => Err(ClusterError::NotFound {
                kind: "deployment".to_string(),
                name: name.to_string(),
            }),
        }
    }

    async fn list_services(&self) -> Result<Vec<ServiceSummary>, ClusterError> {
        self.begin(ClusterOp::ListServices, ClusterCall::ListServices)?;

        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        Ok(state
            .services
            .iter()
            .filter(|((ns, _), _)| ns != "kube-system" && ns != "default")
            .map(|((ns, name), service)| ServiceSummary {
                name: name.clone(),
                namespace: ns.clone(),
                ..ServiceSummary::from_service(service)
            })
            .collect())
    }

    async fn create_service(
        &self,
        namespace: &str,
        service: &ServiceResource,
    ) -> Result<(), ClusterError> {
        let name = service.name_any();
        self.begin(
            ClusterOp::CreateService,
            ClusterCall::CreateService {
                namespace: namespace.to_string(),
                name: name.clone(),
                node_port: service.node_port(),
            },
        )?;

        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        let key = key(namespace, &name);
        if state.services.contains_key(&key) {
            return Err(ClusterError::Conflict {
                kind: "service".to_string(),
                name,
            });
        }
        if let Some(port) = service.node_port() {
            let taken = state
                .services
                .values()
                .any(|s| s.node_port() == Some(port));
            if taken {
                return Err(ClusterError::Api {
                    status: 422,
                    message: format!("provided port is already allocated: {}", port),
                });
            }
        }
        state.services.insert(key, service.clone());
        Ok(())
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        self.begin(
            ClusterOp::DeleteService,
            ClusterCall::DeleteService {
                namespace: namespace.to_string(),
                name: name.to_string(),
            },
        )?;

        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        match state.services.remove(&key(namespace, name)) {
            Some(_) => Ok(()),
            None => Err(ClusterError::NotFound {
                kind: "service".to_string(),
                name: name.to_string(),
            }),
        }
    }
}
