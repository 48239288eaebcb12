//! Create-or-update and teardown of a deployment's cluster resources

use std::sync::Arc;

use kube::api::DeleteParams;
use kube::ResourceExt;
use tracing::{info, warn};

use crate::cluster::ClusterApi;
use crate::deploy::manifest::{build_service_spec, build_workload_spec};
use crate::deploy::ports;
use crate::errors::ControllerError;
use crate::http::registry::ModelRegistry;
use crate::models::deployment::{
    service_name, Deployment, DeploymentImage, DeploymentTarget, TargetKind,
};

/// Seconds the cluster waits before killing pods of a deleted workload
pub const DELETE_GRACE_PERIOD_SECS: u32 = 5;

/// Applies deployments to a cluster
pub struct Reconciler {
    registry: Arc<dyn ModelRegistry>,
}

impl Reconciler {
    pub fn new(registry: Arc<dyn ModelRegistry>) -> Self {
        Self { registry }
    }

    fn check_kind(target: &DeploymentTarget) -> Result<(), ControllerError> {
        match target.kind {
            TargetKind::Kubernetes => Ok(()),
            other => Err(ControllerError::UnsupportedTargetKind(other)),
        }
    }

    /// Bring the workload and its service in line with the deployment.
    /// Returns the external port the service was created with. A service
    /// left by an earlier run keeps its node port.
    pub async fn deploy(
        &self,
        deployment: &Deployment,
        image: &DeploymentImage,
        target: &DeploymentTarget,
        cluster: &dyn ClusterApi,
    ) -> Result<u16, ControllerError> {
        Self::check_kind(target)?;

        let model_id = deployment.model_id.ok_or_else(|| {
            ControllerError::RegistryError(format!("deployment {} has no model", deployment.id))
        })?;
        let model_uri = self.registry.resolve_artifact_uri(model_id).await?;

        let namespace = target.namespace.as_str();
        let workload = build_workload_spec(deployment, image, target, &model_uri);
        let workload_name = workload.name_any();

        let existing = cluster.list_workloads(namespace).await?;
        if existing.iter().any(|name| *name == workload_name) {
            info!("Patching workload {}/{}", namespace, workload_name);
            cluster.patch_workload(namespace, &workload).await?;
        } else {
            info!("Creating workload {}/{}", namespace, workload_name);
            cluster.create_workload(namespace, &workload).await?;
        }

        let services = cluster.list_services().await?;
        let svc_name = service_name(&workload_name);
        let previous_port = ports::reusable(&services, namespace, &svc_name);
        let svc_exists = services
            .iter()
            .any(|s| s.name == svc_name && s.namespace == namespace);

        let port = match deployment.port.or(previous_port) {
            Some(port) => port,
            None => ports::allocate(&services)?,
        };

        if svc_exists {
            // recreated below with the same port
            if let Err(e) = cluster.delete_service(namespace, &svc_name).await {
                warn!("Unable to delete service {}/{}: {}", namespace, svc_name, e);
            }
        }

        let service = build_service_spec(deployment, target, port);
        info!("Creating service {}/{} on port {}", namespace, svc_name, port);
        cluster.create_service(namespace, &service).await?;

        Ok(port)
    }

    /// Remove the workload, then its service. A missing service is not an
    /// error; a missing workload is reported to the caller.
    pub async fn undeploy(
        &self,
        deployment: &Deployment,
        target: &DeploymentTarget,
        cluster: &dyn ClusterApi,
    ) -> Result<(), ControllerError> {
        Self::check_kind(target)?;

        let namespace = target.namespace.as_str();
        let name = deployment.resolved_internal_name();

        info!("Deleting workload {}/{}", namespace, name);
        cluster
            .delete_workload(
                namespace,
                &name,
                &DeleteParams::foreground().grace_period(DELETE_GRACE_PERIOD_SECS),
            )
            .await?;

        let svc_name = service_name(&name);
        if let Err(e) = cluster.delete_service(namespace, &svc_name).await {
            warn!("Unable to delete service {}/{}: {}", namespace, svc_name, e);
        }

        Ok(())
    }
}
