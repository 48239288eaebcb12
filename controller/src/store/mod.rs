//! Deployment storage backends
//!
//! Deployments, their images and targets, and the append-only deployment
//! log. The in-memory store backs tests and dry runs; the file store keeps
//! everything in a single JSON document.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::errors::ControllerError;
use crate::models::deployment::{
    internal_name, Deployment, DeploymentId, DeploymentImage, DeploymentLog, DeploymentRecord,
    DeploymentStatus, DeploymentTarget, DeploymentUpdate, NewDeployment, NewDeploymentLog,
};

/// Persistence used by the controller
#[async_trait]
pub trait DeploymentStore: Send + Sync {
    /// Load a deployment with its image and target
    async fn load(&self, id: DeploymentId) -> Result<Option<DeploymentRecord>, ControllerError>;

    /// Insert a new deployment, assigning its id and internal name
    async fn create(
        &self,
        new: NewDeployment,
        status: DeploymentStatus,
    ) -> Result<Deployment, ControllerError>;

    /// Merge an update into a stored deployment
    async fn update(
        &self,
        id: DeploymentId,
        update: DeploymentUpdate,
    ) -> Result<Deployment, ControllerError>;

    async fn append_log(&self, entry: NewDeploymentLog) -> Result<DeploymentLog, ControllerError>;

    /// Log entries of a deployment, oldest first
    async fn list_logs(&self, id: DeploymentId) -> Result<Vec<DeploymentLog>, ControllerError>;

    async fn put_image(&self, image: DeploymentImage) -> Result<(), ControllerError>;

    async fn put_target(&self, target: DeploymentTarget) -> Result<(), ControllerError>;
}

/// Tables shared by both backends
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreData {
    #[serde(default)]
    deployments: BTreeMap<DeploymentId, Deployment>,

    #[serde(default)]
    images: BTreeMap<i64, DeploymentImage>,

    #[serde(default)]
    targets: BTreeMap<i64, DeploymentTarget>,

    #[serde(default)]
    logs: Vec<DeploymentLog>,
}

impl StoreData {
    fn load(&self, id: DeploymentId) -> Result<Option<DeploymentRecord>, ControllerError> {
        let deployment = match self.deployments.get(&id) {
            Some(d) => d.clone(),
            None => return Ok(None),
        };
        let image = self.images.get(&deployment.image_id).cloned().ok_or_else(|| {
            ControllerError::StorageError(format!(
                "image {} of deployment {} missing",
                deployment.image_id, id
            ))
        })?;
        let target = self.targets.get(&deployment.target_id).cloned().ok_or_else(|| {
            ControllerError::StorageError(format!(
                "target {} of deployment {} missing",
                deployment.target_id, id
            ))
        })?;

        Ok(Some(DeploymentRecord {
            deployment,
            image,
            target,
        }))
    }

    fn create(
        &mut self,
        new: NewDeployment,
        status: DeploymentStatus,
    ) -> Result<Deployment, ControllerError> {
        if !self.images.contains_key(&new.image_id) {
            return Err(ControllerError::NotFound(format!("image {}", new.image_id)));
        }
        let target = self
            .targets
            .get(&new.target_id)
            .ok_or_else(|| ControllerError::NotFound(format!("target {}", new.target_id)))?;

        let id = self.deployments.keys().next_back().copied().unwrap_or(0) + 1;
        let now = Utc::now();
        let deployment = Deployment {
            id,
            internal_name: Some(internal_name(id, &new.name)),
            name: new.name,
            description: new.description,
            version: 1,
            current_status: status,
            enabled: true,
            model_id: new.model_id,
            model_name: new.model_name,
            user_id: new.user_id,
            user_login: new.user_login,
            user_name: new.user_name,
            replicas: new.replicas,
            request_memory: new.request_memory,
            limit_memory: new.limit_memory,
            request_cpu: new.request_cpu,
            limit_cpu: new.limit_cpu,
            base_service_url: Some(target.base_service_url.clone()),
            port: None,
            execution_id: None,
            image_id: new.image_id,
            target_id: new.target_id,
            created: now,
            updated: now,
        };

        self.deployments.insert(id, deployment.clone());
        Ok(deployment)
    }

    fn update(
        &mut self,
        id: DeploymentId,
        update: DeploymentUpdate,
    ) -> Result<Deployment, ControllerError> {
        let deployment = self
            .deployments
            .get_mut(&id)
            .ok_or_else(|| ControllerError::NotFound(format!("deployment {}", id)))?;
        update.apply(deployment);
        Ok(deployment.clone())
    }

    fn append_log(&mut self, entry: NewDeploymentLog) -> DeploymentLog {
        let id = self.logs.last().map(|l| l.id).unwrap_or(0) + 1;
        let log = DeploymentLog {
            id,
            date: Utc::now(),
            status: entry.status,
            deployment_id: entry.deployment_id,
            log: entry.message,
        };
        self.logs.push(log.clone());
        log
    }

    fn list_logs(&self, id: DeploymentId) -> Vec<DeploymentLog> {
        self.logs
            .iter()
            .filter(|l| l.deployment_id == id)
            .cloned()
            .collect()
    }

    fn put_image(&mut self, image: DeploymentImage) {
        self.images.insert(image.id, image);
    }

    fn put_target(&mut self, target: DeploymentTarget) {
        self.targets.insert(target.id, target);
    }
}
