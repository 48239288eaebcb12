//! In-memory deployment store

use std::sync::RwLock;

use async_trait::async_trait;

use crate::errors::ControllerError;
use crate::models::deployment::{
    Deployment, DeploymentId, DeploymentImage, DeploymentLog, DeploymentRecord,
    DeploymentStatus, DeploymentTarget, DeploymentUpdate, NewDeployment, NewDeploymentLog,
};

use super::{DeploymentStore, StoreData};

/// Store that keeps everything in process memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<StoreData>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, StoreData>, ControllerError> {
        self.data
            .read()
            .map_err(|_| ControllerError::StorageError("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, StoreData>, ControllerError> {
        self.data
            .write()
            .map_err(|_| ControllerError::StorageError("lock poisoned".to_string()))
    }
}

#[async_trait]
impl DeploymentStore for MemoryStore {
    async fn load(&self, id: DeploymentId) -> Result<Option<DeploymentRecord>, ControllerError> {
        self.read()?.load(id)
    }

    async fn create(
        &self,
        new: NewDeployment,
        status: DeploymentStatus,
    ) -> Result<Deployment, ControllerError> {
        self.write()?.create(new, status)
    }

    async fn update(
        &self,
        id: DeploymentId,
        update: DeploymentUpdate,
    ) -> Result<Deployment, ControllerError> {
        self.write()?.update(id, update)
    }

    async fn append_log(&self, entry: NewDeploymentLog) -> Result<DeploymentLog, ControllerError> {
        Ok(self.write()?.append_log(entry))
    }

    async fn list_logs(&self, id: DeploymentId) -> Result<Vec<DeploymentLog>, ControllerError> {
        Ok(self.read()?.list_logs(id))
    }

    async fn put_image(&self, image: DeploymentImage) -> Result<(), ControllerError> {
        self.write()?.put_image(image);
        Ok(())
    }

    async fn put_target(&self, target: DeploymentTarget) -> Result<(), ControllerError> {
        self.write()?.put_target(target);
        Ok(())
    }
}
