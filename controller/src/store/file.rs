//! JSON file deployment store

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::errors::ControllerError;
use crate::filesys::file::File;
use crate::models::deployment::{
    Deployment, DeploymentId, DeploymentImage, DeploymentLog, DeploymentRecord,
    DeploymentStatus, DeploymentTarget, DeploymentUpdate, NewDeployment, NewDeploymentLog,
};

use super::{DeploymentStore, StoreData};

/// Store persisted to a single JSON document.
///
/// Every mutation is applied to a copy, written atomically, then committed.
pub struct FileStore {
    file: File,
    data: Mutex<StoreData>,
}

impl FileStore {
    /// Open a store, starting empty when the file does not exist yet
    pub async fn open(file: File) -> Result<Self, ControllerError> {
        let data = if file.exists().await {
            let data: StoreData = file.read_json().await?;
            info!("Loaded deployment store from {:?}", file.path());
            data
        } else {
            info!("Creating deployment store at {:?}", file.path());
            StoreData::default()
        };

        Ok(Self {
            file,
            data: Mutex::new(data),
        })
    }

    async fn mutate<T>(
        &self,
        f: impl FnOnce(&mut StoreData) -> Result<T, ControllerError>,
    ) -> Result<T, ControllerError> {
        let mut data = self.data.lock().await;
        let mut next = data.clone();
        let out = f(&mut next)?;

        let contents = serde_json::to_vec_pretty(&next)?;
        self.file.write_atomic(&contents).await?;
        debug!("Persisted deployment store ({} bytes)", contents.len());

        *data = next;
        Ok(out)
    }
}

#[async_trait]
impl DeploymentStore for FileStore {
    async fn load(&self, id: DeploymentId) -> Result<Option<DeploymentRecord>, ControllerError> {
        self.data.lock().await.load(id)
    }

    async fn create(
        &self,
        new: NewDeployment,
        status: DeploymentStatus,
    ) -> Result<Deployment, ControllerError> {
        self.mutate(|data| data.create(new, status)).await
    }

    async fn update(
        &self,
        id: DeploymentId,
        update: DeploymentUpdate,
    ) -> Result<Deployment, ControllerError> {
        self.mutate(|data| data.update(id, update)).await
    }

    async fn append_log(&self, entry: NewDeploymentLog) -> Result<DeploymentLog, ControllerError> {
        self.mutate(|data| Ok(data.append_log(entry))).await
    }

    async fn list_logs(&self, id: DeploymentId) -> Result<Vec<DeploymentLog>, ControllerError> {
        Ok(self.data.lock().await.list_logs(id))
    }

    async fn put_image(&self, image: DeploymentImage) -> Result<(), ControllerError> {
        self.mutate(|data| {
            data.put_image(image);
            Ok(())
        })
        .await
    }

    async fn put_target(&self, target: DeploymentTarget) -> Result<(), ControllerError> {
        self.mutate(|data| {
            data.put_target(target);
            Ok(())
        })
        .await
    }
}
