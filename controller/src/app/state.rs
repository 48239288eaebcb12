//! Application state management

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::app::options::AppOptions;
use crate::cluster::connector::{ClusterConnector, KubeConnector, StaticConnector};
use crate::cluster::memory::MemoryCluster;
use crate::deploy::controller::DeploymentController;
use crate::deploy::executor::JobExecutor;
use crate::deploy::reconciler::Reconciler;
use crate::errors::ControllerError;
use crate::filesys::file::File;
use crate::http::client::HttpClient;
use crate::http::notifier::{HttpNotifier, NoopNotifier, Notifier};
use crate::http::registry::{HttpModelRegistry, ModelRegistry};
use crate::i18n::{Catalog, MessageFormatter};
use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;
use crate::store::{DeploymentStore, FileStore};
use crate::workers::queue::{JobQueue, JobRegistry, QueuedJob};

/// Collaborators a controller is assembled from
pub struct Components {
    pub store: Arc<dyn DeploymentStore>,
    pub registry: Arc<dyn ModelRegistry>,
    pub connector: Arc<dyn ClusterConnector>,
    pub notifier: Arc<dyn Notifier>,
    pub formatter: Arc<dyn MessageFormatter>,
}

/// Main application state
pub struct AppState {
    /// Deployment store
    pub store: Arc<dyn DeploymentStore>,

    /// Job runner shared by the workers
    pub executor: Arc<JobExecutor>,

    /// Every job queued by this process
    pub jobs: Arc<JobRegistry>,

    /// Request-side operations
    pub controller: Arc<DeploymentController>,
}

impl AppState {
    /// Initialize application state from the settings file
    pub async fn init(
        settings: &Settings,
        layout: &StorageLayout,
        options: &AppOptions,
    ) -> Result<(Self, mpsc::Receiver<QueuedJob>), ControllerError> {
        info!("Initializing application state...");

        let store_file = match &settings.store.path {
            Some(path) => File::new(path),
            None => layout.store_file(),
        };
        let store: Arc<dyn DeploymentStore> = Arc::new(FileStore::open(store_file).await?);

        let registry_settings = &settings.model_registry;
        let registry: Arc<dyn ModelRegistry> = Arc::new(HttpModelRegistry::new(HttpClient::new(
            &registry_settings.url,
            registry_settings.auth_token.clone(),
            registry_settings.timeout(),
        )?));

        let notifier: Arc<dyn Notifier> = match &settings.notifier {
            Some(notifier) => Arc::new(HttpNotifier::new(HttpClient::new(
                &notifier.url,
                notifier.auth_token.clone(),
                notifier.timeout(),
            )?)),
            None => {
                info!("No notifier configured, UI refreshes disabled");
                Arc::new(NoopNotifier)
            }
        };

        let connector: Arc<dyn ClusterConnector> = if settings.dry_run {
            warn!("Dry run: reconciling against an in-memory cluster");
            Arc::new(StaticConnector::new(Arc::new(MemoryCluster::new())))
        } else {
            Arc::new(KubeConnector::new(options.kubernetes.clone()))
        };

        let components = Components {
            store,
            registry,
            connector,
            notifier,
            formatter: Arc::new(Catalog::builtin()),
        };
        Ok(Self::assemble(components, options))
    }

    /// Wire the controller, executor and job queue together
    pub fn assemble(
        components: Components,
        options: &AppOptions,
    ) -> (Self, mpsc::Receiver<QueuedJob>) {
        let jobs = Arc::new(JobRegistry::new());
        let (queue, rx) = JobQueue::new(options.queue_capacity, jobs.clone());

        let executor = Arc::new(JobExecutor::new(
            components.store.clone(),
            components.connector,
            Reconciler::new(components.registry),
            components.notifier,
            components.formatter,
        ));
        let controller = Arc::new(DeploymentController::new(
            components.store.clone(),
            queue,
        ));

        let state = Self {
            store: components.store,
            executor,
            jobs,
            controller,
        };
        (state, rx)
    }
}
