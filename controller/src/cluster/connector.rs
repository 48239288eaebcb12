//! Cluster credential resolution
//!
//! A kubeconfig file wins over the ambient in-cluster service account, which
//! wins over the per-target token.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::Config;
use tracing::{debug, info};

use crate::cluster::kubernetes::{KubeClient, KubeClientOptions};
use crate::cluster::{ClusterApi, ClusterError};
use crate::errors::ControllerError;
use crate::filesys::file::File;
use crate::models::deployment::DeploymentTarget;

/// Produces a cluster client for a deployment target
#[async_trait]
pub trait ClusterConnector: Send + Sync {
    async fn connect(
        &self,
        target: &DeploymentTarget,
    ) -> Result<Arc<dyn ClusterApi>, ControllerError>;
}

/// Options for [`KubeConnector`]
#[derive(Debug, Clone)]
pub struct KubeConnectorOptions {
    pub request_timeout: Duration,

    /// Use kubeconfig credentials when the file exists
    pub use_kubeconfig: bool,

    /// Kubeconfig file; defaults to `$KUBECONFIG`, then `~/.kube/config`
    pub kubeconfig_path: Option<PathBuf>,

    /// Look for the in-cluster service account before using target tokens
    pub detect_in_cluster: bool,

    /// Verify TLS certificates of per-target API endpoints
    pub verify_target_tls: bool,
}

impl Default for KubeConnectorOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            use_kubeconfig: true,
            kubeconfig_path: None,
            detect_in_cluster: true,
            verify_target_tls: true,
        }
    }
}

/// Default kubeconfig location
pub fn default_kubeconfig_path() -> Option<PathBuf> {
    if let Some(paths) = std::env::var_os("KUBECONFIG") {
        if let Some(first) = std::env::split_paths(&paths).find(|p| !p.as_os_str().is_empty()) {
            return Some(first);
        }
    }
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".kube").join("config"))
}

/// Connects to Kubernetes API servers
pub struct KubeConnector {
    options: KubeConnectorOptions,
}

impl KubeConnector {
    pub fn new(options: KubeConnectorOptions) -> Self {
        Self { options }
    }

    fn client_options(&self, accept_invalid_certs: bool) -> KubeClientOptions {
        KubeClientOptions {
            request_timeout: self.options.request_timeout,
            accept_invalid_certs,
        }
    }

    async fn from_kubeconfig(&self) -> Result<Option<KubeClient>, ControllerError> {
        if !self.options.use_kubeconfig {
            return Ok(None);
        }
        let path = match self.options.kubeconfig_path.clone().or_else(default_kubeconfig_path) {
            Some(path) => path,
            None => return Ok(None),
        };
        if !File::new(&path).exists().await {
            debug!("No kubeconfig at {:?}", path);
            return Ok(None);
        }

        let kubeconfig = Kubeconfig::read_from(&path).map_err(|e| {
            ClusterError::Config(format!("unable to read kubeconfig {:?}: {}", path, e))
        })?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| {
                ClusterError::Config(format!("unable to load kubeconfig {:?}: {}", path, e))
            })?;
        Ok(Some(KubeClient::from_config(config, &self.client_options(false))?))
    }

    fn in_cluster(&self) -> Result<Option<KubeClient>, ControllerError> {
        if !self.options.detect_in_cluster {
            return Ok(None);
        }
        let host = std::env::var("KUBERNETES_SERVICE_HOST").unwrap_or_default();
        if host.is_empty() {
            return Ok(None);
        }

        match Config::incluster() {
            Ok(config) => Ok(Some(KubeClient::from_config(
                config,
                &self.client_options(false),
            )?)),
            Err(e) => {
                debug!("In-cluster endpoint {} found but unusable: {}", host, e);
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl ClusterConnector for KubeConnector {
    async fn connect(
        &self,
        target: &DeploymentTarget,
    ) -> Result<Arc<dyn ClusterApi>, ControllerError> {
        if let Some(client) = self.from_kubeconfig().await? {
            info!("Using kubeconfig credentials ({})", client.cluster_url());
            return Ok(Arc::new(client));
        }

        if let Some(client) = self.in_cluster()? {
            info!("Using in-cluster credentials ({})", client.cluster_url());
            return Ok(Arc::new(client));
        }

        let token = target
            .auth_token
            .clone()
            .filter(|t| !t.expose().is_empty())
            .ok_or_else(|| ControllerError::CredentialMissing(target.name.clone()))?;

        info!("Using target credentials for {} ({})", target.name, target.url);
        let options = self.client_options(!self.options.verify_target_tls);
        let client = KubeClient::with_token(&target.url, &token, &options)?;
        Ok(Arc::new(client))
    }
}

/// Hands out the same cluster for every target
pub struct StaticConnector {
    cluster: Arc<dyn ClusterApi>,
}

impl StaticConnector {
    pub fn new(cluster: Arc<dyn ClusterApi>) -> Self {
        Self { cluster }
    }
}

#[async_trait]
impl ClusterConnector for StaticConnector {
    async fn connect(
        &self,
        _target: &DeploymentTarget,
    ) -> Result<Arc<dyn ClusterApi>, ControllerError> {
        Ok(self.cluster.clone())
    }
}
