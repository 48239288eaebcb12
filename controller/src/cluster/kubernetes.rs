//! Kubernetes API client

use std::time::Duration;

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, Config, ResourceExt};
use secrecy::SecretString;
use tracing::{debug, error};

use crate::cluster::resources::{ServiceResource, WorkloadResource};
use crate::cluster::{ClusterApi, ClusterError, ServiceSummary};
use crate::models::deployment::AuthToken;

/// Namespaces skipped when scanning services for used ports
pub const SERVICE_SCOPE_SELECTOR: &str =
    "metadata.namespace!=kube-system,metadata.namespace!=default";

const WORKLOAD_KIND: &str = "deployment";
const SERVICE_KIND: &str = "service";

/// Options for building a [`KubeClient`]
#[derive(Debug, Clone)]
pub struct KubeClientOptions {
    /// Per-request timeout
    pub request_timeout: Duration,

    /// Skip TLS verification of the API server certificate
    pub accept_invalid_certs: bool,
}

impl Default for KubeClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            accept_invalid_certs: false,
        }
    }
}

/// Client for the `apps/v1` and `v1` Kubernetes APIs
pub struct KubeClient {
    client: Client,
    cluster_url: String,
}

impl KubeClient {
    /// Create a client from a resolved kube configuration
    pub fn from_config(
        mut config: Config,
        options: &KubeClientOptions,
    ) -> Result<Self, ClusterError> {
        config.read_timeout = Some(options.request_timeout);
        config.write_timeout = Some(options.request_timeout);
        if options.accept_invalid_certs {
            config.accept_invalid_certs = true;
        }

        // both reqwest and kube link rustls; pin the process provider
        let _ = rustls::crypto::ring::default_provider().install_default();

        let cluster_url = config.cluster_url.to_string();
        let client = Client::try_from(config).map_err(ClusterError::Client)?;
        Ok(Self {
            client,
            cluster_url,
        })
    }

    /// Create a client for an API server reached with a bearer token
    pub fn with_token(
        base_url: &str,
        token: &AuthToken,
        options: &KubeClientOptions,
    ) -> Result<Self, ClusterError> {
        let cluster_url = base_url.parse().map_err(|e| {
            ClusterError::Config(format!("invalid API server URL {}: {}", base_url, e))
        })?;
        let mut config = Config::new(cluster_url);
        config.auth_info.token = Some(SecretString::from(token.expose().to_string()));
        Self::from_config(config, options)
    }

    /// Get the API server URL
    pub fn cluster_url(&self) -> &str {
        &self.cluster_url
    }

    fn workloads(&self, namespace: &str) -> Api<WorkloadResource> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn services(&self, namespace: &str) -> Api<ServiceResource> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ClusterApi for KubeClient {
    async fn list_workloads(&self, namespace: &str) -> Result<Vec<String>, ClusterError> {
        debug!("Listing workloads in {}", namespace);
        let list = self
            .workloads(namespace)
            .list(&ListParams::default())
            .await
            .map_err(|e| classify(e, WORKLOAD_KIND, namespace))?;

        Ok(list.items.iter().map(|item| item.name_any()).collect())
    }

    async fn create_workload(
        &self,
        namespace: &str,
        workload: &WorkloadResource,
    ) -> Result<(), ClusterError> {
        let name = workload.name_any();
        self.workloads(namespace)
            .create(&PostParams::default(), workload)
            .await
            .map_err(|e| classify(e, WORKLOAD_KIND, &name))?;
        Ok(())
    }

    async fn patch_workload(
        &self,
        namespace: &str,
        workload: &WorkloadResource,
    ) -> Result<(), ClusterError> {
        let name = workload.name_any();
        self.workloads(namespace)
            .patch(&name, &PatchParams::default(), &Patch::Strategic(workload))
            .await
            .map_err(|e| classify(e, WORKLOAD_KIND, &name))?;
        Ok(())
    }

    async fn delete_workload(
        &self,
        namespace: &str,
        name: &str,
        params: &DeleteParams,
    ) -> Result<(), ClusterError> {
        self.workloads(namespace)
            .delete(name, params)
            .await
            .map_err(|e| classify(e, WORKLOAD_KIND, name))?;
        Ok(())
    }

    async fn list_services(&self) -> Result<Vec<ServiceSummary>, ClusterError> {
        let api: Api<ServiceResource> = Api::all(self.client.clone());
        let list = api
            .list(&ListParams::default().fields(SERVICE_SCOPE_SELECTOR))
            .await
            .map_err(|e| classify(e, SERVICE_KIND, ""))?;

        Ok(list.items.iter().map(ServiceSummary::from_service).collect())
    }

    async fn create_service(
        &self,
        namespace: &str,
        service: &ServiceResource,
    ) -> Result<(), ClusterError> {
        let name = service.name_any();
        self.services(namespace)
            .create(&PostParams::default(), service)
            .await
            .map_err(|e| classify(e, SERVICE_KIND, &name))?;
        Ok(())
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        self.services(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| classify(e, SERVICE_KIND, name))?;
        Ok(())
    }
}

/// Map a failed call onto the error kinds the controller tells apart
pub fn classify(err: kube::Error, kind: &str, name: &str) -> ClusterError {
    match err {
        kube::Error::Api(response) => {
            error!(
                "Kubernetes API call failed: {} - {}",
                response.code, response.message
            );
            match response.code {
                404 => ClusterError::NotFound {
                    kind: kind.to_string(),
                    name: name.to_string(),
                },
                409 => ClusterError::Conflict {
                    kind: kind.to_string(),
                    name: name.to_string(),
                },
                status => ClusterError::Api {
                    status,
                    message: response.message,
                },
            }
        }
        other => {
            error!("Kubernetes request failed: {}", other);
            ClusterError::Client(other)
        }
    }
}
