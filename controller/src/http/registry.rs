//! Model registry client
//!
//! Resolves a model id to the URI of its stored artifact.

use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::errors::ControllerError;
use crate::http::client::HttpClient;

/// Location of a model artifact, kept exactly as the registry reported it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactUri {
    raw: String,
    parsed: Url,
}

impl ArtifactUri {
    pub fn parse(raw: impl Into<String>) -> Result<Self, url::ParseError> {
        let raw = raw.into();
        let parsed = Url::parse(&raw)?;
        Ok(Self { raw, parsed })
    }

    /// The URI as received, without normalization
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn scheme(&self) -> &str {
        self.parsed.scheme()
    }
}

impl fmt::Display for ArtifactUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Looks up where a model's artifact lives
#[async_trait]
pub trait ModelRegistry: Send + Sync {
    async fn resolve_artifact_uri(&self, model_id: i64) -> Result<ArtifactUri, ControllerError>;
}

#[derive(Debug, Deserialize)]
struct ModelInfo {
    path: String,
    storage: StorageInfo,
}

#[derive(Debug, Deserialize)]
struct StorageInfo {
    url: String,
}

/// Registry reached over HTTP
pub struct HttpModelRegistry {
    client: HttpClient,
}

impl HttpModelRegistry {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ModelRegistry for HttpModelRegistry {
    async fn resolve_artifact_uri(&self, model_id: i64) -> Result<ArtifactUri, ControllerError> {
        let model: ModelInfo = self.client.get(&format!("/models/{}", model_id)).await?;

        // the artifact path is relative to its storage root
        let raw = format!("{}{}", model.storage.url, model.path);
        debug!("Model {} resolved to {}", model_id, raw);
        ArtifactUri::parse(raw.as_str()).map_err(|e| {
            ControllerError::RegistryError(format!("invalid artifact URI {}: {}", raw, e))
        })
    }
}

/// Fixed model table, used by dry runs and tests
#[derive(Debug, Default)]
pub struct StaticModelRegistry {
    models: RwLock<HashMap<i64, ArtifactUri>>,
}

impl StaticModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(self, model_id: i64, uri: ArtifactUri) -> Self {
        self.insert(model_id, uri);
        self
    }

    pub fn insert(&self, model_id: i64, uri: ArtifactUri) {
        let mut models = self.models.write().unwrap_or_else(|e| e.into_inner());
        models.insert(model_id, uri);
    }
}

#[async_trait]
impl ModelRegistry for StaticModelRegistry {
    async fn resolve_artifact_uri(&self, model_id: i64) -> Result<ArtifactUri, ControllerError> {
        let models = self.models.read().unwrap_or_else(|e| e.into_inner());
        models
            .get(&model_id)
            .cloned()
            .ok_or_else(|| ControllerError::RegistryError(format!("model {} not found", model_id)))
    }
}
