//! Deployment models

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Deployment identifier as assigned by the store
pub type DeploymentId = i64;

/// Kubernetes limits resource names to 63 characters (RFC 1123)
pub const MAX_INTERNAL_NAME_LEN: usize = 63;

/// Status of a deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentStatus {
    Editing,
    Saved,
    Pending,
    Deployed,
    DeployedOld,
    PendingUndeploy,
    Suspended,
    Running,
    Stopped,
    Error,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Editing => "EDITING",
            DeploymentStatus::Saved => "SAVED",
            DeploymentStatus::Pending => "PENDING",
            DeploymentStatus::Deployed => "DEPLOYED",
            DeploymentStatus::DeployedOld => "DEPLOYED_OLD",
            DeploymentStatus::PendingUndeploy => "PENDING_UNDEPLOY",
            DeploymentStatus::Suspended => "SUSPENDED",
            DeploymentStatus::Running => "RUNNING",
            DeploymentStatus::Stopped => "STOPPED",
            DeploymentStatus::Error => "ERROR",
        }
    }

    /// Whether the cluster is expected to hold resources for this deployment
    pub fn is_deployed(&self) -> bool {
        matches!(
            self,
            DeploymentStatus::Deployed
                | DeploymentStatus::DeployedOld
                | DeploymentStatus::PendingUndeploy
        )
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Orchestrator behind a deployment target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TargetKind {
    Docker,
    Kubernetes,
    Marathon,
    Supervisor,
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TargetKind::Docker => "DOCKER",
            TargetKind::Kubernetes => "KUBERNETES",
            TargetKind::Marathon => "MARATHON",
            TargetKind::Supervisor => "SUPERVISOR",
        };
        f.write_str(s)
    }
}

/// Bearer/auth token that never shows up in `Debug` output
#[derive(Clone)]
pub struct AuthToken(Arc<SecretString>);

impl AuthToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Arc::new(SecretString::from(token.into())))
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthToken([REDACTED])")
    }
}

impl Serialize for AuthToken {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.expose())
    }
}

impl<'de> Deserialize<'de> for AuthToken {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(AuthToken::new(s))
    }
}

/// Container image a deployment runs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentImage {
    pub id: i64,

    /// Repository name, e.g. `eubrabigsea/mleap-serving`
    pub name: String,

    pub tag: String,

    #[serde(default)]
    pub description: String,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl DeploymentImage {
    /// Image reference in `name:tag` form
    pub fn reference(&self) -> String {
        format!("{}:{}", self.name, self.tag)
    }
}

/// Where a deployment is reconciled
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentTarget {
    pub id: i64,

    pub name: String,

    /// Cluster namespace the workload and service live in
    pub namespace: String,

    /// Orchestrator API endpoint
    pub url: String,

    /// Base URL under which deployed services are published
    pub base_service_url: String,

    #[serde(rename = "target_type")]
    pub kind: TargetKind,

    /// Bearer token for the orchestrator API
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<AuthToken>,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

/// A user's declared intent to run a packaged model as a network service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    pub id: DeploymentId,

    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Bumped when a deployed record is redeployed
    pub version: i32,

    /// Join key for the cluster resources; stable once set
    #[serde(default)]
    pub internal_name: Option<String>,

    pub current_status: DeploymentStatus,

    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub model_id: Option<i64>,

    #[serde(default)]
    pub model_name: String,

    pub user_id: i64,

    #[serde(default)]
    pub user_login: String,

    #[serde(default)]
    pub user_name: String,

    pub replicas: u32,

    pub request_memory: String,

    #[serde(default)]
    pub limit_memory: Option<String>,

    #[serde(default)]
    pub request_cpu: Option<String>,

    #[serde(default)]
    pub limit_cpu: Option<String>,

    #[serde(default)]
    pub base_service_url: Option<String>,

    /// Externally allocated node port
    #[serde(default)]
    pub port: Option<u16>,

    /// Handle of the last job queued for this deployment
    #[serde(default)]
    pub execution_id: Option<String>,

    pub image_id: i64,

    pub target_id: i64,

    pub created: DateTime<Utc>,

    pub updated: DateTime<Utc>,
}

impl Deployment {
    /// The stored internal name, or the derived one when none was stored yet
    pub fn resolved_internal_name(&self) -> String {
        match self.internal_name.as_deref() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => internal_name(self.id, &self.name),
        }
    }
}

/// Fields supplied when a deployment is created
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDeployment {
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub model_id: Option<i64>,

    #[serde(default)]
    pub model_name: String,

    pub user_id: i64,

    #[serde(default)]
    pub user_login: String,

    #[serde(default)]
    pub user_name: String,

    #[serde(default = "default_replicas")]
    pub replicas: u32,

    #[serde(default = "default_request_memory")]
    pub request_memory: String,

    #[serde(default)]
    pub limit_memory: Option<String>,

    #[serde(default = "default_request_cpu")]
    pub request_cpu: Option<String>,

    #[serde(default = "default_limit_cpu")]
    pub limit_cpu: Option<String>,

    pub image_id: i64,

    pub target_id: i64,
}

fn default_replicas() -> u32 {
    1
}

fn default_request_memory() -> String {
    "128M".to_string()
}

fn default_request_cpu() -> Option<String> {
    Some("500m".to_string())
}

fn default_limit_cpu() -> Option<String> {
    Some("1000m".to_string())
}

/// User-facing partial update of a deployment
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeploymentPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub model_id: Option<i64>,
    pub model_name: Option<String>,
    pub replicas: Option<u32>,
    pub request_memory: Option<String>,
    pub limit_memory: Option<String>,
    pub request_cpu: Option<String>,
    pub limit_cpu: Option<String>,
    pub image_id: Option<i64>,
    pub target_id: Option<i64>,

    /// Only honored when the stored name is empty
    pub internal_name: Option<String>,

    /// `Some(None)` clears the allocated port so the next deploy picks a new one
    #[serde(default, with = "double_option")]
    pub port: Option<Option<u16>>,
}

impl DeploymentPatch {
    /// Merge the patch into a deployment
    pub fn apply(self, deployment: &mut Deployment) {
        if let Some(v) = self.name {
            deployment.name = v;
        }
        if let Some(v) = self.description {
            deployment.description = Some(v);
        }
        if let Some(v) = self.model_id {
            deployment.model_id = Some(v);
        }
        if let Some(v) = self.model_name {
            deployment.model_name = v;
        }
        if let Some(v) = self.replicas {
            deployment.replicas = v;
        }
        if let Some(v) = self.request_memory {
            deployment.request_memory = v;
        }
        if let Some(v) = self.limit_memory {
            deployment.limit_memory = Some(v);
        }
        if let Some(v) = self.request_cpu {
            deployment.request_cpu = Some(v);
        }
        if let Some(v) = self.limit_cpu {
            deployment.limit_cpu = Some(v);
        }
        if let Some(v) = self.image_id {
            deployment.image_id = v;
        }
        if let Some(v) = self.target_id {
            deployment.target_id = v;
        }
        if let Some(port) = self.port {
            deployment.port = port;
        }

        let has_name = deployment
            .internal_name
            .as_deref()
            .is_some_and(|n| !n.is_empty());
        if !has_name {
            deployment.internal_name = Some(
                self.internal_name
                    .filter(|n| !n.is_empty())
                    .unwrap_or_else(|| internal_name(deployment.id, &deployment.name)),
            );
        }
    }
}

/// Controller-side merge update; `None` leaves a field untouched
#[derive(Debug, Clone, Default)]
pub struct DeploymentUpdate {
    pub current_status: Option<DeploymentStatus>,
    pub port: Option<Option<u16>>,
    pub internal_name: Option<String>,
    pub execution_id: Option<String>,
    pub enabled: Option<bool>,
    pub base_service_url: Option<String>,
    pub version: Option<i32>,

    /// User edits, merged before the fields above
    pub patch: Option<DeploymentPatch>,
}

impl DeploymentUpdate {
    pub fn status(status: DeploymentStatus) -> Self {
        Self {
            current_status: Some(status),
            ..Default::default()
        }
    }

    pub fn apply(self, deployment: &mut Deployment) {
        if let Some(patch) = self.patch {
            patch.apply(deployment);
        }
        if let Some(v) = self.current_status {
            deployment.current_status = v;
        }
        if let Some(v) = self.port {
            deployment.port = v;
        }
        if let Some(v) = self.internal_name {
            deployment.internal_name = Some(v);
        }
        if let Some(v) = self.execution_id {
            deployment.execution_id = Some(v);
        }
        if let Some(v) = self.enabled {
            deployment.enabled = v;
        }
        if let Some(v) = self.base_service_url {
            deployment.base_service_url = Some(v);
        }
        if let Some(v) = self.version {
            deployment.version = v;
        }
        deployment.updated = Utc::now();
    }
}

/// A deployment joined with its image and target
#[derive(Debug, Clone)]
pub struct DeploymentRecord {
    pub deployment: Deployment,
    pub image: DeploymentImage,
    pub target: DeploymentTarget,
}

/// Immutable audit entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentLog {
    pub id: i64,
    pub date: DateTime<Utc>,
    pub status: DeploymentStatus,
    pub deployment_id: DeploymentId,
    pub log: String,
}

/// Log entry to append
#[derive(Debug, Clone)]
pub struct NewDeploymentLog {
    pub deployment_id: DeploymentId,
    pub status: DeploymentStatus,
    pub message: String,
}

/// Derive the DNS-subdomain-safe name used for cluster resources.
///
/// Strips every run of digits that ends in a character outside
/// `[A-Za-z0-9-]` (together with that character), then truncates to 63.
pub fn internal_name(id: DeploymentId, name: &str) -> String {
    let lowered = name.to_lowercase();
    let mut cleaned = String::with_capacity(lowered.len());
    let mut digits = String::new();

    for c in lowered.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
        } else if c.is_ascii_alphanumeric() || c == '-' {
            cleaned.push_str(&digits);
            digits.clear();
            cleaned.push(c);
        } else {
            digits.clear();
        }
    }
    cleaned.push_str(&digits);

    let mut full = format!("d-{}-{}", id, cleaned);
    full.truncate(MAX_INTERNAL_NAME_LEN);
    full
}

/// Name of the service paired with a workload: the leading `d` becomes `s`
pub fn service_name(internal_name: &str) -> String {
    let rest = internal_name.get(1..).unwrap_or_default();
    format!("s{}", rest)
}

mod double_option {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S, T>(value: &Option<Option<T>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: Serialize,
    {
        match value {
            Some(inner) => inner.serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de>,
    {
        Option::<T>::deserialize(deserializer).map(Some)
    }
}
