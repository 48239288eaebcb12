//! Settings file management

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::logs::LogLevel;
use crate::models::deployment::AuthToken;

/// Controller settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit logs as JSON lines
    #[serde(default)]
    pub log_json: bool,

    /// Deployment store configuration
    #[serde(default)]
    pub store: StoreSettings,

    /// Model registry the artifact URIs come from
    #[serde(default)]
    pub model_registry: ServiceSettings,

    /// UI relay notified after each job; notifications are skipped when unset
    #[serde(default)]
    pub notifier: Option<ServiceSettings>,

    /// Cluster access configuration
    #[serde(default)]
    pub kubernetes: KubernetesSettings,

    /// Job pool configuration
    #[serde(default)]
    pub jobs: JobSettings,

    /// Reconcile against an in-memory cluster instead of a real one
    #[serde(default)]
    pub dry_run: bool,
}

/// Deployment store settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSettings {
    /// JSON store file; defaults to `deployments.json` in the storage dir
    #[serde(default)]
    pub path: Option<String>,
}

/// An internal HTTP service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSettings {
    #[serde(default = "default_service_url")]
    pub url: String,

    /// Sent as `X-Auth-Token`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<AuthToken>,

    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
}

impl ServiceSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_service_url() -> String {
    "http://localhost:5000".to_string()
}

fn default_http_timeout() -> u64 {
    30
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            url: default_service_url(),
            auth_token: None,
            timeout_secs: default_http_timeout(),
        }
    }
}

/// Kubernetes access settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KubernetesSettings {
    /// Timeout of each API call
    #[serde(default = "default_http_timeout")]
    pub request_timeout_secs: u64,

    /// Use kubeconfig credentials when the file exists
    #[serde(default = "default_true")]
    pub use_kubeconfig: bool,

    /// Kubeconfig file; defaults to `$KUBECONFIG`, then `~/.kube/config`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubeconfig: Option<String>,

    /// Prefer the in-cluster service account when running inside a pod
    #[serde(default = "default_true")]
    pub detect_in_cluster: bool,

    /// Verify TLS certificates of target API endpoints
    #[serde(default = "default_true")]
    pub verify_target_tls: bool,
}

fn default_true() -> bool {
    true
}

impl Default for KubernetesSettings {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_http_timeout(),
            use_kubeconfig: true,
            kubeconfig: None,
            detect_in_cluster: true,
            verify_target_tls: true,
        }
    }
}

/// Job pool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSettings {
    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Seconds a queued job may wait for a worker
    #[serde(default = "default_start_timeout")]
    pub start_timeout_secs: u64,

    /// Seconds a finished job's result stays pollable
    #[serde(default = "default_result_ttl")]
    pub result_ttl_secs: u64,

    #[serde(default = "default_janitor_interval")]
    pub janitor_interval_secs: u64,
}

fn default_workers() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    256
}

fn default_start_timeout() -> u64 {
    60
}

fn default_result_ttl() -> u64 {
    3600
}

fn default_janitor_interval() -> u64 {
    60
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            start_timeout_secs: default_start_timeout(),
            result_ttl_secs: default_result_ttl(),
            janitor_interval_secs: default_janitor_interval(),
        }
    }
}
