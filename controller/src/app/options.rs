//! Application configuration options

use std::path::PathBuf;
use std::time::Duration;

use crate::cluster::connector::KubeConnectorOptions;
use crate::storage::settings::Settings;
use crate::workers::{janitor, pool};

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Capacity of the job queue
    pub queue_capacity: usize,

    /// Worker pool options
    pub pool: pool::Options,

    /// Janitor worker options
    pub janitor: janitor::Options,

    /// Cluster connection options
    pub kubernetes: KubeConnectorOptions,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            queue_capacity: 256,
            pool: pool::Options::default(),
            janitor: janitor::Options::default(),
            kubernetes: KubeConnectorOptions::default(),
        }
    }
}

impl AppOptions {
    /// Derive runtime options from the settings file
    pub fn from_settings(settings: &Settings) -> Self {
        let jobs = &settings.jobs;
        Self {
            queue_capacity: jobs.queue_capacity,
            pool: pool::Options {
                workers: jobs.workers,
                start_timeout: Duration::from_secs(jobs.start_timeout_secs),
            },
            janitor: janitor::Options {
                interval: Duration::from_secs(jobs.janitor_interval_secs),
                result_ttl: Duration::from_secs(jobs.result_ttl_secs),
            },
            kubernetes: KubeConnectorOptions {
                request_timeout: Duration::from_secs(settings.kubernetes.request_timeout_secs),
                use_kubeconfig: settings.kubernetes.use_kubeconfig,
                kubeconfig_path: settings.kubernetes.kubeconfig.as_ref().map(PathBuf::from),
                detect_in_cluster: settings.kubernetes.detect_in_cluster,
                verify_target_tls: settings.kubernetes.verify_target_tls,
            },
            ..Default::default()
        }
    }
}

/// Lifecycle options for the controller
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}
