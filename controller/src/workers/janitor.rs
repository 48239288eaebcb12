//! Job result janitor

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::{debug, info};

use crate::workers::queue::JobRegistry;

/// Janitor worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Sweep interval
    pub interval: Duration,

    /// How long finished job results stay pollable
    pub result_ttl: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            result_ttl: Duration::from_secs(3600),
        }
    }
}

/// Run the janitor worker
pub async fn run<S, F>(
    options: &Options,
    registry: &JobRegistry,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Janitor worker starting...");

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Janitor worker shutting down...");
                return;
            }
            _ = sleep_fn(options.interval) => {}
        }

        let purged = registry.purge(options.result_ttl);
        debug!("Janitor sweep done, {} results purged, {} jobs tracked", purged, registry.len());
    }
}
