//! Main application run loop

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::app::options::{AppOptions, LifecycleOptions};
use crate::app::state::AppState;
use crate::errors::ControllerError;
use crate::workers::pool::JobRunner;
use crate::workers::queue::QueuedJob;
use crate::workers::{janitor, pool};

/// Run the controller until the shutdown signal fires
pub async fn run(
    options: AppOptions,
    state: Arc<AppState>,
    jobs: mpsc::Receiver<QueuedJob>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), ControllerError> {
    let mut runtime = start(&options, state, jobs)?;

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");

    runtime.shutdown().await
}

/// Background workers of a running controller
pub struct Runtime {
    shutdown_manager: ShutdownManager,
}

impl Runtime {
    /// Stop accepting work, then wait for running jobs to finish
    pub async fn shutdown(&mut self) -> Result<(), ControllerError> {
        self.shutdown_manager.shutdown().await
    }
}

/// Spawn the worker pool and the janitor
pub fn start(
    options: &AppOptions,
    state: Arc<AppState>,
    jobs: mpsc::Receiver<QueuedJob>,
) -> Result<Runtime, ControllerError> {
    info!("Starting seed controller...");

    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager =
        ShutdownManager::new(shutdown_tx.clone(), options.lifecycle.clone());

    init_worker_pool(
        options.pool.clone(),
        state.clone(),
        jobs,
        &mut shutdown_manager,
        shutdown_tx.subscribe(),
    )?;

    init_janitor_worker(
        options.janitor.clone(),
        state,
        &mut shutdown_manager,
        shutdown_tx.subscribe(),
    )?;

    Ok(Runtime { shutdown_manager })
}

// =============================== INITIALIZATION ================================== //

fn init_worker_pool(
    options: pool::Options,
    state: Arc<AppState>,
    jobs: mpsc::Receiver<QueuedJob>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), ControllerError> {
    info!("Initializing worker pool...");

    let runner: Arc<dyn JobRunner> = state.executor.clone();
    let registry = state.jobs.clone();

    let pool_handle = tokio::spawn(async move {
        pool::run(
            &options,
            jobs,
            runner,
            registry,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_pool_handle(pool_handle)
}

fn init_janitor_worker(
    options: janitor::Options,
    state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), ControllerError> {
    info!("Initializing janitor worker...");

    let registry = state.jobs.clone();

    let janitor_handle = tokio::spawn(async move {
        janitor::run(
            &options,
            registry.as_ref(),
            tokio::time::sleep,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_janitor_handle(janitor_handle)
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    lifecycle_options: LifecycleOptions,
    pool_handle: Option<JoinHandle<()>>,
    janitor_handle: Option<JoinHandle<()>>,
}

impl ShutdownManager {
    fn new(shutdown_tx: broadcast::Sender<()>, lifecycle_options: LifecycleOptions) -> Self {
        Self {
            shutdown_tx,
            lifecycle_options,
            pool_handle: None,
            janitor_handle: None,
        }
    }

    fn with_pool_handle(&mut self, handle: JoinHandle<()>) -> Result<(), ControllerError> {
        if self.pool_handle.is_some() {
            return Err(ControllerError::ShutdownError(
                "pool_handle already set".to_string(),
            ));
        }
        self.pool_handle = Some(handle);
        Ok(())
    }

    fn with_janitor_handle(&mut self, handle: JoinHandle<()>) -> Result<(), ControllerError> {
        if self.janitor_handle.is_some() {
            return Err(ControllerError::ShutdownError(
                "janitor_handle already set".to_string(),
            ));
        }
        self.janitor_handle = Some(handle);
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), ControllerError> {
        let _ = self.shutdown_tx.send(());

        match tokio::time::timeout(
            self.lifecycle_options.max_shutdown_delay,
            self.shutdown_impl(),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                error!(
                    "Shutdown timed out after {:?}, abandoning running jobs",
                    self.lifecycle_options.max_shutdown_delay
                );
                Err(ControllerError::ShutdownError(format!(
                    "timed out after {:?}",
                    self.lifecycle_options.max_shutdown_delay
                )))
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), ControllerError> {
        info!("Shutting down seed controller...");

        // 1. Janitor
        if let Some(handle) = self.janitor_handle.take() {
            handle
                .await
                .map_err(|e| ControllerError::ShutdownError(e.to_string()))?;
        }

        // 2. Worker pool, which drains running jobs
        if let Some(handle) = self.pool_handle.take() {
            handle
                .await
                .map_err(|e| ControllerError::ShutdownError(e.to_string()))?;
        }

        info!("Shutdown complete");
        Ok(())
    }
}
