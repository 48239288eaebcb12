//! Seed Controller - Entry Point
//!
//! Runs the deployment job pool, or performs a single operation on a
//! deployment and waits for the job it queues.

use std::collections::HashMap;
use std::env;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use tracing::{error, info};

use seed_controller::app::options::AppOptions;
use seed_controller::app::run::{run, start};
use seed_controller::app::state::AppState;
use seed_controller::deploy::controller::{Accepted, RequestContext};
use seed_controller::filesys::file::File;
use seed_controller::i18n::DEFAULT_LOCALE;
use seed_controller::logs::{init_logging, LogOptions};
use seed_controller::models::deployment::{
    DeploymentId, DeploymentImage, DeploymentPatch, DeploymentTarget, NewDeployment,
};
use seed_controller::storage::layout::StorageLayout;
use seed_controller::storage::settings::Settings;
use seed_controller::utils::version_info;

const USAGE: &str = "usage: seedctl [--settings=<file>] [--locale=<locale>] [--user=<id>] \
[--image=<file> | --target=<file> | --create=<file> [--now] | --deploy=<id> | \
--undeploy=<id> | --disable=<id> | --logs=<id>]";

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version_info()) {
            Ok(json) => println!("{json}"),
            Err(e) => eprintln!("Failed to render version: {e}"),
        }
        return;
    }

    if cli_args.contains_key("help") {
        println!("{USAGE}");
        return;
    }

    // Retrieve the settings file
    let layout = StorageLayout::default();
    let settings = match load_settings(&layout, cli_args.get("settings")).await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Unable to read settings file: {e:#}");
            std::process::exit(2);
        }
    };

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        json_format: settings.log_json,
    };
    if let Err(e) = init_logging(log_options) {
        println!("Failed to initialize logging: {e}");
    }

    if let Err(e) = dispatch(&cli_args, &settings, &layout).await {
        error!("{e:#}");
        std::process::exit(1);
    }
}

async fn load_settings(
    layout: &StorageLayout,
    path: Option<&String>,
) -> anyhow::Result<Settings> {
    let file = match path {
        Some(path) => File::new(path),
        None => layout.settings_file(),
    };

    if !file.exists().await {
        if path.is_some() {
            bail!("{} does not exist", file.path().display());
        }
        return Ok(Settings::default());
    }

    file.read_json::<Settings>()
        .await
        .with_context(|| format!("parsing {}", file.path().display()))
}

async fn dispatch(
    cli_args: &HashMap<String, String>,
    settings: &Settings,
    layout: &StorageLayout,
) -> anyhow::Result<()> {
    let options = AppOptions::from_settings(settings);
    let (state, jobs) = AppState::init(settings, layout, &options).await?;
    let state = Arc::new(state);

    let ctx = RequestContext::new(
        cli_args
            .get("locale")
            .cloned()
            .unwrap_or_else(|| DEFAULT_LOCALE.to_string()),
        match cli_args.get("user") {
            Some(user) => user.parse().context("--user must be a number")?,
            None => 0,
        },
    );

    if let Some(path) = cli_args.get("image") {
        let image: DeploymentImage = File::new(path).read_json().await?;
        info!("Registering image {} ({})", image.id, image.reference());
        state.store.put_image(image).await?;
        return Ok(());
    }

    if let Some(path) = cli_args.get("target") {
        let target: DeploymentTarget = File::new(path).read_json().await?;
        info!("Registering target {} ({})", target.id, target.name);
        state.store.put_target(target).await?;
        return Ok(());
    }

    if let Some(id) = cli_args.get("logs") {
        let logs = state.controller.logs(parse_id(id)?).await?;
        println!("{}", serde_json::to_string_pretty(&logs)?);
        return Ok(());
    }

    let controller = state.controller.clone();
    let accepted = if let Some(path) = cli_args.get("create") {
        let new: NewDeployment = File::new(path).read_json().await?;
        let now = cli_args.contains_key("now");
        Some(controller.create(&ctx, new, now).await?)
    } else if let Some(id) = cli_args.get("deploy") {
        let patch = DeploymentPatch::default();
        Some(controller.update(&ctx, parse_id(id)?, patch, true, false).await?)
    } else if let Some(id) = cli_args.get("undeploy") {
        let patch = DeploymentPatch::default();
        Some(controller.update(&ctx, parse_id(id)?, patch, false, true).await?)
    } else if let Some(id) = cli_args.get("disable") {
        Some(controller.disable(&ctx, parse_id(id)?).await?)
    } else {
        None
    };

    match accepted {
        Some(accepted) => run_once(&options, state, jobs, accepted).await,
        None => {
            info!("Running seed controller with options: {:?}", options);
            run(options, state, jobs, await_shutdown_signal())
                .await
                .map_err(|e| anyhow!("controller stopped: {e}"))
        }
    }
}

/// Run the pool until the queued job settles, then print the result
async fn run_once(
    options: &AppOptions,
    state: Arc<AppState>,
    jobs: tokio::sync::mpsc::Receiver<seed_controller::workers::queue::QueuedJob>,
    accepted: Accepted,
) -> anyhow::Result<()> {
    let Accepted { deployment, job } = accepted;
    let mut runtime = start(options, state.clone(), jobs)?;

    let final_state = match job {
        Some(mut handle) => {
            info!("Waiting for job {}", handle.id());
            Some(handle.wait().await)
        }
        None => None,
    };
    runtime.shutdown().await?;

    let deployment = match state.store.load(deployment.id).await? {
        Some(record) => record.deployment,
        None => deployment,
    };
    let output = serde_json::json!({
        "deployment": deployment,
        "job": final_state,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn parse_id(value: &str) -> anyhow::Result<DeploymentId> {
    value
        .parse()
        .with_context(|| format!("invalid deployment id {value:?}"))
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                _ => {
                    error!("Unable to install signal handlers, waiting for Ctrl+C");
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Ctrl+C received, shutting down...");
    }
}
