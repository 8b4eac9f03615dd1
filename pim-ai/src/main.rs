//! pim-ai - Product imagery service
//!
//! Accepts product video URLs, runs the imagery pipeline as background jobs
//! and serves status, results and generated images over HTTP + SSE.

use anyhow::Result;
use clap::Parser;
use pim_common::config::{
    load_toml_config, resolve_config_path, resolve_root_folder, RootFolderInitializer, DEFAULT_BIND,
};
use pim_common::events::EventBus;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use pim_ai::services::{JobStore, PipelineRunner};
use pim_ai::AppState;

/// Command line arguments
#[derive(Debug, Parser)]
#[command(name = "pim-ai", version, about = "Product imagery service")]
struct Args {
    /// Config file (default: <config_dir>/pim/pim-ai.toml)
    #[arg(long, env = "PIM_CONFIG")]
    config: Option<PathBuf>,

    /// Root folder for job work directories
    #[arg(long)]
    root_folder: Option<PathBuf>,

    /// Listen address
    #[arg(long, env = "PIM_BIND")]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Step 1: Load config file (missing file means defaults)
    let config_path = resolve_config_path(args.config.as_deref(), "PIM_CONFIG", "pim-ai.toml");
    let toml_config = load_toml_config(&config_path)?;

    // Step 2: Initialize tracing (RUST_LOG overrides the configured level)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&toml_config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting pim-ai (product imagery) service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("Config: {}", config_path.display());

    // Step 3: Resolve and create the root folder
    let root_folder = resolve_root_folder(args.root_folder.as_deref(), "PIM_ROOT_FOLDER", &toml_config);
    let initializer = RootFolderInitializer::new(root_folder);
    initializer
        .ensure_directory_exists()
        .map_err(|e| anyhow::anyhow!("Failed to initialize root folder: {}", e))?;
    let jobs_dir = initializer.jobs_dir();
    info!("Job directory: {}", jobs_dir.display());

    // Step 4: Wire collaborators and the runner
    let collaborators = pim_ai::config::build_collaborators(&toml_config);
    let event_bus = EventBus::new(100);
    let runner = PipelineRunner::new(
        JobStore::new(),
        event_bus.clone(),
        collaborators,
        toml_config.pipeline.clone(),
        jobs_dir,
    );

    let state = AppState::new(runner, event_bus);
    let app = pim_ai::build_router(state).layer(pim_ai::api::cors_layer(&toml_config.cors_origins));

    // Step 5: Serve
    let bind = args
        .bind
        .or_else(|| toml_config.bind.clone())
        .unwrap_or_else(|| DEFAULT_BIND.to_string());
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!("Listening on http://{}", bind);
    info!("Health check: http://{}/health", bind);

    axum::serve(listener, app).await?;

    Ok(())
}
