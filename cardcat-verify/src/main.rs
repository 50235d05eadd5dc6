//! cardcat-verify - Card verification microservice
//!
//! Checks vision-extracted trading cards against the checklist corpus,
//! re-asks the extractor about ambiguous fields, and learns new checklists
//! from cards the user saves.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use cardcat_common::config::{
    config_file_path, load_toml_config, RootFolderInitializer, RootFolderResolver, TomlConfig,
};
use cardcat_common::events::EventBus;
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cardcat_verify::seed::{seed_database, SeedCorpus};
use cardcat_verify::services::{spawn_learning_worker, LearningQueue};
use cardcat_verify::AppState;

const MODULE_NAME: &str = "cardcat-verify";

/// Command-line arguments for cardcat-verify
#[derive(Parser, Debug)]
#[command(name = "cardcat-verify")]
#[command(about = "Trading card verification microservice")]
#[command(version)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "5731", env = "CARDCAT_VERIFY_PORT")]
    port: u16,

    /// Root folder holding the catalog database
    #[arg(short, long, env = "CARDCAT_ROOT_FOLDER")]
    root_folder: Option<PathBuf>,

    /// Log level (overridden by RUST_LOG)
    #[arg(long, env = "CARDCAT_LOG_LEVEL")]
    log_level: Option<String>,
}

fn load_config() -> (TomlConfig, Option<PathBuf>) {
    let Some(path) = config_file_path(MODULE_NAME) else {
        return (TomlConfig::default(), None);
    };
    if !path.exists() {
        return (TomlConfig::default(), Some(path));
    }
    match load_toml_config(&path) {
        Ok(config) => (config, Some(path)),
        Err(e) => {
            // Logging is not initialised yet
            eprintln!("Ignoring unreadable config {}: {}", path.display(), e);
            (TomlConfig::default(), Some(path))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let (toml_config, toml_path) = load_config();

    let level = args
        .log_level
        .clone()
        .unwrap_or_else(|| toml_config.logging.level.clone());
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("cardcat_verify={level},cardcat_common={level},tower_http=info").into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting cardcat-verify on port {}", args.port);
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    // Root folder: CLI → env → TOML → platform default
    let root_folder = RootFolderResolver::new(MODULE_NAME)
        .with_cli_arg(args.root_folder.clone())
        .resolve();
    let initializer = RootFolderInitializer::new(root_folder);
    initializer
        .ensure_directory_exists()
        .context("Failed to initialize root folder")?;

    let db_path = initializer.database_path();
    info!("Database: {}", db_path.display());
    let db_pool = cardcat_verify::db::init_database_pool(&db_path)
        .await
        .context("Failed to open database")?;

    let seed = Arc::new(SeedCorpus::packaged().context("Packaged seed corpus is invalid")?);
    info!(checklists = seed.len(), "Seed corpus available");
    if toml_config.extractor.seed_on_startup {
        if let Err(e) = seed_database(&db_pool, &seed).await {
            warn!("Startup seeding failed: {}", e);
        }
    }

    let event_bus = EventBus::new(100);
    let shutdown = CancellationToken::new();

    let extractor = cardcat_verify::config::build_extractor(&db_pool, &toml_config).await;
    if extractor.is_none() {
        warn!("Scanning disabled until an extractor endpoint and API key are configured");
    }

    let (learning_queue, learning_rx) = LearningQueue::channel();
    let mut state = AppState::new(db_pool, event_bus, learning_queue, seed)
        .with_extractor(extractor)
        .with_extractor_config(toml_config.extractor.clone())
        .with_toml_path(toml_path);
    state.shutdown = shutdown.clone();

    let worker = spawn_learning_worker(state.learner(), learning_rx, shutdown.clone());

    let app = cardcat_verify::build_router(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], args.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            server_shutdown.cancel();
        })
        .await
        .context("Server error")?;

    shutdown.cancel();
    if let Err(e) = worker.await {
        warn!("Learning worker ended abnormally: {}", e);
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
