// src/main.rs

//! # tplive Main Entry Point
//!
//! Loads configuration and logging, builds the data store, subscriber
//! registry and renderer, starts the directory watcher and serves the preview
//! until Ctrl-C.

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use tplive::broadcast::Registry;
use tplive::config::AppConfig;
use tplive::data::DataStore;
use tplive::render::{Renderer, TemplateRef};
use tplive::watcher;
use tplive::web::{self, AppState};

/// The main entry point for the tplive application.
///
/// This function performs the following steps:
/// 1. Loads the application configuration from CLI, file, and environment.
/// 2. Initializes the tracing subscriber for logging.
/// 3. Resolves the initial render context.
/// 4. Starts watching the template directory; failure here is fatal.
/// 5. Binds the listen address; failure here is fatal.
/// 6. Serves until a Ctrl-C signal initiates graceful shutdown.
#[tokio::main]
async fn main() -> Result<()> {
    let app_config = match AppConfig::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize tracing subscriber for logging with environment filter and max level.
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&app_config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_max_level(tracing::Level::TRACE)
        .with_writer(std::io::stderr) // Log to stderr
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("Setting default tracing subscriber failed");

    tracing::debug!("tplive starting with configuration: {:?}", app_config);

    let initial_data = match app_config.load_initial_data() {
        Ok(data) => data,
        Err(e) => {
            tracing::error!("Invalid initial data: {}", e);
            std::process::exit(1);
        }
    };

    let registry = Arc::new(Registry::new());
    let data = Arc::new(DataStore::new(initial_data, Arc::clone(&registry)));
    let template = TemplateRef::new(app_config.template_path.clone());
    let renderer = Arc::new(Renderer::new(template.clone(), app_config.editor)?);

    if let Err(e) = watcher::run_watcher(template.dir(), app_config.debounce, Arc::clone(&registry))
    {
        tracing::error!("Cannot watch {}: {}", template.dir().display(), e);
        std::process::exit(1);
    }

    let listener = match web::bind(&app_config.addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("{:#}", e);
            std::process::exit(1);
        }
    };

    tracing::info!(
        "Going to preview {} on http://{}",
        template.path().display(),
        app_config.addr
    );

    // Shutdown signal channel for the server and every open event stream.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let state = AppState {
        data,
        registry,
        renderer,
        shutdown: shutdown_rx,
    };

    let server = tokio::spawn(async move {
        if let Err(e) = web::start_server(listener, state).await {
            tracing::error!("Web server exited with error: {}", e);
        }
    });

    // Wait for Ctrl-C signal to initiate shutdown.
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Ctrl-C received, initiating shutdown...");
        }
        Err(err) => {
            tracing::error!("Failed to listen for Ctrl-C signal: {}", err);
        }
    }

    if shutdown_tx.send(true).is_err() {
        tracing::error!("Failed to send shutdown signal");
    }

    if let Err(e) = server.await {
        tracing::error!("Web server task panicked: {}", e);
    }

    tracing::info!("tplive shut down gracefully.");
    Ok(())
}
