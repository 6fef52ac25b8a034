//! Face registration and recognition service
//!
//! Registers one face sample per user id and recognizes registered users
//! from uploaded images over a small REST API.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use faceroll::api::{create_rest_router, AppState};
use faceroll::config::Config;
use faceroll::engine::{self, worker};
use faceroll::service::FaceService;
use faceroll::storage::DiskSampleStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    info!("Starting faceroll v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config_path = Config::default_path();
    let config = Config::load(&config_path).unwrap_or_else(|e| {
        info!("Using default config ({}: {})", config_path, e);
        Config::default()
    });

    info!("Configuration loaded:");
    info!("  Listen address: {}", config.bind_addr());
    info!("  Faces directory: {:?}", config.storage.faces_dir);
    info!("  Confidence threshold: {}", config.recognizer.confidence_threshold);

    // Vision backend on its own thread
    let backend_config = config.clone();
    let engine = worker::spawn(move || engine::load_backend(&backend_config)).await?;

    // Initialize storage
    let store = Arc::new(DiskSampleStore::new(&config.storage.faces_dir)?);

    // Previously registered users survive restarts
    let service = Arc::new(
        FaceService::start(engine, store, config.recognizer.confidence_threshold).await,
    );

    let app_state = Arc::new(AppState {
        service,
        start_time: Instant::now(),
    });

    let router = create_rest_router(app_state, config.server.body_limit_mb * 1024 * 1024);

    let addr = config.bind_addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("REST API listening on http://{}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received, cleaning up...");
        })
        .await?;

    info!("Goodbye!");
    Ok(())
}
