//! IS23 Recserver - mobes AIcam recording Tower (mArT)
//!
//! Main entry point for the Recserver application.

use is23_recserver::{
    device_directory::SqlDeviceDirectory,
    metadata::SqlMetadataRecorder,
    recorder::registry::SessionRegistry,
    recorder::session::SessionDeps,
    recorder::RecorderService,
    settings_store::{SettingsRepository, SqlSettingsRepository},
    state::{AppConfig, AppState},
    web_api,
};
use sqlx::mysql::MySqlPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "is23_recserver=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting IS23 Recserver v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::default();
    tracing::info!(
        database_url = %config.database_url,
        recordings_dir = %config.recordings_dir.display(),
        encoder_bin = %config.encoder_bin,
        "Configuration loaded"
    );

    // Create database pool
    let pool = MySqlPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&config.database_url)
        .await?;

    tracing::info!("Database connected");

    // Initialize components
    let opts = Arc::new(config.recorder_options());
    let registry = Arc::new(SessionRegistry::new(opts.terminal_retention));
    let devices = Arc::new(SqlDeviceDirectory::new(pool.clone()));
    let metadata = Arc::new(SqlMetadataRecorder::new(pool.clone()));
    let settings = Arc::new(SqlSettingsRepository::new(pool.clone()));

    let deps = SessionDeps {
        registry,
        devices,
        metadata,
        opts,
    };

    // Load the persisted recording config, first boot falls back to the
    // disabled default
    let persisted = match settings.load().await {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Failed to load recording config, using defaults");
            None
        }
    };
    let had_persisted = persisted.is_some();
    let initial = persisted.unwrap_or_default();

    // The reconciler starts from the persisted config so the boot-time
    // re-apply does not rewrite an unchanged settings row
    let recorder = Arc::new(RecorderService::new(deps, settings, initial.clone()));
    tracing::info!("RecorderService initialized");

    // Boot-time reconcile: resume the persisted schedule
    if had_persisted {
        match recorder.apply_config(initial).await {
            Ok(result) => tracing::info!(
                started = result.started.len(),
                "Persisted recording schedule applied"
            ),
            Err(e) => tracing::error!(error = %e, "Boot-time reconcile failed"),
        }
    } else {
        tracing::info!("No persisted recording config, recording disabled until configured");
    }

    // Create application state
    let state = AppState {
        pool,
        config,
        recorder: recorder.clone(),
    };

    let app = web_api::create_router(state.clone())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = format!("{}:{}", state.config.host, state.config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Drain recording sessions so in-flight chunks finalize
    tracing::info!("Shutting down, draining recording sessions");
    recorder.shutdown().await;
    tracing::info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
}
