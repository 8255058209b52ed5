//! MediaFlow worker: async media job pipeline.
//!
//! Main entry point that wires all crates together and runs the worker
//! pools until interrupted.

use tracing_subscriber::{EnvFilter, fmt};

use mediaflow_core::config::AppConfig;
use mediaflow_core::config::logging::LogFormat;
use mediaflow_core::error::AppError;
use mediaflow_service::{CommandTransform, Pipeline};
use mediaflow_storage::build_artifact_store;

#[tokio::main]
async fn main() {
    let config = match load_configuration() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);

    if let Err(e) = run(config).await {
        tracing::error!("Worker error: {}", e);
        std::process::exit(1);
    }
}

/// Load configuration from `config/default.toml`, the environment overlay
/// and `MEDIAFLOW__*` variables.
fn load_configuration() -> Result<AppConfig, AppError> {
    let env = std::env::var("MEDIAFLOW_ENV").unwrap_or_else(|_| "development".to_string());
    AppConfig::load(&env)
}

/// Initialize tracing/logging
fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(config.logging.thread_ids)
                .init();
        }
        LogFormat::Pretty => {
            fmt()
                .pretty()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
    }
}

async fn run(config: AppConfig) -> Result<(), AppError> {
    tracing::info!("Starting MediaFlow worker v{}", env!("CARGO_PKG_VERSION"));

    // ── Step 1: Artifact store ───────────────────────────────────
    tracing::info!(provider = %config.storage.provider, "Initializing artifact store...");
    let store = build_artifact_store(&config.storage).await?;
    if !store.health_check().await? {
        return Err(AppError::service_unavailable(format!(
            "Artifact store '{}' is not healthy",
            store.provider_type()
        )));
    }

    // ── Step 2: Transforms ───────────────────────────────────────
    let transforms = CommandTransform::from_config(&config.transforms, &store);
    if transforms.is_empty() {
        tracing::warn!("No transforms configured; only batch fan-out will run");
    }
    for transform in &transforms {
        tracing::info!(kind = %transform.kind(), "Registered transform");
    }

    // ── Step 3: Pipeline ─────────────────────────────────────────
    let mut builder = Pipeline::builder(config).artifact_store(store);
    for transform in transforms {
        builder = builder.transform(transform);
    }
    let pipeline = builder.build().await?;
    pipeline.start().await?;
    tracing::info!("MediaFlow worker running, press Ctrl+C to stop");

    // ── Step 4: Wait for shutdown ────────────────────────────────
    shutdown_signal().await;
    pipeline.shutdown().await?;

    tracing::info!("MediaFlow worker stopped");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}
