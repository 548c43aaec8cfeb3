//! Parcel upload server binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use parcel_core::config::AppConfig;
use parcel_server::{AppState, create_router};
use parcel_upload::spawn_sweeper;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Parcel - chunked file upload server
#[derive(Parser, Debug)]
#[command(name = "parceld")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "PARCEL_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Parcel v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args.config)?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;

    let upload = &config.upload;
    tracing::info!(
        max_file_size = upload.max_file_size,
        max_chunk_size = upload.max_chunk_size,
        max_concurrent_uploads = upload.max_concurrent_uploads,
        max_parallel_chunks = upload.max_parallel_chunks,
        session_timeout_secs = upload.session_timeout_secs,
        "Upload limits configured"
    );

    if config.server.metrics_enabled {
        parcel_server::metrics::register_metrics();
        tracing::info!("Prometheus metrics registered");
    }

    let store = parcel_store::from_config(&config.store)
        .await
        .context("failed to initialize document store")?;

    // Fail before accepting requests if the store is unreachable.
    store
        .health_check()
        .await
        .context("document store health check failed")?;
    tracing::info!(backend = store.backend_name(), "Document store initialized");

    let state = AppState::new(config.clone(), store);

    let _sweeper = spawn_sweeper(Arc::clone(&state.uploader));
    tracing::info!(
        interval_secs = config.upload.sweep_interval().as_secs(),
        "Session sweeper spawned"
    );

    let app = create_router(state);

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Merge the optional config file with `PARCEL_` environment overrides.
fn load_config(path: &str) -> Result<AppConfig> {
    let mut figment = Figment::new();

    if std::path::Path::new(path).exists() {
        tracing::info!(config_path = %path, "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::info!(config_path = %path, "No config file found, using defaults and environment");
    }

    figment
        .merge(Env::prefixed("PARCEL_").split("__").ignore(&["config"]))
        .extract()
        .context("failed to load configuration")
}
