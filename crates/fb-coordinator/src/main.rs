//! fetchback coordinator daemon
//!
//! Accepts agent channels over WebSocket and serves the operator HTTP API.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fb_core::config::{self, BlobBackend, CoordinatorConfig};
use fb_coordinator::blob::{BlobStore, MemoryBlobStore, S3BlobStore};
use fb_coordinator::server;
use fb_coordinator::CoordinatorState;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Backend {
    S3,
    Memory,
}

#[derive(Parser)]
#[command(name = "fb-coordinator")]
#[command(about = "fetchback coordinator daemon")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "FETCHBACK_CONFIG")]
    config: Option<PathBuf>,

    /// Bind address (overrides config)
    #[arg(short, long, env = "FETCHBACK_BIND")]
    bind: Option<String>,

    /// Blob store backend (overrides config)
    #[arg(long, value_enum)]
    backend: Option<Backend>,

    /// Run in foreground with verbose output
    #[arg(short, long)]
    foreground: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.foreground { "debug" } else { &args.log_level };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("fetchback coordinator starting...");

    let mut config = load_config(args.config.as_deref())?;
    if let Some(bind) = args.bind {
        config.bind_address = bind;
    }
    match args.backend {
        Some(Backend::S3) => config.blob.backend = BlobBackend::S3,
        Some(Backend::Memory) => config.blob.backend = BlobBackend::Memory,
        None => {}
    }
    config.validate().context("Invalid coordinator configuration")?;

    if config.auth.secret.is_none() {
        tracing::warn!("No auth secret configured - agent tokens will not be checked");
    }

    let (blob, blob_router): (Arc<dyn BlobStore>, _) = match config.blob.backend {
        BlobBackend::S3 => {
            let store = S3BlobStore::from_config(&config.blob)
                .context("Failed to configure S3 blob store")?;
            tracing::info!(
                "Using S3 bucket {} in {}",
                config.blob.bucket,
                config.blob.region
            );
            (Arc::new(store), None)
        }
        BlobBackend::Memory => {
            let store = MemoryBlobStore::new(&config.blob.bucket, &config.blob.public_url);
            tracing::warn!(
                "Using in-memory blob store; uploads go to {}/blob and are lost on exit",
                config.blob.public_url
            );
            let router = store.router();
            (Arc::new(store), Some(router))
        }
    };

    let state = Arc::new(CoordinatorState::new(config.clone(), blob));

    let mut app = server::router(state.clone());
    if let Some(blob_router) = blob_router {
        app = app.merge(blob_router);
    }

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let listener = TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_address))?;

    let shutdown = state.clone();
    let shutdown_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_cancel.cancelled().await;
        shutdown.shutdown().await;
    });

    server::serve(listener, app, cancel)
        .await
        .context("Server error")?;

    tracing::info!("Coordinator stopped");
    Ok(())
}

fn load_config(path: Option<&std::path::Path>) -> Result<CoordinatorConfig> {
    if let Some(path) = path {
        return config::load_config(path)
            .with_context(|| format!("Failed to load config from {:?}", path));
    }

    let default_path = config::default_coordinator_config_path();
    if default_path.exists() {
        Ok(config::load_config(&default_path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config from {:?}: {}", default_path, e);
            CoordinatorConfig::default()
        }))
    } else {
        tracing::info!("Using default configuration");
        Ok(CoordinatorConfig::default())
    }
}

fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

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
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating shutdown...");
            }
        }

        cancel.cancel();
    });
}
