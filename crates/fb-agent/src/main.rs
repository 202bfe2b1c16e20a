//! fetchback agent daemon
//!
//! Dials the coordinator and serves its upload commands until stopped.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fb_agent::{ChannelConnector, Executor, Supervisor};
use fb_core::config::{self, AgentConfig};

#[derive(Parser)]
#[command(name = "fb-agent")]
#[command(about = "fetchback agent - uploads files on the coordinator's request")]
#[command(version)]
struct Args {
    /// Coordinator WebSocket URL (e.g. ws://coordinator:8080/ws/connect)
    #[arg(short = 'u', long, env = "FETCHBACK_COORDINATOR_URL")]
    coordinator_url: Option<String>,

    /// Agent id (defaults to the hostname)
    #[arg(long, env = "FETCHBACK_CLIENT_ID")]
    client_id: Option<String>,

    /// Bearer token presented to the coordinator
    #[arg(long, env = "FETCHBACK_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// File uploaded when a command names none
    #[arg(long)]
    default_file: Option<String>,

    /// Parts uploaded in parallel
    #[arg(long)]
    concurrency: Option<usize>,

    /// Path to configuration file
    #[arg(short, long, env = "FETCHBACK_AGENT_CONFIG")]
    config: Option<PathBuf>,

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

    let log_level = if args.foreground {
        "debug"
    } else {
        &args.log_level
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("fetchback agent starting...");

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(config::default_agent_config_path);
    let mut config = if config_path.exists() {
        config::load_config(&config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path))?
    } else {
        AgentConfig::default()
    };

    if let Some(url) = args.coordinator_url {
        config.coordinator_url = url;
    }
    if let Some(client_id) = args.client_id {
        config.agent_id = client_id;
    }
    if let Some(token) = args.token {
        config.token = Some(token);
    }
    if let Some(path) = args.default_file {
        config.default_file_path = path;
    }
    if let Some(concurrency) = args.concurrency {
        config.upload_concurrency = concurrency;
    }
    config.validate().context("Invalid agent configuration")?;
    let agent_id = config.agent_id()?;

    tracing::info!(
        "Agent {} connecting to {}",
        agent_id,
        config.coordinator_url
    );

    let shutdown = CancellationToken::new();
    let executor = Arc::new(
        Executor::new(&config, agent_id.clone(), shutdown.clone())
            .context("Failed to create executor")?,
    );
    let connector = ChannelConnector::new(config.clone(), agent_id);
    let supervisor = Supervisor::new(connector, config, executor, shutdown).spawn();

    wait_for_signal().await;
    supervisor.stop();
    supervisor.join().await;

    tracing::info!("Agent stopped");
    Ok(())
}

async fn wait_for_signal() {
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
}
