//! fetchback CLI
//!
//! Operator commands against a running coordinator:
//! - trigger a file retrieval from an agent and follow it
//! - inspect agents and transfers
//! - issue agent tokens

use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fetchback::client::{CoordinatorClient, DEFAULT_SERVER};
use fetchback::commands;
use fetchback::output::print_error;

#[derive(Parser)]
#[command(name = "fetchback")]
#[command(author, version, about = "Retrieve files from remote agents into blob storage")]
#[command(propagate_version = true)]
struct Cli {
    /// Coordinator HTTP address
    #[arg(short, long, global = true, env = "FETCHBACK_SERVER", default_value = DEFAULT_SERVER)]
    server: String,

    /// Print raw JSON replies
    #[arg(long, global = true)]
    json: bool,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask an agent to upload a file
    Download {
        /// Agent (client) id
        client_id: String,
        /// File to upload (defaults to the agent's configured file)
        #[arg(short, long)]
        file: Option<String>,
        /// Object metadata as key=value (repeatable)
        #[arg(short, long = "meta", value_name = "KEY=VALUE")]
        meta: Vec<String>,
        /// Follow the transfer until it finishes
        #[arg(short, long)]
        wait: bool,
        /// Seconds between progress polls with --wait
        #[arg(long, default_value_t = 1, value_name = "SECS")]
        poll: u64,
    },

    /// Show an agent's connection and upload summary
    Status {
        /// Agent (client) id
        client_id: String,
    },

    /// List connected agents
    #[command(alias = "clients")]
    List {
        /// Show detailed information
        #[arg(short, long)]
        long: bool,
    },

    /// Show one upload
    Upload {
        /// Upload id returned by download
        upload_id: String,
    },

    /// Cancel a running upload
    Cancel {
        /// Upload id returned by download
        upload_id: String,
    },

    /// Check that the coordinator is up
    Health,

    /// Issue a signed agent token
    Token {
        /// Agent (client) id the token is bound to
        client_id: String,
        /// Shared signing secret (the coordinator's auth.secret)
        #[arg(long, env = "FETCHBACK_AUTH_SECRET", hide_env_values = true)]
        secret: String,
        /// Token issuer (the coordinator's auth.issuer)
        #[arg(long, default_value = "fetchback")]
        issuer: String,
        /// Token lifetime in seconds
        #[arg(long, default_value_t = 86400, value_name = "SECS")]
        ttl: u64,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    if let Err(e) = run(cli).await {
        print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let server = cli.server;
    let client = || CoordinatorClient::new(&server);
    let json = cli.json;

    match cli.command {
        Commands::Download {
            client_id,
            file,
            meta,
            wait,
            poll,
        } => {
            let wait = wait.then(|| Duration::from_secs(poll.max(1)));
            commands::download_command(&client()?, &client_id, file, &meta, wait, json).await
        }
        Commands::Status { client_id } => {
            commands::status_command(&client()?, &client_id, json).await
        }
        Commands::List { long } => commands::list_command(&client()?, long, json).await,
        Commands::Upload { upload_id } => {
            commands::upload_command(&client()?, &upload_id, json).await
        }
        Commands::Cancel { upload_id } => {
            commands::cancel_command(&client()?, &upload_id, json).await
        }
        Commands::Health => commands::health_command(&client()?, json).await,
        Commands::Token {
            client_id,
            secret,
            issuer,
            ttl,
        } => {
            let token =
                commands::token_command(&client_id, &secret, &issuer, Duration::from_secs(ttl))?;
            println!("{}", token);
            Ok(())
        }
    }
}
