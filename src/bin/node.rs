//! Node binary

use clap::{Parser, Subcommand};
use causalkv::{Config, NodeServer};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "causalkv-node")]
#[command(about = "causalkv storage node")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a node
    Serve {
        /// Config file (defaults to causalkv.toml when present)
        #[arg(long)]
        config: Option<PathBuf>,

        /// This node's address (host:port) as seen by peers
        #[arg(long)]
        address: Option<String>,

        /// Bind address for HTTP
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// Initial view (comma-separated)
        #[arg(long, value_delimiter = ',')]
        view: Vec<String>,

        /// Number of shards; omit to join an existing cluster
        #[arg(long)]
        shard_count: Option<usize>,

        /// Log level when RUST_LOG is unset
        #[arg(long)]
        log_level: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            address,
            bind,
            view,
            shard_count,
            log_level,
        } => {
            // Load config from file and environment, then override with CLI arguments
            let mut config = match config {
                Some(path) => Config::load_from(&path)?,
                None => Config::load()?,
            };
            if let Some(address) = address {
                config.socket_address = address;
            }
            if let Some(bind) = bind {
                config.bind_addr = bind;
            }
            if !view.is_empty() {
                config.view = view;
            }
            if shard_count.is_some() {
                config.shard_count = shard_count;
            }
            if let Some(level) = log_level {
                config.log_level = level;
            }

            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| config.log_level.clone().into()),
                )
                .with(tracing_subscriber::fmt::layer())
                .init();

            let config = config.validate()?;
            NodeServer::new(config).serve().await?;
        }
    }

    Ok(())
}
