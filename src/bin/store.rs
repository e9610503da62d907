//! Coordination store binary

use clap::{Parser, Subcommand};
use minilb::common::Config;
use minilb::store::StoreServer;
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "minilb-store")]
#[command(about = "minilb leased coordination store")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the store server
    Serve {
        /// Bind address for gRPC (overrides config)
        #[arg(long)]
        grpc: Option<SocketAddr>,

        /// Bind address for the admin HTTP API (overrides config)
        #[arg(long)]
        http: Option<SocketAddr>,

        /// Lease sweep interval in milliseconds (overrides config)
        #[arg(long)]
        sweep_ms: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load config from file and environment, CLI flags win
    let config = Config::load()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Serve {
            grpc,
            http,
            sweep_ms,
        } => {
            let mut store_config = config.store;
            if let Some(grpc) = grpc {
                store_config.grpc_addr = grpc;
            }
            if let Some(http) = http {
                store_config.http_addr = http;
            }
            if let Some(sweep_ms) = sweep_ms {
                store_config.sweep_interval_ms = sweep_ms;
            }

            StoreServer::new(store_config).serve().await?;
        }
    }

    Ok(())
}
