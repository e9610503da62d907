//! CLI for inspecting and registering services

use clap::{Parser, Subcommand};
use minilb::common::{watch_key, Config, ServiceInstance};
use minilb::discovery::{Registrar, Resolver};
use minilb::store::{CoordinationStore, GrpcStore};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "minilb")]
#[command(about = "minilb service discovery CLI")]
#[command(version)]
struct Cli {
    /// Store gRPC address
    #[arg(long, default_value = "127.0.0.1:2379")]
    store: String,

    /// Registry prefix (first key segment)
    #[arg(long, default_value = "svc")]
    prefix: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered instances of a service version
    List {
        #[arg(long)]
        service: String,

        #[arg(long)]
        version: String,
    },

    /// Print the address list every time it changes
    Watch {
        #[arg(long)]
        service: String,

        #[arg(long)]
        version: String,
    },

    /// Register an instance and keep it alive until Ctrl-C
    Register {
        #[arg(long)]
        service: String,

        #[arg(long)]
        version: String,

        /// Address clients should dial
        #[arg(long)]
        address: String,

        /// Lease TTL in seconds (overrides config)
        #[arg(long)]
        ttl: Option<u64>,

        /// Renewal interval in seconds (overrides config)
        #[arg(long)]
        interval: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let store: Arc<dyn CoordinationStore> = Arc::new(GrpcStore::connect(cli.store.clone()).await?);

    match cli.command {
        Commands::List { service, version } => {
            let prefix = watch_key(&cli.prefix, &service, &version);
            let kvs = store.get_prefix(&prefix).await?;
            println!("{} instance(s) under {}:", kvs.len(), prefix);
            for kv in kvs {
                match kv.lease {
                    Some(lease) => println!("  {} -> {} (lease {})", kv.key, kv.value, lease),
                    None => println!("  {} -> {}", kv.key, kv.value),
                }
            }
        }

        Commands::Watch { service, version } => {
            let prefix = watch_key(&cli.prefix, &service, &version);
            let resolver = Resolver::start(store, prefix.clone(), |addresses: Vec<String>| {
                println!("{} address(es): {}", addresses.len(), addresses.join(", "));
            });
            let mut states = resolver.state_changes();

            let ended = tokio::select! {
                _ = tokio::signal::ctrl_c() => false,
                _ = states.wait_for(|state| state.is_final()) => true,
            };
            if ended {
                anyhow::bail!("watch on {} ended: {}", prefix, resolver.state());
            }
            resolver.stop().await;
        }

        Commands::Register {
            service,
            version,
            address,
            ttl,
            interval,
        } => {
            let mut registrar_config = config.registrar;
            if let Some(ttl) = ttl {
                registrar_config.ttl_secs = ttl;
            }
            if let Some(interval) = interval {
                registrar_config.renew_interval_secs = interval;
            }

            let instance = ServiceInstance::new(cli.prefix, service, version, address);
            let handle = Registrar::start_instance(store, &instance, registrar_config).await?;
            println!("Registered {} at {}", instance, handle.key());

            tokio::signal::ctrl_c().await?;
            let status = handle.status();
            println!(
                "Stopping after {} renewals, {} failures",
                status.renewals, status.failures
            );
            handle.stop().await;
        }
    }

    Ok(())
}
