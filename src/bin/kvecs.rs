//! Coordinator binary

use clap::{Parser, Subcommand};
use kvecs::common::{load_node_config, parse_duration_millis};
use kvecs::coordinator::http::{create_router, CoordState};
use kvecs::coordinator::{CacheStrategy, HashRing, Launcher, ScriptLauncher};
use kvecs::store::MemoryStore;
use kvecs::{Config, Coordinator};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "kvecs")]
#[command(about = "kvecs membership coordinator")]
#[command(version)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the hash ring built from a node file
    Ring {
        /// Node file (`name host port` per line)
        #[arg(long)]
        nodes: Option<PathBuf>,
    },

    /// Serve the coordination store and manage nodes
    Serve {
        /// Bind address for HTTP
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// Node file (`name host port` per line)
        #[arg(long)]
        nodes: Option<PathBuf>,

        /// Number of nodes to provision at startup
        #[arg(long)]
        count: Option<usize>,

        /// Cache strategy for provisioned nodes (LRU, LFU, FIFO)
        #[arg(long, default_value = "LRU")]
        strategy: CacheStrategy,

        /// Cache size for provisioned nodes
        #[arg(long, default_value = "100")]
        cache_size: usize,

        /// How long to wait for nodes to confirm (e.g. 10s, 500ms)
        #[arg(long)]
        timeout: Option<String>,
    },
}

fn init_tracing(level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| level.to_string().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;
    init_tracing(&config.log_level);

    match cli.command {
        Commands::Ring { nodes } => {
            let path = nodes.unwrap_or(config.coordinator.nodes_file);
            let ring = HashRing::build(&load_node_config(&path)?)?;
            for node in ring.iter() {
                println!(
                    "{:<12} {:<21} {} .. {}",
                    node.name,
                    node.address(),
                    node.start_hash,
                    node.end_hash
                );
            }
        }

        Commands::Serve {
            bind,
            nodes,
            count,
            strategy,
            cache_size,
            timeout,
        } => {
            // CLI has priority over file and environment
            if let Some(bind) = bind {
                config.coordinator.bind_addr = bind;
            }
            if let Some(nodes) = nodes {
                config.coordinator.nodes_file = nodes;
            }
            if let Some(timeout) = timeout {
                config.coordinator.await_timeout_ms = parse_duration_millis(&timeout)?;
            }

            // Without a node file there is nothing to coordinate.
            let specs = load_node_config(&config.coordinator.nodes_file)?;

            let store = Arc::new(MemoryStore::new());
            let launcher: Arc<dyn Launcher> = Arc::new(ScriptLauncher::new(config.launch.clone()));
            let coordinator = {
                let config = config.coordinator.clone();
                let store = store.clone();
                tokio::task::spawn_blocking(move || {
                    Coordinator::start(config, &specs, store, launcher)
                })
                .await??
            };
            let coordinator = Arc::new(coordinator);

            let router = create_router(CoordState {
                store: store.clone(),
                coordinator: coordinator.clone(),
            });
            let listener = tokio::net::TcpListener::bind(config.coordinator.bind_addr).await?;
            tracing::info!("HTTP API: {}", config.coordinator.bind_addr);

            if let Some(count) = count {
                let coordinator = coordinator.clone();
                tokio::spawn(async move {
                    let result = tokio::task::spawn_blocking(move || {
                        coordinator.add_nodes(count, strategy, cache_size)
                    })
                    .await;
                    match result {
                        Ok(result) if result.is_success() => {
                            tracing::info!("✓ {} node(s) up", count)
                        }
                        Ok(result) => tracing::error!("Provisioning failed: {:?}", result),
                        Err(e) => tracing::error!("Provisioning task failed: {}", e),
                    }
                });
            }

            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        tracing::error!("Failed to listen for Ctrl-C: {}", e);
                    }
                    tracing::info!("Shutting down");
                })
                .await?;

            let clean = tokio::task::spawn_blocking(move || coordinator.shutdown()).await?;
            if !clean {
                tracing::warn!("Some coordination paths could not be deleted");
            }
        }
    }

    Ok(())
}
