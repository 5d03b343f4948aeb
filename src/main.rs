use clap::{Parser, Subcommand};
use ringshift::{HashRouter, Murmur3Hasher, RingStoreBuilder, RouterConfig};
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "ringshift")]
#[command(about = "Consistent-hash ring administration")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "ringshift.yaml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a node on the ring
    AddNode {
        node: String,
        /// Relative weight, clamped to 1..=10
        #[arg(short, long, default_value_t = 1)]
        weight: usize,
    },
    /// Unregister a node and migrate its keys away
    RemoveNode { node: String },
    /// Resolve a data key to its owning node
    GetNode { key: String },
    /// List registered nodes and their virtual-node counts
    Nodes,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ringshift=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let config = match RouterConfig::from_file(&cli.config) {
        Ok(config) => config,
        Err(error) => {
            tracing::error!("failed to load config: {}", error);
            std::process::exit(1);
        }
    };

    let store = match RingStoreBuilder::from_config(&config).build().await {
        Ok(store) => store,
        Err(error) => {
            tracing::error!("failed to build ring store: {}", error);
            std::process::exit(1);
        }
    };

    let router = HashRouter::new(
        Arc::clone(&store),
        Arc::new(Murmur3Hasher::new()),
        None,
        config.options.clone(),
    );

    let outcome = match cli.command {
        Commands::AddNode { node, weight } => router
            .add_node(&node, weight)
            .await
            .map(|_| println!("added {}", node)),
        Commands::RemoveNode { node } => router
            .remove_node(&node)
            .await
            .map(|_| println!("removed {}", node)),
        Commands::GetNode { key } => router
            .get_node(&key)
            .await
            .map(|node| println!("{} -> {}", key, node)),
        Commands::Nodes => store.replica_counts().await.map(|nodes| {
            let mut nodes: Vec<_> = nodes.into_iter().collect();
            nodes.sort();
            for (node, replicas) in nodes {
                println!("{}\t{} virtual nodes", node, replicas);
            }
        }),
    };

    if let Err(error) = outcome {
        tracing::error!("{}", error);
        std::process::exit(1);
    }
}
