//! `taskfabric-node`: starts one cluster node from a TOML config file.
//!
//! Grounded on `src/bin/agent.rs`'s CLI shape (`clap::Parser` args,
//! `tracing_subscriber::fmt().with_env_filter(...)`, TOML config
//! loading); the HTTP server portion of that file has no counterpart
//! here since there is no HTTP/RPC surface in scope.

use clap::Parser;
use tracing::info;

use taskfabric_cluster::{Cluster, ClusterConfig, TransportHub};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path.
    #[arg(short, long, default_value = "configs/taskfabric.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt().with_env_filter("info").init();

    let config = ClusterConfig::load_from_path(Some(&args.config)).unwrap_or_else(|err| {
        tracing::warn!(error = %err, path = %args.config, "failed to load config file, using defaults");
        ClusterConfig::default()
    });

    info!(node_id = %config.node.id, "starting taskfabric node");

    let hub = TransportHub::new();
    let cluster = Cluster::new(config, &hub, None).await?;
    cluster.start();

    tokio::signal::ctrl_c().await?;
    info!("received shutdown signal");
    cluster.shutdown().await;

    Ok(())
}
