//! Storage node process.
//!
//! Settings come from the environment, see [`NodeConfig::from_env`].

use shardcache::cache::CacheNode;
use shardcache::config::NodeConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("shardcache=info")),
        )
        .init();

    let config = NodeConfig::from_env()?;
    info!(
        addr = %config.listen_addr,
        max_memory_mb = config.max_memory_mb,
        max_keys = config.max_keys,
        "Starting cache node"
    );

    let node = CacheNode::start(config).await?;

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");
    node.shutdown().await;

    Ok(())
}
