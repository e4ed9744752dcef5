//! Proxy process.
//!
//! Settings come from the environment, see [`ProxyConfig::from_env`]. The
//! tenant document is read from `CONFIG_PATH`; on Unix, `SIGHUP` re-reads it
//! and applies it through the configuration watcher.

use shardcache::config::ProxyConfig;
use shardcache::hotswap::{ConfigHotSwap, ConfigWatcher, MemoryConfigSource};
use shardcache::proxy::ProxyServer;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("shardcache=info")),
        )
        .init();

    let config = ProxyConfig::from_env()?;
    let path = config
        .config_path
        .clone()
        .ok_or("CONFIG_PATH must point at the tenant configuration document")?;

    let source = Arc::new(MemoryConfigSource::new(
        path.display().to_string(),
        tokio::fs::read(&path).await?,
    ));
    let state = Arc::new(ConfigHotSwap::from_source(source.as_ref(), config.virtual_nodes).await?);
    let watcher = ConfigWatcher::start(source.clone(), state.clone()).await?;

    info!(
        addr = %config.listen_addr,
        nodes = config.nodes.len(),
        namespaces = state.get().namespaces().len(),
        "Starting proxy"
    );
    let proxy = ProxyServer::start(config, state).await?;

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut hangup = signal(SignalKind::hangup())?;
        loop {
            tokio::select! {
                _ = hangup.recv() => {
                    match tokio::fs::read(&path).await {
                        Ok(data) => {
                            if let Err(e) = source.publish(data).await {
                                error!(error = %e, "Failed to publish configuration");
                            }
                        }
                        Err(e) => error!(path = %path.display(), error = %e, "Failed to read configuration"),
                    }
                }
                result = tokio::signal::ctrl_c() => {
                    result?;
                    break;
                }
            }
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;

    info!("Received shutdown signal");
    watcher.stop().await;
    proxy.shutdown().await;

    Ok(())
}
