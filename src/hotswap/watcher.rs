//! Task applying configuration changes reported by a [`ConfigSource`].

use super::{ConfigHotSwap, ConfigSource};
use crate::config::Config;
use crate::error::Result;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Parse a raw document and apply it. Returns the new snapshot version.
pub fn apply_raw(hotswap: &ConfigHotSwap, data: &[u8]) -> Result<u64> {
    let config = Config::from_json(data)?;
    hotswap.apply(config)?;
    Ok(hotswap.version())
}

/// Consumes a source's change channel and feeds [`ConfigHotSwap::apply`].
///
/// Rejected documents are logged and dropped; the active configuration keeps
/// serving.
#[derive(Debug)]
pub struct ConfigWatcher {
    source: Arc<dyn ConfigSource>,
    handle: JoinHandle<()>,
}

impl ConfigWatcher {
    /// Subscribe to `source` and start applying its updates.
    pub async fn start(source: Arc<dyn ConfigSource>, hotswap: Arc<ConfigHotSwap>) -> Result<Self> {
        let (tx, mut rx) = mpsc::channel(16);
        source.start(tx).await?;

        let handle = tokio::spawn(async move {
            while let Some(update) = rx.recv().await {
                match apply_raw(&hotswap, &update.data) {
                    Ok(version) => {
                        info!(source = %update.source, version, "Applied configuration update");
                    }
                    Err(e) => {
                        error!(source = %update.source, error = %e, "Configuration update rejected");
                    }
                }
            }
        });

        info!(source = source.name(), "Watching configuration source");
        Ok(Self { source, handle })
    }

    /// Detach from the source and wait for pending updates to drain.
    pub async fn stop(self) {
        self.source.stop().await;
        let _ = self.handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Namespace;
    use crate::hotswap::MemoryConfigSource;

    fn doc(name: &str, key: &str) -> Vec<u8> {
        Config::new(vec![Namespace::new(name, key)]).to_json().unwrap()
    }

    #[tokio::test]
    async fn test_watcher_applies_valid_and_skips_invalid() {
        let source = Arc::new(MemoryConfigSource::new("memory", doc("game-app", "K1")));
        let hotswap = Arc::new(ConfigHotSwap::from_source(source.as_ref(), 150).await.unwrap());
        let mut versions = hotswap.subscribe();

        let watcher = ConfigWatcher::start(source.clone(), hotswap.clone()).await.unwrap();

        source.publish(doc("chat", "K2")).await.unwrap();
        versions.changed().await.unwrap();
        assert_eq!(hotswap.get().namespaces()[0].name, "chat");

        let before = hotswap.get();
        source.publish(b"{\"proxy\":{\"namespaces\":[]}}".to_vec()).await.unwrap();
        source.publish(b"not json".to_vec()).await.unwrap();

        watcher.stop().await;
        assert!(Arc::ptr_eq(&before, &hotswap.get()));
        assert_eq!(hotswap.version(), 2);
    }

    #[test]
    fn test_apply_raw_reports_version() {
        let hotswap = ConfigHotSwap::new(Config::new(vec![Namespace::new("a", "k")]), 150).unwrap();
        assert_eq!(apply_raw(&hotswap, &doc("b", "k2")).unwrap(), 2);
        assert!(apply_raw(&hotswap, b"[]").is_err());
        assert_eq!(hotswap.version(), 2);
    }
}
