//! Configuration source abstraction.
//!
//! A [`ConfigSource`] only fetches raw documents and reports changes; parsing,
//! validation and activation happen in [`ConfigHotSwap`](super::ConfigHotSwap).
//! Concrete control-plane backends (secret stores, files) implement this trait
//! outside the core.

use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::debug;

/// A raw configuration document observed by a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigUpdate {
    /// Name of the source that observed the change.
    pub source: String,
    /// Raw document bytes.
    pub data: Vec<u8>,
}

/// Supplies raw configuration and change notifications.
#[async_trait]
pub trait ConfigSource: Send + Sync + std::fmt::Debug + 'static {
    /// Human-readable name used in logs.
    fn name(&self) -> &str;

    /// Fetch the current document.
    async fn load(&self) -> Result<Vec<u8>>;

    /// Begin watching; every observed change is sent on `updates`.
    async fn start(&self, updates: mpsc::Sender<ConfigUpdate>) -> Result<()>;

    /// Stop watching. No updates are sent afterwards.
    async fn stop(&self);
}

/// In-memory source; changes are pushed with [`MemoryConfigSource::publish`].
#[derive(Debug)]
pub struct MemoryConfigSource {
    name: String,
    current: RwLock<Vec<u8>>,
    subscriber: Mutex<Option<mpsc::Sender<ConfigUpdate>>>,
}

impl MemoryConfigSource {
    pub fn new(name: impl Into<String>, initial: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            current: RwLock::new(initial.into()),
            subscriber: Mutex::new(None),
        }
    }

    /// Replace the document and notify the watcher, if started.
    pub async fn publish(&self, data: impl Into<Vec<u8>>) -> Result<()> {
        let data = data.into();
        *self.current.write() = data.clone();

        let subscriber = self.subscriber.lock().clone();
        if let Some(tx) = subscriber {
            tx.send(ConfigUpdate {
                source: self.name.clone(),
                data,
            })
            .await
            .map_err(|_| Error::Internal("config watcher is gone".into()))?;
        } else {
            debug!(source = %self.name, "Document updated with no watcher attached");
        }
        Ok(())
    }
}

#[async_trait]
impl ConfigSource for MemoryConfigSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn load(&self) -> Result<Vec<u8>> {
        Ok(self.current.read().clone())
    }

    async fn start(&self, updates: mpsc::Sender<ConfigUpdate>) -> Result<()> {
        *self.subscriber.lock() = Some(updates);
        Ok(())
    }

    async fn stop(&self) {
        self.subscriber.lock().take();
    }
}
