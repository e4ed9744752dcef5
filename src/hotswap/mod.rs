//! Hot-reloadable routing state.
//!
//! The active configuration, its namespace registry and the hash ring are
//! bundled into one immutable [`RoutingSnapshot`] behind an atomic pointer.
//! Readers load the pointer without locking and always see a complete
//! snapshot; writers build a new snapshot off to the side and swap it in.
//!
//! ```text
//!  ConfigSource ──raw bytes──▶ ConfigWatcher ──Config──▶ ConfigHotSwap::apply
//!                                                          │ validate
//!                                                          │ build snapshot
//!                                                          ▼
//!   ProxyRouter ◀──load()── ArcSwap<RoutingSnapshot> ◀── store()
//! ```

mod source;
mod watcher;

pub use source::{ConfigSource, ConfigUpdate, MemoryConfigSource};
pub use watcher::{apply_raw, ConfigWatcher};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::partitioning::HashRing;
use crate::registry::NamespaceRegistry;
use crate::types::NodeAddr;
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

/// One consistent view of the routing state.
#[derive(Debug)]
pub struct RoutingSnapshot {
    /// Incremented on every swap.
    pub version: u64,
    pub config: Arc<Config>,
    pub registry: NamespaceRegistry,
    pub ring: Arc<HashRing>,
}

/// Atomically replaceable configuration, registry and ring.
#[derive(Debug)]
pub struct ConfigHotSwap {
    current: ArcSwap<RoutingSnapshot>,

    /// Serializes writers so concurrent `apply`/`set_nodes` never lose an update.
    write_lock: Mutex<()>,

    version_tx: watch::Sender<u64>,

    vnodes_per_node: usize,
}

impl ConfigHotSwap {
    /// Start from a configuration, which must validate.
    pub fn new(initial: Config, vnodes_per_node: usize) -> Result<Self> {
        initial.validate()?;

        let ring = match initial.nodes() {
            Some(nodes) => HashRing::from_nodes(vnodes_per_node, nodes.iter().cloned()),
            None => HashRing::with_vnodes(vnodes_per_node),
        };
        let snapshot = RoutingSnapshot {
            version: 1,
            registry: NamespaceRegistry::from_config(&initial),
            config: Arc::new(initial),
            ring: Arc::new(ring),
        };
        let (version_tx, _) = watch::channel(snapshot.version);

        Ok(Self {
            current: ArcSwap::from_pointee(snapshot),
            write_lock: Mutex::new(()),
            version_tx,
            vnodes_per_node,
        })
    }

    /// Load the initial document from `source`.
    pub async fn from_source(source: &dyn ConfigSource, vnodes_per_node: usize) -> Result<Self> {
        let data = source.load().await?;
        let config = Config::from_json(&data)?;
        let hotswap = Self::new(config, vnodes_per_node)?;
        info!(source = source.name(), "Loaded initial configuration");
        Ok(hotswap)
    }

    /// The active, validated configuration.
    pub fn get(&self) -> Arc<Config> {
        self.current.load().config.clone()
    }

    /// The active routing snapshot.
    pub fn snapshot(&self) -> Arc<RoutingSnapshot> {
        self.current.load_full()
    }

    /// Version of the active snapshot.
    pub fn version(&self) -> u64 {
        self.current.load().version
    }

    /// Receive the version of every snapshot swapped in from now on.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version_tx.subscribe()
    }

    pub fn vnodes_per_node(&self) -> usize {
        self.vnodes_per_node
    }

    /// Validate and activate `new_config`.
    ///
    /// On failure the active snapshot is left untouched. When the document
    /// carries a node list that differs from the ring, the ring is rebuilt;
    /// otherwise the current ring is carried over.
    pub fn apply(&self, new_config: Config) -> Result<()> {
        if let Err(e) = new_config.validate() {
            warn!(
                error = %e,
                active_version = self.version(),
                "Rejected configuration; keeping the active one"
            );
            return Err(Error::Validation(e));
        }

        let _guard = self.write_lock.lock();
        let current = self.current.load_full();

        let ring = match new_config.nodes() {
            Some(nodes) if !current.ring.has_membership(nodes) => Arc::new(HashRing::from_nodes(
                self.vnodes_per_node,
                nodes.iter().cloned(),
            )),
            _ => current.ring.clone(),
        };

        let next = RoutingSnapshot {
            version: current.version + 1,
            registry: NamespaceRegistry::from_config(&new_config),
            config: Arc::new(new_config),
            ring,
        };
        self.publish(next);
        Ok(())
    }

    /// Replace the ring membership, keeping the active configuration.
    pub fn set_nodes(&self, nodes: &[NodeAddr]) -> Arc<RoutingSnapshot> {
        let _guard = self.write_lock.lock();
        let current = self.current.load_full();

        let next = RoutingSnapshot {
            version: current.version + 1,
            config: current.config.clone(),
            registry: current.registry.clone(),
            ring: Arc::new(HashRing::from_nodes(self.vnodes_per_node, nodes.iter().cloned())),
        };
        self.publish(next);
        self.current.load_full()
    }

    fn publish(&self, next: RoutingSnapshot) {
        let version = next.version;
        info!(
            version,
            namespaces = next.registry.len(),
            nodes = next.ring.size(),
            "Activated routing snapshot"
        );
        self.current.store(Arc::new(next));
        self.version_tx.send_replace(version);
    }
}
