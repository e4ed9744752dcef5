//! Testing utilities for the sharded cache.
//!
//! - [`LocalTransport`]: in-process node transport with failure injection, for
//!   exercising the router without sockets.
//! - [`TestCluster`]: real storage nodes and a proxy on OS-assigned ports.
//!
//! # Example
//!
//! ```rust,ignore
//! use shardcache::config::{Config, Namespace};
//! use shardcache::testing::TestCluster;
//!
//! let cluster = TestCluster::start(3, Config::new(vec![Namespace::new("game-app", "K1")])).await?;
//! let client = cluster.client().await?;
//! client.set("K1", "score:alice", "42", 60).await?;
//! cluster.shutdown().await;
//! ```

mod utils;

pub use utils::{wait_for_result, TestCluster};

use crate::cache::{CacheEngine, NodeHandler};
use crate::config::NodeConfig;
use crate::error::{Error, Result};
use crate::network::{NodeRequest, NodeResponse, NodeTransport};
use crate::types::NodeAddr;
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Node transport that dispatches to in-process engines.
///
/// Unknown and crashed nodes fail with [`Error::NodeUnavailable`], the same
/// way an unreachable TCP node does.
#[derive(Debug, Default)]
pub struct LocalTransport {
    nodes: DashMap<NodeAddr, Arc<NodeHandler>>,
    engines: DashMap<NodeAddr, Arc<CacheEngine>>,
    crashed: DashSet<NodeAddr>,
    registered: DashSet<NodeAddr>,
    delay: RwLock<Option<Duration>>,
    calls: AtomicU64,
}

impl LocalTransport {
    /// Create a transport serving one fresh engine per address.
    pub fn with_nodes(addrs: &[NodeAddr]) -> Self {
        let transport = Self::default();
        for addr in addrs {
            transport.add_node(addr.clone());
        }
        transport
    }

    /// Start serving `addr` from a fresh engine.
    pub fn add_node(&self, addr: impl Into<NodeAddr>) -> Arc<CacheEngine> {
        let addr = addr.into();
        let engine = Arc::new(CacheEngine::new());
        let handler = Arc::new(NodeHandler::new(engine.clone(), NodeConfig::default()));
        self.nodes.insert(addr.clone(), handler);
        self.engines.insert(addr, engine.clone());
        engine
    }

    /// The engine behind `addr`.
    pub fn engine(&self, addr: &str) -> Option<Arc<CacheEngine>> {
        self.engines.get(addr).map(|e| e.clone())
    }

    /// Make every call to `addr` fail until [`recover_node`](Self::recover_node).
    pub fn crash_node(&self, addr: &str) {
        self.crashed.insert(addr.to_string());
    }

    pub fn recover_node(&self, addr: &str) {
        self.crashed.remove(addr);
    }

    /// Delay every call by `delay`.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.write() = delay;
    }

    /// Calls attempted, failed ones included.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Whether `addr` was passed to [`NodeTransport::register`].
    pub fn is_registered(&self, addr: &str) -> bool {
        self.registered.contains(addr)
    }
}

#[async_trait]
impl NodeTransport for LocalTransport {
    async fn call(&self, node: &str, request: NodeRequest) -> Result<NodeResponse> {
        self.calls.fetch_add(1, Ordering::Relaxed);

        let delay = *self.delay.read();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.crashed.contains(node) {
            return Err(Error::node_unavailable(node, request.operation(), "node crashed"));
        }
        let handler = self
            .nodes
            .get(node)
            .map(|h| h.clone())
            .ok_or_else(|| Error::node_unavailable(node, request.operation(), "unknown node"))?;

        Ok(handler.execute(request).await)
    }

    fn register(&self, nodes: &[NodeAddr]) {
        for addr in nodes {
            self.registered.insert(addr.clone());
        }
    }
}
