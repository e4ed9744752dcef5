//! Storage node: the TTL key-value engine and the server that exposes it.

pub mod storage;

use crate::config::NodeConfig;
use crate::error::Result;
use crate::network::rpc::{Message, NodeRequest, NodeResponse};
use crate::network::{MessageHandler, NetworkServer};
use crate::types::NodeHealth;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub use storage::{CacheEngine, CacheEntry};

/// Serves node RPCs from a [`CacheEngine`].
#[derive(Debug)]
pub struct NodeHandler {
    engine: Arc<CacheEngine>,
    config: NodeConfig,
}

impl NodeHandler {
    pub fn new(engine: Arc<CacheEngine>, config: NodeConfig) -> Self {
        Self { engine, config }
    }

    /// Execute one request against the engine.
    pub async fn execute(&self, request: NodeRequest) -> NodeResponse {
        match request {
            NodeRequest::Get { key } => NodeResponse::Get(self.engine.get(&key).await),
            NodeRequest::Set {
                key,
                value,
                ttl_seconds,
            } => {
                self.engine.set(key, value, ttl_seconds).await;
                NodeResponse::Set { success: true }
            }
            NodeRequest::Delete { key } => NodeResponse::Delete {
                success: true,
                existed: self.engine.delete(&key).await,
            },
            NodeRequest::Health => NodeResponse::Health(self.health().await),
            NodeRequest::Stats => NodeResponse::Stats(self.engine.stats().await),
        }
    }

    /// The node is healthy while it serves requests; budget overruns are
    /// reported in the message only, since nothing is evicted to honor them.
    async fn health(&self) -> NodeHealth {
        let stats = self.engine.stats().await;
        let mut notes = Vec::new();

        let max_bytes = self.config.max_memory_mb.saturating_mul(1024 * 1024);
        if max_bytes > 0 && stats.memory_used_bytes > max_bytes {
            notes.push(format!(
                "memory {} bytes over budget {} bytes",
                stats.memory_used_bytes, max_bytes
            ));
        }
        if self.config.max_keys > 0 && stats.total_keys > self.config.max_keys {
            notes.push(format!(
                "{} keys over budget {}",
                stats.total_keys, self.config.max_keys
            ));
        }

        let message = if notes.is_empty() {
            format!("ok: {} keys", stats.total_keys)
        } else {
            notes.join("; ")
        };

        NodeHealth {
            healthy: true,
            message,
        }
    }
}

#[async_trait]
impl MessageHandler for NodeHandler {
    async fn handle(&self, msg: Message) -> Message {
        match msg {
            Message::NodeRequest(request) => Message::NodeResponse(self.execute(request).await),
            other => {
                warn!(request = ?other, "Node received a non-node message");
                Message::Error(crate::network::rpc::ErrorResponse {
                    kind: crate::error::ErrorKind::Internal,
                    message: "storage nodes only accept node requests".to_string(),
                })
            }
        }
    }
}

/// A running storage node.
pub struct CacheNode {
    engine: Arc<CacheEngine>,
    local_addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    server_handle: JoinHandle<()>,
    sweep_handle: Option<JoinHandle<()>>,
}

impl CacheNode {
    /// Bind the listener and start serving.
    pub async fn start(config: NodeConfig) -> Result<Self> {
        if !config.eviction_policy.is_implemented() {
            warn!(
                policy = ?config.eviction_policy,
                "Eviction policy is not implemented; entries are removed by TTL only"
            );
        }

        let engine = Arc::new(CacheEngine::new());
        let handler = Arc::new(NodeHandler::new(engine.clone(), config.clone()));
        let (server, shutdown_tx) = NetworkServer::bind(config.listen_addr, handler).await?;
        let local_addr = server.local_addr();

        let server_handle = tokio::spawn(async move {
            if let Err(e) = server.run().await {
                tracing::error!(error = %e, "Node server error");
            }
        });

        let sweep_handle = config.sweep_interval.map(|interval| {
            let engine = engine.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    engine.run_pending_tasks().await;
                }
            })
        });

        info!(addr = %local_addr, "Cache node started");

        Ok(Self {
            engine,
            local_addr,
            shutdown_tx,
            server_handle,
            sweep_handle,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn engine(&self) -> &Arc<CacheEngine> {
        &self.engine
    }

    /// Stop accepting connections and wait for the accept loop to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        let _ = self.server_handle.await;
        if let Some(sweep) = self.sweep_handle {
            sweep.abort();
        }
        info!(addr = %self.local_addr, "Cache node stopped");
    }
}
