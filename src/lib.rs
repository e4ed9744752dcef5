//! Multi-tenant sharded in-memory cache.
//!
//! A fleet of stateless storage nodes sits behind a proxy tier. Tenants
//! (namespaces) are isolated by API key; each namespace's keys are prefixed
//! with its name and routed to one node with consistent hashing.
//!
//! - **Moka** for the node-local TTL store
//! - **xxHash64** virtual-node ring for key placement
//! - **ArcSwap** snapshots for namespaces and membership that change at
//!   runtime without locking readers
//!
//! # Example
//!
//! ```rust,no_run
//! use shardcache::cache::CacheNode;
//! use shardcache::config::{Config, Namespace, NodeConfig, ProxyConfig};
//! use shardcache::hotswap::ConfigHotSwap;
//! use shardcache::network::ProxyClient;
//! use shardcache::proxy::ProxyServer;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let node = CacheNode::start(NodeConfig::new("127.0.0.1:7001".parse()?)).await?;
//!
//!     let tenants = Config::new(vec![Namespace::new("game-app", "K1").with_default_ttl(60)]);
//!     let state = Arc::new(ConfigHotSwap::new(tenants, 150)?);
//!     let proxy_config = ProxyConfig::new("127.0.0.1:7000".parse()?)
//!         .with_nodes(vec![node.local_addr().to_string()]);
//!     let proxy = ProxyServer::start(proxy_config, state).await?;
//!
//!     let client = ProxyClient::connect("127.0.0.1:7000").await?;
//!     client.set("K1", "score:alice", "42", 0).await?;
//!     let reply = client.get("K1", "score:alice").await?;
//!     assert!(reply.found);
//!
//!     proxy.shutdown().await;
//!     node.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   ProxyRequest    ┌──────────────────────────────┐
//! │    client    │ ────────────────▶ │            proxy             │
//! └──────────────┘                   │  authenticate → rate limit   │
//!                                    │  "ns:key" → HashRing.resolve │
//!        ConfigSource ──▶ watcher ──▶│  ConfigHotSwap (ArcSwap)     │
//!                                    └──────────────┬───────────────┘
//!                                                   │ NodeRequest
//!                          ┌────────────────────────┼────────────────────────┐
//!                          ▼                        ▼                        ▼
//!                   ┌─────────────┐          ┌─────────────┐          ┌─────────────┐
//!                   │   node n0   │          │   node n1   │          │   node n2   │
//!                   │ CacheEngine │          │ CacheEngine │          │ CacheEngine │
//!                   └─────────────┘          └─────────────┘          └─────────────┘
//! ```
//!
//! # Consistency Model
//!
//! - Each key lives on exactly one node; there is no replication.
//! - Concurrent sets on one key are last-writer-wins.
//! - A request sees one configuration version from authentication to routing.

pub mod cache;
pub mod config;
pub mod error;
pub mod hotswap;
pub mod metrics;
pub mod network;
pub mod partitioning;
pub mod proxy;
pub mod registry;
pub mod testing;
pub mod types;

// Re-export main types for convenience
pub use cache::{CacheEngine, CacheNode};
pub use config::{Config, EvictionPolicy, Namespace, NodeConfig, ProxyConfig};
pub use error::{Error, ErrorKind, Result};
pub use hotswap::{ConfigHotSwap, ConfigSource, ConfigWatcher, MemoryConfigSource, RoutingSnapshot};
pub use partitioning::HashRing;
pub use proxy::{ProxyRouter, ProxyServer};
pub use registry::NamespaceRegistry;
pub use types::{CacheStats, NodeAddr};

// Re-export metrics types
pub use metrics::{Counter, LabeledCounter, NodeMetrics, ProxyMetrics, ProxyMetricsSnapshot};

// Re-export network types
pub use network::{NodePool, NodeTransport, ProxyClient};
