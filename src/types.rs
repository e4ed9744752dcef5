//! Core types shared by the proxy and node tiers.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Address of a storage node, as registered in the hash ring (`host:port`).
pub type NodeAddr = String;

/// Separator between the namespace name and the raw client key.
pub const KEY_SEPARATOR: char = ':';

/// Build the fully-qualified key a namespace's raw key is stored under.
pub fn qualified_key(namespace: &str, raw_key: &str) -> String {
    let mut key = String::with_capacity(namespace.len() + 1 + raw_key.len());
    key.push_str(namespace);
    key.push(KEY_SEPARATOR);
    key.push_str(raw_key);
    key
}

/// Whole seconds left on a TTL, rounded up so a fresh 60s entry reports 60.
pub fn ttl_secs_ceil(remaining: Duration) -> u64 {
    let secs = remaining.as_secs();
    if remaining.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

/// A value found on a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheValue {
    /// The stored bytes.
    pub value: Vec<u8>,
    /// Seconds until expiry, `None` if the entry never expires.
    pub ttl_remaining_secs: Option<u64>,
}

/// Node statistics snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Number of live entries.
    pub total_keys: u64,
    /// Approximate bytes used by keys and values.
    pub memory_used_bytes: u64,
    /// Seconds since the engine was created.
    pub uptime_seconds: u64,
    /// Number of get/set/delete requests served.
    pub requests_total: u64,
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
}

/// Health of a single node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeHealth {
    pub healthy: bool,
    pub message: String,
}

/// Result of a proxied get.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetReply {
    pub found: bool,
    pub value: Option<Vec<u8>>,
    pub ttl_remaining_secs: Option<u64>,
    pub node_served: NodeAddr,
}

/// Result of a proxied set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetReply {
    pub success: bool,
    pub message: String,
    pub node_served: NodeAddr,
}

/// Result of a proxied delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteReply {
    pub success: bool,
    pub existed: bool,
    pub node_served: NodeAddr,
}

/// Result of a proxied batch get. Missing or unreachable keys are omitted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchGetReply {
    pub results: HashMap<String, Vec<u8>>,
    pub nodes_used: Vec<NodeAddr>,
}

/// Aggregated proxy health.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyHealth {
    pub healthy: bool,
    pub namespaces_count: usize,
    pub nodes_healthy: usize,
    pub nodes_total: usize,
    pub message: String,
}
