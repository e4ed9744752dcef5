//! Consistent hashing implementation with virtual nodes.
//!
//! This module implements a consistent hash ring for distributing namespaced
//! keys across storage nodes. Each physical node is represented by multiple
//! virtual nodes (vnodes) to ensure even key distribution.

use crate::error::{Error, Result};
use crate::types::NodeAddr;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use twox_hash::XxHash64;

/// Number of virtual nodes per physical node.
/// More vnodes = more even distribution but higher memory usage.
pub const DEFAULT_VNODES_PER_NODE: usize = 150;

/// A consistent hash ring mapping keys to node addresses.
#[derive(Debug, Clone)]
pub struct HashRing {
    /// Virtual nodes mapped to their owning physical nodes.
    /// The key is the hash position on the ring, value is the node address.
    vnodes: BTreeMap<u64, NodeAddr>,

    /// Number of virtual nodes per physical node.
    vnodes_per_node: usize,

    /// Physical nodes in insertion order.
    nodes: Vec<NodeAddr>,
}

impl HashRing {
    /// Create a new empty hash ring with the default vnode count.
    pub fn new() -> Self {
        Self::with_vnodes(DEFAULT_VNODES_PER_NODE)
    }

    /// Create a new empty hash ring with a custom vnode count.
    pub fn with_vnodes(vnodes_per_node: usize) -> Self {
        Self {
            vnodes: BTreeMap::new(),
            vnodes_per_node: vnodes_per_node.max(1),
            nodes: Vec::new(),
        }
    }

    /// Build a ring over `addresses`, in order.
    pub fn from_nodes<I, S>(vnodes_per_node: usize, addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeAddr>,
    {
        let mut ring = Self::with_vnodes(vnodes_per_node);
        for addr in addresses {
            ring.add_node(addr);
        }
        ring
    }

    /// Number of virtual nodes per physical node.
    pub fn vnodes_per_node(&self) -> usize {
        self.vnodes_per_node
    }

    /// Number of distinct physical nodes.
    pub fn size(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Physical nodes in insertion order.
    pub fn nodes(&self) -> &[NodeAddr] {
        &self.nodes
    }

    /// Check if a node is in the ring.
    pub fn contains_node(&self, addr: &str) -> bool {
        self.nodes.iter().any(|n| n == addr)
    }

    /// Whether the ring holds exactly `addresses`, ignoring order.
    pub fn has_membership(&self, addresses: &[NodeAddr]) -> bool {
        let mut current: Vec<&str> = self.nodes.iter().map(String::as_str).collect();
        let mut wanted: Vec<&str> = addresses.iter().map(String::as_str).collect();
        current.sort_unstable();
        wanted.sort_unstable();
        wanted.dedup();
        current == wanted
    }

    /// Add a node to the ring.
    ///
    /// Creates `vnodes_per_node` positions hashed from `addr#0 .. addr#(R-1)`.
    /// Re-adding a present node is a no-op.
    pub fn add_node(&mut self, addr: impl Into<NodeAddr>) {
        let addr = addr.into();
        if self.contains_node(&addr) {
            return;
        }

        for i in 0..self.vnodes_per_node {
            let hash = Self::vnode_hash(&addr, i);
            // On the (astronomically rare) collision the earlier node keeps
            // the position, so the result does not depend on later inserts.
            self.vnodes.entry(hash).or_insert_with(|| addr.clone());
        }
        self.nodes.push(addr);
    }

    /// Remove a node from the ring, rebuilding the position set without it.
    pub fn remove_node(&mut self, addr: &str) {
        if !self.contains_node(addr) {
            return;
        }

        let remaining: Vec<NodeAddr> = self.nodes.iter().filter(|n| *n != addr).cloned().collect();
        self.replace(remaining);
    }

    /// Replace the whole membership, rebuilding from scratch.
    pub fn replace<I, S>(&mut self, addresses: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeAddr>,
    {
        *self = Self::from_nodes(self.vnodes_per_node, addresses);
    }

    /// Resolve the node owning `key`.
    ///
    /// Fails with [`Error::Routing`] when the ring is empty.
    pub fn resolve(&self, key: &str) -> Result<&NodeAddr> {
        let hash = Self::hash_key(key.as_bytes());
        self.owner_at_position(hash).ok_or(Error::Routing)
    }

    /// Calculate the hash of a key using xxHash64.
    fn hash_key(key: &[u8]) -> u64 {
        let mut hasher = XxHash64::with_seed(0);
        key.hash(&mut hasher);
        hasher.finish()
    }

    fn vnode_hash(addr: &str, index: usize) -> u64 {
        let vnode_key = format!("{}#{}", addr, index);
        Self::hash_key(vnode_key.as_bytes())
    }

    /// Get the node that owns a specific position on the ring.
    fn owner_at_position(&self, hash: u64) -> Option<&NodeAddr> {
        // First vnode >= hash, or wrap around to the smallest.
        self.vnodes
            .range(hash..)
            .next()
            .or_else(|| self.vnodes.iter().next())
            .map(|(_, addr)| addr)
    }

    /// Get the distribution of keys across nodes for a sample.
    ///
    /// This is useful for testing/monitoring key distribution.
    pub fn get_distribution(&self, sample_size: usize) -> HashMap<NodeAddr, usize> {
        let mut distribution = HashMap::new();

        for i in 0..sample_size {
            let key = format!("sample_key_{}", i);
            if let Ok(owner) = self.resolve(&key) {
                *distribution.entry(owner.clone()).or_insert(0) += 1;
            }
        }

        distribution
    }
}

impl Default for HashRing {
    fn default() -> Self {
        Self::new()
    }
}
