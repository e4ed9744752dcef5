//! Partitioning module for distributing namespaced keys across storage nodes.
//!
//! This module implements consistent hashing for key routing, ensuring:
//! - Even distribution of keys across nodes
//! - Minimal key redistribution when nodes join/leave
//! - Deterministic routing for a fixed membership
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        HashRing                              │
//! │  ┌─────┐ ┌─────┐ ┌─────┐ ┌─────┐ ┌─────┐ ┌─────┐           │
//! │  │n0#3 │→│n1#0 │→│n2#7 │→│n0#1 │→│n1#9 │→│n2#2 │ → (wrap)  │
//! │  └─────┘ └─────┘ └─────┘ └─────┘ └─────┘ └─────┘           │
//! │        150 virtual nodes per physical node                   │
//! │                                                              │
//! │  "game-app:score:alice" → xxhash64 → next vnode → n1        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust
//! use shardcache::partitioning::HashRing;
//!
//! let mut ring = HashRing::new();
//! ring.add_node("10.0.0.1:7001");
//! ring.add_node("10.0.0.2:7001");
//!
//! let owner = ring.resolve("game-app:score:alice").unwrap();
//! assert!(ring.contains_node(owner));
//! ```

mod hashring;

pub use hashring::{HashRing, DEFAULT_VNODES_PER_NODE};
