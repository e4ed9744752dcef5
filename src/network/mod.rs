//! Network communication layer.

pub mod client;
pub mod rpc;
pub mod server;

pub use client::{NodeEndpoint, NodePool, NodeTransport, PoolConfig, ProxyClient};
pub use rpc::{ErrorResponse, Message, NodeRequest, NodeResponse, ProxyRequest, ProxyResponse};
pub use server::{MessageHandler, NetworkServer};
