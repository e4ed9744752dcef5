//! Outbound connections: the proxy's node connection pool and a client for
//! the proxy protocol.

use crate::error::{Error, NetworkError, Result};
use crate::network::rpc::{read_frame, write_frame, Message, NodeRequest, NodeResponse, ProxyRequest, ProxyResponse};
use crate::types::{BatchGetReply, DeleteReply, GetReply, NodeAddr, ProxyHealth, SetReply};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// Sends node RPCs on behalf of the proxy.
///
/// The router depends on this trait rather than on TCP so routing can be
/// exercised against in-process nodes.
#[async_trait]
pub trait NodeTransport: Send + Sync + std::fmt::Debug + 'static {
    /// Send `request` to `node` and wait for its reply.
    async fn call(&self, node: &str, request: NodeRequest) -> Result<NodeResponse>;

    /// Make endpoints for `nodes` known without connecting to them.
    fn register(&self, _nodes: &[NodeAddr]) {}
}

/// Settings for [`NodePool`].
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Deadline for establishing a connection.
    pub connect_timeout: Duration,
    /// Deadline for one whole call, connection included.
    pub request_timeout: Duration,
    /// Idle connections kept per node.
    pub max_idle_per_node: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(500),
            request_timeout: Duration::from_secs(2),
            max_idle_per_node: 16,
        }
    }
}

/// A storage node as seen from the proxy: its address, pooled idle
/// connections and the outcome of the last call.
#[derive(Debug)]
pub struct NodeEndpoint {
    addr: NodeAddr,
    idle: Mutex<Vec<TcpStream>>,
    healthy: AtomicBool,
    connections_created: AtomicU64,
}

impl NodeEndpoint {
    fn new(addr: NodeAddr) -> Self {
        Self {
            addr,
            idle: Mutex::new(Vec::new()),
            // Unknown until the first call; assume reachable.
            healthy: AtomicBool::new(true),
            connections_created: AtomicU64::new(0),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Outcome of the most recent call.
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    /// Connections dialed over the endpoint's lifetime.
    pub fn connections_created(&self) -> u64 {
        self.connections_created.load(Ordering::Relaxed)
    }

    pub fn idle_connections(&self) -> usize {
        self.idle.lock().len()
    }

    async fn connect(&self, timeout: Duration) -> Result<TcpStream> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(self.addr.as_str()))
            .await
            .map_err(|_| NetworkError::ConnectionFailed {
                addr: self.addr.clone(),
                reason: format!("connect timed out after {:?}", timeout),
            })?
            .map_err(|e| NetworkError::ConnectionFailed {
                addr: self.addr.clone(),
                reason: e.to_string(),
            })?;
        stream.set_nodelay(true).map_err(NetworkError::Io)?;
        self.connections_created.fetch_add(1, Ordering::Relaxed);
        debug!(node = %self.addr, "Opened node connection");
        Ok(stream)
    }

    async fn read_reply(stream: &mut TcpStream) -> Result<Message> {
        read_frame(stream).await?.ok_or(Error::Network(NetworkError::ConnectionClosed))
    }

    /// Pop an idle connection the node has not closed. Closed ones are dropped.
    fn checkout(&self) -> Option<TcpStream> {
        let mut idle = self.idle.lock();
        while let Some(stream) = idle.pop() {
            let mut peek = [0u8; 1];
            match stream.try_read(&mut peek) {
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Some(stream),
                // EOF, a socket error or unsolicited bytes.
                _ => debug!(node = %self.addr, "Dropping closed pooled connection"),
            }
        }
        None
    }

    /// One request/response on a pooled or fresh connection.
    ///
    /// A pooled connection that fails before the request is written is
    /// replaced by a fresh dial to the same node. Once the request has been
    /// written, only a read-only request is sent again. The request is never
    /// sent to a different node.
    async fn round_trip(&self, msg: &Message, read_only: bool, config: &PoolConfig) -> Result<Message> {
        if let Some(mut stream) = self.checkout() {
            match write_frame(&mut stream, msg).await {
                Ok(()) => match Self::read_reply(&mut stream).await {
                    Ok(reply) => {
                        self.release(stream, config);
                        return Ok(reply);
                    }
                    Err(e) if read_only => {
                        debug!(node = %self.addr, error = %e, "Pooled connection failed after send, redialing");
                    }
                    Err(e) => return Err(e),
                },
                Err(e) => {
                    debug!(node = %self.addr, error = %e, "Pooled connection failed before send, redialing");
                }
            }
        }

        let mut stream = self.connect(config.connect_timeout).await?;
        write_frame(&mut stream, msg).await?;
        let reply = Self::read_reply(&mut stream).await?;
        self.release(stream, config);
        Ok(reply)
    }

    fn release(&self, stream: TcpStream, config: &PoolConfig) {
        let mut idle = self.idle.lock();
        if idle.len() < config.max_idle_per_node {
            idle.push(stream);
        }
    }

    async fn call(&self, request: NodeRequest, config: &PoolConfig) -> Result<NodeResponse> {
        let operation = request.operation();
        let read_only = request.is_read_only();
        let msg = Message::NodeRequest(request);

        let round_trip = self.round_trip(&msg, read_only, config);
        let outcome = match tokio::time::timeout(config.request_timeout, round_trip).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout),
        };

        let result = match outcome {
            Ok(Message::NodeResponse(resp)) => Ok(resp),
            Ok(Message::Error(e)) => Err(e.into_error()),
            Ok(other) => Err(NetworkError::UnexpectedResponse(format!("{:?}", other)).into()),
            Err(e) => Err(e),
        };

        match result {
            Ok(resp) => {
                self.healthy.store(true, Ordering::Relaxed);
                Ok(resp)
            }
            Err(e) => {
                self.healthy.store(false, Ordering::Relaxed);
                warn!(node = %self.addr, operation, error = %e, "Node call failed");
                Err(Error::node_unavailable(self.addr.clone(), operation, e))
            }
        }
    }
}

/// Pool of node endpoints keyed by address.
///
/// Endpoints are created on first use (or on [`NodeTransport::register`]);
/// creation is idempotent under concurrent first requests. Endpoints of nodes
/// that left the ring are kept until the pool is dropped.
#[derive(Debug, Default)]
pub struct NodePool {
    endpoints: DashMap<NodeAddr, Arc<NodeEndpoint>>,
    config: PoolConfig,
}

impl NodePool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            endpoints: DashMap::new(),
            config,
        }
    }

    /// Get or create the endpoint for `addr`.
    pub fn endpoint(&self, addr: &str) -> Arc<NodeEndpoint> {
        if let Some(existing) = self.endpoints.get(addr) {
            return existing.clone();
        }
        self.endpoints
            .entry(addr.to_string())
            .or_insert_with(|| Arc::new(NodeEndpoint::new(addr.to_string())))
            .clone()
    }

    /// Number of endpoints known to the pool.
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Last known health of `addr`, if the pool has seen it.
    pub fn last_known_health(&self, addr: &str) -> Option<bool> {
        self.endpoints.get(addr).map(|e| e.is_healthy())
    }
}

#[async_trait]
impl NodeTransport for NodePool {
    async fn call(&self, node: &str, request: NodeRequest) -> Result<NodeResponse> {
        self.endpoint(node).call(request, &self.config).await
    }

    fn register(&self, nodes: &[NodeAddr]) {
        for addr in nodes {
            self.endpoint(addr);
        }
    }
}

/// Client for the proxy protocol over a single connection.
#[derive(Debug)]
pub struct ProxyClient {
    stream: tokio::sync::Mutex<TcpStream>,
}

impl ProxyClient {
    /// Connect to a proxy.
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| NetworkError::ConnectionFailed {
                addr: addr.to_string(),
                reason: e.to_string(),
            })?;
        stream.set_nodelay(true).map_err(NetworkError::Io)?;
        Ok(Self {
            stream: tokio::sync::Mutex::new(stream),
        })
    }

    async fn request(&self, request: ProxyRequest) -> Result<ProxyResponse> {
        let mut stream = self.stream.lock().await;
        write_frame(&mut *stream, &Message::ProxyRequest(request)).await?;
        match read_frame(&mut *stream).await? {
            Some(Message::ProxyResponse(resp)) => Ok(resp),
            Some(Message::Error(e)) => Err(e.into_error()),
            Some(other) => Err(NetworkError::UnexpectedResponse(format!("{:?}", other)).into()),
            None => Err(NetworkError::ConnectionClosed.into()),
        }
    }

    pub async fn get(&self, api_key: &str, key: &str) -> Result<GetReply> {
        match self
            .request(ProxyRequest::Get {
                api_key: api_key.to_string(),
                key: key.to_string(),
            })
            .await?
        {
            ProxyResponse::Get(reply) => Ok(reply),
            other => Err(unexpected(other)),
        }
    }

    pub async fn set(&self, api_key: &str, key: &str, value: impl Into<Vec<u8>>, ttl_seconds: i64) -> Result<SetReply> {
        match self
            .request(ProxyRequest::Set {
                api_key: api_key.to_string(),
                key: key.to_string(),
                value: value.into(),
                ttl_seconds,
            })
            .await?
        {
            ProxyResponse::Set(reply) => Ok(reply),
            other => Err(unexpected(other)),
        }
    }

    pub async fn delete(&self, api_key: &str, key: &str) -> Result<DeleteReply> {
        match self
            .request(ProxyRequest::Delete {
                api_key: api_key.to_string(),
                key: key.to_string(),
            })
            .await?
        {
            ProxyResponse::Delete(reply) => Ok(reply),
            other => Err(unexpected(other)),
        }
    }

    pub async fn batch_get(&self, api_key: &str, keys: &[&str]) -> Result<BatchGetReply> {
        match self
            .request(ProxyRequest::BatchGet {
                api_key: api_key.to_string(),
                keys: keys.iter().map(|k| k.to_string()).collect(),
            })
            .await?
        {
            ProxyResponse::BatchGet(reply) => Ok(reply),
            other => Err(unexpected(other)),
        }
    }

    pub async fn health(&self) -> Result<ProxyHealth> {
        match self.request(ProxyRequest::Health).await? {
            ProxyResponse::Health(reply) => Ok(reply),
            other => Err(unexpected(other)),
        }
    }
}

fn unexpected(resp: ProxyResponse) -> Error {
    NetworkError::UnexpectedResponse(format!("{:?}", resp)).into()
}
