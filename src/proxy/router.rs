//! Request routing: authenticate, qualify the key, resolve the owning node
//! and forward.

use super::rate_limit::NamespaceRateLimiter;
use crate::config::Namespace;
use crate::error::{Error, Result};
use crate::hotswap::{ConfigHotSwap, RoutingSnapshot};
use crate::metrics::ProxyMetrics;
use crate::network::{NodeRequest, NodeResponse, NodeTransport};
use crate::types::{
    qualified_key, BatchGetReply, DeleteReply, GetReply, NodeAddr, ProxyHealth, SetReply,
};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Entry point for all tenant traffic.
///
/// Every request reads the routing snapshot once, so the namespace lookup and
/// the ring resolution always come from the same configuration version.
#[derive(Debug)]
pub struct ProxyRouter {
    state: Arc<ConfigHotSwap>,
    transport: Arc<dyn NodeTransport>,
    limiter: NamespaceRateLimiter,
    metrics: ProxyMetrics,
    apply_default_ttl: bool,
    /// Snapshot version the limiter and metrics were last pruned against.
    pruned_version: AtomicU64,
}

impl ProxyRouter {
    pub fn new(state: Arc<ConfigHotSwap>, transport: Arc<dyn NodeTransport>) -> Self {
        Self {
            state,
            transport,
            limiter: NamespaceRateLimiter::new(),
            metrics: ProxyMetrics::new(),
            apply_default_ttl: false,
            pruned_version: AtomicU64::new(0),
        }
    }

    /// Substitute the namespace's `defaultTTL` when a set carries `ttl == 0`.
    pub fn with_apply_default_ttl(mut self, enabled: bool) -> Self {
        self.apply_default_ttl = enabled;
        self
    }

    /// Look up the namespace owning `api_key` in the active snapshot.
    pub fn authenticate(&self, api_key: &str) -> Option<Arc<Namespace>> {
        self.state.snapshot().registry.by_api_key(api_key).cloned()
    }

    /// The key a namespace's raw key is stored under on the nodes.
    pub fn namespace_key(namespace: &Namespace, raw_key: &str) -> String {
        qualified_key(&namespace.name, raw_key)
    }

    /// Authenticate and rate-limit one request.
    fn admit(
        &self,
        api_key: &str,
        operation: &'static str,
    ) -> Result<(Arc<RoutingSnapshot>, Arc<Namespace>)> {
        let snapshot = self.state.snapshot();
        self.prune_to(&snapshot);
        let Some(namespace) = snapshot.registry.by_api_key(api_key).cloned() else {
            self.metrics.auth_failures.inc();
            debug!(operation, "Rejected request with unknown api key");
            return Err(Error::Authentication);
        };

        if let Err(e) = self.limiter.check(&namespace) {
            self.metrics.rate_limited.inc();
            debug!(namespace = %namespace.name, operation, "Request rate limited");
            return Err(e);
        }

        self.metrics
            .requests
            .inc([namespace.name.as_str(), operation]);
        Ok((snapshot, namespace))
    }

    /// Drop rate-limit buckets and metric series for namespaces and nodes
    /// that are gone from `snapshot`. Runs once per snapshot version.
    fn prune_to(&self, snapshot: &RoutingSnapshot) {
        if self.pruned_version.fetch_max(snapshot.version, Ordering::AcqRel) >= snapshot.version {
            return;
        }
        let registry = &snapshot.registry;
        self.limiter.retain(|name| registry.by_name(name).is_some());
        self.metrics
            .requests
            .retain(|[namespace, _]| registry.by_name(namespace).is_some());
        self.metrics
            .node_errors
            .retain(|[node]| snapshot.ring.contains_node(node));
    }

    async fn forward(&self, node: &str, request: NodeRequest) -> Result<NodeResponse> {
        match self.transport.call(node, request).await {
            Ok(resp) => Ok(resp),
            Err(e) => {
                self.metrics.node_errors.inc([node]);
                Err(e)
            }
        }
    }

    /// Fetch a key for the namespace owning `api_key`.
    pub async fn get(&self, api_key: &str, raw_key: &str) -> Result<GetReply> {
        let (snapshot, namespace) = self.admit(api_key, "get")?;
        let key = Self::namespace_key(&namespace, raw_key);
        let node = snapshot.ring.resolve(&key)?.clone();
        debug!(namespace = %namespace.name, key = %key, node = %node, "Routing get");

        match self.forward(&node, NodeRequest::Get { key }).await? {
            NodeResponse::Get(found) => Ok(GetReply {
                found: found.is_some(),
                ttl_remaining_secs: found.as_ref().and_then(|v| v.ttl_remaining_secs),
                value: found.map(|v| v.value),
                node_served: node,
            }),
            other => Err(unexpected(&node, "get", &other)),
        }
    }

    /// Store a value.
    ///
    /// The TTL is forwarded as given and interpreted by the node. With
    /// [`with_apply_default_ttl`](Self::with_apply_default_ttl) enabled, a TTL
    /// of zero picks up the namespace's default TTL when it has one.
    pub async fn set(
        &self,
        api_key: &str,
        raw_key: &str,
        value: Vec<u8>,
        ttl_seconds: i64,
    ) -> Result<SetReply> {
        let (snapshot, namespace) = self.admit(api_key, "set")?;
        let key = Self::namespace_key(&namespace, raw_key);
        let node = snapshot.ring.resolve(&key)?.clone();

        let ttl_seconds = if self.apply_default_ttl
            && ttl_seconds == 0
            && namespace.default_ttl_seconds > 0
        {
            namespace.default_ttl_seconds
        } else {
            ttl_seconds
        };
        debug!(namespace = %namespace.name, key = %key, node = %node, ttl_seconds, "Routing set");

        let request = NodeRequest::Set {
            key,
            value,
            ttl_seconds,
        };
        match self.forward(&node, request).await? {
            NodeResponse::Set { success } => Ok(SetReply {
                success,
                message: if success { "stored" } else { "node rejected write" }.to_string(),
                node_served: node,
            }),
            other => Err(unexpected(&node, "set", &other)),
        }
    }

    /// Remove a key. `existed` reports whether it was present beforehand.
    pub async fn delete(&self, api_key: &str, raw_key: &str) -> Result<DeleteReply> {
        let (snapshot, namespace) = self.admit(api_key, "delete")?;
        let key = Self::namespace_key(&namespace, raw_key);
        let node = snapshot.ring.resolve(&key)?.clone();
        debug!(namespace = %namespace.name, key = %key, node = %node, "Routing delete");

        match self.forward(&node, NodeRequest::Delete { key }).await? {
            NodeResponse::Delete { success, existed } => Ok(DeleteReply {
                success,
                existed,
                node_served: node,
            }),
            other => Err(unexpected(&node, "delete", &other)),
        }
    }

    /// Fetch many keys at once.
    ///
    /// Keys are routed independently and fetched concurrently. Keys that are
    /// missing or whose node fails are left out of the result. `nodes_used`
    /// lists the nodes that answered.
    pub async fn batch_get(&self, api_key: &str, raw_keys: &[String]) -> Result<BatchGetReply> {
        let (snapshot, namespace) = self.admit(api_key, "batch_get")?;
        if raw_keys.is_empty() {
            return Ok(BatchGetReply::default());
        }

        let mut tasks = JoinSet::new();
        for raw_key in raw_keys {
            let key = Self::namespace_key(&namespace, raw_key);
            let node = snapshot.ring.resolve(&key)?.clone();
            let transport = self.transport.clone();
            let raw_key = raw_key.clone();
            tasks.spawn(async move {
                let outcome = transport.call(&node, NodeRequest::Get { key }).await;
                (raw_key, node, outcome)
            });
        }

        let mut reply = BatchGetReply::default();
        let mut nodes_used = BTreeSet::new();
        while let Some(joined) = tasks.join_next().await {
            let (raw_key, node, outcome) = match joined {
                Ok(done) => done,
                Err(e) => {
                    warn!(error = %e, "Batch get task failed");
                    continue;
                }
            };
            match outcome {
                Ok(NodeResponse::Get(found)) => {
                    if let Some(found) = found {
                        reply.results.insert(raw_key, found.value);
                    }
                    nodes_used.insert(node);
                }
                Ok(other) => {
                    debug!(node = %node, response = ?other, "Omitting key after unexpected response");
                }
                Err(e) => {
                    self.metrics.node_errors.inc([node.as_str()]);
                    debug!(node = %node, key = %raw_key, error = %e, "Omitting key from batch result");
                }
            }
        }

        reply.nodes_used = nodes_used.into_iter().collect();
        Ok(reply)
    }

    /// Ask every node in the ring for its health.
    ///
    /// The proxy is healthy while at least one node is.
    pub async fn health(&self) -> ProxyHealth {
        let snapshot = self.state.snapshot();
        self.prune_to(&snapshot);
        let nodes_total = snapshot.ring.size();

        let mut tasks = JoinSet::new();
        for node in snapshot.ring.nodes().iter().cloned() {
            let transport = self.transport.clone();
            tasks.spawn(async move {
                let outcome = transport.call(&node, NodeRequest::Health).await;
                (node, outcome)
            });
        }

        let mut nodes_healthy = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(NodeResponse::Health(health)))) if health.healthy => nodes_healthy += 1,
                Ok((node, Ok(other))) => {
                    debug!(node = %node, response = ?other, "Node reported unhealthy");
                }
                Ok((node, Err(e))) => {
                    self.metrics.node_errors.inc([node.as_str()]);
                    debug!(node = %node, error = %e, "Health check failed");
                }
                Err(e) => warn!(error = %e, "Health check task failed"),
            }
        }

        let message = if nodes_total == 0 {
            "no nodes in ring".to_string()
        } else {
            format!("{}/{} nodes healthy", nodes_healthy, nodes_total)
        };

        ProxyHealth {
            healthy: nodes_healthy > 0,
            namespaces_count: snapshot.registry.len(),
            nodes_healthy,
            nodes_total,
            message,
        }
    }

    /// Replace the ring membership.
    ///
    /// Endpoints for new addresses are registered without connecting.
    /// Endpoints of removed nodes stay in the pool.
    pub fn set_nodes(&self, addresses: &[NodeAddr]) {
        self.transport.register(addresses);
        let snapshot = self.state.set_nodes(addresses);
        self.prune_to(&snapshot);
        info!(
            version = snapshot.version,
            nodes = snapshot.ring.size(),
            "Replaced ring membership"
        );
    }

    pub fn state(&self) -> &Arc<ConfigHotSwap> {
        &self.state
    }

    pub fn metrics(&self) -> &ProxyMetrics {
        &self.metrics
    }

    pub fn rate_limiter(&self) -> &NamespaceRateLimiter {
        &self.limiter
    }
}

fn unexpected(node: &str, operation: &'static str, response: &NodeResponse) -> Error {
    Error::node_unavailable(node, operation, format!("unexpected response {:?}", response))
}
