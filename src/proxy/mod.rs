//! Proxy tier: authenticates tenants and routes their requests to the node
//! owning each key.
//!
//! ```text
//!  client ──ProxyRequest──▶ ProxyHandler ──▶ ProxyRouter
//!                                              │ authenticate (registry)
//!                                              │ rate limit
//!                                              │ "ns:raw_key" → HashRing
//!                                              ▼
//!                                         NodeTransport ──NodeRequest──▶ node
//! ```

mod rate_limit;
mod router;

pub use rate_limit::NamespaceRateLimiter;
pub use router::ProxyRouter;

use crate::config::ProxyConfig;
use crate::error::{ErrorKind, Result};
use crate::hotswap::ConfigHotSwap;
use crate::network::{
    ErrorResponse, Message, MessageHandler, NetworkServer, NodePool, PoolConfig, ProxyRequest,
    ProxyResponse,
};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Serves the proxy protocol on top of a [`ProxyRouter`].
#[derive(Debug)]
pub struct ProxyHandler {
    router: Arc<ProxyRouter>,
}

impl ProxyHandler {
    pub fn new(router: Arc<ProxyRouter>) -> Self {
        Self { router }
    }

    /// Execute one client request.
    pub async fn execute(&self, request: ProxyRequest) -> Result<ProxyResponse> {
        let router = &self.router;
        Ok(match request {
            ProxyRequest::Get { api_key, key } => ProxyResponse::Get(router.get(&api_key, &key).await?),
            ProxyRequest::Set {
                api_key,
                key,
                value,
                ttl_seconds,
            } => ProxyResponse::Set(router.set(&api_key, &key, value, ttl_seconds).await?),
            ProxyRequest::Delete { api_key, key } => {
                ProxyResponse::Delete(router.delete(&api_key, &key).await?)
            }
            ProxyRequest::BatchGet { api_key, keys } => {
                ProxyResponse::BatchGet(router.batch_get(&api_key, &keys).await?)
            }
            ProxyRequest::Health => ProxyResponse::Health(router.health().await),
        })
    }
}

#[async_trait]
impl MessageHandler for ProxyHandler {
    async fn handle(&self, msg: Message) -> Message {
        match msg {
            Message::ProxyRequest(request) => match self.execute(request).await {
                Ok(resp) => Message::ProxyResponse(resp),
                Err(e) => Message::Error(ErrorResponse::from(&e)),
            },
            other => {
                warn!(request = ?other, "Proxy received a non-proxy message");
                Message::Error(ErrorResponse {
                    kind: ErrorKind::Internal,
                    message: "proxy only accepts proxy requests".to_string(),
                })
            }
        }
    }
}

/// A running proxy.
pub struct ProxyServer {
    router: Arc<ProxyRouter>,
    local_addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    server_handle: JoinHandle<()>,
}

impl ProxyServer {
    /// Build the node pool and router, then bind and start serving.
    ///
    /// A non-empty `config.nodes` replaces the ring membership held by `state`.
    pub async fn start(config: ProxyConfig, state: Arc<ConfigHotSwap>) -> Result<Self> {
        let pool = Arc::new(NodePool::new(PoolConfig {
            connect_timeout: config.connect_timeout,
            request_timeout: config.request_timeout,
            max_idle_per_node: config.max_idle_per_node,
        }));
        let router = Arc::new(
            ProxyRouter::new(state, pool).with_apply_default_ttl(config.apply_default_ttl),
        );
        if !config.nodes.is_empty() {
            router.set_nodes(&config.nodes);
        }

        let handler = Arc::new(ProxyHandler::new(router.clone()));
        let (server, shutdown_tx) = NetworkServer::bind(config.listen_addr, handler).await?;
        let local_addr = server.local_addr();

        let server_handle = tokio::spawn(async move {
            if let Err(e) = server.run().await {
                tracing::error!(error = %e, "Proxy server error");
            }
        });

        info!(addr = %local_addr, "Proxy started");

        Ok(Self {
            router,
            local_addr,
            shutdown_tx,
            server_handle,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn router(&self) -> &Arc<ProxyRouter> {
        &self.router
    }

    /// Stop accepting connections and wait for the accept loop to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        let _ = self.server_handle.await;
        info!(addr = %self.local_addr, "Proxy stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, Namespace};
    use crate::error::Error;
    use crate::testing::LocalTransport;
    use crate::types::NodeAddr;
    use std::time::Duration;

    fn nodes() -> Vec<NodeAddr> {
        vec!["n0".into(), "n1".into(), "n2".into()]
    }

    fn router_with(config: Config, transport: Arc<LocalTransport>) -> ProxyRouter {
        let state = Arc::new(ConfigHotSwap::new(config, 150).unwrap());
        let router = ProxyRouter::new(state, transport);
        router.set_nodes(&nodes());
        router
    }

    fn game_app() -> (ProxyRouter, Arc<LocalTransport>) {
        let transport = Arc::new(LocalTransport::with_nodes(&nodes()));
        let config = Config::new(vec![Namespace::new("game-app", "K1")]);
        (router_with(config, transport.clone()), transport)
    }

    #[tokio::test]
    async fn test_set_then_get_on_owning_node() {
        let (router, transport) = game_app();

        let set = router.set("K1", "score:alice", b"42".to_vec(), 60).await.unwrap();
        assert!(set.success);

        let expected = router
            .state()
            .snapshot()
            .ring
            .resolve("game-app:score:alice")
            .unwrap()
            .clone();
        assert_eq!(set.node_served, expected);

        let got = router.get("K1", "score:alice").await.unwrap();
        assert!(got.found);
        assert_eq!(got.value, Some(b"42".to_vec()));
        assert_eq!(got.ttl_remaining_secs, Some(60));
        assert_eq!(got.node_served, expected);

        // Stored under the qualified key on exactly one node.
        let owner = transport.engine(&expected).unwrap();
        assert!(owner.get("game-app:score:alice").await.is_some());
        for other in nodes().iter().filter(|n| **n != expected) {
            let engine = transport.engine(other).unwrap();
            assert!(engine.get("game-app:score:alice").await.is_none());
        }
    }

    #[tokio::test]
    async fn test_unknown_api_key_makes_no_node_call() {
        let (router, transport) = game_app();

        let err = router.get("K_invalid", "score:alice").await.unwrap_err();
        assert!(matches!(err, Error::Authentication));
        let err = router.batch_get("K_invalid", &["a".into()]).await.unwrap_err();
        assert!(matches!(err, Error::Authentication));

        assert_eq!(transport.calls(), 0);
        assert_eq!(router.metrics().snapshot().auth_failures, 2);
    }

    #[tokio::test]
    async fn test_unknown_api_key_with_empty_ring() {
        let transport = Arc::new(LocalTransport::default());
        let state = Arc::new(
            ConfigHotSwap::new(Config::new(vec![Namespace::new("game-app", "K1")]), 150).unwrap(),
        );
        let router = ProxyRouter::new(state, transport.clone());

        assert!(matches!(
            router.get("K_invalid", "k").await.unwrap_err(),
            Error::Authentication
        ));
        assert!(matches!(
            router.get("K1", "k").await.unwrap_err(),
            Error::Routing
        ));
        assert!(matches!(
            router.set("K1", "k", b"v".to_vec(), 0).await.unwrap_err(),
            Error::Routing
        ));
        assert!(matches!(
            router.batch_get("K1", &["k".into()]).await.unwrap_err(),
            Error::Routing
        ));
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_namespaces_are_isolated() {
        let transport = Arc::new(LocalTransport::with_nodes(&nodes()));
        let config = Config::new(vec![
            Namespace::new("game-app", "K1"),
            Namespace::new("chat", "K2"),
        ]);
        let router = router_with(config, transport);

        router.set("K1", "user", b"from-game".to_vec(), 0).await.unwrap();
        assert!(!router.get("K2", "user").await.unwrap().found);

        router.set("K2", "user", b"from-chat".to_vec(), 0).await.unwrap();
        assert_eq!(
            router.get("K1", "user").await.unwrap().value,
            Some(b"from-game".to_vec())
        );

        assert!(router.delete("K2", "user").await.unwrap().existed);
        assert!(router.get("K1", "user").await.unwrap().found);
    }

    #[tokio::test]
    async fn test_delete_reports_prior_existence() {
        let (router, _) = game_app();
        router.set("K1", "k", b"v".to_vec(), 0).await.unwrap();

        let first = router.delete("K1", "k").await.unwrap();
        assert!(first.success && first.existed);
        let second = router.delete("K1", "k").await.unwrap();
        assert!(second.success && !second.existed);
    }

    #[tokio::test]
    async fn test_unreachable_node_is_reported() {
        let (router, transport) = game_app();
        let owner = router
            .state()
            .snapshot()
            .ring
            .resolve("game-app:k")
            .unwrap()
            .clone();
        transport.crash_node(&owner);

        match router.get("K1", "k").await.unwrap_err() {
            Error::NodeUnavailable {
                node, operation, ..
            } => {
                assert_eq!(node, owner);
                assert_eq!(operation, "get");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(router.metrics().node_errors.get([owner.as_str()]), 1);
    }

    #[tokio::test]
    async fn test_batch_get_returns_partial_results() {
        let (router, _) = game_app();
        router.set("K1", "a", b"1".to_vec(), 0).await.unwrap();
        router.set("K1", "b", b"2".to_vec(), 0).await.unwrap();

        let keys: Vec<String> = vec!["a".into(), "b".into(), "missing".into()];
        let reply = router.batch_get("K1", &keys).await.unwrap();

        assert_eq!(reply.results.len(), 2);
        assert_eq!(reply.results.get("a"), Some(&b"1".to_vec()));
        assert_eq!(reply.results.get("b"), Some(&b"2".to_vec()));
        assert!(!reply.results.contains_key("missing"));
        assert!(!reply.nodes_used.is_empty());
    }

    #[tokio::test]
    async fn test_batch_get_omits_keys_on_down_nodes() {
        let (router, transport) = game_app();
        let keys: Vec<String> = (0..30).map(|i| format!("key{}", i)).collect();
        for key in &keys {
            router.set("K1", key, key.clone().into_bytes(), 0).await.unwrap();
        }

        let down = "n1".to_string();
        transport.crash_node(&down);

        let reply = router.batch_get("K1", &keys).await.unwrap();
        let ring = router.state().snapshot().ring.clone();
        for key in &keys {
            let owner = ring.resolve(&format!("game-app:{}", key)).unwrap();
            assert_eq!(reply.results.contains_key(key), *owner != down, "key {}", key);
        }
        assert!(!reply.nodes_used.contains(&down));
    }

    #[tokio::test]
    async fn test_batch_get_empty_keys() {
        let (router, transport) = game_app();
        let reply = router.batch_get("K1", &[]).await.unwrap();
        assert!(reply.results.is_empty());
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_health_requires_one_healthy_node() {
        let (router, transport) = game_app();

        let health = router.health().await;
        assert!(health.healthy);
        assert_eq!(health.nodes_total, 3);
        assert_eq!(health.nodes_healthy, 3);
        assert_eq!(health.namespaces_count, 1);

        transport.crash_node("n0");
        transport.crash_node("n1");
        let degraded = router.health().await;
        assert!(degraded.healthy);
        assert_eq!(degraded.nodes_healthy, 1);

        transport.crash_node("n2");
        assert!(!router.health().await.healthy);
    }

    #[tokio::test]
    async fn test_health_with_no_nodes() {
        let transport = Arc::new(LocalTransport::default());
        let state = Arc::new(
            ConfigHotSwap::new(Config::new(vec![Namespace::new("game-app", "K1")]), 150).unwrap(),
        );
        let router = ProxyRouter::new(state, transport);

        let health = router.health().await;
        assert!(!health.healthy);
        assert_eq!(health.nodes_total, 0);
    }

    #[tokio::test]
    async fn test_zero_ttl_forwarded_unchanged() {
        let transport = Arc::new(LocalTransport::with_nodes(&nodes()));
        let config = Config::new(vec![Namespace::new("game-app", "K1").with_default_ttl(30)]);
        let router = router_with(config, transport);

        router.set("K1", "forever", b"v".to_vec(), 0).await.unwrap();
        router.set("K1", "negative", b"v".to_vec(), -1).await.unwrap();
        router.set("K1", "explicit", b"v".to_vec(), 90).await.unwrap();

        assert_eq!(router.get("K1", "forever").await.unwrap().ttl_remaining_secs, None);
        assert_eq!(router.get("K1", "negative").await.unwrap().ttl_remaining_secs, None);
        assert_eq!(
            router.get("K1", "explicit").await.unwrap().ttl_remaining_secs,
            Some(90)
        );
    }

    #[tokio::test]
    async fn test_default_ttl_substitution_is_opt_in() {
        let transport = Arc::new(LocalTransport::with_nodes(&nodes()));
        let config = Config::new(vec![Namespace::new("game-app", "K1").with_default_ttl(30)]);
        let router = router_with(config, transport).with_apply_default_ttl(true);

        router.set("K1", "defaulted", b"v".to_vec(), 0).await.unwrap();
        router.set("K1", "explicit", b"v".to_vec(), 90).await.unwrap();
        router.set("K1", "forever", b"v".to_vec(), -1).await.unwrap();

        assert_eq!(
            router.get("K1", "defaulted").await.unwrap().ttl_remaining_secs,
            Some(30)
        );
        assert_eq!(
            router.get("K1", "explicit").await.unwrap().ttl_remaining_secs,
            Some(90)
        );
        assert_eq!(router.get("K1", "forever").await.unwrap().ttl_remaining_secs, None);
    }

    #[tokio::test]
    async fn test_huge_ttl_is_stored() {
        let (router, _) = game_app();
        assert!(router.set("K1", "k", b"v".to_vec(), i64::MAX).await.unwrap().success);

        let got = router.get("K1", "k").await.unwrap();
        assert!(got.found);
        assert!(got.ttl_remaining_secs.is_some());
    }

    #[tokio::test]
    async fn test_rate_limit_rejects_before_routing() {
        let transport = Arc::new(LocalTransport::with_nodes(&nodes()));
        let config = Config::new(vec![Namespace::new("game-app", "K1").with_rate_limit(2)]);
        let router = router_with(config, transport.clone());

        router.get("K1", "a").await.unwrap();
        router.get("K1", "b").await.unwrap();
        let err = router.get("K1", "c").await.unwrap_err();
        assert!(matches!(err, Error::RateLimited { limit_qps: 2, .. }));
        assert_eq!(transport.calls(), 2);
        assert_eq!(router.metrics().snapshot().rate_limited, 1);
    }

    #[tokio::test]
    async fn test_revoked_key_rejected_after_swap() {
        let (router, _) = game_app();
        router.set("K1", "k", b"v".to_vec(), 0).await.unwrap();

        router
            .state()
            .apply(Config::new(vec![Namespace::new("game-app", "K1-rotated")]))
            .unwrap();

        assert!(matches!(
            router.get("K1", "k").await.unwrap_err(),
            Error::Authentication
        ));
        // Same namespace name, so the data is still reachable with the new key.
        assert!(router.get("K1-rotated", "k").await.unwrap().found);
    }

    #[tokio::test]
    async fn test_removed_namespace_state_is_pruned() {
        let transport = Arc::new(LocalTransport::with_nodes(&nodes()));
        let config = Config::new(vec![
            Namespace::new("game-app", "K1").with_rate_limit(5),
            Namespace::new("chat", "K2").with_rate_limit(5),
        ]);
        let router = router_with(config, transport);

        router.get("K1", "k").await.unwrap();
        router.get("K2", "k").await.unwrap();
        assert_eq!(router.rate_limiter().len(), 2);
        assert_eq!(router.metrics().requests.get(["chat", "get"]), 1);

        router
            .state()
            .apply(Config::new(vec![
                Namespace::new("game-app", "K1").with_rate_limit(5)
            ]))
            .unwrap();
        router.get("K1", "k").await.unwrap();

        assert_eq!(router.rate_limiter().len(), 1);
        assert_eq!(router.metrics().requests.get(["chat", "get"]), 0);
        assert_eq!(router.metrics().requests.get(["game-app", "get"]), 2);
    }

    #[tokio::test]
    async fn test_removed_node_errors_are_pruned() {
        let (router, transport) = game_app();
        transport.crash_node("n2");
        router.health().await;
        assert_eq!(router.metrics().node_errors.get(["n2"]), 1);

        router.set_nodes(&["n0".into(), "n1".into()]);
        assert_eq!(router.metrics().node_errors.get(["n2"]), 0);
        assert_eq!(router.metrics().snapshot().node_errors, 0);
    }

    #[tokio::test]
    async fn test_set_nodes_registers_endpoints() {
        let (router, transport) = game_app();
        router.set_nodes(&["n0".into(), "n3".into()]);

        assert!(transport.is_registered("n3"));
        let ring = router.state().snapshot().ring.clone();
        assert_eq!(ring.size(), 2);
        assert!(!ring.contains_node("n1"));
    }

    #[tokio::test]
    async fn test_handler_maps_errors_to_wire() {
        let (router, _) = game_app();
        let handler = ProxyHandler::new(Arc::new(router));

        let reply = handler
            .handle(Message::ProxyRequest(ProxyRequest::Get {
                api_key: "nope".into(),
                key: "k".into(),
            }))
            .await;
        match reply {
            Message::Error(e) => assert_eq!(e.kind, ErrorKind::Authentication),
            other => panic!("unexpected: {:?}", other),
        }

        let reply = handler
            .handle(Message::ProxyRequest(ProxyRequest::Set {
                api_key: "K1".into(),
                key: "k".into(),
                value: b"v".to_vec(),
                ttl_seconds: 0,
            }))
            .await;
        assert!(matches!(reply, Message::ProxyResponse(ProxyResponse::Set(_))));
    }

    #[test_log::test(tokio::test)]
    async fn test_handler_rejects_node_messages() {
        let (router, transport) = game_app();
        let handler = ProxyHandler::new(Arc::new(router));

        let reply = handler
            .handle(Message::NodeRequest(crate::network::NodeRequest::Health))
            .await;
        match reply {
            Message::Error(e) => assert_eq!(e.kind, ErrorKind::Internal),
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_dropping_caller_future_abandons_call() {
        let (router, transport) = game_app();
        transport.set_delay(Some(Duration::from_millis(50)));
        let result = tokio::time::timeout(Duration::from_millis(10), router.get("K1", "k")).await;
        // Dropping the caller's future abandons the in-flight call.
        assert!(result.is_err());
        assert!(!router.get("K1", "k").await.unwrap().found);
    }
}
