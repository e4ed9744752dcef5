use crate::cache::CacheNode;
use crate::config::{Config, NodeConfig, ProxyConfig};
use crate::error::Result;
use crate::hotswap::ConfigHotSwap;
use crate::network::ProxyClient;
use crate::partitioning::DEFAULT_VNODES_PER_NODE;
use crate::proxy::ProxyServer;
use crate::types::NodeAddr;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Storage nodes and one proxy listening on OS-assigned local ports.
pub struct TestCluster {
    pub nodes: Vec<CacheNode>,
    pub proxy: ProxyServer,
    pub state: Arc<ConfigHotSwap>,
}

impl TestCluster {
    /// Start `node_count` nodes and a proxy routing to all of them.
    pub async fn start(node_count: usize, config: Config) -> Result<Self> {
        let mut nodes = Vec::with_capacity(node_count);
        for _ in 0..node_count {
            let node_config = NodeConfig::new(local_any()).with_sweep_interval(None);
            nodes.push(CacheNode::start(node_config).await?);
        }
        let addrs: Vec<NodeAddr> = nodes.iter().map(|n| n.local_addr().to_string()).collect();

        let state = Arc::new(ConfigHotSwap::new(config, DEFAULT_VNODES_PER_NODE)?);
        let proxy_config = ProxyConfig::new(local_any())
            .with_nodes(addrs)
            .with_connect_timeout(Duration::from_millis(200))
            .with_request_timeout(Duration::from_millis(1_000));
        let proxy = ProxyServer::start(proxy_config, state.clone()).await?;

        Ok(Self {
            nodes,
            proxy,
            state,
        })
    }

    /// Addresses of the storage nodes, as registered in the ring.
    pub fn node_addrs(&self) -> Vec<NodeAddr> {
        self.nodes.iter().map(|n| n.local_addr().to_string()).collect()
    }

    /// Open a client connection to the proxy.
    pub async fn client(&self) -> Result<ProxyClient> {
        ProxyClient::connect(&self.proxy.local_addr().to_string()).await
    }

    /// Stop one storage node. The ring still lists it.
    pub async fn stop_node(&mut self, index: usize) -> NodeAddr {
        let node = self.nodes.remove(index);
        let addr = node.local_addr().to_string();
        node.shutdown().await;
        addr
    }

    pub async fn shutdown(self) {
        self.proxy.shutdown().await;
        for node in self.nodes {
            node.shutdown().await;
        }
    }
}

fn local_any() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 0))
}

/// Re-run `action` until `predicate` accepts its result or `timeout` passes.
pub async fn wait_for_result<F, Fut, T, P>(mut action: F, predicate: P, timeout: Duration) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = T>,
    P: Fn(&T) -> bool,
{
    let start = Instant::now();
    let interval = Duration::from_millis(50);

    while start.elapsed() < timeout {
        let result = action().await;
        if predicate(&result) {
            return Some(result);
        }
        tokio::time::sleep(interval).await;
    }
    None
}
