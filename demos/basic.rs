//! Basic example: three storage nodes, one proxy, two tenants.

use shardcache::cache::CacheNode;
use shardcache::config::{Config, Namespace, NodeConfig, ProxyConfig};
use shardcache::hotswap::ConfigHotSwap;
use shardcache::network::ProxyClient;
use shardcache::proxy::ProxyServer;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter("shardcache=debug,info")
        .init();

    println!("Starting 3 storage nodes...");
    let mut nodes = Vec::new();
    for _ in 0..3 {
        nodes.push(CacheNode::start(NodeConfig::new("127.0.0.1:0".parse()?)).await?);
    }
    let addrs: Vec<String> = nodes.iter().map(|n| n.local_addr().to_string()).collect();
    println!("Nodes: {:?}", addrs);

    let tenants = Config::new(vec![
        Namespace::new("game-app", "K1").with_default_ttl(300),
        Namespace::new("chat", "K2").with_rate_limit(1_000),
    ]);
    let state = Arc::new(ConfigHotSwap::new(tenants, 150)?);
    let proxy = ProxyServer::start(
        ProxyConfig::new("127.0.0.1:0".parse()?)
            .with_nodes(addrs)
            .with_apply_default_ttl(true),
        state.clone(),
    )
    .await?;
    println!("Proxy listening on {}", proxy.local_addr());

    let client = ProxyClient::connect(&proxy.local_addr().to_string()).await?;

    println!("\n--- Set / Get ---");
    let set = client.set("K1", "score:alice", "42", 60).await?;
    println!("set score:alice -> served by {}", set.node_served);
    let got = client.get("K1", "score:alice").await?;
    println!(
        "get score:alice -> found={} value={:?} ttl={:?}s",
        got.found,
        got.value.as_deref().map(String::from_utf8_lossy),
        got.ttl_remaining_secs
    );

    println!("\n--- Isolation ---");
    let other = client.get("K2", "score:alice").await?;
    println!("chat sees score:alice? {}", other.found);

    println!("\n--- Default TTL ---");
    client.set("K1", "session:bob", "token", 0).await?;
    let session = client.get("K1", "session:bob").await?;
    println!("session:bob ttl={:?}s (namespace default, opted in)", session.ttl_remaining_secs);

    println!("\n--- Batch Get ---");
    client.set("K1", "a", "1", 0).await?;
    client.set("K1", "b", "2", 0).await?;
    let batch = client.batch_get("K1", &["a", "b", "missing"]).await?;
    println!("found {} of 3 keys on nodes {:?}", batch.results.len(), batch.nodes_used);

    println!("\n--- Authentication ---");
    match client.get("K_invalid", "score:alice").await {
        Ok(_) => println!("unexpected success"),
        Err(e) => println!("rejected: {}", e),
    }

    println!("\n--- Health ---");
    let health = client.health().await?;
    println!(
        "healthy={} nodes={}/{} namespaces={}",
        health.healthy, health.nodes_healthy, health.nodes_total, health.namespaces_count
    );

    println!("\n--- Node Stats ---");
    for node in &nodes {
        let stats = node.engine().stats().await;
        println!(
            "{}: {} keys, {} bytes, {} hits, {} misses",
            node.local_addr(),
            stats.total_keys,
            stats.memory_used_bytes,
            stats.hits,
            stats.misses
        );
    }

    let metrics = proxy.router().metrics().snapshot();
    println!("\nProxy metrics: {:?}", metrics);

    println!("\nShutting down...");
    proxy.shutdown().await;
    for node in nodes {
        node.shutdown().await;
    }

    println!("Done!");
    Ok(())
}
