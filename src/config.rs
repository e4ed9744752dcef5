//! Configuration types.
//!
//! Two kinds of configuration live here:
//!
//! - [`Config`]: the tenant document (namespaces, API keys, optional static node
//!   list). It is parsed from JSON, validated, and hot-swapped at runtime through
//!   [`ConfigHotSwap`](crate::hotswap::ConfigHotSwap).
//! - [`NodeConfig`] / [`ProxyConfig`]: process settings read once at start.

use crate::error::{Error, Result, ValidationError};
use crate::types::{NodeAddr, KEY_SEPARATOR};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// A tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    /// Unique identifier, used as the key prefix.
    pub name: String,

    /// Secret used to authenticate requests.
    #[serde(rename = "apikey")]
    pub api_key: String,

    #[serde(rename = "maxMemoryMB", default)]
    pub max_memory_mb: i64,

    /// Applied by the proxy when a set arrives with `ttl == 0`.
    #[serde(rename = "defaultTTL", default)]
    pub default_ttl_seconds: i64,

    /// Requests per second allowed through the proxy, 0 means unlimited.
    #[serde(rename = "rateLimitQPS", default)]
    pub rate_limit_qps: i64,

    #[serde(default)]
    pub description: String,
}

impl Namespace {
    /// Create a namespace with no limits.
    pub fn new(name: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            api_key: api_key.into(),
            max_memory_mb: 0,
            default_ttl_seconds: 0,
            rate_limit_qps: 0,
            description: String::new(),
        }
    }

    /// Set the default TTL in seconds.
    pub fn with_default_ttl(mut self, seconds: i64) -> Self {
        self.default_ttl_seconds = seconds;
        self
    }

    /// Set the rate limit.
    pub fn with_rate_limit(mut self, qps: i64) -> Self {
        self.rate_limit_qps = qps;
        self
    }

    /// Set the memory quota.
    pub fn with_max_memory_mb(mut self, mb: i64) -> Self {
        self.max_memory_mb = mb;
        self
    }
}

/// Proxy section of the configuration document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxySection {
    #[serde(default)]
    pub namespaces: Vec<Namespace>,

    /// Optional static node membership. When absent, membership is managed
    /// through [`ProxyRouter::set_nodes`](crate::proxy::ProxyRouter::set_nodes).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes: Option<Vec<NodeAddr>>,
}

/// Root configuration document.
///
/// Unknown top-level sections (dashboard settings) are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub proxy: ProxySection,
}

impl Config {
    /// Build a config from a list of namespaces.
    pub fn new(namespaces: Vec<Namespace>) -> Self {
        Self {
            proxy: ProxySection {
                namespaces,
                nodes: None,
            },
        }
    }

    /// Attach a static node list.
    pub fn with_nodes(mut self, nodes: Vec<NodeAddr>) -> Self {
        self.proxy.nodes = Some(nodes);
        self
    }

    /// Parse a JSON document. Does not validate.
    pub fn from_json(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn namespaces(&self) -> &[Namespace] {
        &self.proxy.namespaces
    }

    pub fn nodes(&self) -> Option<&[NodeAddr]> {
        self.proxy.nodes.as_deref()
    }

    /// Check structural and business rules.
    ///
    /// Duplicate API keys are accepted with a warning; lookups resolve to the
    /// first namespace in list order.
    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        let namespaces = self.namespaces();
        if namespaces.is_empty() {
            return Err(ValidationError::NoNamespaces);
        }

        let mut names = HashSet::with_capacity(namespaces.len());
        let mut keys = HashSet::with_capacity(namespaces.len());

        for (index, ns) in namespaces.iter().enumerate() {
            if ns.name.is_empty() {
                return Err(ValidationError::EmptyName { index });
            }
            if ns.name.contains(KEY_SEPARATOR) {
                return Err(ValidationError::ReservedSeparator {
                    name: ns.name.clone(),
                });
            }
            if !names.insert(ns.name.as_str()) {
                return Err(ValidationError::DuplicateName(ns.name.clone()));
            }
            if ns.api_key.is_empty() {
                return Err(ValidationError::EmptyApiKey(ns.name.clone()));
            }

            for (field, value) in [
                ("maxMemoryMB", ns.max_memory_mb),
                ("defaultTTL", ns.default_ttl_seconds),
                ("rateLimitQPS", ns.rate_limit_qps),
            ] {
                if value < 0 {
                    return Err(ValidationError::NegativeLimit {
                        namespace: ns.name.clone(),
                        field,
                        value,
                    });
                }
            }

            if !keys.insert(ns.api_key.as_str()) {
                tracing::warn!(
                    namespace = %ns.name,
                    "Duplicate api key; lookups resolve to the first namespace declaring it"
                );
            }
        }

        if let Some(nodes) = self.nodes() {
            let mut seen = HashSet::with_capacity(nodes.len());
            for addr in nodes {
                if addr.trim().is_empty() {
                    return Err(ValidationError::InvalidNodes("empty node address".into()));
                }
                if !seen.insert(addr.as_str()) {
                    return Err(ValidationError::InvalidNodes(format!(
                        "duplicate node address {}",
                        addr
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Node-side eviction policy name.
///
/// Only TTL expiry is implemented; the other values are accepted so existing
/// deployments keep starting, and a warning is logged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvictionPolicy {
    /// TTL-based lazy expiry only.
    TtlOnly,
    /// Requested but not implemented.
    Unimplemented(String),
}

impl EvictionPolicy {
    pub fn is_implemented(&self) -> bool {
        matches!(self, EvictionPolicy::TtlOnly)
    }
}

impl FromStr for EvictionPolicy {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "" | "NONE" | "TTL" => Ok(EvictionPolicy::TtlOnly),
            other => Ok(EvictionPolicy::Unimplemented(other.to_string())),
        }
    }
}

/// Storage node process settings.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Address to listen on.
    pub listen_addr: SocketAddr,

    /// Soft memory budget, reported by health checks (0 = unbounded).
    pub max_memory_mb: u64,

    /// Soft key budget, reported by health checks (0 = unbounded).
    pub max_keys: u64,

    pub eviction_policy: EvictionPolicy,

    /// Interval of the background sweep that purges expired entries.
    /// None disables it; reads still honor expiry.
    pub sweep_interval: Option<Duration>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 7001)),
            max_memory_mb: 0,
            max_keys: 0,
            eviction_policy: EvictionPolicy::TtlOnly,
            sweep_interval: Some(Duration::from_secs(30)),
        }
    }
}

impl NodeConfig {
    /// Create a configuration listening on `listen_addr`.
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            ..Default::default()
        }
    }

    pub fn with_max_memory_mb(mut self, mb: u64) -> Self {
        self.max_memory_mb = mb;
        self
    }

    pub fn with_max_keys(mut self, keys: u64) -> Self {
        self.max_keys = keys;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Option<Duration>) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Read settings from the process environment.
    ///
    /// - `NODE_ADDR` (default `0.0.0.0:7001`)
    /// - `MAX_MEMORY_MB`, `MAX_KEYS` (default 0, unbounded)
    /// - `EVICTION_POLICY` (default TTL only)
    /// - `SWEEP_INTERVAL_SECS` (default 30, 0 disables)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read settings through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let sweep_secs: u64 = parse_var(&lookup, "SWEEP_INTERVAL_SECS", 30)?;
        Ok(Self {
            listen_addr: parse_var(&lookup, "NODE_ADDR", defaults.listen_addr)?,
            max_memory_mb: parse_var(&lookup, "MAX_MEMORY_MB", 0)?,
            max_keys: parse_var(&lookup, "MAX_KEYS", 0)?,
            eviction_policy: lookup("EVICTION_POLICY")
                .map(|v| v.parse().unwrap_or(EvictionPolicy::TtlOnly))
                .unwrap_or(EvictionPolicy::TtlOnly),
            sweep_interval: (sweep_secs > 0).then(|| Duration::from_secs(sweep_secs)),
        })
    }
}

/// Proxy process settings.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Address to listen on.
    pub listen_addr: SocketAddr,

    /// Initial node membership.
    pub nodes: Vec<NodeAddr>,

    /// Virtual nodes per physical node.
    pub virtual_nodes: usize,

    /// Deadline for one proxy → node call, connection included.
    pub request_timeout: Duration,

    /// Deadline for establishing a node connection.
    pub connect_timeout: Duration,

    /// Idle connections kept per node.
    pub max_idle_per_node: usize,

    /// Tenant configuration document read at start.
    pub config_path: Option<PathBuf>,

    /// Replace `ttl == 0` on set with the namespace's `defaultTTL`.
    /// Off by default: TTLs are forwarded unchanged.
    pub apply_default_ttl: bool,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 7000)),
            nodes: Vec::new(),
            virtual_nodes: crate::partitioning::DEFAULT_VNODES_PER_NODE,
            request_timeout: Duration::from_secs(2),
            connect_timeout: Duration::from_millis(500),
            max_idle_per_node: 16,
            config_path: None,
            apply_default_ttl: false,
        }
    }
}

impl ProxyConfig {
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            ..Default::default()
        }
    }

    pub fn with_nodes(mut self, nodes: Vec<NodeAddr>) -> Self {
        self.nodes = nodes;
        self
    }

    pub fn with_virtual_nodes(mut self, vnodes: usize) -> Self {
        self.virtual_nodes = vnodes;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_apply_default_ttl(mut self, enabled: bool) -> Self {
        self.apply_default_ttl = enabled;
        self
    }

    /// Read settings from the process environment.
    ///
    /// - `PROXY_ADDR` (default `0.0.0.0:7000`)
    /// - `CACHE_NODES`: comma separated `host:port` list
    /// - `VIRTUAL_NODES` (default 150)
    /// - `REQUEST_TIMEOUT_MS`, `CONNECT_TIMEOUT_MS`
    /// - `CONFIG_PATH`: tenant configuration JSON
    /// - `APPLY_DEFAULT_TTL`: `true` to substitute `defaultTTL` for `ttl == 0`
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read settings through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let nodes = lookup("CACHE_NODES")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let virtual_nodes = parse_var(&lookup, "VIRTUAL_NODES", defaults.virtual_nodes)?;
        if virtual_nodes == 0 {
            return Err(Error::Config("VIRTUAL_NODES must be > 0".into()));
        }

        Ok(Self {
            listen_addr: parse_var(&lookup, "PROXY_ADDR", defaults.listen_addr)?,
            nodes,
            virtual_nodes,
            request_timeout: Duration::from_millis(parse_var(
                &lookup,
                "REQUEST_TIMEOUT_MS",
                defaults.request_timeout.as_millis() as u64,
            )?),
            connect_timeout: Duration::from_millis(parse_var(
                &lookup,
                "CONNECT_TIMEOUT_MS",
                defaults.connect_timeout.as_millis() as u64,
            )?),
            max_idle_per_node: parse_var(&lookup, "MAX_IDLE_PER_NODE", defaults.max_idle_per_node)?,
            config_path: lookup("CONFIG_PATH").map(PathBuf::from),
            apply_default_ttl: parse_var(&lookup, "APPLY_DEFAULT_TTL", defaults.apply_default_ttl)?,
        })
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("invalid {}={:?}: {}", name, raw, e))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_parse_document() {
        let doc = br#"{
            "proxy": {
                "namespaces": [
                    {"name": "game-app", "apikey": "K1", "maxMemoryMB": 512, "defaultTTL": 60, "rateLimitQPS": 100}
                ]
            },
            "dashboard": {"refreshSeconds": 5}
        }"#;

        let config = Config::from_json(doc).unwrap();
        assert_eq!(config.namespaces().len(), 1);
        let ns = &config.namespaces()[0];
        assert_eq!(ns.name, "game-app");
        assert_eq!(ns.api_key, "K1");
        assert_eq!(ns.max_memory_mb, 512);
        assert_eq!(ns.default_ttl_seconds, 60);
        assert_eq!(ns.rate_limit_qps, 100);
        assert!(config.nodes().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_malformed_document() {
        let err = Config::from_json(b"{not json").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_validate_rejects_empty() {
        assert_eq!(Config::default().validate(), Err(ValidationError::NoNamespaces));
    }

    #[test]
    fn test_validate_rejects_duplicate_names() {
        let config = Config::new(vec![Namespace::new("a", "k1"), Namespace::new("a", "k2")]);
        assert_eq!(
            config.validate(),
            Err(ValidationError::DuplicateName("a".into()))
        );
    }

    #[test]
    fn test_validate_rejects_empty_name_and_key() {
        let config = Config::new(vec![Namespace::new("", "k1")]);
        assert_eq!(config.validate(), Err(ValidationError::EmptyName { index: 0 }));

        let config = Config::new(vec![Namespace::new("a", "")]);
        assert_eq!(config.validate(), Err(ValidationError::EmptyApiKey("a".into())));
    }

    #[test]
    fn test_validate_rejects_negative_limits() {
        let config = Config::new(vec![Namespace::new("a", "k").with_rate_limit(-1)]);
        assert!(matches!(
            config.validate(),
            Err(ValidationError::NegativeLimit { field: "rateLimitQPS", value: -1, .. })
        ));
    }

    #[test]
    fn test_validate_rejects_separator_in_name() {
        let config = Config::new(vec![Namespace::new("a:b", "k")]);
        assert!(matches!(
            config.validate(),
            Err(ValidationError::ReservedSeparator { .. })
        ));
    }

    #[test]
    fn test_validate_allows_duplicate_api_keys() {
        let config = Config::new(vec![Namespace::new("a", "same"), Namespace::new("b", "same")]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_node_list() {
        let config = Config::new(vec![Namespace::new("a", "k")])
            .with_nodes(vec!["n0:1".into(), "n0:1".into()]);
        assert!(matches!(config.validate(), Err(ValidationError::InvalidNodes(_))));
    }

    #[test]
    fn test_eviction_policy_parse() {
        assert_eq!("ttl".parse::<EvictionPolicy>().unwrap(), EvictionPolicy::TtlOnly);
        let lru = "LRU".parse::<EvictionPolicy>().unwrap();
        assert!(!lru.is_implemented());
    }

    #[test]
    fn test_node_config_from_lookup() {
        let config = NodeConfig::from_lookup(lookup_from(&[
            ("NODE_ADDR", "127.0.0.1:9100"),
            ("MAX_KEYS", "1000"),
            ("EVICTION_POLICY", "LRU"),
            ("SWEEP_INTERVAL_SECS", "0"),
        ]))
        .unwrap();

        assert_eq!(config.listen_addr, "127.0.0.1:9100".parse().unwrap());
        assert_eq!(config.max_keys, 1000);
        assert_eq!(config.max_memory_mb, 0);
        assert_eq!(config.eviction_policy, EvictionPolicy::Unimplemented("LRU".into()));
        assert!(config.sweep_interval.is_none());
    }

    #[test]
    fn test_proxy_config_from_lookup() {
        let config = ProxyConfig::from_lookup(lookup_from(&[
            ("CACHE_NODES", "n0:7001, n1:7001,,n2:7001"),
            ("REQUEST_TIMEOUT_MS", "250"),
        ]))
        .unwrap();

        assert_eq!(config.nodes, vec!["n0:7001", "n1:7001", "n2:7001"]);
        assert_eq!(config.virtual_nodes, 150);
        assert_eq!(config.request_timeout, Duration::from_millis(250));
        assert!(!config.apply_default_ttl);

        let opted_in =
            ProxyConfig::from_lookup(lookup_from(&[("APPLY_DEFAULT_TTL", "true")])).unwrap();
        assert!(opted_in.apply_default_ttl);
    }

    #[test]
    fn test_proxy_config_rejects_bad_values() {
        assert!(ProxyConfig::from_lookup(lookup_from(&[("VIRTUAL_NODES", "0")])).is_err());
        assert!(ProxyConfig::from_lookup(lookup_from(&[("PROXY_ADDR", "nope")])).is_err());
        assert!(ProxyConfig::from_lookup(lookup_from(&[("APPLY_DEFAULT_TTL", "yes")])).is_err());
    }
}
