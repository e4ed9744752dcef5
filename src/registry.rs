//! Namespace lookup tables built from one configuration snapshot.

use crate::config::{Config, Namespace};
use std::collections::HashMap;
use std::sync::Arc;

/// Immutable API-key and name indexes over a [`Config`].
///
/// A registry is never updated in place; a new one is built for every
/// applied configuration.
#[derive(Debug, Clone, Default)]
pub struct NamespaceRegistry {
    namespaces: Vec<Arc<Namespace>>,
    by_api_key: HashMap<String, usize>,
    by_name: HashMap<String, usize>,
}

impl NamespaceRegistry {
    /// Index the namespaces of `config`.
    ///
    /// When several namespaces share an API key, the first one in list order
    /// owns it.
    pub fn from_config(config: &Config) -> Self {
        let namespaces: Vec<Arc<Namespace>> = config
            .namespaces()
            .iter()
            .cloned()
            .map(Arc::new)
            .collect();

        let mut by_api_key = HashMap::with_capacity(namespaces.len());
        let mut by_name = HashMap::with_capacity(namespaces.len());
        for (index, ns) in namespaces.iter().enumerate() {
            by_api_key.entry(ns.api_key.clone()).or_insert(index);
            by_name.entry(ns.name.clone()).or_insert(index);
        }

        Self {
            namespaces,
            by_api_key,
            by_name,
        }
    }

    /// Namespace authenticated by `api_key`.
    pub fn by_api_key(&self, api_key: &str) -> Option<&Arc<Namespace>> {
        self.by_api_key.get(api_key).map(|&i| &self.namespaces[i])
    }

    /// Namespace called `name`.
    pub fn by_name(&self, name: &str) -> Option<&Arc<Namespace>> {
        self.by_name.get(name).map(|&i| &self.namespaces[i])
    }

    pub fn len(&self) -> usize {
        self.namespaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.namespaces.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Namespace>> {
        self.namespaces.iter()
    }
}
