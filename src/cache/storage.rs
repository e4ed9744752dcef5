//! Moka-backed key-value store with per-entry TTL.

use crate::metrics::NodeMetrics;
use crate::types::{ttl_secs_ceil, CacheStats, CacheValue};
use bytes::Bytes;
use moka::future::Cache;
use moka::Expiry;
use std::time::{Duration, Instant};

/// Longest TTL an entry is given. Larger requests are clamped to it.
pub const MAX_TTL: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

/// A stored value and its absolute expiry.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: Bytes,
    /// `None` means the entry never expires.
    pub expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }

    fn ttl_remaining(&self, now: Instant) -> Option<Duration> {
        self.expires_at.map(|at| at.saturating_duration_since(now))
    }
}

/// Tells Moka to purge each entry at its own `expires_at`.
///
/// Purging is housekeeping only: reads check `expires_at` themselves, so an
/// expired entry is never served even if Moka has not dropped it yet.
struct EntryExpiry;

impl Expiry<String, CacheEntry> for EntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CacheEntry,
        created_at: Instant,
    ) -> Option<Duration> {
        value.ttl_remaining(created_at)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CacheEntry,
        updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        value.ttl_remaining(updated_at)
    }
}

/// Node-local store mapping fully-qualified keys to values.
///
/// Concurrent sets on the same key are last-writer-wins.
pub struct CacheEngine {
    /// The underlying Moka cache. Unbounded: only TTL removes entries.
    cache: Cache<String, CacheEntry>,

    metrics: NodeMetrics,
}

impl CacheEngine {
    pub fn new() -> Self {
        let cache = Cache::builder()
            .weigher(|key: &String, entry: &CacheEntry| {
                let size = key.len() + entry.value.len();
                size.min(u32::MAX as usize) as u32
            })
            .expire_after(EntryExpiry)
            .build();

        Self {
            cache,
            metrics: NodeMetrics::new(),
        }
    }

    /// Look up a key. Expired entries are reported as absent.
    pub async fn get(&self, key: &str) -> Option<CacheValue> {
        let now = Instant::now();
        let found = self
            .cache
            .get(key)
            .await
            .filter(|entry| !entry.is_expired(now));

        self.metrics.record_get(found.is_some());

        found.map(|entry| CacheValue {
            ttl_remaining_secs: entry.ttl_remaining(now).map(ttl_secs_ceil),
            value: entry.value.to_vec(),
        })
    }

    /// Upsert a value.
    ///
    /// `ttl_seconds <= 0` stores the entry without expiry; a positive value
    /// expires it `ttl_seconds` from now, clamped to [`MAX_TTL`]. Any previous
    /// value and TTL are replaced.
    pub async fn set(&self, key: impl Into<String>, value: impl Into<Bytes>, ttl_seconds: i64) {
        let ttl = (ttl_seconds > 0).then(|| Duration::from_secs(ttl_seconds as u64));
        self.insert(key, value, ttl).await;
    }

    /// Upsert a value with an optional relative TTL, clamped to [`MAX_TTL`].
    pub async fn insert(&self, key: impl Into<String>, value: impl Into<Bytes>, ttl: Option<Duration>) {
        self.metrics.requests_total.inc();
        let now = Instant::now();
        let entry = CacheEntry {
            value: value.into(),
            expires_at: ttl.and_then(|ttl| now.checked_add(ttl.min(MAX_TTL))),
        };
        self.cache.insert(key.into(), entry).await;
    }

    /// Remove a key. Returns whether a live entry was present before removal.
    pub async fn delete(&self, key: &str) -> bool {
        self.metrics.requests_total.inc();
        let now = Instant::now();
        self.cache
            .remove(key)
            .await
            .map(|entry| !entry.is_expired(now))
            .unwrap_or(false)
    }

    /// Point-in-time statistics.
    ///
    /// Flushes Moka's pending maintenance first so counts reflect every
    /// completed write.
    pub async fn stats(&self) -> CacheStats {
        self.cache.run_pending_tasks().await;
        CacheStats {
            total_keys: self.cache.entry_count(),
            memory_used_bytes: self.cache.weighted_size(),
            uptime_seconds: self.metrics.uptime_seconds(),
            requests_total: self.metrics.requests_total.get(),
            hits: self.metrics.hits.get(),
            misses: self.metrics.misses.get(),
        }
    }

    /// Physically purge expired entries.
    pub async fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks().await;
    }
}

impl Default for CacheEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CacheEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEngine")
            .field("entry_count", &self.cache.entry_count())
            .field("weighted_size", &self.cache.weighted_size())
            .finish()
    }
}
