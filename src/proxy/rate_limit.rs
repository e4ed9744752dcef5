//! Per-namespace request rate limiting.
//!
//! Each namespace with `rateLimitQPS > 0` gets a token bucket holding up to one
//! second of requests and refilled continuously at the configured rate.

use crate::config::Namespace;
use crate::error::{Error, Result};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;

/// Token bucket state.
#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket for one namespace.
#[derive(Debug)]
struct TokenBucket {
    /// Tokens added per second, also the bucket capacity.
    rate: u64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    fn new(rate: u64) -> Self {
        Self {
            rate,
            state: Mutex::new(BucketState {
                tokens: rate as f64,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take one token if available.
    fn try_acquire(&self) -> bool {
        let mut state = self.state.lock();
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.rate as f64).min(self.rate as f64);
        state.last_refill = now;

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Rate limiter keyed by namespace name.
///
/// Buckets are created on a namespace's first request and replaced when the
/// namespace's limit changes after a configuration swap. [`retain`] drops the
/// buckets of namespaces that left the configuration.
///
/// [`retain`]: NamespaceRateLimiter::retain
#[derive(Debug, Default)]
pub struct NamespaceRateLimiter {
    buckets: DashMap<String, Arc<TokenBucket>>,
}

impl NamespaceRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    fn bucket(&self, name: &str, rate: u64) -> Arc<TokenBucket> {
        if let Some(existing) = self.buckets.get(name) {
            if existing.rate == rate {
                return existing.clone();
            }
        }
        let mut entry = self
            .buckets
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(TokenBucket::new(rate)));
        if entry.rate != rate {
            *entry = Arc::new(TokenBucket::new(rate));
        }
        entry.clone()
    }

    /// Admit one request for `namespace`, or fail with [`Error::RateLimited`].
    pub fn check(&self, namespace: &Namespace) -> Result<()> {
        if namespace.rate_limit_qps <= 0 {
            return Ok(());
        }
        let rate = namespace.rate_limit_qps as u64;

        if self.bucket(&namespace.name, rate).try_acquire() {
            Ok(())
        } else {
            Err(Error::RateLimited {
                namespace: namespace.name.clone(),
                limit_qps: rate,
            })
        }
    }

    /// Drop the buckets of namespaces whose name fails `keep`.
    pub fn retain(&self, mut keep: impl FnMut(&str) -> bool) {
        self.buckets.retain(|name, _| keep(name));
    }

    /// Number of namespaces with a bucket.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_unlimited_namespace_has_no_bucket() {
        let limiter = NamespaceRateLimiter::new();
        let ns = Namespace::new("free", "k");
        for _ in 0..1_000 {
            limiter.check(&ns).unwrap();
        }
        assert!(limiter.is_empty());
    }

    #[test]
    fn test_burst_limited_to_one_second() {
        let limiter = NamespaceRateLimiter::new();
        let ns = Namespace::new("game-app", "K1").with_rate_limit(5);

        for _ in 0..5 {
            limiter.check(&ns).unwrap();
        }
        let err = limiter.check(&ns).unwrap_err();
        assert!(matches!(err, Error::RateLimited { limit_qps: 5, .. }));
    }

    #[test]
    fn test_tokens_refill_over_time() {
        let limiter = NamespaceRateLimiter::new();
        let ns = Namespace::new("game-app", "K1").with_rate_limit(20);

        for _ in 0..20 {
            limiter.check(&ns).unwrap();
        }
        assert!(limiter.check(&ns).is_err());

        std::thread::sleep(Duration::from_millis(120));
        assert!(limiter.check(&ns).is_ok());
    }

    #[test]
    fn test_limit_change_rebuilds_bucket() {
        let limiter = NamespaceRateLimiter::new();
        let tight = Namespace::new("game-app", "K1").with_rate_limit(1);
        limiter.check(&tight).unwrap();
        assert!(limiter.check(&tight).is_err());

        let relaxed = tight.clone().with_rate_limit(100);
        limiter.check(&relaxed).unwrap();
        assert_eq!(limiter.len(), 1);
    }

    #[test]
    fn test_namespaces_are_limited_independently() {
        let limiter = NamespaceRateLimiter::new();
        let a = Namespace::new("a", "ka").with_rate_limit(1);
        let b = Namespace::new("b", "kb").with_rate_limit(1);

        limiter.check(&a).unwrap();
        assert!(limiter.check(&a).is_err());
        limiter.check(&b).unwrap();
    }

    #[test]
    fn test_retain_drops_removed_namespaces() {
        let limiter = NamespaceRateLimiter::new();
        let a = Namespace::new("a", "ka").with_rate_limit(1);
        let b = Namespace::new("b", "kb").with_rate_limit(1);
        limiter.check(&a).unwrap();
        limiter.check(&b).unwrap();
        assert_eq!(limiter.len(), 2);

        limiter.retain(|name| name == "a");
        assert_eq!(limiter.len(), 1);
        // The surviving bucket keeps its state.
        assert!(limiter.check(&a).is_err());
        limiter.check(&b).unwrap();
    }
}
