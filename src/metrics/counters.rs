//! Monotonic counters, plain and labeled.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// A counter that only goes up.
#[derive(Debug)]
pub struct Counter {
    name: &'static str,
    value: AtomicU64,
}

impl Counter {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            value: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn inc(&self) {
        self.inc_by(1);
    }

    pub fn inc_by(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// One [`Counter`]-like series per distinct label tuple.
///
/// Series are created on first increment and removed only by [`retain`].
///
/// [`retain`]: LabeledCounter::retain
#[derive(Debug)]
pub struct LabeledCounter<const N: usize> {
    name: &'static str,
    label_names: [&'static str; N],
    series: DashMap<[String; N], AtomicU64>,
}

impl<const N: usize> LabeledCounter<N> {
    pub fn new(name: &'static str, label_names: [&'static str; N]) -> Self {
        Self {
            name,
            label_names,
            series: DashMap::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn label_names(&self) -> &[&'static str; N] {
        &self.label_names
    }

    pub fn inc(&self, labels: [&str; N]) {
        let key = labels.map(str::to_string);
        if let Some(value) = self.series.get(&key) {
            value.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.series
            .entry(key)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Value of one series, 0 if it was never incremented.
    pub fn get(&self, labels: [&str; N]) -> u64 {
        self.series
            .get(&labels.map(str::to_string))
            .map(|v| v.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Every series with its labels.
    pub fn get_all(&self) -> Vec<([String; N], u64)> {
        self.series
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().load(Ordering::Relaxed)))
            .collect()
    }

    /// Sum over all series.
    pub fn total(&self) -> u64 {
        self.series.iter().map(|entry| entry.value().load(Ordering::Relaxed)).sum()
    }

    /// Drop every series whose labels fail `keep`.
    pub fn retain(&self, mut keep: impl FnMut(&[String; N]) -> bool) {
        self.series.retain(|labels, _| keep(labels));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter() {
        let counter = Counter::new("node_requests_total");
        assert_eq!(counter.get(), 0);

        counter.inc();
        counter.inc_by(5);
        assert_eq!(counter.get(), 6);
        assert_eq!(counter.name(), "node_requests_total");
    }

    #[test]
    fn test_labeled_counter() {
        let counter = LabeledCounter::<2>::new("requests", ["namespace", "op"]);

        counter.inc(["game-app", "get"]);
        counter.inc(["game-app", "get"]);
        counter.inc(["chat", "set"]);

        assert_eq!(counter.get(["game-app", "get"]), 2);
        assert_eq!(counter.get(["chat", "set"]), 1);
        assert_eq!(counter.get(["chat", "get"]), 0);
        assert_eq!(counter.get_all().len(), 2);
        assert_eq!(counter.total(), 3);
    }

    #[test]
    fn test_labeled_counter_retain() {
        let counter = LabeledCounter::<2>::new("requests", ["namespace", "op"]);
        counter.inc(["game-app", "get"]);
        counter.inc(["chat", "get"]);
        counter.inc(["chat", "set"]);

        counter.retain(|[namespace, _]| namespace != "chat");

        assert_eq!(counter.get_all().len(), 1);
        assert_eq!(counter.get(["chat", "set"]), 0);
        assert_eq!(counter.total(), 1);
    }

    #[test]
    fn test_labeled_counter_concurrent_first_increment() {
        let counter = std::sync::Arc::new(LabeledCounter::<1>::new("node_errors", ["node"]));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let counter = counter.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        counter.inc(["n0"]);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(counter.get(["n0"]), 800);
    }
}
