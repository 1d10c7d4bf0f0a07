use std::collections::BTreeMap;
use std::sync::Mutex;

/// Open/close balance of backend subscriptions, keyed by model name.
pub const SUBSCRIPTIONS: &str = "subscriptions";
/// Snapshots received, keyed by document path.
pub const SNAPSHOTS: &str = "snapshots";

/// Receives counter updates from the store engine.
pub trait MetricsSink: Send + Sync + 'static {
    fn increment(&self, counter: &str, key: &str, delta: i64);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn increment(&self, _counter: &str, _key: &str, _delta: i64) {}
}

/// Keeps every counter in memory.
#[derive(Debug, Default)]
pub struct CountingMetrics {
    counters: Mutex<BTreeMap<(String, String), i64>>,
}

impl CountingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, counter: &str, key: &str) -> i64 {
        let counters = self.counters.lock().unwrap();
        counters
            .get(&(counter.to_owned(), key.to_owned()))
            .copied()
            .unwrap_or(0)
    }

    /// Every key recorded for `counter`, with its current value.
    pub fn snapshot(&self, counter: &str) -> BTreeMap<String, i64> {
        let counters = self.counters.lock().unwrap();
        counters
            .iter()
            .filter(|((name, _), _)| name == counter)
            .map(|((_, key), value)| (key.clone(), *value))
            .collect()
    }
}

impl MetricsSink for CountingMetrics {
    fn increment(&self, counter: &str, key: &str, delta: i64) {
        let mut counters = self.counters.lock().unwrap();
        *counters
            .entry((counter.to_owned(), key.to_owned()))
            .or_insert(0) += delta;
    }
}
