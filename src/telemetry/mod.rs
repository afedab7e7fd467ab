//! Metrics and logging support.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`MetricsCollector`] | Thread-safe accumulators keyed by metric name |
//! | [`CounterSnapshot`] | Read-only copy of one accumulator |
//! | [`init_tracing`] | Installs an env-filtered `tracing` subscriber |
//!
//! Metric keys are prefixed with the pipeline scope:
//!
//! | Key | Value recorded |
//! |-----|----------------|
//! | `{scope}.requests.success` | latency (ms) of each successful call |
//! | `{scope}.requests.failure` | latency (ms) of each failed call |
//! | `{scope}.latency.ms` | latency (ms) of every call |
//! | `{scope}.retries` | retries spent by each call |
//! | `{scope}.errors.{layer}` | 1 per failure, by terminating layer |

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Point-in-time copy of one accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CounterSnapshot {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
}

impl CounterSnapshot {
    pub fn average(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}

/// Metric key -> accumulator copy, ordered by key.
pub type MetricsSnapshot = BTreeMap<String, CounterSnapshot>;

#[derive(Debug, Clone, Copy)]
struct Accumulator {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
}

impl Accumulator {
    fn new() -> Self {
        Self {
            count: 0,
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    fn add(&mut self, value: f64) {
        self.count = self.count.saturating_add(1);
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            count: self.count,
            sum: self.sum,
            min: self.min,
            max: self.max,
        }
    }
}

/// Accumulates counters and timers for every pipeline scope.
///
/// Each update holds the lock for a single map entry update; snapshots copy
/// the whole map under the same lock so no counter is read half-written.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    entries: Mutex<HashMap<String, Accumulator>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Accumulator>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn record(&self, key: &str, value: f64) {
        let mut entries = self.lock();
        match entries.get_mut(key) {
            Some(acc) => acc.add(value),
            None => {
                let mut acc = Accumulator::new();
                acc.add(value);
                entries.insert(key.to_string(), acc);
            }
        }
    }

    pub fn increment(&self, key: &str) {
        self.record(key, 1.0);
    }

    /// Record the outcome and latency of one call through `scope`.
    pub fn record_outcome(&self, scope: &str, success: bool, latency: Duration) {
        let ms = latency.as_secs_f64() * 1000.0;
        let outcome = if success { "success" } else { "failure" };
        let mut entries = self.lock();
        for key in [
            format!("{}.requests.{}", scope, outcome),
            format!("{}.latency.ms", scope),
        ] {
            entries.entry(key).or_insert_with(Accumulator::new).add(ms);
        }
    }

    pub fn get(&self, key: &str) -> Option<CounterSnapshot> {
        self.lock().get(key).map(Accumulator::snapshot)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.snapshot()))
            .collect()
    }

    /// Metrics of a single scope, keys kept in full.
    pub fn snapshot_scope(&self, scope: &str) -> MetricsSnapshot {
        let prefix = format!("{}.", scope);
        self.lock()
            .iter()
            .filter(|(k, _)| k.starts_with(&prefix))
            .map(|(k, v)| (k.clone(), v.snapshot()))
            .collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Install a `fmt` subscriber filtered by `RUST_LOG` (default `info`).
///
/// Safe to call more than once; only the first call installs anything.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_record_outcome_keys() {
        let metrics = MetricsCollector::new();
        metrics.record_outcome("global", true, Duration::from_millis(20));
        metrics.record_outcome("global", true, Duration::from_millis(40));
        metrics.record_outcome("global", false, Duration::from_millis(5));

        let success = metrics.get("global.requests.success").unwrap();
        assert_eq!(success.count, 2);
        assert_eq!(success.min, 20.0);
        assert_eq!(success.max, 40.0);
        assert_eq!(success.average(), 30.0);

        assert_eq!(metrics.get("global.requests.failure").unwrap().count, 1);
        assert_eq!(metrics.get("global.latency.ms").unwrap().count, 3);
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let metrics = MetricsCollector::new();
        metrics.increment("reviews.retries");
        let before = metrics.snapshot();
        metrics.increment("reviews.retries");
        assert_eq!(before["reviews.retries"].count, 1);
        assert_eq!(metrics.snapshot()["reviews.retries"].count, 2);
    }

    #[test]
    fn test_snapshot_scope_filters_by_prefix() {
        let metrics = MetricsCollector::new();
        metrics.increment("reviews.errors.timeout");
        metrics.increment("reviews-v2.errors.timeout");
        metrics.increment("global.errors.timeout");
        let scoped = metrics.snapshot_scope("reviews");
        assert_eq!(scoped.len(), 1);
        assert!(scoped.contains_key("reviews.errors.timeout"));
    }

    #[test]
    fn test_clear_empties() {
        let metrics = MetricsCollector::new();
        metrics.record_outcome("global", true, Duration::from_millis(1));
        assert!(!metrics.is_empty());
        metrics.clear();
        assert!(metrics.snapshot().is_empty());
    }

    #[test]
    fn test_concurrent_updates_are_not_lost() {
        let metrics = Arc::new(MetricsCollector::new());
        let mut handles = vec![];
        for _ in 0..8 {
            let m = Arc::clone(&metrics);
            handles.push(thread::spawn(move || {
                for _ in 0..250 {
                    m.record_outcome("global", true, Duration::from_millis(1));
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot["global.requests.success"].count, 2000);
        assert_eq!(snapshot["global.latency.ms"].count, 2000);
    }

    #[test]
    fn test_snapshot_serializes() {
        let metrics = MetricsCollector::new();
        metrics.record("global.latency.ms", 12.5);
        let json = serde_json::to_value(metrics.snapshot()).unwrap();
        assert_eq!(json["global.latency.ms"]["count"], 1);
        assert_eq!(json["global.latency.ms"]["max"], 12.5);
    }

    #[test]
    fn test_init_tracing_is_idempotent() {
        init_tracing();
        init_tracing();
    }
}
