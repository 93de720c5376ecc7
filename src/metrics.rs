//! Metrics collaborator (spec.md §4.7 stock `metrics` filter). Injectable
//! via the [`Metrics`] trait; [`InMemoryMetrics`] is the default, grounded
//! on the teacher's `dashmap`-backed counters (`middleware/metrics.rs`).

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

pub trait Metrics: Send + Sync {
    fn record(&self, request_class: &str, path: &str, method: &str, status: u16, latency_ms: f64);
}

#[derive(Debug, Clone, Default)]
pub struct Sample {
    pub count: u64,
    pub total_latency_ms: f64,
}

#[derive(Default)]
pub struct InMemoryMetrics {
    samples: DashMap<(String, String, String, u16), Sample>,
    total_requests: AtomicU64,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    pub fn sample(&self, request_class: &str, path: &str, method: &str, status: u16) -> Option<Sample> {
        self.samples
            .get(&(
                request_class.to_string(),
                path.to_string(),
                method.to_string(),
                status,
            ))
            .map(|entry| entry.clone())
    }
}

impl Metrics for InMemoryMetrics {
    fn record(&self, request_class: &str, path: &str, method: &str, status: u16, latency_ms: f64) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        let key = (request_class.to_string(), path.to_string(), method.to_string(), status);
        self.samples
            .entry(key)
            .and_modify(|s| {
                s.count += 1;
                s.total_latency_ms += latency_ms;
            })
            .or_insert(Sample {
                count: 1,
                total_latency_ms: latency_ms,
            });
    }
}

/// Strip the first path segment for metrics labeling (spec.md §4.7
/// "path with first segment stripped"), e.g. `/v1/pets/42` → `/pets/42`.
pub fn strip_first_segment(path: &str) -> String {
    let trimmed = path.trim_start_matches('/');
    match trimmed.find('/') {
        Some(idx) => format!("/{}", &trimmed[idx + 1..]),
        None => "/".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_first_segment() {
        assert_eq!(strip_first_segment("/v1/pets/42"), "/pets/42");
        assert_eq!(strip_first_segment("/v1"), "/");
    }

    #[test]
    fn records_and_aggregates_samples() {
        let m = InMemoryMetrics::new();
        m.record("default", "/pets", "get", 200, 5.0);
        m.record("default", "/pets", "get", 200, 7.0);
        let s = m.sample("default", "/pets", "get", 200).unwrap();
        assert_eq!(s.count, 2);
        assert_eq!(s.total_latency_ms, 12.0);
    }
}
