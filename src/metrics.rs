//! Runtime metrics: query latency and indexing throughput.

use std::time::Duration;

/// Collects runtime metrics for a retrieval engine.
#[derive(Debug)]
pub struct MetricsCollector {
    query_latencies_us: Vec<f64>,
    total_queries: u64,
    total_indexed: u64,
    total_failed: u64,
    index_passes: u64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            query_latencies_us: Vec::new(),
            total_queries: 0,
            total_indexed: 0,
            total_failed: 0,
            index_passes: 0,
        }
    }

    /// Record a query with its duration.
    pub fn record_query(&mut self, duration: Duration) {
        self.total_queries += 1;
        self.query_latencies_us.push(duration.as_micros() as f64);
    }

    /// Record the outcome of one indexing pass.
    pub fn record_index_pass(&mut self, indexed: usize, failed: usize) {
        self.index_passes += 1;
        self.total_indexed += indexed as u64;
        self.total_failed += failed as u64;
    }

    pub fn total_queries(&self) -> u64 {
        self.total_queries
    }

    pub fn total_indexed(&self) -> u64 {
        self.total_indexed
    }

    pub fn total_failed(&self) -> u64 {
        self.total_failed
    }

    pub fn index_passes(&self) -> u64 {
        self.index_passes
    }

    /// Average query latency in microseconds.
    pub fn avg_query_latency_us(&self) -> f64 {
        if self.query_latencies_us.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.query_latencies_us.iter().sum();
        sum / self.query_latencies_us.len() as f64
    }

    /// Get a percentile of query latency (e.g., 50.0, 95.0, 99.0).
    pub fn percentile_query_latency_us(&self, percentile: f64) -> f64 {
        if self.query_latencies_us.is_empty() {
            return 0.0;
        }

        let mut sorted = self.query_latencies_us.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let index = ((percentile / 100.0) * (sorted.len() - 1) as f64).round() as usize;
        sorted[index.min(sorted.len() - 1)]
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
