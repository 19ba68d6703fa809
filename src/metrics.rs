// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Lightweight observability for engine operations.
//!
//! A global collector buffers tagged measurements recorded by the hot
//! paths (query parse/evaluate, commits, index maintenance). Buffers are
//! in-memory only; callers drain them with `snapshot()` and aggregate
//! with the percentile helpers.
//!
//! ## Thread Safety
//! - `MetricsCollector` uses `RwLock` for concurrent recording
//! - `snapshot()` clones the buffer without disturbing writers

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Global singleton instance.
static COLLECTOR: Lazy<Arc<MetricsCollector>> = Lazy::new(|| Arc::new(MetricsCollector::new()));

/// A single measurement.
#[derive(Debug, Clone)]
pub struct Metric {
    /// Metric name (e.g. "query_eval", "group_commit").
    pub name: &'static str,

    /// Measured value in microseconds (durations) or a plain count.
    pub value: f64,

    /// Optional tags for filtering.
    pub tags: HashMap<String, String>,
}

impl Metric {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            value: 0.0,
            tags: HashMap::new(),
        }
    }

    pub fn group_commit() -> Self {
        Self::new("group_commit")
    }

    pub fn query_parse() -> Self {
        Self::new("query_parse")
    }

    pub fn query_eval() -> Self {
        Self::new("query_eval")
    }

    pub fn with_tag(mut self, key: &str, value: &str) -> Self {
        self.tags.insert(key.to_string(), value.to_string());
        self
    }
}

/// Thread-safe in-memory metrics collector.
pub struct MetricsCollector {
    buffer: RwLock<Vec<Metric>>,
    buffer_limit: usize,
}

impl MetricsCollector {
    fn new() -> Self {
        Self {
            buffer: RwLock::new(Vec::with_capacity(1000)),
            buffer_limit: 10_000,
        }
    }

    /// Returns the global singleton instance.
    pub fn global() -> Arc<Self> {
        Arc::clone(&COLLECTOR)
    }

    /// Records a metric. O(1): lock plus push. When the buffer limit is
    /// reached the oldest half is dropped.
    pub fn record(&self, metric: Metric) {
        let mut buffer = match self.buffer.write() {
            Ok(b) => b,
            Err(_) => return,
        };
        if buffer.len() >= self.buffer_limit {
            let keep = self.buffer_limit / 2;
            let start = buffer.len() - keep;
            buffer.drain(..start);
        }
        buffer.push(metric);
    }

    /// Clones the currently buffered metrics.
    pub fn snapshot(&self) -> Vec<Metric> {
        self.buffer.read().map(|b| b.clone()).unwrap_or_default()
    }

    /// Values recorded under `name`.
    pub fn values_for(&self, name: &str) -> Vec<f64> {
        self.snapshot()
            .into_iter()
            .filter(|m| m.name == name)
            .map(|m| m.value)
            .collect()
    }

    /// Drops all buffered metrics.
    pub fn reset(&self) {
        if let Ok(mut b) = self.buffer.write() {
            b.clear();
        }
    }
}

/// Records a duration metric in microseconds through the global
/// collector.
pub fn record_duration(mut metric: Metric, elapsed: Duration) {
    metric.value = elapsed.as_secs_f64() * 1_000_000.0;
    MetricsCollector::global().record(metric);
}

/// Records a plain count through the global collector.
pub fn record_count(mut metric: Metric, count: usize) {
    metric.value = count as f64;
    MetricsCollector::global().record(metric);
}

/// Aggregate statistics over a metric series.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricStats {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

/// Computes summary statistics; `None` for an empty series.
pub fn calculate_stats(values: &[f64]) -> Option<MetricStats> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let sum: f64 = sorted.iter().sum();
    Some(MetricStats {
        count: sorted.len(),
        min: sorted[0],
        max: sorted[sorted.len() - 1],
        mean: sum / sorted.len() as f64,
        p50: percentile(&sorted, 50.0),
        p95: percentile(&sorted, 95.0),
        p99: percentile(&sorted, 99.0),
    })
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (p / 100.0) * (sorted.len() - 1) as f64;
    let low = rank.floor() as usize;
    let high = rank.ceil() as usize;
    if low == high {
        sorted[low]
    } else {
        let frac = rank - low as f64;
        sorted[low] * (1.0 - frac) + sorted[high] * frac
    }
}
