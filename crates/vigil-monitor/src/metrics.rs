//! Bounded in-memory time-series store.

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod tests;

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clock::{Clock, SystemClock};
use crate::config::MetricsConfig;
use crate::scheduler::Tickable;
use crate::selector::MetricSelector;

/// Metric unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricUnit {
    /// Milliseconds.
    Ms,
    /// Plain count.
    Count,
    /// Bytes.
    Bytes,
    /// Percentage (0-100).
    Percent,
    /// Per-second rate.
    Rate,
}

impl std::fmt::Display for MetricUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MetricUnit::Ms => "ms",
            MetricUnit::Count => "count",
            MetricUnit::Bytes => "bytes",
            MetricUnit::Percent => "percent",
            MetricUnit::Rate => "rate",
        };
        f.write_str(s)
    }
}

/// A single recorded observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    /// Series name.
    pub name: String,
    /// Observed value.
    pub value: f64,
    /// Unit of `value`.
    pub unit: MetricUnit,
    /// When it was recorded.
    pub timestamp: DateTime<Utc>,
    /// Free-form labels.
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

/// Outcome of a timed operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRecord {
    /// Operation name, e.g. `send_message`.
    pub operation: String,
    /// Duration in milliseconds.
    pub duration_ms: f64,
    /// When it finished.
    pub timestamp: DateTime<Utc>,
    /// Whether it succeeded.
    pub success: bool,
    /// Extra context.
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Filter for [`MetricStore::query`]. Bounds are inclusive.
#[derive(Debug, Clone, Default)]
pub struct MetricQuery {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub name: Option<String>,
}

impl MetricQuery {
    /// Everything recorded under `name`.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }
}

/// Filter for [`MetricStore::query_performance`]. Bounds are inclusive.
#[derive(Debug, Clone, Default)]
pub struct PerformanceQuery {
    pub operation: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

/// Per-operation entry of [`MetricsSummary`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationSummary {
    pub operation: String,
    pub count: usize,
    pub avg_duration_ms: f64,
}

/// Trailing-window overview.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    /// Metrics recorded inside the window.
    pub total_metrics: usize,
    /// Busiest operations, at most 10.
    pub top_operations: Vec<OperationSummary>,
    /// Window length in seconds.
    pub window_secs: i64,
}

/// Latency and error statistics for one operation (or all of them).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationStats {
    pub operation: Option<String>,
    pub count: usize,
    pub avg_duration_ms: f64,
    pub p95_duration_ms: f64,
    pub error_rate_percent: f64,
}

const TOP_OPERATIONS: usize = 10;

#[derive(Default)]
struct Inner {
    series: HashMap<String, VecDeque<Metric>>,
    performance: HashMap<String, VecDeque<PerformanceRecord>>,
}

/// Append-only metric buffer bounded by count per series and by age.
pub struct MetricStore {
    max_per_series: usize,
    retention: chrono::Duration,
    summary_window: chrono::Duration,
    clock: Arc<dyn Clock>,
    inner: RwLock<Inner>,
}

impl MetricStore {
    /// Create a store using the system clock.
    pub fn new(config: &MetricsConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a store reading time from `clock`.
    pub fn with_clock(config: &MetricsConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            max_per_series: config.max_per_series.max(1),
            retention: config.retention(),
            summary_window: config.summary_window(),
            clock,
            inner: RwLock::new(Inner::default()),
        }
    }

    /// The clock this store stamps entries with.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Record a metric stamped with the current time.
    pub fn record(
        &self,
        name: impl Into<String>,
        value: f64,
        unit: MetricUnit,
        tags: HashMap<String, String>,
    ) {
        let name = name.into();
        if !value.is_finite() {
            debug!("Dropping non-finite value for metric {}", name);
            return;
        }

        let now = self.clock.now();
        let cutoff = now - self.retention;
        let metric = Metric {
            name: name.clone(),
            value,
            unit,
            timestamp: now,
            tags,
        };

        let mut inner = self.inner.write();
        let series = inner.series.entry(name).or_default();
        series.push_back(metric);
        evict(series, self.max_per_series, cutoff, |m| m.timestamp);
    }

    /// Record a metric without tags.
    pub fn record_value(&self, name: impl Into<String>, value: f64, unit: MetricUnit) {
        self.record(name, value, unit, HashMap::new());
    }

    /// Record the outcome of a timed operation.
    pub fn record_performance(
        &self,
        operation: impl Into<String>,
        duration_ms: f64,
        success: bool,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) {
        let operation = operation.into();
        if !duration_ms.is_finite() {
            debug!("Dropping non-finite duration for operation {}", operation);
            return;
        }

        let now = self.clock.now();
        let cutoff = now - self.retention;
        let record = PerformanceRecord {
            operation: operation.clone(),
            duration_ms,
            timestamp: now,
            success,
            metadata,
        };

        let mut inner = self.inner.write();
        let series = inner.performance.entry(operation).or_default();
        series.push_back(record);
        evict(series, self.max_per_series, cutoff, |r| r.timestamp);
    }

    /// Metrics matching `query`, newest first.
    pub fn query(&self, query: &MetricQuery) -> Vec<Metric> {
        let inner = self.inner.read();
        let in_range = |m: &&Metric| {
            query.start.is_none_or(|s| m.timestamp >= s) && query.end.is_none_or(|e| m.timestamp <= e)
        };

        match &query.name {
            Some(name) => inner
                .series
                .get(name)
                .map(|s| s.iter().rev().filter(in_range).cloned().collect())
                .unwrap_or_default(),
            None => {
                let mut out: Vec<Metric> = inner
                    .series
                    .values()
                    .flat_map(|s| s.iter())
                    .filter(in_range)
                    .cloned()
                    .collect();
                out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
                out
            }
        }
    }

    /// Performance records matching `query`, newest first.
    pub fn query_performance(&self, query: &PerformanceQuery) -> Vec<PerformanceRecord> {
        let inner = self.inner.read();
        let in_range = |r: &&PerformanceRecord| {
            query.start.is_none_or(|s| r.timestamp >= s) && query.end.is_none_or(|e| r.timestamp <= e)
        };

        let mut out: Vec<PerformanceRecord> = match &query.operation {
            Some(op) => inner
                .performance
                .get(op)
                .map(|s| s.iter().filter(in_range).cloned().collect())
                .unwrap_or_default(),
            None => inner
                .performance
                .values()
                .flat_map(|s| s.iter())
                .filter(in_range)
                .cloned()
                .collect(),
        };
        out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        out
    }

    /// Most recent metric selected by `selector`, no older than `since`.
    pub fn latest(&self, selector: &MetricSelector, since: Option<DateTime<Utc>>) -> Option<Metric> {
        let inner = self.inner.read();
        let fresh = |m: &&Metric| since.is_none_or(|s| m.timestamp >= s);

        let newest_in = |series: &VecDeque<Metric>| {
            series
                .iter()
                .rev()
                .take_while(|m| fresh(m))
                .find(|m| selector.matches(&m.name, &m.tags))
                .cloned()
        };

        match selector.exact_name() {
            Some(name) => inner.series.get(name).and_then(newest_in),
            None => inner
                .series
                .values()
                .filter_map(newest_in)
                .max_by_key(|m| m.timestamp),
        }
    }

    /// Drop entries older than the retention age. Returns how many were removed.
    pub fn cleanup(&self) -> usize {
        let cutoff = self.clock.now() - self.retention;
        let mut removed = 0;

        let mut inner = self.inner.write();
        for series in inner.series.values_mut() {
            let before = series.len();
            series.retain(|m| m.timestamp >= cutoff);
            removed += before - series.len();
        }
        inner.series.retain(|_, s| !s.is_empty());

        for series in inner.performance.values_mut() {
            let before = series.len();
            series.retain(|r| r.timestamp >= cutoff);
            removed += before - series.len();
        }
        inner.performance.retain(|_, s| !s.is_empty());

        if removed > 0 {
            debug!("Metric cleanup removed {} expired entries", removed);
        }
        removed
    }

    /// Overview of the trailing summary window.
    pub fn summary(&self) -> MetricsSummary {
        let cutoff = self.clock.now() - self.summary_window;
        let inner = self.inner.read();

        let total_metrics = inner
            .series
            .values()
            .map(|s| s.iter().rev().take_while(|m| m.timestamp >= cutoff).count())
            .sum();

        let mut top_operations: Vec<OperationSummary> = inner
            .performance
            .iter()
            .filter_map(|(op, records)| {
                let recent: Vec<f64> = records
                    .iter()
                    .rev()
                    .take_while(|r| r.timestamp >= cutoff)
                    .map(|r| r.duration_ms)
                    .collect();
                if recent.is_empty() {
                    return None;
                }
                Some(OperationSummary {
                    operation: op.clone(),
                    count: recent.len(),
                    avg_duration_ms: recent.iter().sum::<f64>() / recent.len() as f64,
                })
            })
            .collect();

        top_operations.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.operation.cmp(&b.operation)));
        top_operations.truncate(TOP_OPERATIONS);

        MetricsSummary {
            total_metrics,
            top_operations,
            window_secs: self.summary_window.num_seconds(),
        }
    }

    /// Latency and error-rate statistics over the trailing `window`.
    ///
    /// `None` for `operation` aggregates every operation. Returns `None` when
    /// nothing was recorded in the window.
    pub fn operation_stats(&self, operation: Option<&str>, window: chrono::Duration) -> Option<OperationStats> {
        let cutoff = self.clock.now() - window;
        let inner = self.inner.read();

        let records: Vec<&PerformanceRecord> = match operation {
            Some(op) => inner
                .performance
                .get(op)
                .map(|s| s.iter().filter(|r| r.timestamp >= cutoff).collect())
                .unwrap_or_default(),
            None => inner
                .performance
                .values()
                .flat_map(|s| s.iter())
                .filter(|r| r.timestamp >= cutoff)
                .collect(),
        };

        if records.is_empty() {
            return None;
        }

        let count = records.len();
        let mut durations: Vec<f64> = records.iter().map(|r| r.duration_ms).collect();
        durations.sort_by(|a, b| a.total_cmp(b));
        let failures = records.iter().filter(|r| !r.success).count();

        Some(OperationStats {
            operation: operation.map(str::to_string),
            count,
            avg_duration_ms: durations.iter().sum::<f64>() / count as f64,
            p95_duration_ms: percentile(&durations, 0.95),
            error_rate_percent: failures as f64 * 100.0 / count as f64,
        })
    }

    /// Latest value of every series in Prometheus text format.
    pub fn export_prometheus(&self) -> String {
        let inner = self.inner.read();
        let latest: BTreeMap<&str, &Metric> = inner
            .series
            .iter()
            .filter_map(|(name, s)| s.back().map(|m| (name.as_str(), m)))
            .collect();

        let mut output = String::new();
        for (name, metric) in latest {
            let name = sanitize_metric_name(name);
            output.push_str(&format!("# TYPE {} gauge\n", name));

            let mut labels: Vec<(&String, &String)> = metric.tags.iter().collect();
            labels.sort();
            if labels.is_empty() {
                output.push_str(&format!("{} {}\n", name, metric.value));
            } else {
                let labels: Vec<String> = labels
                    .into_iter()
                    .map(|(k, v)| format!("{}=\"{}\"", sanitize_metric_name(k), v.replace('"', "\\\"")))
                    .collect();
                output.push_str(&format!("{}{{{}}} {}\n", name, labels.join(","), metric.value));
            }
        }
        output
    }

    /// Number of stored metrics across all series.
    pub fn len(&self) -> usize {
        self.inner.read().series.values().map(VecDeque::len).sum()
    }

    /// Whether no metric is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of distinct metric series.
    pub fn series_count(&self) -> usize {
        self.inner.read().series.len()
    }
}

#[async_trait]
impl Tickable for MetricStore {
    fn name(&self) -> &str {
        "metrics-cleanup"
    }

    async fn tick(&self) {
        self.cleanup();
    }
}

/// Pop from the front until both bounds hold.
fn evict<T>(series: &mut VecDeque<T>, max: usize, cutoff: DateTime<Utc>, ts: impl Fn(&T) -> DateTime<Utc>) {
    while series.len() > max {
        series.pop_front();
    }
    while series.front().is_some_and(|front| ts(front) < cutoff) {
        series.pop_front();
    }
}

/// Nearest-rank percentile over sorted input.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (p * sorted.len() as f64).ceil() as usize;
    sorted[rank.saturating_sub(1).min(sorted.len() - 1)]
}

fn sanitize_metric_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == ':' { c } else { '_' })
        .collect()
}
