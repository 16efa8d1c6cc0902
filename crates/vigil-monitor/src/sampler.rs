//! Periodic sampling of host resources and derived traffic metrics.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::debug;

use crate::metrics::{MetricStore, MetricUnit};
use crate::probes::ResourceSource;
use crate::scheduler::Tickable;

pub const MEMORY_USAGE: &str = "system.memory.usage";
pub const CPU_USAGE: &str = "system.cpu.usage";
pub const PROCESS_UPTIME: &str = "process.uptime";
pub const HTTP_ERROR_RATE: &str = "http.error_rate";
pub const HTTP_RESPONSE_P95: &str = "http.response_time.p95";

/// Feeds the store with the metrics the default alert rules watch.
pub struct SystemSampler {
    store: Arc<MetricStore>,
    source: Arc<dyn ResourceSource>,
    traffic_window: chrono::Duration,
    started: Instant,
}

impl SystemSampler {
    pub fn new(store: Arc<MetricStore>, source: Arc<dyn ResourceSource>, traffic_window: chrono::Duration) -> Self {
        Self {
            store,
            source,
            traffic_window,
            started: Instant::now(),
        }
    }

    /// Record one round of samples.
    pub fn sample(&self) {
        if let Some(memory) = self.source.memory_percent() {
            self.store.record_value(MEMORY_USAGE, memory, MetricUnit::Percent);
        }
        if let Some(cpu) = self.source.cpu_percent() {
            self.store.record_value(CPU_USAGE, cpu, MetricUnit::Percent);
        }
        self.store.record_value(
            PROCESS_UPTIME,
            self.started.elapsed().as_millis() as f64,
            MetricUnit::Ms,
        );

        // An idle window reads as zero so traffic alerts can resolve.
        let (error_rate, p95) = match self.store.operation_stats(None, self.traffic_window) {
            Some(stats) => {
                debug!(
                    "Sampled traffic: {} ops, {:.1}% errors, p95 {:.0}ms",
                    stats.count, stats.error_rate_percent, stats.p95_duration_ms
                );
                (stats.error_rate_percent, stats.p95_duration_ms)
            }
            None => {
                debug!("No traffic in the last {}s", self.traffic_window.num_seconds());
                (0.0, 0.0)
            }
        };
        self.store
            .record(HTTP_ERROR_RATE, error_rate, MetricUnit::Percent, HashMap::new());
        self.store
            .record(HTTP_RESPONSE_P95, p95, MetricUnit::Ms, HashMap::new());
    }
}

#[async_trait]
impl Tickable for SystemSampler {
    fn name(&self) -> &str {
        "system-sampler"
    }

    async fn tick(&self) {
        self.sample();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::MetricsConfig;
    use crate::metrics::MetricQuery;

    struct Fixed;

    impl ResourceSource for Fixed {
        fn memory_percent(&self) -> Option<f64> {
            Some(42.0)
        }

        fn cpu_percent(&self) -> Option<f64> {
            None
        }
    }

    #[test]
    fn test_sample_records_resources_and_traffic() {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(MetricStore::with_clock(&MetricsConfig::default(), clock));
        let sampler = SystemSampler::new(store.clone(), Arc::new(Fixed), chrono::Duration::minutes(5));

        sampler.sample();
        assert_eq!(store.query(&MetricQuery::named(MEMORY_USAGE))[0].value, 42.0);
        assert!(store.query(&MetricQuery::named(CPU_USAGE)).is_empty());
        assert_eq!(store.query(&MetricQuery::named(HTTP_ERROR_RATE))[0].value, 0.0);
        assert_eq!(store.query(&MetricQuery::named(HTTP_RESPONSE_P95))[0].value, 0.0);

        store.record_performance("send", 100.0, false, serde_json::Map::new());
        store.record_performance("send", 300.0, true, serde_json::Map::new());
        sampler.sample();
        assert_eq!(store.query(&MetricQuery::named(HTTP_ERROR_RATE))[0].value, 50.0);
        assert_eq!(store.query(&MetricQuery::named(HTTP_RESPONSE_P95))[0].value, 300.0);
    }
}
