//! Built-in health probes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use sysinfo::System;

use crate::clock::Clock;
use crate::config::HealthConfig;
use crate::error::MonitorError;
use crate::health::{ComponentKind, HealthProbe, ProbeOutcome};
use crate::metrics::MetricStore;
use crate::selector::MetricSelector;

/// Host resource readings, in percent.
pub trait ResourceSource: Send + Sync {
    fn memory_percent(&self) -> Option<f64>;
    fn cpu_percent(&self) -> Option<f64>;
}

/// Shortest span a CPU reading is measured over. Each `refresh_cpu_usage`
/// resets the baseline, so readings inside this span are served from cache.
const CPU_SAMPLE_SPAN: Duration = Duration::from_secs(5);

/// Last CPU reading, shared by every consumer of one source.
#[derive(Default)]
struct CpuCache {
    last: Option<(Instant, f64)>,
}

impl CpuCache {
    fn get(&mut self, now: Instant, refresh: impl FnOnce() -> Option<f64>) -> Option<f64> {
        if let Some((at, value)) = self.last {
            if now.saturating_duration_since(at) < CPU_SAMPLE_SPAN {
                return Some(value);
            }
        }
        let value = refresh()?;
        self.last = Some((now, value));
        Some(value)
    }
}

struct SysinfoState {
    sys: System,
    cpu: CpuCache,
}

/// Reads host resources through `sysinfo`.
pub struct SysinfoSource {
    state: Mutex<SysinfoState>,
}

impl SysinfoSource {
    pub fn new() -> Self {
        let mut sys = System::new();
        sys.refresh_memory();
        sys.refresh_cpu_usage();
        Self {
            state: Mutex::new(SysinfoState {
                sys,
                cpu: CpuCache::default(),
            }),
        }
    }
}

impl Default for SysinfoSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceSource for SysinfoSource {
    fn memory_percent(&self) -> Option<f64> {
        let mut state = self.state.lock();
        state.sys.refresh_memory();
        let total = state.sys.total_memory();
        if total == 0 {
            return None;
        }
        let used = total.saturating_sub(state.sys.available_memory());
        Some(used as f64 / total as f64 * 100.0)
    }

    fn cpu_percent(&self) -> Option<f64> {
        let mut state = self.state.lock();
        let SysinfoState { sys, cpu } = &mut *state;
        cpu.get(Instant::now(), || {
            sys.refresh_cpu_usage();
            let usage = sys.global_cpu_info().cpu_usage() as f64;
            usage.is_finite().then_some(usage)
        })
    }
}

/// Grade `value` against degraded/unhealthy thresholds.
fn grade(label: &str, value: f64, degraded: f64, unhealthy: f64) -> ProbeOutcome {
    let message = format!("{} at {:.1}%", label, value);
    if value >= unhealthy {
        ProbeOutcome::unhealthy(message)
    } else if value >= degraded {
        ProbeOutcome::degraded(message)
    } else {
        ProbeOutcome::healthy().with_message(message)
    }
}

/// Always healthy while the process can run tasks.
pub struct LivenessProbe;

#[async_trait]
impl HealthProbe for LivenessProbe {
    fn name(&self) -> &str {
        "liveness"
    }

    async fn probe(&self) -> Result<ProbeOutcome, MonitorError> {
        Ok(ProbeOutcome::healthy())
    }
}

/// Host memory usage.
pub struct MemoryProbe {
    source: Arc<dyn ResourceSource>,
    degraded: f64,
    unhealthy: f64,
}

impl MemoryProbe {
    pub fn new(source: Arc<dyn ResourceSource>, config: &HealthConfig) -> Self {
        Self {
            source,
            degraded: config.memory_degraded_percent,
            unhealthy: config.memory_unhealthy_percent,
        }
    }
}

#[async_trait]
impl HealthProbe for MemoryProbe {
    fn name(&self) -> &str {
        "memory"
    }

    fn kind(&self) -> ComponentKind {
        ComponentKind::Resource
    }

    async fn probe(&self) -> Result<ProbeOutcome, MonitorError> {
        let usage = self
            .source
            .memory_percent()
            .ok_or_else(|| MonitorError::probe("memory", "memory usage unavailable"))?;
        Ok(grade("memory usage", usage, self.degraded, self.unhealthy))
    }
}

/// Host CPU usage.
pub struct CpuProbe {
    source: Arc<dyn ResourceSource>,
    degraded: f64,
    unhealthy: f64,
}

impl CpuProbe {
    pub fn new(source: Arc<dyn ResourceSource>, config: &HealthConfig) -> Self {
        Self {
            source,
            degraded: config.cpu_degraded_percent,
            unhealthy: config.cpu_unhealthy_percent,
        }
    }
}

#[async_trait]
impl HealthProbe for CpuProbe {
    fn name(&self) -> &str {
        "cpu"
    }

    fn kind(&self) -> ComponentKind {
        ComponentKind::Resource
    }

    async fn probe(&self) -> Result<ProbeOutcome, MonitorError> {
        let usage = self
            .source
            .cpu_percent()
            .ok_or_else(|| MonitorError::probe("cpu", "cpu usage unavailable"))?;
        Ok(grade("cpu usage", usage, self.degraded, self.unhealthy))
    }
}

/// Core service liveness, proven by a heartbeat metric the service records.
///
/// Unhealthy when no heartbeat was seen within `max_age`, degraded past half of it.
pub struct HeartbeatProbe {
    store: Arc<MetricStore>,
    metric: String,
    selector: MetricSelector,
    max_age: chrono::Duration,
}

impl HeartbeatProbe {
    pub fn new(store: Arc<MetricStore>, config: &HealthConfig) -> Result<Self, MonitorError> {
        Ok(Self {
            store,
            metric: config.heartbeat_metric.clone(),
            selector: MetricSelector::parse(&config.heartbeat_metric)?,
            max_age: config.heartbeat_max_age(),
        })
    }
}

#[async_trait]
impl HealthProbe for HeartbeatProbe {
    fn name(&self) -> &str {
        "heartbeat"
    }

    fn kind(&self) -> ComponentKind {
        ComponentKind::Core
    }

    fn critical(&self) -> bool {
        true
    }

    async fn probe(&self) -> Result<ProbeOutcome, MonitorError> {
        let Some(last) = self.store.latest(&self.selector, None) else {
            return Ok(ProbeOutcome::unhealthy(format!("no '{}' heartbeat recorded", self.metric)));
        };

        let age = self.store.clock().now() - last.timestamp;
        let message = format!("last heartbeat {}s ago", age.num_seconds());
        if age > self.max_age {
            Ok(ProbeOutcome::unhealthy(message))
        } else if age > self.max_age / 2 {
            Ok(ProbeOutcome::degraded(message))
        } else {
            Ok(ProbeOutcome::healthy().with_message(message))
        }
    }
}

/// Request error rate derived from performance records.
pub struct ErrorRateProbe {
    store: Arc<MetricStore>,
    window: chrono::Duration,
    degraded: f64,
    unhealthy: f64,
}

impl ErrorRateProbe {
    pub fn new(store: Arc<MetricStore>, config: &HealthConfig) -> Self {
        Self {
            store,
            window: config.traffic_window(),
            degraded: config.error_rate_degraded_percent,
            unhealthy: config.error_rate_unhealthy_percent,
        }
    }
}

#[async_trait]
impl HealthProbe for ErrorRateProbe {
    fn name(&self) -> &str {
        "error_rate"
    }

    fn kind(&self) -> ComponentKind {
        ComponentKind::Traffic
    }

    async fn probe(&self) -> Result<ProbeOutcome, MonitorError> {
        match self.store.operation_stats(None, self.window) {
            Some(stats) => Ok(grade(
                "error rate",
                stats.error_rate_percent,
                self.degraded,
                self.unhealthy,
            )),
            None => Ok(ProbeOutcome::healthy().with_message("no traffic")),
        }
    }
}

/// The standard probe set.
pub fn builtin_probes(
    config: &HealthConfig,
    store: Arc<MetricStore>,
    source: Arc<dyn ResourceSource>,
) -> Result<Vec<Arc<dyn HealthProbe>>, MonitorError> {
    let probes: Vec<Arc<dyn HealthProbe>> = vec![
        Arc::new(LivenessProbe),
        Arc::new(MemoryProbe::new(source.clone(), config)),
        Arc::new(CpuProbe::new(source, config)),
        Arc::new(HeartbeatProbe::new(store.clone(), config)?),
        Arc::new(ErrorRateProbe::new(store, config)),
    ];
    Ok(probes)
}
