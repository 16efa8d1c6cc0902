//! Component health probing and composite scoring.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::HealthConfig;
use crate::error::MonitorError;
use crate::scheduler::Tickable;

/// Health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Fully functional.
    Healthy,
    /// Degraded but functional.
    Degraded,
    /// Not functional.
    Unhealthy,
}

impl HealthStatus {
    /// Contribution of a component in this state to the composite score.
    pub fn weight(&self) -> u32 {
        match self {
            HealthStatus::Healthy => 100,
            HealthStatus::Degraded => 60,
            HealthStatus::Unhealthy => 0,
        }
    }

    /// Status band for a composite score.
    pub fn from_score(score: u8) -> Self {
        match score {
            80.. => HealthStatus::Healthy,
            50.. => HealthStatus::Degraded,
            _ => HealthStatus::Unhealthy,
        }
    }

    /// Whether this is anything but healthy.
    pub fn is_failing(&self) -> bool {
        *self != HealthStatus::Healthy
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// What a probed component is, used to classify failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    /// The service this process exists to run.
    Core,
    /// Host resources (memory, cpu, disk).
    Resource,
    /// Request traffic quality (error rate, latency).
    Traffic,
    /// Anything else.
    #[default]
    Auxiliary,
}

/// Result of probing one component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentCheck {
    pub name: String,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Time the probe took.
    #[serde(with = "duration_ms")]
    pub latency: Duration,
    pub checked_at: DateTime<Utc>,
    pub kind: ComponentKind,
    /// Whether failure of this component alone warrants recovery.
    pub critical: bool,
    /// Non-healthy results in a row, including this one.
    pub consecutive_failures: u32,
}

/// Composite snapshot of all components.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemHealth {
    pub status: HealthStatus,
    /// 0-100.
    pub score: u8,
    pub components: HashMap<String, ComponentCheck>,
    pub updated_at: DateTime<Utc>,
}

impl SystemHealth {
    /// Aggregate component checks into a snapshot.
    pub fn from_components(components: HashMap<String, ComponentCheck>, updated_at: DateTime<Utc>) -> Self {
        let score = composite_score(components.values().map(|c| c.status));
        Self {
            status: HealthStatus::from_score(score),
            score,
            components,
            updated_at,
        }
    }

    /// Components that are not healthy.
    pub fn failing(&self) -> impl Iterator<Item = &ComponentCheck> {
        self.components.values().filter(|c| c.status.is_failing())
    }

    /// Critical components that are unhealthy.
    pub fn critical_failures(&self) -> impl Iterator<Item = &ComponentCheck> {
        self.components
            .values()
            .filter(|c| c.critical && c.status == HealthStatus::Unhealthy)
    }
}

/// Average of status weights, rounded down so any failing component costs
/// at least one point. No components means 100.
pub fn composite_score(statuses: impl Iterator<Item = HealthStatus>) -> u8 {
    let (sum, count) = statuses.fold((0u64, 0u64), |(sum, count), s| {
        (sum + u64::from(s.weight()), count + 1)
    });
    if count == 0 {
        return 100;
    }
    (sum / count).min(100) as u8
}

/// What a probe reports.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeOutcome {
    pub status: HealthStatus,
    pub message: Option<String>,
}

impl ProbeOutcome {
    pub fn healthy() -> Self {
        Self {
            status: HealthStatus::Healthy,
            message: None,
        }
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Degraded,
            message: Some(message.into()),
        }
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            message: Some(message.into()),
        }
    }

    /// Attach a message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// A component that can be health-checked.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Component name, unique within an aggregator.
    fn name(&self) -> &str;

    /// Component classification.
    fn kind(&self) -> ComponentKind {
        ComponentKind::Auxiliary
    }

    /// Whether an unhealthy result alone warrants recovery.
    fn critical(&self) -> bool {
        false
    }

    /// Probe the component.
    async fn probe(&self) -> Result<ProbeOutcome, MonitorError>;
}

/// Adapter turning an async closure into a [`HealthProbe`].
pub struct FnProbe<F> {
    name: String,
    kind: ComponentKind,
    critical: bool,
    f: F,
}

impl<F, Fut> FnProbe<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<ProbeOutcome, MonitorError>> + Send,
{
    /// Create an auxiliary, non-critical probe.
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            kind: ComponentKind::Auxiliary,
            critical: false,
            f,
        }
    }

    /// Set the component kind.
    pub fn with_kind(mut self, kind: ComponentKind) -> Self {
        self.kind = kind;
        self
    }

    /// Mark as critical.
    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }
}

#[async_trait]
impl<F, Fut> HealthProbe for FnProbe<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<ProbeOutcome, MonitorError>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ComponentKind {
        self.kind
    }

    fn critical(&self) -> bool {
        self.critical
    }

    async fn probe(&self) -> Result<ProbeOutcome, MonitorError> {
        (self.f)().await
    }
}

/// Runs registered probes concurrently and aggregates their results.
pub struct HealthAggregator {
    probe_timeout: Duration,
    clock: Arc<dyn Clock>,
    probes: RwLock<Vec<Arc<dyn HealthProbe>>>,
    streaks: RwLock<HashMap<String, u32>>,
    last_result: RwLock<Option<SystemHealth>>,
    check_count: AtomicU64,
    failure_count: AtomicU64,
}

impl HealthAggregator {
    /// Create an aggregator using the system clock.
    pub fn new(config: &HealthConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create an aggregator reading time from `clock`.
    pub fn with_clock(config: &HealthConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            probe_timeout: config.probe_timeout(),
            clock,
            probes: RwLock::new(Vec::new()),
            streaks: RwLock::new(HashMap::new()),
            last_result: RwLock::new(None),
            check_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
        }
    }

    /// Register a probe, replacing any probe with the same name.
    pub async fn register_probe(&self, probe: Arc<dyn HealthProbe>) {
        let mut probes = self.probes.write().await;
        probes.retain(|p| p.name() != probe.name());
        info!("Registered health probe: {}", probe.name());
        probes.push(probe);
    }

    /// Register a closure as an auxiliary probe.
    pub async fn register_fn<F, Fut>(&self, name: impl Into<String>, f: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ProbeOutcome, MonitorError>> + Send + 'static,
    {
        self.register_probe(Arc::new(FnProbe::new(name, f))).await;
    }

    /// Remove a probe by name.
    pub async fn unregister_probe(&self, name: &str) -> bool {
        let mut probes = self.probes.write().await;
        let before = probes.len();
        probes.retain(|p| p.name() != name);
        self.streaks.write().await.remove(name);
        probes.len() != before
    }

    /// Names of registered probes.
    pub async fn probe_names(&self) -> Vec<String> {
        self.probes.read().await.iter().map(|p| p.name().to_string()).collect()
    }

    /// Probe every component and aggregate.
    #[instrument(skip(self))]
    pub async fn check(&self) -> SystemHealth {
        let start = Instant::now();
        self.check_count.fetch_add(1, Ordering::SeqCst);

        let probes: Vec<Arc<dyn HealthProbe>> = self.probes.read().await.clone();
        let timeout = self.probe_timeout;
        let results = join_all(probes.iter().map(|probe| run_probe(probe.clone(), timeout))).await;

        let now = self.clock.now();
        let mut streaks = self.streaks.write().await;
        let mut components = HashMap::with_capacity(results.len());
        for (probe, (outcome, latency)) in probes.iter().zip(results) {
            let streak = streaks.entry(probe.name().to_string()).or_insert(0);
            if outcome.status.is_failing() {
                *streak += 1;
            } else {
                *streak = 0;
            }

            debug!("Health probe {}: {}", probe.name(), outcome.status);
            components.insert(
                probe.name().to_string(),
                ComponentCheck {
                    name: probe.name().to_string(),
                    status: outcome.status,
                    message: outcome.message,
                    latency,
                    checked_at: now,
                    kind: probe.kind(),
                    critical: probe.critical(),
                    consecutive_failures: *streak,
                },
            );
        }
        drop(streaks);

        let health = SystemHealth::from_components(components, now);
        debug!(
            "Health check completed in {:?}: {} (score {})",
            start.elapsed(),
            health.status,
            health.score
        );

        if health.status == HealthStatus::Unhealthy {
            self.failure_count.fetch_add(1, Ordering::SeqCst);
            let failing: Vec<&str> = health.failing().map(|c| c.name.as_str()).collect();
            warn!("System unhealthy (score {}), failing: {:?}", health.score, failing);
        }

        *self.last_result.write().await = Some(health.clone());
        health
    }

    /// Result of the most recent check.
    pub async fn last_result(&self) -> Option<SystemHealth> {
        self.last_result.read().await.clone()
    }

    /// Total checks performed.
    pub fn check_count(&self) -> u64 {
        self.check_count.load(Ordering::SeqCst)
    }

    /// Checks whose composite status was unhealthy.
    pub fn failure_count(&self) -> u64 {
        self.failure_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Tickable for HealthAggregator {
    fn name(&self) -> &str {
        "health-check"
    }

    async fn tick(&self) {
        self.check().await;
    }
}

/// Run one probe under a timeout, folding errors and panics into an unhealthy outcome.
async fn run_probe(probe: Arc<dyn HealthProbe>, timeout: Duration) -> (ProbeOutcome, Duration) {
    let start = Instant::now();
    let guarded = AssertUnwindSafe(probe.probe()).catch_unwind();
    let outcome = match tokio::time::timeout(timeout, guarded).await {
        Ok(Ok(Ok(outcome))) => outcome,
        Ok(Ok(Err(e))) => {
            warn!("Health probe {} failed: {}", probe.name(), e);
            ProbeOutcome::unhealthy(e.to_string())
        }
        Ok(Err(panic)) => {
            let reason = panic_message(panic.as_ref());
            error!("Health probe {} panicked: {}", probe.name(), reason);
            ProbeOutcome::unhealthy(format!("probe panicked: {}", reason))
        }
        Err(_) => {
            let e = MonitorError::ProbeTimeout {
                probe: probe.name().to_string(),
                timeout,
            };
            warn!("{}", e);
            ProbeOutcome::unhealthy(e.to_string())
        }
    };
    (outcome, start.elapsed())
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[cfg(test)]
#[path = "health_tests.rs"]
mod tests;
