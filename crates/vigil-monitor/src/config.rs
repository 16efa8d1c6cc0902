//! Monitor configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::alert_channels::AlertChannel;
use crate::rules::RuleDefinition;

/// Monitor configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Metric store bounds and sampling.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Health aggregation.
    #[serde(default)]
    pub health: HealthConfig,

    /// Alert rules and channels.
    #[serde(default)]
    pub alerts: AlertsConfig,
}

/// Metric store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Maximum entries kept per series.
    #[serde(default = "default_max_per_series")]
    pub max_per_series: usize,

    /// Maximum age of an entry in seconds.
    #[serde(default = "default_retention")]
    pub retention_secs: u64,

    /// Cleanup pass interval in seconds.
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,

    /// Trailing window used by `summary()` in seconds.
    #[serde(default = "default_summary_window")]
    pub summary_window_secs: u64,

    /// System sampler interval in seconds.
    #[serde(default = "default_sample_interval")]
    pub sample_interval_secs: u64,
}

fn default_max_per_series() -> usize {
    1_000
}

fn default_retention() -> u64 {
    24 * 60 * 60
}

fn default_cleanup_interval() -> u64 {
    5 * 60
}

fn default_summary_window() -> u64 {
    60 * 60
}

fn default_sample_interval() -> u64 {
    30
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            max_per_series: default_max_per_series(),
            retention_secs: default_retention(),
            cleanup_interval_secs: default_cleanup_interval(),
            summary_window_secs: default_summary_window(),
            sample_interval_secs: default_sample_interval(),
        }
    }
}

impl MetricsConfig {
    /// Retention as a chrono duration.
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.retention_secs as i64)
    }

    /// Summary window as a chrono duration.
    pub fn summary_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.summary_window_secs as i64)
    }

    /// Cleanup interval.
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    /// Sampling interval.
    pub fn sample_interval(&self) -> Duration {
        Duration::from_secs(self.sample_interval_secs)
    }
}

/// Health aggregation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Periodic check interval in seconds.
    #[serde(default = "default_health_interval")]
    pub interval_secs: u64,

    /// Per-probe timeout in seconds.
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,

    /// Memory usage percent considered degraded.
    #[serde(default = "default_memory_degraded")]
    pub memory_degraded_percent: f64,

    /// Memory usage percent considered unhealthy.
    #[serde(default = "default_memory_unhealthy")]
    pub memory_unhealthy_percent: f64,

    /// CPU usage percent considered degraded.
    #[serde(default = "default_cpu_degraded")]
    pub cpu_degraded_percent: f64,

    /// CPU usage percent considered unhealthy.
    #[serde(default = "default_cpu_unhealthy")]
    pub cpu_unhealthy_percent: f64,

    /// Metric the core service records to prove it is alive.
    #[serde(default = "default_heartbeat_metric")]
    pub heartbeat_metric: String,

    /// Maximum heartbeat age in seconds.
    #[serde(default = "default_heartbeat_max_age")]
    pub heartbeat_max_age_secs: u64,

    /// Error-rate percent considered degraded.
    #[serde(default = "default_error_rate_degraded")]
    pub error_rate_degraded_percent: f64,

    /// Error-rate percent considered unhealthy.
    #[serde(default = "default_error_rate_unhealthy")]
    pub error_rate_unhealthy_percent: f64,

    /// Trailing window for error rate and latency derivation, in seconds.
    #[serde(default = "default_traffic_window")]
    pub traffic_window_secs: u64,
}

fn default_health_interval() -> u64 {
    60
}

fn default_probe_timeout() -> u64 {
    5
}

fn default_memory_degraded() -> f64 {
    85.0
}

fn default_memory_unhealthy() -> f64 {
    95.0
}

fn default_cpu_degraded() -> f64 {
    80.0
}

fn default_cpu_unhealthy() -> f64 {
    95.0
}

fn default_heartbeat_metric() -> String {
    "service.heartbeat".to_string()
}

fn default_heartbeat_max_age() -> u64 {
    180
}

fn default_error_rate_degraded() -> f64 {
    5.0
}

fn default_error_rate_unhealthy() -> f64 {
    20.0
}

fn default_traffic_window() -> u64 {
    5 * 60
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_health_interval(),
            probe_timeout_secs: default_probe_timeout(),
            memory_degraded_percent: default_memory_degraded(),
            memory_unhealthy_percent: default_memory_unhealthy(),
            cpu_degraded_percent: default_cpu_degraded(),
            cpu_unhealthy_percent: default_cpu_unhealthy(),
            heartbeat_metric: default_heartbeat_metric(),
            heartbeat_max_age_secs: default_heartbeat_max_age(),
            error_rate_degraded_percent: default_error_rate_degraded(),
            error_rate_unhealthy_percent: default_error_rate_unhealthy(),
            traffic_window_secs: default_traffic_window(),
        }
    }
}

impl HealthConfig {
    /// Check interval.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Per-probe timeout.
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    /// Maximum heartbeat age.
    pub fn heartbeat_max_age(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.heartbeat_max_age_secs as i64)
    }

    /// Traffic derivation window.
    pub fn traffic_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.traffic_window_secs as i64)
    }
}

/// Alerting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertsConfig {
    /// Rule evaluation interval in seconds.
    #[serde(default = "default_alert_interval")]
    pub interval_secs: u64,

    /// Only metrics younger than this are evaluated, in seconds.
    #[serde(default = "default_lookback")]
    pub lookback_secs: u64,

    /// Maximum alerts kept in history.
    #[serde(default = "default_max_history")]
    pub max_history: usize,

    /// Install the built-in rule set when `rules` is empty.
    #[serde(default = "default_true")]
    pub default_rules: bool,

    /// Also dispatch resolutions to channels.
    #[serde(default)]
    pub notify_on_resolve: bool,

    /// Service name stamped on every notification.
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Per-request timeout for HTTP channels in seconds.
    #[serde(default = "default_delivery_timeout")]
    pub delivery_timeout_secs: u64,

    /// Rule definitions.
    #[serde(default)]
    pub rules: Vec<RuleDefinition>,

    /// Channel definitions.
    #[serde(default)]
    pub channels: Vec<AlertChannel>,
}

fn default_alert_interval() -> u64 {
    30
}

fn default_lookback() -> u64 {
    5 * 60
}

fn default_max_history() -> usize {
    1_000
}

fn default_true() -> bool {
    true
}

fn default_service_name() -> String {
    "vigil".to_string()
}

fn default_delivery_timeout() -> u64 {
    10
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_alert_interval(),
            lookback_secs: default_lookback(),
            max_history: default_max_history(),
            default_rules: default_true(),
            notify_on_resolve: false,
            service_name: default_service_name(),
            delivery_timeout_secs: default_delivery_timeout(),
            rules: Vec::new(),
            channels: Vec::new(),
        }
    }
}

impl AlertsConfig {
    /// Evaluation interval.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Lookback window.
    pub fn lookback(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.lookback_secs as i64)
    }

    /// HTTP delivery timeout.
    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_secs(self.delivery_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MonitorConfig::default();
        assert_eq!(config.metrics.max_per_series, 1_000);
        assert_eq!(config.metrics.retention_secs, 86_400);
        assert_eq!(config.health.interval_secs, 60);
        assert_eq!(config.health.probe_timeout(), Duration::from_secs(5));
        assert_eq!(config.alerts.interval(), Duration::from_secs(30));
        assert!(config.alerts.default_rules);
        assert!(config.alerts.rules.is_empty());
    }

    #[test]
    fn test_partial_deserialize_fills_defaults() {
        let config: MonitorConfig = serde_json::from_value(serde_json::json!({
            "metrics": { "max_per_series": 50 },
            "alerts": { "notify_on_resolve": true }
        }))
        .unwrap();

        assert_eq!(config.metrics.max_per_series, 50);
        assert_eq!(config.metrics.retention_secs, 86_400);
        assert!(config.alerts.notify_on_resolve);
        assert_eq!(config.alerts.service_name, "vigil");
    }
}
