//! Configuration schema definitions.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use vigil_monitor::{AlertsConfig, HealthConfig, MetricsConfig, MonitorConfig};
use vigil_recovery::RecoveryConfig;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub service: ServiceConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    #[serde(default)]
    pub health: HealthConfig,

    #[serde(default)]
    pub alerts: AlertsConfig,

    #[serde(default)]
    pub recovery: RecoveryConfig,
}

impl Config {
    /// Monitor section, with the service name applied to alert payloads.
    pub fn monitor(&self) -> MonitorConfig {
        let mut alerts = self.alerts.clone();
        alerts.service_name = self.service.name.clone();
        MonitorConfig {
            metrics: self.metrics.clone(),
            health: self.health.clone(),
            alerts,
        }
    }
}

/// Identity of the monitored service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_service_name")]
    pub name: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
        }
    }
}

fn default_service_name() -> String {
    "vigil".to_string()
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for rotated log files. Defaults to the platform data directory.
    #[serde(default)]
    pub directory: Option<PathBuf>,

    /// Write the file log as JSON lines.
    #[serde(default)]
    pub json: bool,

    /// Rotated files to keep.
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: None,
            json: false,
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    30
}
