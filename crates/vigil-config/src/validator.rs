//! Configuration validation.

use std::collections::HashSet;
use std::fmt;

use crate::error::ConfigError;
use crate::schema::Config;

/// Validation result.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }

    /// The warnings if valid, otherwise the first error.
    pub fn into_result(self) -> Result<Vec<ValidationWarning>, ConfigError> {
        match self.errors.into_iter().next() {
            Some(error) => Err(ConfigError::InvalidValue {
                field: error.path,
                message: error.message,
            }),
            None => Ok(self.warnings),
        }
    }

    fn require_positive(&mut self, path: &str, value: u64) {
        if value == 0 {
            self.add_error(ValidationError::new(path, "must be greater than 0"));
        }
    }

    fn require_percent(&mut self, path: &str, value: f64) {
        if !(value > 0.0 && value <= 100.0) {
            self.add_error(ValidationError::new(path, "must be a percentage in (0, 100]"));
        }
    }
}

/// A validation error.
#[derive(Debug)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// A validation warning.
#[derive(Debug)]
pub struct ValidationWarning {
    pub path: String,
    pub message: String,
}

impl ValidationWarning {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration.
    pub fn validate(config: &Config) -> Result<ValidationResult, ConfigError> {
        let mut result = ValidationResult::default();

        Self::validate_service(config, &mut result);
        Self::validate_logging(config, &mut result);
        Self::validate_metrics(config, &mut result);
        Self::validate_health(config, &mut result);
        Self::validate_alerts(config, &mut result);
        Self::validate_recovery(config, &mut result);

        Ok(result)
    }

    fn validate_service(config: &Config, result: &mut ValidationResult) {
        if config.service.name.trim().is_empty() {
            result.add_error(ValidationError::new("service.name", "Service name cannot be empty"));
        }
    }

    fn validate_logging(config: &Config, result: &mut ValidationResult) {
        if config.logging.level.trim().is_empty() {
            result.add_error(ValidationError::new("logging.level", "Log level cannot be empty"));
        }
        result.require_positive("logging.max_files", config.logging.max_files as u64);
    }

    fn validate_metrics(config: &Config, result: &mut ValidationResult) {
        let metrics = &config.metrics;
        result.require_positive("metrics.max_per_series", metrics.max_per_series as u64);
        result.require_positive("metrics.retention_secs", metrics.retention_secs);
        result.require_positive("metrics.cleanup_interval_secs", metrics.cleanup_interval_secs);
        result.require_positive("metrics.summary_window_secs", metrics.summary_window_secs);
        result.require_positive("metrics.sample_interval_secs", metrics.sample_interval_secs);

        if metrics.summary_window_secs > metrics.retention_secs {
            result.add_warning(ValidationWarning::new(
                "metrics.summary_window_secs",
                "Summary window is longer than retention; summaries only cover retained metrics",
            ));
        }
    }

    fn validate_health(config: &Config, result: &mut ValidationResult) {
        let health = &config.health;
        result.require_positive("health.interval_secs", health.interval_secs);
        result.require_positive("health.probe_timeout_secs", health.probe_timeout_secs);
        result.require_positive("health.heartbeat_max_age_secs", health.heartbeat_max_age_secs);
        result.require_positive("health.traffic_window_secs", health.traffic_window_secs);

        if health.interval_secs > 0 && health.probe_timeout_secs >= health.interval_secs {
            result.add_warning(ValidationWarning::new(
                "health.probe_timeout_secs",
                "Probe timeout is not shorter than the check interval; checks may overlap",
            ));
        }

        for (name, degraded, unhealthy) in [
            ("memory", health.memory_degraded_percent, health.memory_unhealthy_percent),
            ("cpu", health.cpu_degraded_percent, health.cpu_unhealthy_percent),
            (
                "error_rate",
                health.error_rate_degraded_percent,
                health.error_rate_unhealthy_percent,
            ),
        ] {
            let degraded_path = format!("health.{}_degraded_percent", name);
            result.require_percent(&degraded_path, degraded);
            result.require_percent(&format!("health.{}_unhealthy_percent", name), unhealthy);
            if degraded >= unhealthy {
                result.add_error(ValidationError::new(
                    degraded_path,
                    "Degraded threshold must be below the unhealthy threshold",
                ));
            }
        }

        if let Err(e) = vigil_monitor::MetricSelector::parse(&health.heartbeat_metric) {
            result.add_error(ValidationError::new("health.heartbeat_metric", e.to_string()));
        }
    }

    fn validate_alerts(config: &Config, result: &mut ValidationResult) {
        let alerts = &config.alerts;
        result.require_positive("alerts.interval_secs", alerts.interval_secs);
        result.require_positive("alerts.lookback_secs", alerts.lookback_secs);
        result.require_positive("alerts.max_history", alerts.max_history as u64);
        result.require_positive("alerts.delivery_timeout_secs", alerts.delivery_timeout_secs);

        let mut rule_ids = HashSet::new();
        for (i, rule) in alerts.rules.iter().enumerate() {
            if let Err(e) = rule.validate() {
                result.add_error(ValidationError::new(format!("alerts.rules[{}]", i), e.to_string()));
            }
            if let Some(id) = &rule.id {
                if !rule_ids.insert(id.as_str()) {
                    result.add_error(ValidationError::new(
                        format!("alerts.rules[{}].id", i),
                        format!("Duplicate rule id '{}'", id),
                    ));
                }
            }
        }

        let mut channel_ids = HashSet::new();
        for (i, channel) in alerts.channels.iter().enumerate() {
            if let Err(e) = channel.validate() {
                result.add_error(ValidationError::new(format!("alerts.channels[{}]", i), e.to_string()));
            }
            if !channel.id.is_empty() && !channel_ids.insert(channel.id.as_str()) {
                result.add_error(ValidationError::new(
                    format!("alerts.channels[{}].id", i),
                    format!("Duplicate channel id '{}'", channel.id),
                ));
            }
        }

        if !alerts.channels.iter().any(|c| c.enabled) {
            result.add_warning(ValidationWarning::new(
                "alerts.channels",
                "No enabled notification channels; alerts will only be logged",
            ));
        }

        if !alerts.default_rules && alerts.rules.is_empty() {
            result.add_warning(ValidationWarning::new(
                "alerts.rules",
                "No alert rules configured and default rules are disabled",
            ));
        }
    }

    fn validate_recovery(config: &Config, result: &mut ValidationResult) {
        let recovery = &config.recovery;
        if !recovery.enabled {
            return;
        }

        result.require_positive("recovery.health_checks.interval_secs", recovery.health_checks.interval_secs);
        result.require_positive(
            "recovery.thresholds.consecutive_failures",
            recovery.thresholds.consecutive_failures as u64,
        );
        result.require_positive(
            "recovery.thresholds.escalation_after_secs",
            recovery.thresholds.escalation_after_secs,
        );

        let actions = &recovery.actions;
        if !recovery.auto_recovery && (actions.restart_service || actions.restore_backup) {
            result.add_warning(ValidationWarning::new(
                "recovery.auto_recovery",
                "Recovery actions are configured but only run when auto_recovery is enabled",
            ));
        }

        if actions.restart_service && recovery.restart_limit.max_restarts == 0 {
            result.add_warning(ValidationWarning::new(
                "recovery.restart_limit.max_restarts",
                "max_restarts is 0; every restart will be suppressed",
            ));
        }
        if actions.restart_service {
            result.require_positive("recovery.restart_limit.window_secs", recovery.restart_limit.window_secs);
        }
    }
}

#[cfg(test)]
#[path = "validator_tests.rs"]
mod tests;
