//! Recovery configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Disaster recovery configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Whether disaster monitoring runs at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Run recovery actions automatically when an event opens.
    #[serde(default)]
    pub auto_recovery: bool,

    #[serde(default)]
    pub health_checks: HealthCheckSettings,

    #[serde(default)]
    pub thresholds: RecoveryThresholds,

    #[serde(default)]
    pub actions: RecoveryActions,

    #[serde(default)]
    pub restart_limit: RestartLimit,
}

fn default_true() -> bool {
    true
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            auto_recovery: false,
            health_checks: HealthCheckSettings::default(),
            thresholds: RecoveryThresholds::default(),
            actions: RecoveryActions::default(),
            restart_limit: RestartLimit::default(),
        }
    }
}

/// Detection cadence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckSettings {
    /// Seconds between orchestrator ticks.
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
}

fn default_interval() -> u64 {
    60
}

impl Default for HealthCheckSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
        }
    }
}

impl HealthCheckSettings {
    /// Tick interval.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// When an event opens and escalates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryThresholds {
    /// Non-healthy snapshots in a row before an event opens.
    #[serde(default = "default_consecutive_failures")]
    pub consecutive_failures: u32,

    /// Seconds an event may stay open before it is escalated.
    #[serde(default = "default_escalation_after")]
    pub escalation_after_secs: u64,
}

fn default_consecutive_failures() -> u32 {
    3
}

fn default_escalation_after() -> u64 {
    15 * 60
}

impl Default for RecoveryThresholds {
    fn default() -> Self {
        Self {
            consecutive_failures: default_consecutive_failures(),
            escalation_after_secs: default_escalation_after(),
        }
    }
}

impl RecoveryThresholds {
    /// Escalation delay.
    pub fn escalation_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.escalation_after_secs as i64)
    }
}

/// Which recovery actions are allowed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryActions {
    /// Ask the supervisor to restart the process on critical events.
    #[serde(default)]
    pub restart_service: bool,

    /// Restore the newest completed backup when the core service is down.
    #[serde(default)]
    pub restore_backup: bool,

    /// Notify admins through the alert channels.
    #[serde(default = "default_true")]
    pub notify_admins: bool,
}

impl Default for RecoveryActions {
    fn default() -> Self {
        Self {
            restart_service: false,
            restore_backup: false,
            notify_admins: default_true(),
        }
    }
}

/// Restart rate limit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestartLimit {
    /// Maximum restarts within the window.
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,

    /// Window in seconds.
    #[serde(default = "default_restart_window")]
    pub window_secs: u64,
}

fn default_max_restarts() -> u32 {
    3
}

fn default_restart_window() -> u64 {
    30 * 60
}

impl Default for RestartLimit {
    fn default() -> Self {
        Self {
            max_restarts: default_max_restarts(),
            window_secs: default_restart_window(),
        }
    }
}

impl RestartLimit {
    /// Window as a chrono duration.
    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.window_secs as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RecoveryConfig::default();
        assert!(config.enabled);
        assert!(!config.auto_recovery);
        assert_eq!(config.health_checks.interval(), Duration::from_secs(60));
        assert_eq!(config.thresholds.consecutive_failures, 3);
        assert_eq!(config.thresholds.escalation_after(), chrono::Duration::minutes(15));
        assert!(config.actions.notify_admins);
        assert_eq!(config.restart_limit.max_restarts, 3);
    }

    #[test]
    fn test_partial_sections() {
        let config: RecoveryConfig = serde_json::from_value(serde_json::json!({
            "auto_recovery": true,
            "actions": { "restore_backup": true },
            "thresholds": { "consecutive_failures": 5 }
        }))
        .unwrap();
        assert!(config.auto_recovery);
        assert!(config.actions.restore_backup);
        assert!(config.actions.notify_admins);
        assert_eq!(config.thresholds.consecutive_failures, 5);
        assert_eq!(config.thresholds.escalation_after_secs, 900);
    }
}
