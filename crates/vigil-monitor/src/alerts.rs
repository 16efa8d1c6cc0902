//! Alert types.

#[cfg(test)]
#[path = "alerts_tests.rs"]
mod tests;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::metrics::Metric;
use crate::rules::{AlertRule, AlertSeverity};

/// A fired alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    /// Rule that fired.
    pub rule_id: String,
    pub rule_name: String,
    pub severity: AlertSeverity,
    pub message: String,
    /// Metric and rule state at firing time.
    pub snapshot: serde_json::Value,
    pub fired_at: DateTime<Utc>,
    pub resolved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Alert {
    /// Create an open alert for `rule` breached by `metric`.
    pub fn fire(rule: &AlertRule, metric: &Metric, now: DateTime<Utc>) -> Self {
        let message = format!(
            "{}: {} = {} {} {} {}",
            rule.name, metric.name, metric.value, metric.unit, rule.condition, rule.threshold
        );
        let snapshot = serde_json::json!({
            "metric": metric.name,
            "value": metric.value,
            "unit": metric.unit,
            "tags": metric.tags,
            "recorded_at": metric.timestamp,
            "condition": rule.condition,
            "threshold": rule.threshold,
        });
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            rule_id: rule.id.clone(),
            rule_name: rule.name.clone(),
            severity: rule.severity,
            message,
            snapshot,
            fired_at: now,
            resolved: false,
            resolved_at: None,
        }
    }

    /// Mark resolved at `now`.
    pub fn resolve(&mut self, now: DateTime<Utc>) {
        self.resolved = true;
        self.resolved_at = Some(now);
    }

    /// Title used by chat channels and email subjects.
    pub fn title(&self) -> String {
        if self.resolved {
            format!("Resolved: {}", self.rule_name)
        } else {
            self.rule_name.clone()
        }
    }

    /// Format for text output.
    pub fn format_text(&self) -> String {
        let mut text = format!(
            "[{}] {} - {}\n{}",
            self.severity,
            self.fired_at.format("%Y-%m-%d %H:%M:%S UTC"),
            self.title(),
            self.message
        );

        if let Some(resolved_at) = self.resolved_at {
            text.push_str(&format!("\nResolved at: {}", resolved_at.format("%Y-%m-%d %H:%M:%S UTC")));
        }

        text
    }

}

/// Alert lifecycle notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "alert", rename_all = "lowercase")]
pub enum AlertEvent {
    Fired(Alert),
    Resolved(Alert),
}

impl AlertEvent {
    /// The alert carried by the event.
    pub fn alert(&self) -> &Alert {
        match self {
            AlertEvent::Fired(alert) | AlertEvent::Resolved(alert) => alert,
        }
    }
}

/// Alert engine counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertStats {
    /// Open alerts by severity.
    pub open_by_severity: BTreeMap<AlertSeverity, usize>,
    pub total_fired: u64,
    pub total_resolved: u64,
    pub rules: usize,
    pub enabled_rules: usize,
}

impl AlertStats {
    /// Total open alerts.
    pub fn open(&self) -> usize {
        self.open_by_severity.values().sum()
    }
}
