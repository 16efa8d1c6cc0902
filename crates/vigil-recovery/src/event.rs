//! Disaster event data structures.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use vigil_monitor::AlertSeverity;

/// What kind of degradation an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisasterType {
    ServiceDown,
    ResourceExhaustion,
    HighErrorRate,
    Custom,
}

impl fmt::Display for DisasterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DisasterType::ServiceDown => "service_down",
            DisasterType::ResourceExhaustion => "resource_exhaustion",
            DisasterType::HighErrorRate => "high_error_rate",
            DisasterType::Custom => "custom",
        };
        f.write_str(s)
    }
}

/// Recovery action kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryActionKind {
    RestartService,
    RestoreBackup,
    NotifyAdmins,
    Escalate,
}

impl fmt::Display for RecoveryActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RecoveryActionKind::RestartService => "restart_service",
            RecoveryActionKind::RestoreBackup => "restore_backup",
            RecoveryActionKind::NotifyAdmins => "notify_admins",
            RecoveryActionKind::Escalate => "escalate",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionOutcome {
    /// Handed off; completion happens outside this process.
    Attempted,
    Succeeded,
    Failed,
}

impl fmt::Display for ActionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActionOutcome::Attempted => "attempted",
            ActionOutcome::Succeeded => "succeeded",
            ActionOutcome::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One entry of an event's recovery log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryAction {
    pub action: RecoveryActionKind,
    pub outcome: ActionOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub at: DateTime<Utc>,
}

impl RecoveryAction {
    pub fn new(
        action: RecoveryActionKind,
        outcome: ActionOutcome,
        detail: Option<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            action,
            outcome,
            detail,
            at,
        }
    }
}

impl fmt::Display for RecoveryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.action, self.outcome)?;
        if let Some(detail) = &self.detail {
            write!(f, " ({})", detail)?;
        }
        Ok(())
    }
}

/// A detected or reported disaster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisasterEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: DisasterType,
    pub severity: AlertSeverity,
    pub description: String,
    pub detected_at: DateTime<Utc>,
    pub resolved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    pub recovery_actions_taken: Vec<RecoveryAction>,
    /// Failing component names at detection time.
    pub components: Vec<String>,
    /// Opened by health monitoring rather than by hand.
    pub auto_detected: bool,
    pub escalated: bool,
}

impl DisasterEvent {
    /// Create an open event.
    pub fn new(
        event_type: DisasterType,
        severity: AlertSeverity,
        description: impl Into<String>,
        detected_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            event_type,
            severity,
            description: description.into(),
            detected_at,
            resolved: false,
            resolved_at: None,
            recovery_actions_taken: Vec::new(),
            components: Vec::new(),
            auto_detected: false,
            escalated: false,
        }
    }

    /// Record an action outcome.
    pub fn record(&mut self, action: RecoveryAction) {
        self.recovery_actions_taken.push(action);
    }

    /// Recovery log rendered as strings.
    pub fn action_log(&self) -> Vec<String> {
        self.recovery_actions_taken.iter().map(ToString::to_string).collect()
    }

    pub fn resolve(&mut self, now: DateTime<Utc>) {
        self.resolved = true;
        self.resolved_at = Some(now);
    }
}

/// Event query filter; absent fields do not filter. Date bounds are inclusive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventFilter {
    pub resolved: Option<bool>,
    pub severity: Option<AlertSeverity>,
    #[serde(rename = "type")]
    pub event_type: Option<DisasterType>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
}

impl EventFilter {
    pub fn matches(&self, event: &DisasterEvent) -> bool {
        self.resolved.is_none_or(|r| event.resolved == r)
            && self.severity.is_none_or(|s| event.severity == s)
            && self.event_type.is_none_or(|t| event.event_type == t)
            && self.date_from.is_none_or(|from| event.detected_at >= from)
            && self.date_to.is_none_or(|to| event.detected_at <= to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_display() {
        let action = RecoveryAction::new(
            RecoveryActionKind::RestoreBackup,
            ActionOutcome::Succeeded,
            Some("backup b-42".to_string()),
            Utc::now(),
        );
        assert_eq!(action.to_string(), "restore_backup: succeeded (backup b-42)");

        let action = RecoveryAction::new(RecoveryActionKind::Escalate, ActionOutcome::Attempted, None, Utc::now());
        assert_eq!(action.to_string(), "escalate: attempted");
    }

    #[test]
    fn test_filter() {
        let now = Utc::now();
        let mut event = DisasterEvent::new(DisasterType::ServiceDown, AlertSeverity::Critical, "down", now);

        assert!(EventFilter::default().matches(&event));
        assert!(EventFilter {
            resolved: Some(false),
            event_type: Some(DisasterType::ServiceDown),
            date_from: Some(now),
            date_to: Some(now),
            ..Default::default()
        }
        .matches(&event));
        assert!(!EventFilter {
            severity: Some(AlertSeverity::Low),
            ..Default::default()
        }
        .matches(&event));

        event.resolve(now);
        assert!(!EventFilter {
            resolved: Some(false),
            ..Default::default()
        }
        .matches(&event));
    }

    #[test]
    fn test_event_serializes_type_field() {
        let event = DisasterEvent::new(DisasterType::HighErrorRate, AlertSeverity::High, "errors", Utc::now());
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "high_error_rate");
        assert_eq!(json["severity"], "high");
        assert!(json.get("resolved_at").is_none());
    }
}
