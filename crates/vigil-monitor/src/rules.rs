//! Threshold alert rules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MonitorError;
use crate::selector::MetricSelector;

/// Tolerance used by `eq`/`neq` comparisons.
const EPSILON: f64 = 1e-9;

/// Comparison applied between a metric value and a rule threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleCondition {
    Gt,
    Lt,
    Eq,
    Neq,
}

impl RuleCondition {
    /// Whether `value` breaches `threshold`.
    pub fn evaluate(&self, value: f64, threshold: f64) -> bool {
        match self {
            RuleCondition::Gt => value > threshold,
            RuleCondition::Lt => value < threshold,
            RuleCondition::Eq => (value - threshold).abs() <= EPSILON,
            RuleCondition::Neq => (value - threshold).abs() > EPSILON,
        }
    }

    /// Comparison operator symbol.
    pub fn symbol(&self) -> &'static str {
        match self {
            RuleCondition::Gt => ">",
            RuleCondition::Lt => "<",
            RuleCondition::Eq => "==",
            RuleCondition::Neq => "!=",
        }
    }
}

impl std::fmt::Display for RuleCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Alert severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertSeverity::Low => write!(f, "LOW"),
            AlertSeverity::Medium => write!(f, "MEDIUM"),
            AlertSeverity::High => write!(f, "HIGH"),
            AlertSeverity::Critical => write!(f, "CRITICAL"),
        }
    }
}

impl AlertSeverity {
    /// Get emoji for severity.
    pub fn emoji(&self) -> &'static str {
        match self {
            AlertSeverity::Low => "\u{2139}\u{fe0f}",
            AlertSeverity::Medium => "\u{26a0}\u{fe0f}",
            AlertSeverity::High => "\u{274c}",
            AlertSeverity::Critical => "\u{1f6a8}",
        }
    }

    /// Hex color for Slack attachments.
    pub fn color(&self) -> &'static str {
        match self {
            AlertSeverity::Low => "#36a64f",      // green
            AlertSeverity::Medium => "#f0ad4e",   // yellow
            AlertSeverity::High => "#d9534f",     // red
            AlertSeverity::Critical => "#800000", // dark red
        }
    }

    /// Integer color for Discord embeds.
    pub fn color_code(&self) -> u32 {
        let hex = self.color().trim_start_matches('#');
        u32::from_str_radix(hex, 16).unwrap_or(0)
    }

    /// The next level up, saturating at critical.
    pub fn escalated(&self) -> Self {
        match self {
            AlertSeverity::Low => AlertSeverity::Medium,
            AlertSeverity::Medium => AlertSeverity::High,
            AlertSeverity::High | AlertSeverity::Critical => AlertSeverity::Critical,
        }
    }
}

/// Rule as written in configuration or submitted by an operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDefinition {
    /// Stable id; generated when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Human readable name.
    pub name: String,

    /// Metric selector, see [`MetricSelector`].
    pub metric: String,

    pub condition: RuleCondition,

    pub threshold: f64,

    pub severity: AlertSeverity,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Minimum seconds between two firings.
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_cooldown() -> u64 {
    5 * 60
}

impl RuleDefinition {
    /// Create an enabled definition with the default cooldown.
    pub fn new(
        name: impl Into<String>,
        metric: impl Into<String>,
        condition: RuleCondition,
        threshold: f64,
        severity: AlertSeverity,
    ) -> Self {
        Self {
            id: None,
            name: name.into(),
            metric: metric.into(),
            condition,
            threshold,
            severity,
            enabled: true,
            cooldown_secs: default_cooldown(),
        }
    }

    /// Set the id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the cooldown.
    pub fn with_cooldown_secs(mut self, secs: u64) -> Self {
        self.cooldown_secs = secs;
        self
    }

    /// Check the definition and parse its selector.
    pub fn validate(&self) -> Result<MetricSelector, MonitorError> {
        if self.name.trim().is_empty() {
            return Err(MonitorError::validation("name", "rule name is empty"));
        }
        if self.id.as_deref().is_some_and(|id| id.trim().is_empty()) {
            return Err(MonitorError::validation("id", "rule id is empty"));
        }
        if !self.threshold.is_finite() {
            return Err(MonitorError::validation("threshold", "threshold must be finite"));
        }
        MetricSelector::parse(&self.metric)
    }
}

/// A validated rule owned by the alert engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertRule {
    pub id: String,
    pub name: String,
    /// Selector source text.
    pub metric: String,
    #[serde(skip)]
    pub selector: MetricSelector,
    pub condition: RuleCondition,
    pub threshold: f64,
    pub severity: AlertSeverity,
    pub enabled: bool,
    pub cooldown_secs: u64,
    /// Only ever moves forward.
    pub last_fired_at: Option<DateTime<Utc>>,
}

impl AlertRule {
    /// Build a rule from a definition, generating an id when absent.
    pub fn from_definition(def: RuleDefinition) -> Result<Self, MonitorError> {
        let selector = def.validate()?;
        Ok(Self {
            id: def.id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            name: def.name,
            metric: def.metric,
            selector,
            condition: def.condition,
            threshold: def.threshold,
            severity: def.severity,
            enabled: def.enabled,
            cooldown_secs: def.cooldown_secs,
            last_fired_at: None,
        })
    }

    /// Cooldown as a chrono duration.
    pub fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.cooldown_secs as i64)
    }

    /// Whether the cooldown since the last firing has elapsed at `now`.
    pub fn cooled_down(&self, now: DateTime<Utc>) -> bool {
        self.last_fired_at.is_none_or(|at| now - at >= self.cooldown())
    }

    /// Apply a partial update. Nothing changes if the result is invalid.
    pub fn apply(&mut self, patch: RulePatch) -> Result<(), MonitorError> {
        let mut next = self.clone();
        if let Some(name) = patch.name {
            if name.trim().is_empty() {
                return Err(MonitorError::validation("name", "rule name is empty"));
            }
            next.name = name;
        }
        if let Some(metric) = patch.metric {
            next.selector = MetricSelector::parse(&metric)?;
            next.metric = metric;
        }
        if let Some(condition) = patch.condition {
            next.condition = condition;
        }
        if let Some(threshold) = patch.threshold {
            if !threshold.is_finite() {
                return Err(MonitorError::validation("threshold", "threshold must be finite"));
            }
            next.threshold = threshold;
        }
        if let Some(severity) = patch.severity {
            next.severity = severity;
        }
        if let Some(enabled) = patch.enabled {
            next.enabled = enabled;
        }
        if let Some(secs) = patch.cooldown_secs {
            next.cooldown_secs = secs;
        }
        *self = next;
        Ok(())
    }
}

/// Partial rule update; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RulePatch {
    pub name: Option<String>,
    pub metric: Option<String>,
    pub condition: Option<RuleCondition>,
    pub threshold: Option<f64>,
    pub severity: Option<AlertSeverity>,
    pub enabled: Option<bool>,
    pub cooldown_secs: Option<u64>,
}

/// Built-in rule set installed when no rules are configured.
pub fn default_rules() -> Vec<RuleDefinition> {
    vec![
        RuleDefinition::new(
            "High memory usage",
            "system.memory.usage",
            RuleCondition::Gt,
            90.0,
            AlertSeverity::High,
        )
        .with_id("high-memory"),
        RuleDefinition::new(
            "High CPU usage",
            "system.cpu.usage",
            RuleCondition::Gt,
            85.0,
            AlertSeverity::Medium,
        )
        .with_id("high-cpu"),
        RuleDefinition::new(
            "High error rate",
            "http.error_rate",
            RuleCondition::Gt,
            5.0,
            AlertSeverity::High,
        )
        .with_id("high-error-rate"),
        RuleDefinition::new(
            "Slow responses",
            "http.response_time.p95",
            RuleCondition::Gt,
            2_000.0,
            AlertSeverity::Medium,
        )
        .with_id("slow-responses"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conditions() {
        assert!(RuleCondition::Gt.evaluate(81.0, 80.0));
        assert!(!RuleCondition::Gt.evaluate(80.0, 80.0));
        assert!(RuleCondition::Lt.evaluate(1.0, 2.0));
        assert!(RuleCondition::Eq.evaluate(0.1 + 0.2, 0.3));
        assert!(RuleCondition::Neq.evaluate(1.0, 2.0));
        assert!(!RuleCondition::Neq.evaluate(0.3, 0.1 + 0.2));
    }

    #[test]
    fn test_severity_ordering_and_escalation() {
        assert!(AlertSeverity::Critical > AlertSeverity::High);
        assert_eq!(AlertSeverity::Low.escalated(), AlertSeverity::Medium);
        assert_eq!(AlertSeverity::Critical.escalated(), AlertSeverity::Critical);
        assert_eq!(AlertSeverity::Critical.color_code(), 0x800000);
    }

    #[test]
    fn test_validation() {
        let ok = RuleDefinition::new("cpu", "cpu.usage", RuleCondition::Gt, 80.0, AlertSeverity::High);
        assert!(AlertRule::from_definition(ok.clone()).is_ok());

        let mut bad = ok.clone();
        bad.name = "  ".to_string();
        assert!(bad.validate().is_err());

        let mut bad = ok.clone();
        bad.threshold = f64::NAN;
        assert!(bad.validate().is_err());

        let mut bad = ok;
        bad.metric = "cpu{host".to_string();
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_generated_id() {
        let def = RuleDefinition::new("cpu", "cpu.usage", RuleCondition::Gt, 80.0, AlertSeverity::High);
        let rule = AlertRule::from_definition(def).unwrap();
        assert!(!rule.id.is_empty());
        assert_eq!(rule.cooldown(), chrono::Duration::minutes(5));
    }

    #[test]
    fn test_cooldown() {
        let def = RuleDefinition::new("cpu", "cpu.usage", RuleCondition::Gt, 80.0, AlertSeverity::High);
        let mut rule = AlertRule::from_definition(def).unwrap();
        let now = Utc::now();
        assert!(rule.cooled_down(now));
        rule.last_fired_at = Some(now);
        assert!(!rule.cooled_down(now + chrono::Duration::minutes(4)));
        assert!(rule.cooled_down(now + chrono::Duration::minutes(5)));
    }

    #[test]
    fn test_patch_is_atomic() {
        let def = RuleDefinition::new("cpu", "cpu.usage", RuleCondition::Gt, 80.0, AlertSeverity::High);
        let mut rule = AlertRule::from_definition(def).unwrap();

        let bad = RulePatch {
            threshold: Some(90.0),
            metric: Some("a*b".to_string()),
            ..Default::default()
        };
        assert!(rule.apply(bad).is_err());
        assert_eq!(rule.threshold, 80.0);

        let good = RulePatch {
            threshold: Some(90.0),
            enabled: Some(false),
            ..Default::default()
        };
        rule.apply(good).unwrap();
        assert_eq!(rule.threshold, 90.0);
        assert!(!rule.enabled);
    }

    #[test]
    fn test_default_rules_are_valid() {
        let rules = default_rules();
        assert_eq!(rules.len(), 4);
        for def in rules {
            assert!(def.validate().is_ok(), "{} should validate", def.name);
            assert_eq!(def.cooldown_secs, 300);
        }
    }

    #[test]
    fn test_definition_from_json() {
        let def: RuleDefinition = serde_json::from_value(serde_json::json!({
            "name": "cpu",
            "metric": "cpu.usage",
            "condition": "gt",
            "threshold": 80,
            "severity": "critical"
        }))
        .unwrap();
        assert!(def.enabled);
        assert_eq!(def.cooldown_secs, 300);
        assert_eq!(def.severity, AlertSeverity::Critical);
    }
}
