//! Rule evaluation and alert lifecycle.

#[cfg(test)]
#[path = "alert_engine_tests.rs"]
mod tests;

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info, instrument, warn};

use crate::alerts::{Alert, AlertEvent, AlertStats};
use crate::clock::Clock;
use crate::config::AlertsConfig;
use crate::dispatcher::NotificationDispatcher;
use crate::error::MonitorError;
use crate::metrics::MetricStore;
use crate::rules::{default_rules, AlertRule, AlertSeverity, RuleDefinition, RulePatch};
use crate::scheduler::Tickable;

const EVENT_CAPACITY: usize = 256;

#[derive(Default)]
struct EngineState {
    rules: Vec<AlertRule>,
    /// Oldest first.
    history: VecDeque<Alert>,
    total_fired: u64,
    total_resolved: u64,
}

impl EngineState {
    fn open_index(&self, rule_id: &str) -> Option<usize> {
        self.history.iter().position(|a| !a.resolved && a.rule_id == rule_id)
    }

    /// Evict the oldest resolved alerts until within `max`. Open alerts are never evicted.
    fn trim_history(&mut self, max: usize) {
        while self.history.len() > max {
            match self.history.iter().position(|a| a.resolved) {
                Some(idx) => {
                    self.history.remove(idx);
                }
                None => break,
            }
        }
    }

    fn resolve_at(&mut self, idx: usize, now: DateTime<Utc>) -> Option<Alert> {
        let alert = self.history.get_mut(idx)?;
        alert.resolve(now);
        self.total_resolved += 1;
        Some(alert.clone())
    }
}

/// Evaluates threshold rules against the metric store.
pub struct AlertRuleEngine {
    store: Arc<MetricStore>,
    dispatcher: Arc<NotificationDispatcher>,
    clock: Arc<dyn Clock>,
    lookback: chrono::Duration,
    max_history: usize,
    notify_on_resolve: bool,
    state: Mutex<EngineState>,
    events: broadcast::Sender<AlertEvent>,
}

impl AlertRuleEngine {
    /// Create an engine with the configured rules, or the built-in set when none are
    /// configured and defaults are enabled. Time is read from the store's clock.
    pub fn new(
        config: &AlertsConfig,
        store: Arc<MetricStore>,
        dispatcher: Arc<NotificationDispatcher>,
    ) -> Result<Self, MonitorError> {
        let definitions = if config.rules.is_empty() && config.default_rules {
            default_rules()
        } else {
            config.rules.clone()
        };

        let mut state = EngineState::default();
        for def in definitions {
            let rule = AlertRule::from_definition(def)?;
            if state.rules.iter().any(|r| r.id == rule.id) {
                return Err(duplicate_rule(&rule.id));
            }
            state.rules.push(rule);
        }

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            clock: store.clock().clone(),
            store,
            dispatcher,
            lookback: config.lookback(),
            max_history: config.max_history.max(1),
            notify_on_resolve: config.notify_on_resolve,
            state: Mutex::new(state),
            events,
        })
    }

    /// Add a rule. Returns its id.
    pub async fn add_rule(&self, def: RuleDefinition) -> Result<String, MonitorError> {
        let rule = AlertRule::from_definition(def)?;
        let mut state = self.state.lock().await;
        if state.rules.iter().any(|r| r.id == rule.id) {
            return Err(duplicate_rule(&rule.id));
        }
        info!("Added alert rule {} ({})", rule.id, rule.name);
        let id = rule.id.clone();
        state.rules.push(rule);
        Ok(id)
    }

    /// Remove a rule, resolving its open alert if any.
    pub async fn remove_rule(&self, id: &str) -> bool {
        let now = self.clock.now();
        let resolved = {
            let mut state = self.state.lock().await;
            let before = state.rules.len();
            state.rules.retain(|r| r.id != id);
            if state.rules.len() == before {
                return false;
            }
            info!("Removed alert rule {}", id);
            match state.open_index(id) {
                Some(idx) => state.resolve_at(idx, now),
                None => None,
            }
        };

        if let Some(alert) = resolved {
            self.publish(vec![AlertEvent::Resolved(alert)]).await;
        }
        true
    }

    /// Apply a partial update to a rule.
    pub async fn update_rule(&self, id: &str, patch: RulePatch) -> Result<AlertRule, MonitorError> {
        let mut state = self.state.lock().await;
        let rule = state
            .rules
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| rule_not_found(id))?;
        rule.apply(patch)?;
        debug!("Updated alert rule {}", id);
        Ok(rule.clone())
    }

    /// Look up a rule.
    pub async fn get_rule(&self, id: &str) -> Option<AlertRule> {
        self.state.lock().await.rules.iter().find(|r| r.id == id).cloned()
    }

    /// All rules in insertion order.
    pub async fn rules(&self) -> Vec<AlertRule> {
        self.state.lock().await.rules.clone()
    }

    /// Evaluate every enabled rule once. Returns the lifecycle events produced.
    #[instrument(skip(self))]
    pub async fn tick(&self) -> Vec<AlertEvent> {
        let now = self.clock.now();
        let since = now - self.lookback;

        let events = {
            let mut state = self.state.lock().await;
            let mut events = Vec::new();

            for i in 0..state.rules.len() {
                if !state.rules[i].enabled {
                    continue;
                }
                let Some(metric) = self.store.latest(&state.rules[i].selector, Some(since)) else {
                    continue;
                };

                let rule_id = state.rules[i].id.clone();
                let breaching = state.rules[i]
                    .condition
                    .evaluate(metric.value, state.rules[i].threshold);

                match (breaching, state.open_index(&rule_id)) {
                    (true, None) if state.rules[i].cooled_down(now) => {
                        let alert = Alert::fire(&state.rules[i], &metric, now);
                        state.rules[i].last_fired_at = Some(now);
                        state.total_fired += 1;
                        state.history.push_back(alert.clone());
                        events.push(AlertEvent::Fired(alert));
                    }
                    (true, None) => {
                        debug!("Rule {} breaching but cooling down", rule_id);
                    }
                    (false, Some(idx)) => {
                        if let Some(alert) = state.resolve_at(idx, now) {
                            events.push(AlertEvent::Resolved(alert));
                        }
                    }
                    _ => {}
                }
            }

            state.trim_history(self.max_history);
            events
        };

        debug!("Alert tick produced {} events", events.len());
        self.publish(events.clone()).await;
        events
    }

    /// Unresolved alerts, newest first.
    pub async fn active_alerts(&self) -> Vec<Alert> {
        let state = self.state.lock().await;
        state.history.iter().rev().filter(|a| !a.resolved).cloned().collect()
    }

    /// Resolved and unresolved alerts, newest first.
    pub async fn history(&self, limit: usize) -> Vec<Alert> {
        let state = self.state.lock().await;
        state.history.iter().rev().take(limit).cloned().collect()
    }

    /// Resolve an open alert by hand.
    pub async fn resolve_alert(&self, alert_id: &str) -> Result<Alert, MonitorError> {
        let now = self.clock.now();
        let alert = {
            let mut state = self.state.lock().await;
            let idx = state
                .history
                .iter()
                .position(|a| a.id == alert_id && !a.resolved)
                .ok_or_else(|| MonitorError::NotFound {
                    kind: "alert",
                    id: alert_id.to_string(),
                })?;
            state.resolve_at(idx, now).ok_or_else(|| MonitorError::NotFound {
                kind: "alert",
                id: alert_id.to_string(),
            })?
        };

        info!("Alert {} resolved manually", alert.id);
        self.publish(vec![AlertEvent::Resolved(alert.clone())]).await;
        Ok(alert)
    }

    /// Stream of lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<AlertEvent> {
        self.events.subscribe()
    }

    /// Counters.
    pub async fn stats(&self) -> AlertStats {
        let state = self.state.lock().await;
        let mut stats = AlertStats {
            total_fired: state.total_fired,
            total_resolved: state.total_resolved,
            rules: state.rules.len(),
            enabled_rules: state.rules.iter().filter(|r| r.enabled).count(),
            ..Default::default()
        };
        for alert in state.history.iter().filter(|a| !a.resolved) {
            *stats.open_by_severity.entry(alert.severity).or_default() += 1;
        }
        stats
    }

    /// Broadcast and dispatch committed events.
    async fn publish(&self, events: Vec<AlertEvent>) {
        for event in events {
            let _ = self.events.send(event.clone());
            match event {
                AlertEvent::Fired(alert) => {
                    if alert.severity == AlertSeverity::Critical {
                        error!("[ALERT] {}", alert.message);
                    } else {
                        warn!("[ALERT] {}", alert.message);
                    }
                    let report = self.dispatcher.send(&alert).await;
                    debug!(
                        "Alert {} dispatched: {} delivered, {} failed",
                        alert.id,
                        report.delivered(),
                        report.failed()
                    );
                }
                AlertEvent::Resolved(alert) => {
                    info!("[RESOLVED] {}", alert.rule_name);
                    if self.notify_on_resolve {
                        self.dispatcher.send(&alert).await;
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Tickable for AlertRuleEngine {
    fn name(&self) -> &str {
        "alert-engine"
    }

    async fn tick(&self) {
        AlertRuleEngine::tick(self).await;
    }
}

fn duplicate_rule(id: &str) -> MonitorError {
    MonitorError::validation("id", format!("rule '{}' already exists", id))
}

fn rule_not_found(id: &str) -> MonitorError {
    MonitorError::NotFound {
        kind: "rule",
        id: id.to_string(),
    }
}
