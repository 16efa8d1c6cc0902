//! Disaster detection and automated recovery.

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
mod tests;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use vigil_monitor::scheduler::spawn_periodic;
use vigil_monitor::{
    Alert, AlertSeverity, Clock, ComponentKind, HealthAggregator, HealthStatus, NotificationDispatcher, SystemClock,
    SystemHealth, Tickable,
};

use crate::backup::{BackupFilter, BackupProvider, RestoreRequest};
use crate::config::RecoveryConfig;
use crate::error::RecoveryError;
use crate::event::{ActionOutcome, DisasterEvent, DisasterType, EventFilter, RecoveryAction, RecoveryActionKind};
use crate::restart::{RestartLimiter, RestartSignal};

/// Snapshot of the orchestrator for status surfaces.
#[derive(Debug, Clone, Serialize)]
pub struct RecoveryStatus {
    pub is_monitoring: bool,
    pub events_count: usize,
    pub unresolved_events: usize,
    pub last_health_check: Option<DateTime<Utc>>,
    pub config: RecoveryConfig,
}

struct OrchestratorState {
    /// Oldest first.
    events: Vec<DisasterEvent>,
    /// Non-healthy snapshots in a row.
    streak: u32,
    /// `updated_at` of the last snapshot processed.
    last_processed: Option<DateTime<Utc>>,
    last_health_check: Option<DateTime<Utc>>,
    limiter: RestartLimiter,
}

struct MonitorHandle {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Turns sustained health degradation into disaster events and recovery actions.
pub struct DisasterRecoveryOrchestrator {
    config: RecoveryConfig,
    health: Arc<HealthAggregator>,
    dispatcher: Arc<NotificationDispatcher>,
    backups: Arc<dyn BackupProvider>,
    restart: Arc<dyn RestartSignal>,
    clock: Arc<dyn Clock>,
    state: Mutex<OrchestratorState>,
    monitor: parking_lot::Mutex<Option<MonitorHandle>>,
}

impl DisasterRecoveryOrchestrator {
    /// Create an orchestrator using the system clock.
    pub fn new(
        config: RecoveryConfig,
        health: Arc<HealthAggregator>,
        dispatcher: Arc<NotificationDispatcher>,
        backups: Arc<dyn BackupProvider>,
        restart: Arc<dyn RestartSignal>,
    ) -> Self {
        let limiter = RestartLimiter::new(&config.restart_limit);
        Self {
            config,
            health,
            dispatcher,
            backups,
            restart,
            clock: Arc::new(SystemClock),
            state: Mutex::new(OrchestratorState {
                events: Vec::new(),
                streak: 0,
                last_processed: None,
                last_health_check: None,
                limiter,
            }),
            monitor: parking_lot::Mutex::new(None),
        }
    }

    /// Read time from `clock`.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Start periodic detection. Returns `false` if already running or disabled.
    pub fn start_monitoring(self: &Arc<Self>) -> bool {
        if !self.config.enabled {
            info!("Disaster monitoring is disabled");
            return false;
        }

        let mut monitor = self.monitor.lock();
        if monitor.is_some() {
            debug!("Disaster monitoring already running");
            return false;
        }

        let token = CancellationToken::new();
        let interval = self.config.health_checks.interval();
        let handle = spawn_periodic(self.clone() as Arc<dyn Tickable>, interval, token.clone());
        *monitor = Some(MonitorHandle { token, handle });
        info!("Disaster monitoring started (every {:?})", interval);
        true
    }

    /// Stop periodic detection, letting an in-flight tick finish. Returns `false` if not running.
    pub async fn stop_monitoring(&self) -> bool {
        let running = self.monitor.lock().take();
        match running {
            Some(MonitorHandle { token, handle }) => {
                token.cancel();
                if let Err(e) = handle.await {
                    warn!("Disaster monitoring task ended abnormally: {}", e);
                }
                info!("Disaster monitoring stopped");
                true
            }
            None => false,
        }
    }

    /// Whether periodic detection is running.
    pub fn is_monitoring(&self) -> bool {
        self.monitor.lock().is_some()
    }

    /// Inspect the latest health snapshot once.
    #[instrument(skip(self))]
    pub async fn tick(&self) {
        let snapshot = match self.health.last_result().await {
            Some(snapshot) => snapshot,
            None => self.health.check().await,
        };
        let now = self.clock.now();

        let mut state = self.state.lock().await;
        state.last_health_check = Some(snapshot.updated_at);

        if state.last_processed == Some(snapshot.updated_at) {
            debug!("Health snapshot from {} already processed", snapshot.updated_at);
        } else {
            state.last_processed = Some(snapshot.updated_at);
            self.process(&mut state, &snapshot, now).await;
        }

        self.escalate_due(&mut state, now).await;
    }

    async fn process(&self, state: &mut OrchestratorState, snapshot: &SystemHealth, now: DateTime<Utc>) {
        let critical_failure = snapshot.critical_failures().next().is_some();
        let failing = snapshot.status != HealthStatus::Healthy || critical_failure;

        if !failing {
            if state.streak > 0 {
                info!("System healthy again after {} degraded checks", state.streak);
            }
            state.streak = 0;
            for event in state.events.iter_mut().filter(|e| e.auto_detected && !e.resolved) {
                event.resolve(now);
                info!("Disaster event {} ({}) resolved automatically", event.id, event.event_type);
            }
            return;
        }

        state.streak += 1;
        if state.streak < self.config.thresholds.consecutive_failures && !critical_failure {
            debug!(
                "System {} ({} of {} checks)",
                snapshot.status, state.streak, self.config.thresholds.consecutive_failures
            );
            return;
        }

        let event_type = classify(snapshot);
        if state
            .events
            .iter()
            .any(|e| e.auto_detected && !e.resolved && e.event_type == event_type)
        {
            debug!("A {} event is already open", event_type);
            return;
        }

        let severity = if critical_failure {
            AlertSeverity::Critical
        } else if snapshot.status == HealthStatus::Unhealthy {
            AlertSeverity::High
        } else {
            AlertSeverity::Medium
        };

        let mut components: Vec<String> = snapshot.failing().map(|c| c.name.clone()).collect();
        components.sort();
        let description = format!(
            "{} detected: system {} (score {}), failing: {}",
            event_type,
            snapshot.status,
            snapshot.score,
            components.join(", ")
        );

        let mut event = DisasterEvent::new(event_type, severity, description, now);
        event.components = components;
        event.auto_detected = true;
        error!("Disaster event {} opened: {}", event.id, event.description);

        if self.config.auto_recovery {
            self.recover(&mut state.limiter, &mut event, now).await;
        }
        state.events.push(event);
    }

    async fn recover(&self, limiter: &mut RestartLimiter, event: &mut DisasterEvent, now: DateTime<Utc>) {
        let actions = &self.config.actions;

        if event.event_type == DisasterType::ServiceDown && actions.restore_backup {
            let record = self.restore_latest_backup(now).await;
            event.record(record);
        }

        if event.severity == AlertSeverity::Critical && actions.restart_service {
            let record = self.request_restart(limiter, &event.description, now).await;
            event.record(record);
        }

        if actions.notify_admins {
            let record = self.notify_admins(event, now).await;
            event.record(record);
        }
    }

    async fn restore_latest_backup(&self, now: DateTime<Utc>) -> RecoveryAction {
        let result: Result<String, RecoveryError> = async {
            let backups = self.backups.list_backups(&BackupFilter::completed()).await?;
            let latest = backups
                .into_iter()
                .max_by_key(|b| b.created_at)
                .ok_or_else(|| RecoveryError::action("restore_backup", "no completed backup available"))?;
            let request = RestoreRequest {
                backup_id: latest.id.clone(),
                overwrite: true,
            };
            self.backups.restore_backup(&request).await?;
            Ok(latest.id)
        }
        .await;

        match result {
            Ok(id) => {
                info!("Restored backup {}", id);
                RecoveryAction::new(
                    RecoveryActionKind::RestoreBackup,
                    ActionOutcome::Succeeded,
                    Some(format!("backup {}", id)),
                    now,
                )
            }
            Err(e) => {
                error!("Backup restore failed: {}", e);
                RecoveryAction::new(
                    RecoveryActionKind::RestoreBackup,
                    ActionOutcome::Failed,
                    Some(e.to_string()),
                    now,
                )
            }
        }
    }

    async fn request_restart(&self, limiter: &mut RestartLimiter, reason: &str, now: DateTime<Utc>) -> RecoveryAction {
        if !limiter.try_acquire(now) {
            let detail = format!(
                "restart limit reached ({} in {}s)",
                limiter.max_restarts(),
                limiter.window().num_seconds()
            );
            warn!("Restart suppressed: {}", detail);
            return RecoveryAction::new(
                RecoveryActionKind::RestartService,
                ActionOutcome::Failed,
                Some(detail),
                now,
            );
        }

        match self.restart.request_restart(reason).await {
            Ok(()) => {
                warn!("Service restart requested");
                RecoveryAction::new(RecoveryActionKind::RestartService, ActionOutcome::Attempted, None, now)
            }
            Err(e) => {
                error!("Restart request failed: {}", e);
                RecoveryAction::new(
                    RecoveryActionKind::RestartService,
                    ActionOutcome::Failed,
                    Some(e.to_string()),
                    now,
                )
            }
        }
    }

    async fn notify_admins(&self, event: &DisasterEvent, now: DateTime<Utc>) -> RecoveryAction {
        let alert = Alert {
            id: uuid::Uuid::new_v4().to_string(),
            rule_id: format!("disaster:{}", event.event_type),
            rule_name: format!("Disaster: {}", event.event_type),
            severity: event.severity,
            message: event.description.clone(),
            snapshot: serde_json::to_value(event).unwrap_or_default(),
            fired_at: now,
            resolved: false,
            resolved_at: None,
        };

        let report = self.dispatcher.send(&alert).await;
        if report.any_delivered() {
            RecoveryAction::new(
                RecoveryActionKind::NotifyAdmins,
                ActionOutcome::Succeeded,
                Some(format!("{} channel(s)", report.delivered())),
                now,
            )
        } else {
            warn!("No channel accepted the admin notification for event {}", event.id);
            RecoveryAction::new(
                RecoveryActionKind::NotifyAdmins,
                ActionOutcome::Failed,
                Some("no channel accepted the notification".to_string()),
                now,
            )
        }
    }

    async fn escalate_due(&self, state: &mut OrchestratorState, now: DateTime<Utc>) {
        let after = self.config.thresholds.escalation_after();
        for event in state
            .events
            .iter_mut()
            .filter(|e| !e.resolved && !e.escalated && now - e.detected_at >= after)
        {
            event.severity = event.severity.escalated();
            event.escalated = true;
            warn!("Disaster event {} escalated to {}", event.id, event.severity);
            event.record(RecoveryAction::new(
                RecoveryActionKind::Escalate,
                ActionOutcome::Succeeded,
                Some(format!("severity raised to {}", event.severity)),
                now,
            ));

            if self.config.actions.notify_admins {
                let record = self.notify_admins(event, now).await;
                event.record(record);
            }
        }
    }

    /// Open an event by hand. No recovery actions run for it.
    pub async fn report_event(
        &self,
        event_type: DisasterType,
        severity: AlertSeverity,
        description: impl Into<String>,
    ) -> DisasterEvent {
        let event = DisasterEvent::new(event_type, severity, description, self.clock.now());
        warn!("Disaster event {} reported: {}", event.id, event.description);
        self.state.lock().await.events.push(event.clone());
        event
    }

    /// Mark an open event resolved.
    pub async fn resolve_event(&self, id: &str) -> Result<DisasterEvent, RecoveryError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let event = state
            .events
            .iter_mut()
            .find(|e| e.id == id && !e.resolved)
            .ok_or_else(|| RecoveryError::NotFound {
                kind: "event",
                id: id.to_string(),
            })?;
        event.resolve(now);
        info!("Disaster event {} resolved", id);
        Ok(event.clone())
    }

    /// Events matching `filter`, newest first.
    pub async fn get_events(&self, filter: &EventFilter) -> Vec<DisasterEvent> {
        let state = self.state.lock().await;
        state.events.iter().rev().filter(|e| filter.matches(e)).cloned().collect()
    }

    /// All events, newest first.
    pub async fn events(&self) -> Vec<DisasterEvent> {
        self.get_events(&EventFilter::default()).await
    }

    /// Look up an event.
    pub async fn get_event(&self, id: &str) -> Option<DisasterEvent> {
        self.state.lock().await.events.iter().find(|e| e.id == id).cloned()
    }

    /// Status summary.
    pub async fn get_recovery_status(&self) -> RecoveryStatus {
        let state = self.state.lock().await;
        RecoveryStatus {
            is_monitoring: self.is_monitoring(),
            events_count: state.events.len(),
            unresolved_events: state.events.iter().filter(|e| !e.resolved).count(),
            last_health_check: state.last_health_check,
            config: self.config.clone(),
        }
    }
}

#[async_trait]
impl Tickable for DisasterRecoveryOrchestrator {
    fn name(&self) -> &str {
        "disaster-recovery"
    }

    async fn tick(&self) {
        DisasterRecoveryOrchestrator::tick(self).await;
    }
}

/// Event type from the kinds of failing components, core first.
fn classify(snapshot: &SystemHealth) -> DisasterType {
    let failing_kind = |kind: ComponentKind| snapshot.failing().any(|c| c.kind == kind);
    if failing_kind(ComponentKind::Core) {
        DisasterType::ServiceDown
    } else if failing_kind(ComponentKind::Resource) {
        DisasterType::ResourceExhaustion
    } else if failing_kind(ComponentKind::Traffic) {
        DisasterType::HighErrorRate
    } else {
        DisasterType::Custom
    }
}
