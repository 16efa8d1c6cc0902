use super::*;
use crate::alert_channels::{AlertChannel, ChannelKind, NotificationPayload, Transport};
use crate::clock::ManualClock;
use crate::config::MetricsConfig;
use crate::error::ErrorKind;
use crate::metrics::MetricUnit;
use crate::rules::RuleCondition;

#[derive(Default)]
struct RecordingTransport {
    delivered: parking_lot::Mutex<Vec<NotificationPayload>>,
}

#[async_trait]
impl crate::alert_channels::Transport for RecordingTransport {
    async fn deliver(&self, _channel: &AlertChannel, payload: &NotificationPayload) -> Result<(), MonitorError> {
        self.delivered.lock().push(payload.clone());
        Ok(())
    }
}

struct Harness {
    engine: AlertRuleEngine,
    store: Arc<MetricStore>,
    clock: Arc<ManualClock>,
    transport: Arc<RecordingTransport>,
}

async fn harness_with(config: AlertsConfig) -> Harness {
    let clock = Arc::new(ManualClock::default());
    let store = Arc::new(MetricStore::with_clock(&MetricsConfig::default(), clock.clone()));
    let transport = Arc::new(RecordingTransport::default());
    let dispatcher = Arc::new(NotificationDispatcher::with_clock(
        "vigil-test",
        transport.clone() as Arc<dyn Transport>,
        clock.clone(),
    ));
    dispatcher
        .add_channel(AlertChannel::new(ChannelKind::Webhook {
            url: "http://alerts.example.com/hook".to_string(),
            headers: Default::default(),
        }))
        .await
        .unwrap();

    let engine = AlertRuleEngine::new(&config, store.clone(), dispatcher).unwrap();
    Harness {
        engine,
        store,
        clock,
        transport,
    }
}

async fn harness() -> Harness {
    harness_with(AlertsConfig {
        default_rules: false,
        ..Default::default()
    })
    .await
}

fn cpu_rule() -> RuleDefinition {
    RuleDefinition::new("CPU too high", "cpu.usage", RuleCondition::Gt, 80.0, AlertSeverity::High)
        .with_id("cpu")
        .with_cooldown_secs(300)
}

impl Harness {
    fn cpu(&self, value: f64) {
        self.store.record_value("cpu.usage", value, MetricUnit::Percent);
    }

    fn advance_secs(&self, secs: i64) {
        self.clock.advance(chrono::Duration::seconds(secs));
    }

    fn deliveries(&self) -> usize {
        self.transport.delivered.lock().len()
    }
}

#[tokio::test]
async fn test_fire_resolve_cycle_with_cooldown() {
    let h = harness().await;
    h.engine.add_rule(cpu_rule()).await.unwrap();

    h.cpu(95.0);
    let events = h.engine.tick().await;
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], AlertEvent::Fired(_)));
    let active = h.engine.active_alerts().await;
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].severity, AlertSeverity::High);
    assert!(!active[0].resolved);
    let first = active[0].clone();

    // Still breaching: the open alert is not duplicated.
    h.advance_secs(30);
    h.cpu(95.0);
    assert!(h.engine.tick().await.is_empty());
    assert_eq!(h.engine.active_alerts().await.len(), 1);

    h.advance_secs(30);
    h.cpu(40.0);
    let events = h.engine.tick().await;
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], AlertEvent::Resolved(_)));
    assert!(h.engine.active_alerts().await.is_empty());
    let resolved = &h.engine.history(10).await[0];
    assert_eq!(resolved.id, first.id);
    assert!(resolved.resolved);
    assert_eq!(resolved.resolved_at, Some(h.clock.now()));

    // Breaching again inside the cooldown does not fire.
    h.advance_secs(30);
    h.cpu(95.0);
    assert!(h.engine.tick().await.is_empty());
    assert!(h.engine.active_alerts().await.is_empty());

    h.advance_secs(300);
    h.cpu(95.0);
    let events = h.engine.tick().await;
    assert_eq!(events.len(), 1);
    let second = events[0].alert().clone();
    assert_ne!(second.id, first.id);
    assert!(second.fired_at - first.fired_at >= chrono::Duration::minutes(5));

    assert_eq!(h.engine.history(10).await.len(), 2);
    assert_eq!(h.deliveries(), 2);
    let rule = h.engine.get_rule("cpu").await.unwrap();
    assert_eq!(rule.last_fired_at, Some(second.fired_at));
}

#[tokio::test]
async fn test_no_metric_in_lookback_is_skipped() {
    let h = harness().await;
    h.engine.add_rule(cpu_rule()).await.unwrap();

    assert!(h.engine.tick().await.is_empty());

    h.cpu(95.0);
    h.advance_secs(6 * 60);
    assert!(h.engine.tick().await.is_empty());
    assert!(h.engine.active_alerts().await.is_empty());
}

#[tokio::test]
async fn test_most_recent_matching_metric_wins() {
    let h = harness().await;
    h.engine
        .add_rule(RuleDefinition::new("queue", "queue.*", RuleCondition::Gt, 10.0, AlertSeverity::Low))
        .await
        .unwrap();

    h.store.record_value("queue.inbound", 50.0, MetricUnit::Count);
    h.advance_secs(1);
    h.store.record_value("queue.outbound", 1.0, MetricUnit::Count);
    assert!(h.engine.tick().await.is_empty());
}

#[tokio::test]
async fn test_disabled_rule_keeps_open_alert() {
    let h = harness().await;
    h.engine.add_rule(cpu_rule()).await.unwrap();
    h.cpu(95.0);
    h.engine.tick().await;

    let patch = RulePatch {
        enabled: Some(false),
        ..Default::default()
    };
    let updated = h.engine.update_rule("cpu", patch).await.unwrap();
    assert!(!updated.enabled);

    h.advance_secs(10);
    h.cpu(10.0);
    assert!(h.engine.tick().await.is_empty());
    assert_eq!(h.engine.active_alerts().await.len(), 1);
}

#[tokio::test]
async fn test_remove_rule_resolves_open_alert() {
    let h = harness().await;
    h.engine.add_rule(cpu_rule()).await.unwrap();
    h.cpu(95.0);
    h.engine.tick().await;

    assert!(h.engine.remove_rule("cpu").await);
    assert!(!h.engine.remove_rule("cpu").await);
    assert!(h.engine.active_alerts().await.is_empty());
    assert!(h.engine.history(1).await[0].resolved);
}

#[tokio::test]
async fn test_manual_resolve() {
    let h = harness().await;
    h.engine.add_rule(cpu_rule()).await.unwrap();
    h.cpu(95.0);
    let events = h.engine.tick().await;
    let id = events[0].alert().id.clone();

    let resolved = h.engine.resolve_alert(&id).await.unwrap();
    assert!(resolved.resolved);

    let err = h.engine.resolve_alert(&id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    let err = h.engine.resolve_alert("missing").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_rule_validation_and_duplicates() {
    let h = harness().await;
    h.engine.add_rule(cpu_rule()).await.unwrap();

    let err = h.engine.add_rule(cpu_rule()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let mut bad = cpu_rule().with_id("bad");
    bad.threshold = f64::INFINITY;
    assert_eq!(h.engine.add_rule(bad).await.unwrap_err().kind(), ErrorKind::Validation);

    let err = h
        .engine
        .update_rule("missing", RulePatch::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let generated = h
        .engine
        .add_rule(RuleDefinition::new("mem", "mem.usage", RuleCondition::Gt, 1.0, AlertSeverity::Low))
        .await
        .unwrap();
    assert!(h.engine.get_rule(&generated).await.is_some());
    assert_eq!(h.engine.rules().await.len(), 2);
}

#[tokio::test]
async fn test_default_rules_loaded() {
    let h = harness_with(AlertsConfig::default()).await;
    let rules = h.engine.rules().await;
    assert_eq!(rules.len(), 4);
    assert!(rules.iter().any(|r| r.metric == "system.memory.usage"));
}

#[tokio::test]
async fn test_payload_timestamp_uses_engine_clock() {
    let h = harness().await;
    h.engine.add_rule(cpu_rule()).await.unwrap();

    h.advance_secs(3_600);
    h.cpu(95.0);
    h.engine.tick().await;

    let delivered = h.transport.delivered.lock();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].timestamp, h.clock.now());
    assert_eq!(delivered[0].timestamp, delivered[0].alert.fired_at);
}

struct NoHost;

impl crate::probes::ResourceSource for NoHost {
    fn memory_percent(&self) -> Option<f64> {
        None
    }

    fn cpu_percent(&self) -> Option<f64> {
        None
    }
}

#[tokio::test]
async fn test_error_rate_alert_resolves_when_traffic_stops() {
    let h = harness_with(AlertsConfig::default()).await;
    let sampler = crate::sampler::SystemSampler::new(h.store.clone(), Arc::new(NoHost), chrono::Duration::minutes(5));

    for i in 0..10 {
        h.store.record_performance("send", 20.0, i % 2 == 0, serde_json::Map::new());
    }
    sampler.sample();
    h.engine.tick().await;
    let active: Vec<String> = h.engine.active_alerts().await.into_iter().map(|a| a.rule_id).collect();
    assert_eq!(active, vec!["high-error-rate".to_string()]);

    // Once the failed requests age out of the traffic window the rate reads as zero.
    for _ in 0..10 {
        h.advance_secs(60);
        sampler.sample();
        h.engine.tick().await;
    }
    assert!(h.engine.active_alerts().await.is_empty());
    let history = h.engine.history(10).await;
    assert!(history.iter().all(|a| a.resolved));
}

#[tokio::test]
async fn test_subscribe_and_notify_on_resolve() {
    let h = harness_with(AlertsConfig {
        default_rules: false,
        notify_on_resolve: true,
        ..Default::default()
    })
    .await;
    let mut rx = h.engine.subscribe();
    h.engine.add_rule(cpu_rule()).await.unwrap();

    h.cpu(95.0);
    h.engine.tick().await;
    h.advance_secs(10);
    h.cpu(10.0);
    h.engine.tick().await;

    assert!(matches!(rx.recv().await.unwrap(), AlertEvent::Fired(_)));
    assert!(matches!(rx.recv().await.unwrap(), AlertEvent::Resolved(_)));
    assert_eq!(h.deliveries(), 2);
    assert!(h.transport.delivered.lock()[1].alert.resolved);
}

#[tokio::test]
async fn test_concurrent_ticks_fire_once() {
    let h = harness().await;
    h.engine.add_rule(cpu_rule()).await.unwrap();
    h.cpu(95.0);

    let (a, b) = tokio::join!(h.engine.tick(), h.engine.tick());
    assert_eq!(a.len() + b.len(), 1);
    assert_eq!(h.engine.active_alerts().await.len(), 1);
}

#[tokio::test]
async fn test_history_is_bounded() {
    let h = harness_with(AlertsConfig {
        default_rules: false,
        max_history: 2,
        ..Default::default()
    })
    .await;
    h.engine.add_rule(cpu_rule().with_cooldown_secs(0)).await.unwrap();

    for _ in 0..3 {
        h.cpu(95.0);
        h.engine.tick().await;
        h.advance_secs(1);
        h.cpu(10.0);
        h.engine.tick().await;
        h.advance_secs(1);
    }

    let history = h.engine.history(10).await;
    assert_eq!(history.len(), 2);
    assert!(history[0].fired_at > history[1].fired_at);

    let stats = h.engine.stats().await;
    assert_eq!(stats.total_fired, 3);
    assert_eq!(stats.total_resolved, 3);
    assert_eq!(stats.open(), 0);
}

#[tokio::test]
async fn test_stats_counts_open_by_severity() {
    let h = harness().await;
    h.engine.add_rule(cpu_rule()).await.unwrap();
    h.engine
        .add_rule(
            RuleDefinition::new("mem", "mem.usage", RuleCondition::Gt, 50.0, AlertSeverity::Critical).with_id("mem"),
        )
        .await
        .unwrap();

    h.cpu(95.0);
    h.store.record_value("mem.usage", 99.0, MetricUnit::Percent);
    h.engine.tick().await;

    let stats = h.engine.stats().await;
    assert_eq!(stats.open(), 2);
    assert_eq!(stats.open_by_severity.get(&AlertSeverity::Critical), Some(&1));
    assert_eq!(stats.enabled_rules, 2);
}
