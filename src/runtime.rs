//! Component wiring and the foreground run loop.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use vigil_config::{Config, ConfigValidator};
use vigil_monitor::{
    builtin_probes, AlertRuleEngine, HealthAggregator, HealthStatus, HttpTransport, MetricStore, MetricUnit,
    NotificationDispatcher, ResourceSource, Scheduler, SysinfoSource, SystemSampler, Tickable,
};
use vigil_recovery::{DisasterRecoveryOrchestrator, MemoryBackupProvider, RestartSignal};

use crate::restart::ProcessRestart;

/// Exit status (EX_TEMPFAIL) asking the supervisor to start the process again.
pub(crate) const RESTART_EXIT_CODE: u8 = 75;

/// Records the heartbeat metric so the core liveness probe sees this process.
pub(crate) struct Heartbeat {
    store: Arc<MetricStore>,
    metric: String,
}

impl Heartbeat {
    /// `None` when the configured heartbeat is a pattern rather than a metric name.
    pub(crate) fn new(store: Arc<MetricStore>, metric: &str) -> Option<Self> {
        let metric = metric.trim();
        if metric.is_empty() || metric.contains(|c: char| c == '*' || c == '{') {
            return None;
        }
        Some(Self {
            store,
            metric: metric.to_string(),
        })
    }

    pub(crate) fn beat(&self) {
        self.store.record_value(self.metric.as_str(), 1.0, MetricUnit::Count);
    }
}

#[async_trait]
impl Tickable for Heartbeat {
    fn name(&self) -> &str {
        "heartbeat"
    }

    async fn tick(&self) {
        self.beat();
    }
}

/// Everything built from one configuration.
pub(crate) struct Components {
    pub store: Arc<MetricStore>,
    pub health: Arc<HealthAggregator>,
    pub dispatcher: Arc<NotificationDispatcher>,
    pub alerts: Arc<AlertRuleEngine>,
    pub sampler: Arc<SystemSampler>,
    pub heartbeat: Option<Arc<Heartbeat>>,
    pub orchestrator: Arc<DisasterRecoveryOrchestrator>,
}

impl Components {
    pub(crate) async fn build(config: &Config, restart: Arc<dyn RestartSignal>) -> anyhow::Result<Self> {
        let monitor = config.monitor();
        let store = Arc::new(MetricStore::new(&monitor.metrics));
        let source: Arc<dyn ResourceSource> = Arc::new(SysinfoSource::new());

        let health = Arc::new(HealthAggregator::new(&monitor.health));
        for probe in builtin_probes(&monitor.health, store.clone(), source.clone()).context("building health probes")? {
            health.register_probe(probe).await;
        }

        let transport = Arc::new(HttpTransport::new(monitor.alerts.delivery_timeout()));
        let dispatcher = Arc::new(NotificationDispatcher::with_clock(
            monitor.alerts.service_name.clone(),
            transport,
            store.clock().clone(),
        ));
        for channel in &monitor.alerts.channels {
            dispatcher
                .add_channel(channel.clone())
                .await
                .with_context(|| format!("adding notification channel {}", channel.label()))?;
        }

        let alerts = Arc::new(
            AlertRuleEngine::new(&monitor.alerts, store.clone(), dispatcher.clone()).context("loading alert rules")?,
        );
        let sampler = Arc::new(SystemSampler::new(store.clone(), source, monitor.health.traffic_window()));

        let heartbeat = Heartbeat::new(store.clone(), &monitor.health.heartbeat_metric).map(Arc::new);
        if heartbeat.is_none() {
            warn!(
                "Heartbeat metric '{}' is a pattern; the monitored service must record it",
                monitor.health.heartbeat_metric
            );
        }

        // No backup provider is wired into the standalone binary yet.
        let backups = Arc::new(MemoryBackupProvider::new());
        let orchestrator = Arc::new(DisasterRecoveryOrchestrator::new(
            config.recovery.clone(),
            health.clone(),
            dispatcher.clone(),
            backups,
            restart,
        ));

        Ok(Self {
            store,
            health,
            dispatcher,
            alerts,
            sampler,
            heartbeat,
            orchestrator,
        })
    }

    /// Start every periodic task on `scheduler` plus disaster monitoring.
    pub(crate) fn start(&self, config: &Config, scheduler: &mut Scheduler) {
        scheduler.spawn(self.store.clone(), config.metrics.cleanup_interval());
        scheduler.spawn(self.sampler.clone(), config.metrics.sample_interval());
        if let Some(heartbeat) = &self.heartbeat {
            heartbeat.beat();
            scheduler.spawn(heartbeat.clone(), config.metrics.sample_interval());
        }
        scheduler.spawn(self.health.clone(), config.health.interval());
        scheduler.spawn(self.alerts.clone(), config.alerts.interval());
        self.orchestrator.start_monitoring();
    }
}

/// Run until a shutdown signal or a restart request.
pub(crate) async fn run(config: Config) -> anyhow::Result<ExitCode> {
    let warnings = ConfigValidator::validate(&config)?
        .into_result()
        .context("invalid configuration")?;
    for warning in &warnings {
        warn!("Config warning: {}", warning);
    }

    info!("Starting Vigil v{} for {}", env!("CARGO_PKG_VERSION"), config.service.name);

    let shutdown = CancellationToken::new();
    let restart = Arc::new(ProcessRestart::new(shutdown.clone()));
    let components = Components::build(&config, restart.clone()).await?;
    info!(
        "{} alert rules, {} notification channels",
        components.alerts.rules().await.len(),
        components.dispatcher.channels().await.len()
    );

    let mut scheduler = Scheduler::with_token(shutdown.clone());
    components.start(&config, &mut scheduler);
    info!("Vigil running: {}", scheduler.task_names().join(", "));

    tokio::select! {
        _ = shutdown_signal() => info!("Shutdown signal received"),
        _ = shutdown.cancelled() => warn!("Restart requested, shutting down"),
    }

    components.orchestrator.stop_monitoring().await;
    scheduler.shutdown().await;
    shutdown.cancel();

    if restart.is_requested() {
        info!("Exiting with status {} for restart", RESTART_EXIT_CODE);
        Ok(ExitCode::from(RESTART_EXIT_CODE))
    } else {
        info!("Vigil stopped");
        Ok(ExitCode::SUCCESS)
    }
}

/// Run one health check and print it as JSON.
pub(crate) async fn check(config: Config) -> anyhow::Result<ExitCode> {
    let restart = Arc::new(ProcessRestart::new(CancellationToken::new()));
    let components = Components::build(&config, restart).await?;
    if let Some(heartbeat) = &components.heartbeat {
        heartbeat.beat();
    }
    components.sampler.sample();

    let health = components.health.check().await;
    println!("{}", serde_json::to_string_pretty(&health)?);

    Ok(if health.status == HealthStatus::Unhealthy {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                }
                return;
            }
            Err(e) => warn!("Failed to install SIGTERM handler: {}", e),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_monitor::{AlertChannel, ChannelKind, Clock};

    #[test]
    fn test_heartbeat_needs_plain_metric() {
        let store = Arc::new(MetricStore::new(&Default::default()));
        assert!(Heartbeat::new(store.clone(), "service.*").is_none());
        assert!(Heartbeat::new(store.clone(), "service.heartbeat{role=api}").is_none());

        let heartbeat = Heartbeat::new(store.clone(), " service.heartbeat ").unwrap();
        heartbeat.beat();
        let selector = vigil_monitor::MetricSelector::parse("service.heartbeat").unwrap();
        let latest = store.latest(&selector, None).unwrap();
        assert!(latest.timestamp <= store.clock().now());
    }

    #[tokio::test]
    async fn test_build_components_from_config() {
        let mut config = Config::default();
        config.alerts.channels.push(
            AlertChannel::new(ChannelKind::Webhook {
                url: "https://ops.example.com/hook".to_string(),
                headers: Default::default(),
            })
            .with_id("ops"),
        );

        let restart = Arc::new(ProcessRestart::new(CancellationToken::new()));
        let components = Components::build(&config, restart).await.unwrap();

        let mut probes = components.health.probe_names().await;
        probes.sort();
        assert_eq!(probes, vec!["cpu", "error_rate", "heartbeat", "liveness", "memory"]);
        assert_eq!(components.dispatcher.channels().await[0].id, "ops");
        assert_eq!(components.alerts.rules().await.len(), 4);
        assert!(components.heartbeat.is_some());
        assert!(!components.orchestrator.is_monitoring());
    }

    #[tokio::test]
    async fn test_build_rejects_bad_channel() {
        let mut config = Config::default();
        config.alerts.channels.push(AlertChannel::new(ChannelKind::Slack {
            webhook_url: "not a url".to_string(),
        }));

        let restart = Arc::new(ProcessRestart::new(CancellationToken::new()));
        let err = Components::build(&config, restart).await.err().unwrap();
        assert!(format!("{:#}", err).contains("adding notification channel"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_and_shutdown_tasks() {
        let config = Config::default();
        let restart = Arc::new(ProcessRestart::new(CancellationToken::new()));
        let components = Components::build(&config, restart).await.unwrap();

        let mut scheduler = Scheduler::new();
        components.start(&config, &mut scheduler);
        let mut names = scheduler.task_names();
        names.sort();
        assert_eq!(
            names,
            vec!["alert-engine", "health-check", "heartbeat", "metrics-cleanup", "system-sampler"]
        );
        assert!(components.orchestrator.is_monitoring());

        components.orchestrator.stop_monitoring().await;
        scheduler.shutdown().await;
    }
}
