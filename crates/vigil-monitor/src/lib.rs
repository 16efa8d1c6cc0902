//! # Vigil Monitor
//!
//! In-process observability for a long-running service.
//!
//! ## Features
//!
//! - Bounded metric store with Prometheus text export
//! - Concurrent health probes with per-probe timeouts
//! - Threshold alert rules with cooldown and resolution tracking
//! - Alert notifications (webhook/Slack/Discord/email)

pub mod alert_channels;
pub mod alert_engine;
pub mod alerts;
pub mod clock;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod health;
pub mod metrics;
pub mod probes;
pub mod rules;
pub mod sampler;
pub mod scheduler;
pub mod selector;

pub use alert_channels::{AlertChannel, ChannelKind, HttpTransport, Mailer, NotificationPayload, SmtpConfig, SmtpMailer, Transport};
pub use alert_engine::AlertRuleEngine;
pub use alerts::{Alert, AlertEvent, AlertStats};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AlertsConfig, HealthConfig, MetricsConfig, MonitorConfig};
pub use dispatcher::{DispatchReport, NotificationDispatcher};
pub use error::{ErrorKind, MonitorError};
pub use health::{
    ComponentCheck, ComponentKind, FnProbe, HealthAggregator, HealthProbe, HealthStatus, ProbeOutcome, SystemHealth,
};
pub use metrics::{Metric, MetricQuery, MetricStore, MetricUnit, MetricsSummary, OperationStats, PerformanceQuery, PerformanceRecord};
pub use probes::{builtin_probes, ResourceSource, SysinfoSource};
pub use rules::{AlertRule, AlertSeverity, RuleCondition, RuleDefinition, RulePatch};
pub use sampler::SystemSampler;
pub use scheduler::{Scheduler, Tickable};
pub use selector::MetricSelector;
