//! Fan-out of alerts to notification channels.

use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::alert_channels::{AlertChannel, NotificationPayload, Transport};
use crate::alerts::Alert;
use crate::clock::{Clock, SystemClock};
use crate::error::MonitorError;

/// Outcome of delivering to one channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelOutcome {
    pub channel_id: String,
    pub channel_type: &'static str,
    /// `None` on success.
    pub error: Option<String>,
}

/// Per-channel outcomes of one `send`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DispatchReport {
    pub outcomes: Vec<ChannelOutcome>,
}

impl DispatchReport {
    /// Channels that accepted the payload.
    pub fn delivered(&self) -> usize {
        self.outcomes.iter().filter(|o| o.error.is_none()).count()
    }

    /// Channels that failed.
    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.delivered()
    }

    /// Whether at least one channel accepted the payload.
    pub fn any_delivered(&self) -> bool {
        self.delivered() > 0
    }
}

/// Dispatches alerts to every enabled channel.
pub struct NotificationDispatcher {
    service_name: String,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    channels: RwLock<Vec<AlertChannel>>,
}

impl NotificationDispatcher {
    /// Create a dispatcher with no channels, stamping payloads with the system clock.
    pub fn new(service_name: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self::with_clock(service_name, transport, Arc::new(SystemClock))
    }

    /// Create a dispatcher stamping payloads with `clock`.
    pub fn with_clock(service_name: impl Into<String>, transport: Arc<dyn Transport>, clock: Arc<dyn Clock>) -> Self {
        Self {
            service_name: service_name.into(),
            transport,
            clock,
            channels: RwLock::new(Vec::new()),
        }
    }

    /// Validate and register a channel. Returns its id.
    pub async fn add_channel(&self, mut channel: AlertChannel) -> Result<String, MonitorError> {
        channel.validate()?;

        let mut channels = self.channels.write().await;
        if channel.id.trim().is_empty() {
            channel.id = uuid::Uuid::new_v4().to_string();
        } else if channels.iter().any(|c| c.id == channel.id) {
            return Err(MonitorError::validation(
                "id",
                format!("channel '{}' already exists", channel.id),
            ));
        }

        info!("Adding {} alert channel {}", channel.kind.type_name(), channel.id);
        let id = channel.id.clone();
        channels.push(channel);
        Ok(id)
    }

    /// Remove a channel.
    pub async fn remove_channel(&self, id: &str) -> bool {
        let mut channels = self.channels.write().await;
        let before = channels.len();
        channels.retain(|c| c.id != id);
        channels.len() != before
    }

    /// Enable or disable a channel.
    pub async fn set_channel_enabled(&self, id: &str, enabled: bool) -> bool {
        let mut channels = self.channels.write().await;
        match channels.iter_mut().find(|c| c.id == id) {
            Some(channel) => {
                channel.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Configured channels.
    pub async fn channels(&self) -> Vec<AlertChannel> {
        self.channels.read().await.clone()
    }

    /// Deliver `alert` to every enabled channel concurrently.
    pub async fn send(&self, alert: &Alert) -> DispatchReport {
        let targets: Vec<AlertChannel> = self
            .channels
            .read()
            .await
            .iter()
            .filter(|c| c.enabled)
            .cloned()
            .collect();

        let payload = NotificationPayload {
            alert: alert.clone(),
            timestamp: self.clock.now(),
            service_name: self.service_name.clone(),
        };

        let results = join_all(
            targets
                .iter()
                .map(|channel| self.transport.deliver(channel, &payload)),
        )
        .await;

        let outcomes = targets
            .iter()
            .zip(results)
            .map(|(channel, result)| {
                let error = result.err().map(|e| {
                    warn!("Failed to send alert {} via {}: {}", alert.id, channel.label(), e);
                    e.to_string()
                });
                ChannelOutcome {
                    channel_id: channel.id.clone(),
                    channel_type: channel.kind.type_name(),
                    error,
                }
            })
            .collect();

        DispatchReport { outcomes }
    }
}
