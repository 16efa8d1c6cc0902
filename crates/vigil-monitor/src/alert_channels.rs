//! Notification channel definitions and transports (webhook, Slack, Discord, email).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::alerts::Alert;
use crate::error::MonitorError;

/// A configured notification channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertChannel {
    /// Generated by the dispatcher when empty.
    #[serde(default)]
    pub id: String,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(flatten)]
    pub kind: ChannelKind,
}

fn default_enabled() -> bool {
    true
}

/// Channel type with its type-specific settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChannelKind {
    /// Generic JSON webhook.
    Webhook {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
    /// Slack incoming webhook.
    Slack { webhook_url: String },
    /// Discord webhook.
    Discord { webhook_url: String },
    /// Email via SMTP.
    Email { to: Vec<String>, smtp: SmtpConfig },
}

impl ChannelKind {
    /// Type name as used in configuration.
    pub fn type_name(&self) -> &'static str {
        match self {
            ChannelKind::Webhook { .. } => "webhook",
            ChannelKind::Slack { .. } => "slack",
            ChannelKind::Discord { .. } => "discord",
            ChannelKind::Email { .. } => "email",
        }
    }
}

/// SMTP settings for the email channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmtpConfig {
    /// SMTP server.
    pub host: String,
    /// SMTP port.
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    /// From address.
    pub from: String,
    /// SMTP username.
    #[serde(default)]
    pub username: Option<String>,
    /// SMTP password.
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
}

fn default_smtp_port() -> u16 {
    587
}

impl AlertChannel {
    /// Create an enabled channel without an id.
    pub fn new(kind: ChannelKind) -> Self {
        Self {
            id: String::new(),
            enabled: true,
            kind,
        }
    }

    /// Set the id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Label used in logs and reports.
    pub fn label(&self) -> String {
        format!("{}:{}", self.kind.type_name(), self.id)
    }

    /// Reject malformed settings.
    pub fn validate(&self) -> Result<(), MonitorError> {
        match &self.kind {
            ChannelKind::Webhook { url, headers } => {
                validate_url("url", url)?;
                if headers.keys().any(|k| k.trim().is_empty()) {
                    return Err(MonitorError::validation("headers", "header name is empty"));
                }
                Ok(())
            }
            ChannelKind::Slack { webhook_url } | ChannelKind::Discord { webhook_url } => {
                validate_url("webhook_url", webhook_url)
            }
            ChannelKind::Email { to, smtp } => {
                if to.is_empty() {
                    return Err(MonitorError::validation("to", "at least one recipient is required"));
                }
                if let Some(bad) = to.iter().find(|addr| !looks_like_email(addr)) {
                    return Err(MonitorError::validation("to", format!("'{}' is not an email address", bad)));
                }
                if smtp.host.trim().is_empty() {
                    return Err(MonitorError::validation("smtp.host", "SMTP host is empty"));
                }
                if !looks_like_email(&smtp.from) {
                    return Err(MonitorError::validation(
                        "smtp.from",
                        format!("'{}' is not an email address", smtp.from),
                    ));
                }
                Ok(())
            }
        }
    }
}

fn validate_url(field: &str, raw: &str) -> Result<(), MonitorError> {
    let url = reqwest::Url::parse(raw)
        .map_err(|e| MonitorError::validation(field, format!("'{}' is not a valid URL: {}", raw, e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(MonitorError::validation(
            field,
            format!("unsupported scheme '{}'", url.scheme()),
        ));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(MonitorError::validation(field, "URL has no host"));
    }
    Ok(())
}

fn looks_like_email(addr: &str) -> bool {
    addr.split_once('@')
        .is_some_and(|(user, domain)| !user.is_empty() && domain.contains('.'))
}

/// Uniform body handed to every channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub alert: Alert,
    pub timestamp: DateTime<Utc>,
    pub service_name: String,
}

/// Delivers payloads to channels.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver once; no retry.
    async fn deliver(&self, channel: &AlertChannel, payload: &NotificationPayload) -> Result<(), MonitorError>;
}

/// A rendered email.
#[derive(Debug, Clone, PartialEq)]
pub struct EmailMessage {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
}

/// Sends email on behalf of the email channel.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, smtp: &SmtpConfig, message: &EmailMessage) -> Result<(), MonitorError>;
}

/// Mailer speaking SMTP through `lettre`.
///
/// Port 465 uses implicit TLS, every other port STARTTLS.
pub struct SmtpMailer {
    timeout: Duration,
}

impl SmtpMailer {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn build_message(message: &EmailMessage) -> Result<Message, MonitorError> {
        let from: Mailbox = message
            .from
            .parse()
            .map_err(|e| MonitorError::delivery("email", format!("invalid sender '{}': {}", message.from, e)))?;

        let mut builder = Message::builder()
            .from(from)
            .subject(message.subject.as_str())
            .header(ContentType::TEXT_PLAIN);
        for to in &message.to {
            let mailbox: Mailbox = to
                .parse()
                .map_err(|e| MonitorError::delivery("email", format!("invalid recipient '{}': {}", to, e)))?;
            builder = builder.to(mailbox);
        }

        builder
            .body(message.body.clone())
            .map_err(|e| MonitorError::delivery("email", format!("failed to build message: {}", e)))
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, smtp: &SmtpConfig, message: &EmailMessage) -> Result<(), MonitorError> {
        let email = Self::build_message(message)?;
        let label = format!("email:{}:{}", smtp.host, smtp.port);

        let builder = if smtp.port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&smtp.host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&smtp.host)
        }
        .map_err(|e| MonitorError::delivery(label.as_str(), format!("invalid SMTP relay: {}", e)))?;

        let mut builder = builder.port(smtp.port).timeout(Some(self.timeout));
        if let (Some(username), Some(password)) = (&smtp.username, &smtp.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        builder
            .build()
            .send(email)
            .await
            .map_err(|e| MonitorError::delivery(label.as_str(), format!("SMTP send failed: {}", e)))?;

        info!("Email alert '{}' sent to {:?}", message.subject, message.to);
        Ok(())
    }
}

/// Production transport: HTTP channels via reqwest, email via a [`Mailer`].
pub struct HttpTransport {
    client: reqwest::Client,
    mailer: Arc<dyn Mailer>,
}

impl HttpTransport {
    /// Create a transport with a per-request timeout, sending email over SMTP.
    pub fn new(timeout: Duration) -> Self {
        Self::with_mailer(timeout, Arc::new(SmtpMailer::new(timeout)))
    }

    /// Create a transport with a custom mailer.
    pub fn with_mailer(timeout: Duration, mailer: Arc<dyn Mailer>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client, mailer }
    }

    async fn post(
        &self,
        channel: &AlertChannel,
        url: &str,
        headers: Option<&HashMap<String, String>>,
        body: &serde_json::Value,
    ) -> Result<(), MonitorError> {
        let mut request = self.client.post(url).json(body);
        for (name, value) in headers.into_iter().flatten() {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| MonitorError::delivery(channel.label(), format!("request failed: {}", e)))?;

        if response.status().is_success() {
            debug!("Alert delivered via {}", channel.label());
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(MonitorError::delivery(
                channel.label(),
                format!("endpoint returned {}: {}", status, body),
            ))
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn deliver(&self, channel: &AlertChannel, payload: &NotificationPayload) -> Result<(), MonitorError> {
        match &channel.kind {
            ChannelKind::Webhook { url, headers } => {
                let body = serde_json::to_value(payload)
                    .map_err(|e| MonitorError::delivery(channel.label(), e.to_string()))?;
                self.post(channel, url, Some(headers), &body).await
            }
            ChannelKind::Slack { webhook_url } => {
                self.post(channel, webhook_url, None, &slack_body(payload)).await
            }
            ChannelKind::Discord { webhook_url } => {
                self.post(channel, webhook_url, None, &discord_body(payload)).await
            }
            ChannelKind::Email { to, smtp } => {
                let message = EmailMessage {
                    from: smtp.from.clone(),
                    to: to.clone(),
                    subject: format!(
                        "[{}] {} - {}",
                        payload.alert.severity,
                        payload.service_name,
                        payload.alert.title()
                    ),
                    body: payload.alert.format_text(),
                };
                self.mailer.send(smtp, &message).await
            }
        }
    }
}

fn snapshot_fields(alert: &Alert) -> Vec<(String, String)> {
    alert
        .snapshot
        .as_object()
        .map(|obj| {
            obj.iter()
                .map(|(k, v)| {
                    let value = match v {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (k.clone(), value)
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Slack attachment body.
pub fn slack_body(payload: &NotificationPayload) -> serde_json::Value {
    let alert = &payload.alert;
    serde_json::json!({
        "attachments": [{
            "color": alert.severity.color(),
            "title": format!("{} {}", alert.severity.emoji(), alert.title()),
            "text": alert.message,
            "footer": payload.service_name,
            "ts": payload.timestamp.timestamp(),
            "fields": snapshot_fields(alert)
                .into_iter()
                .map(|(title, value)| serde_json::json!({
                    "title": title,
                    "value": value,
                    "short": true
                }))
                .collect::<Vec<_>>()
        }]
    })
}

/// Discord embed body.
pub fn discord_body(payload: &NotificationPayload) -> serde_json::Value {
    let alert = &payload.alert;
    serde_json::json!({
        "embeds": [{
            "title": format!("{} {}", alert.severity.emoji(), alert.title()),
            "description": alert.message,
            "color": alert.severity.color_code(),
            "timestamp": payload.timestamp.to_rfc3339(),
            "footer": { "text": payload.service_name },
            "fields": snapshot_fields(alert)
                .into_iter()
                .map(|(name, value)| serde_json::json!({
                    "name": name,
                    "value": value,
                    "inline": true
                }))
                .collect::<Vec<_>>()
        }]
    })
}
