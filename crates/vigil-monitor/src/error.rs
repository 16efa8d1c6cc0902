//! Monitor errors.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed taxonomy of failure kinds shared by every vigil crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed rule, channel or config input.
    Validation,
    /// Unknown rule, alert or event id.
    NotFound,
    /// A health probe did not answer in time.
    ProbeTimeout,
    /// A health probe failed outright.
    Probe,
    /// A notification channel rejected or failed a delivery.
    Delivery,
    /// A recovery action failed.
    RecoveryAction,
    /// Anything else.
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::ProbeTimeout => "probe_timeout",
            ErrorKind::Probe => "probe",
            ErrorKind::Delivery => "delivery",
            ErrorKind::RecoveryAction => "recovery_action",
            ErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Monitor error types.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// Rejected input.
    #[error("Invalid {field}: {message}")]
    Validation { field: String, message: String },

    /// Unknown id.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Probe exceeded its timeout.
    #[error("Probe '{probe}' timed out after {timeout:?}")]
    ProbeTimeout { probe: String, timeout: Duration },

    /// Probe returned an error.
    #[error("Probe '{probe}' failed: {reason}")]
    Probe { probe: String, reason: String },

    /// Channel delivery failed.
    #[error("Delivery via {channel} failed: {reason}")]
    Delivery { channel: String, reason: String },

    /// Generic error.
    #[error("{0}")]
    Custom(String),
}

impl MonitorError {
    /// Shorthand for a validation error.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        MonitorError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Shorthand for a delivery error.
    pub fn delivery(channel: impl Into<String>, reason: impl Into<String>) -> Self {
        MonitorError::Delivery {
            channel: channel.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for a probe error.
    pub fn probe(probe: impl Into<String>, reason: impl Into<String>) -> Self {
        MonitorError::Probe {
            probe: probe.into(),
            reason: reason.into(),
        }
    }

    /// The taxonomy bucket this error falls in.
    pub fn kind(&self) -> ErrorKind {
        match self {
            MonitorError::Validation { .. } => ErrorKind::Validation,
            MonitorError::NotFound { .. } => ErrorKind::NotFound,
            MonitorError::ProbeTimeout { .. } => ErrorKind::ProbeTimeout,
            MonitorError::Probe { .. } => ErrorKind::Probe,
            MonitorError::Delivery { .. } => ErrorKind::Delivery,
            MonitorError::Custom(_) => ErrorKind::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        let err = MonitorError::validation("rule.threshold", "must be finite");
        assert_eq!(err.to_string(), "Invalid rule.threshold: must be finite");
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_not_found_error() {
        let err = MonitorError::NotFound {
            kind: "rule",
            id: "abc".to_string(),
        };
        assert!(err.to_string().contains("rule not found"));
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_probe_timeout_kind() {
        let err = MonitorError::ProbeTimeout {
            probe: "db".to_string(),
            timeout: Duration::from_secs(5),
        };
        assert!(err.to_string().contains("timed out"));
        assert_eq!(err.kind(), ErrorKind::ProbeTimeout);
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(ErrorKind::Delivery.to_string(), "delivery");
        assert_eq!(ErrorKind::RecoveryAction.to_string(), "recovery_action");
    }
}
