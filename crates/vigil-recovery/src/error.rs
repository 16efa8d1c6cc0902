//! Recovery errors.

use thiserror::Error;
use vigil_monitor::{ErrorKind, MonitorError};

/// Recovery error types.
#[derive(Debug, Error)]
pub enum RecoveryError {
    /// Unknown or already resolved event.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// A recovery action could not be carried out.
    #[error("Recovery action {action} failed: {reason}")]
    RecoveryAction { action: String, reason: String },

    /// The backup collaborator failed.
    #[error("Backup error: {0}")]
    Backup(String),

    /// Rejected input.
    #[error("Invalid {field}: {message}")]
    Validation { field: String, message: String },

    /// Error from the monitor crate.
    #[error(transparent)]
    Monitor(#[from] MonitorError),
}

impl RecoveryError {
    /// Shorthand for a failed action.
    pub fn action(action: impl Into<String>, reason: impl Into<String>) -> Self {
        RecoveryError::RecoveryAction {
            action: action.into(),
            reason: reason.into(),
        }
    }

    /// The taxonomy bucket this error falls in.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RecoveryError::NotFound { .. } => ErrorKind::NotFound,
            RecoveryError::RecoveryAction { .. } | RecoveryError::Backup(_) => ErrorKind::RecoveryAction,
            RecoveryError::Validation { .. } => ErrorKind::Validation,
            RecoveryError::Monitor(e) => e.kind(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        let err = RecoveryError::NotFound {
            kind: "event",
            id: "e-1".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.to_string(), "event not found: e-1");

        let err = RecoveryError::action("restore_backup", "disk full");
        assert_eq!(err.kind(), ErrorKind::RecoveryAction);

        let err: RecoveryError = MonitorError::validation("url", "bad").into();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}
