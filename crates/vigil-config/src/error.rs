//! Configuration errors.

use thiserror::Error;
use vigil_monitor::ErrorKind;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Environment variable not set: {0}")]
    EnvVarNotSet(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
}

impl ConfigError {
    /// The taxonomy bucket this error falls in.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConfigError::NotFound(_) => ErrorKind::NotFound,
            ConfigError::Io(_) => ErrorKind::Internal,
            ConfigError::InvalidValue { .. } | ConfigError::EnvVarNotSet(_) | ConfigError::TomlParse(_) => {
                ErrorKind::Validation
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_error() {
        let err = ConfigError::NotFound("vigil.toml".to_string());
        assert!(err.to_string().contains("vigil.toml"));
        assert!(err.to_string().contains("not found"));
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_invalid_value_error() {
        let err = ConfigError::InvalidValue {
            field: "alerts.interval_secs".to_string(),
            message: "must be greater than 0".to_string(),
        };
        let display = err.to_string();
        assert!(display.contains("alerts.interval_secs"));
        assert!(display.contains("must be greater than 0"));
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_env_var_not_set_error() {
        let err = ConfigError::EnvVarNotSet("SLACK_WEBHOOK_URL".to_string());
        assert!(err.to_string().contains("SLACK_WEBHOOK_URL"));
        assert!(err.to_string().contains("not set"));
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_io_error_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "permission denied");
        let err = ConfigError::from(io_err);
        assert!(err.to_string().contains("permission denied"));
        assert_eq!(err.kind(), ErrorKind::Internal);
    }
}
