//! Configuration loader.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::error::ConfigError;
use crate::schema::Config;

static ENV_VAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("env var pattern is a valid regex"));

/// Configuration loader with environment variable substitution.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = fs::read_to_string(path)?;
        Self::load_str(&content)
    }

    /// Load `path`, or built-in defaults if `path` is absent and `optional` is set.
    pub fn load_or_default(path: &Path, optional: bool) -> Result<Config, ConfigError> {
        match Self::load(path) {
            Err(ConfigError::NotFound(_)) if optional => Ok(Config::default()),
            other => other,
        }
    }

    /// Load configuration from a string.
    pub fn load_str(content: &str) -> Result<Config, ConfigError> {
        let expanded = Self::expand_env_vars(content)?;
        let config: Config = toml::from_str(&expanded)?;
        Ok(config)
    }

    /// Expand environment variables in the format `${VAR}`.
    fn expand_env_vars(content: &str) -> Result<String, ConfigError> {
        let mut result = content.to_string();

        for cap in ENV_VAR.captures_iter(content) {
            let var_name = &cap[1];
            let var_value =
                std::env::var(var_name).map_err(|_| ConfigError::EnvVarNotSet(var_name.to_string()))?;
            result = result.replace(&cap[0], &var_value);
        }

        Ok(result)
    }

    /// Expand shell-style paths (e.g., `~/.local/share/vigil`).
    pub fn expand_path(path: &Path) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;
    use vigil_monitor::{AlertSeverity, ChannelKind, RuleCondition};

    #[test]
    fn test_load_empty_config() {
        let config = ConfigLoader::load_str("").unwrap();
        assert_eq!(config.service.name, "vigil");
        assert_eq!(config.alerts.interval_secs, 30);
    }

    #[test]
    fn test_load_sections() {
        let content = r#"
            [service]
            name = "orders"

            [logging]
            level = "debug"
            json = true

            [metrics]
            max_per_series = 500

            [health]
            interval_secs = 15
            heartbeat_metric = "orders.heartbeat"

            [recovery]
            auto_recovery = true

            [recovery.actions]
            restore_backup = true

            [recovery.restart_limit]
            max_restarts = 5
        "#;
        let config = ConfigLoader::load_str(content).unwrap();
        assert_eq!(config.service.name, "orders");
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
        assert_eq!(config.metrics.max_per_series, 500);
        assert_eq!(config.health.interval_secs, 15);
        assert_eq!(config.health.heartbeat_metric, "orders.heartbeat");
        assert!(config.recovery.auto_recovery);
        assert!(config.recovery.actions.restore_backup);
        assert!(config.recovery.actions.notify_admins);
        assert_eq!(config.recovery.restart_limit.max_restarts, 5);
        assert_eq!(config.recovery.restart_limit.window_secs, 1800);
    }

    #[test]
    fn test_load_rules_and_channels() {
        let content = r#"
            [alerts]
            default_rules = false

            [[alerts.rules]]
            name = "Queue backlog"
            metric = "queue.depth{queue=emails}"
            condition = "gt"
            threshold = 1000.0
            severity = "high"

            [[alerts.channels]]
            type = "slack"
            webhook_url = "https://hooks.slack.com/services/T/B/X"

            [[alerts.channels]]
            id = "ops-hook"
            type = "webhook"
            url = "https://ops.example.com/alerts"
            headers = { Authorization = "Bearer abc" }
        "#;
        let config = ConfigLoader::load_str(content).unwrap();
        assert!(!config.alerts.default_rules);

        let rule = &config.alerts.rules[0];
        assert_eq!(rule.condition, RuleCondition::Gt);
        assert_eq!(rule.severity, AlertSeverity::High);
        assert!(rule.enabled);

        assert_eq!(config.alerts.channels.len(), 2);
        assert!(matches!(config.alerts.channels[0].kind, ChannelKind::Slack { .. }));
        match &config.alerts.channels[1].kind {
            ChannelKind::Webhook { url, headers } => {
                assert_eq!(url, "https://ops.example.com/alerts");
                assert_eq!(headers["Authorization"], "Bearer abc");
            }
            other => panic!("unexpected channel {other:?}"),
        }
        assert_eq!(config.alerts.channels[1].id, "ops-hook");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[service]").unwrap();
        writeln!(file, "name = \"from-file\"").unwrap();

        let config = ConfigLoader::load(file.path()).unwrap();
        assert_eq!(config.service.name, "from-file");
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = ConfigLoader::load(Path::new("/nonexistent/path/vigil.toml"));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_load_or_default() {
        let missing = Path::new("/nonexistent/path/vigil.toml");
        let config = ConfigLoader::load_or_default(missing, true).unwrap();
        assert_eq!(config.service.name, "vigil");

        assert!(ConfigLoader::load_or_default(missing, false).is_err());
    }

    #[test]
    fn test_load_invalid_toml() {
        let result = ConfigLoader::load_str("invalid = [unclosed");
        assert!(matches!(result, Err(ConfigError::TomlParse(_))));
    }

    #[test]
    fn test_unknown_channel_type_rejected() {
        let content = r#"
            [[alerts.channels]]
            type = "pager"
            url = "https://example.com"
        "#;
        assert!(ConfigLoader::load_str(content).is_err());
    }

    #[test]
    fn test_expand_env_vars() {
        // SAFETY: This test runs in isolation and sets a unique test-only env var
        unsafe {
            std::env::set_var("VIGIL_TEST_SLACK_URL", "https://hooks.slack.com/services/T/B/Y");
        }
        let content = r#"
            [[alerts.channels]]
            type = "slack"
            webhook_url = "${VIGIL_TEST_SLACK_URL}"
        "#;
        let config = ConfigLoader::load_str(content).unwrap();
        match &config.alerts.channels[0].kind {
            ChannelKind::Slack { webhook_url } => {
                assert_eq!(webhook_url, "https://hooks.slack.com/services/T/B/Y")
            }
            other => panic!("unexpected channel {other:?}"),
        }
        unsafe {
            std::env::remove_var("VIGIL_TEST_SLACK_URL");
        }
    }

    #[test]
    fn test_expand_env_vars_not_set() {
        let content = "value = \"${VIGIL_NONEXISTENT_TEST_VAR_12345}\"";
        let result = ConfigLoader::expand_env_vars(content);
        assert!(matches!(result, Err(ConfigError::EnvVarNotSet(name)) if name == "VIGIL_NONEXISTENT_TEST_VAR_12345"));
    }

    #[test]
    fn test_expand_env_vars_no_vars() {
        let content = "value = \"no variables here\"";
        let expanded = ConfigLoader::expand_env_vars(content).unwrap();
        assert_eq!(expanded, content);
    }

    #[test]
    fn test_expand_path() {
        let path = Path::new("/var/log/vigil");
        assert_eq!(ConfigLoader::expand_path(path), path);

        let expanded = ConfigLoader::expand_path(Path::new("~/logs"));
        assert!(!expanded.starts_with("~"));
        assert!(expanded.ends_with("logs"));
    }
}
