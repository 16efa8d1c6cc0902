//! CLI definitions for Vigil.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Config path used when `--config` is not given. A missing file here means defaults.
pub(crate) const DEFAULT_CONFIG: &str = "config/vigil.toml";

/// Vigil CLI.
#[derive(Parser)]
#[command(name = "vigil")]
#[command(about = "Observability and automated remediation for a long-running service")]
#[command(version)]
pub(crate) struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = DEFAULT_CONFIG, env = "VIGIL_CONFIG", global = true)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Commands {
    /// Run monitoring, alerting and recovery in the foreground (default)
    Run,

    /// Run one health check and print the result as JSON
    Check,

    /// Load and validate the configuration file
    Validate,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["vigil"]).unwrap();
        assert_eq!(cli.command, None);
        if std::env::var_os("VIGIL_CONFIG").is_none() {
            assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG));
        }
    }

    #[test]
    fn test_subcommands() {
        let cli = Cli::try_parse_from(["vigil", "check", "--config", "/etc/vigil.toml"]).unwrap();
        assert_eq!(cli.command, Some(Commands::Check));
        assert_eq!(cli.config, PathBuf::from("/etc/vigil.toml"));

        let cli = Cli::try_parse_from(["vigil", "-c", "local.toml", "validate"]).unwrap();
        assert_eq!(cli.command, Some(Commands::Validate));
        assert_eq!(cli.config, PathBuf::from("local.toml"));

        assert!(Cli::try_parse_from(["vigil", "serve"]).is_err());
    }
}
