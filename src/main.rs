//! Vigil - observability and automated remediation for a long-running service
//!
//! Main entry point for the Vigil CLI.

mod cli;
mod restart;
mod runtime;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::OnceLock;

use anyhow::Context;
use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use vigil_config::{Config, ConfigLoader, ConfigValidator, LoggingConfig};

use crate::cli::{Cli, Commands, DEFAULT_CONFIG};

fn default_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("vigil").join("logs"))
        .unwrap_or_else(|| PathBuf::from("logs"))
}

fn init_tracing(logging: &LoggingConfig) -> anyhow::Result<()> {
    let log_dir = logging
        .directory
        .as_deref()
        .map(ConfigLoader::expand_path)
        .unwrap_or_else(default_log_dir);
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("creating log directory {}", log_dir.display()))?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("vigil")
        .filename_suffix("log")
        .max_log_files(logging.max_files)
        .build(&log_dir)?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // The guard flushes the file writer on drop, so it lives for the whole process.
    static GUARD: OnceLock<WorkerGuard> = OnceLock::new();
    let _ = GUARD.set(guard);

    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&logging.level)
            .with_context(|| format!("invalid logging.level '{}'", logging.level))?,
    };

    let (json_layer, text_layer) = if logging.json {
        (Some(fmt::layer().json().with_writer(non_blocking)), None)
    } else {
        (None, Some(fmt::layer().with_writer(non_blocking).with_ansi(false)))
    };

    tracing_subscriber::registry()
        .with(env_filter)
        // Console on stderr so `vigil check` keeps stdout for JSON
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(json_layer)
        .with(text_layer)
        .try_init()?;

    Ok(())
}

fn load_config(path: &Path) -> anyhow::Result<Config> {
    let optional = path == Path::new(DEFAULT_CONFIG);
    ConfigLoader::load_or_default(path, optional)
        .with_context(|| format!("loading config from {}", path.display()))
}

fn validate(path: &Path, config: &Config) -> anyhow::Result<ExitCode> {
    let result = ConfigValidator::validate(config)?;
    for error in &result.errors {
        println!("error:   {}", error);
    }
    for warning in &result.warnings {
        println!("warning: {}", warning);
    }

    if result.is_valid() {
        println!("{}: OK ({} warnings)", path.display(), result.warnings.len());
        Ok(ExitCode::SUCCESS)
    } else {
        println!("{}: {} errors", path.display(), result.errors.len());
        Ok(ExitCode::FAILURE)
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = load_config(&cli.config)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Validate => validate(&cli.config, &config),
        Commands::Check => {
            init_tracing(&config.logging)?;
            runtime::check(config).await
        }
        Commands::Run => {
            init_tracing(&config.logging)?;
            runtime::run(config).await
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
