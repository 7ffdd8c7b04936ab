//! kiln CLI - headless entry point.
//!
//! ```text
//! main() -> init_tracing() -> KilnConfig -> Workbench -> subcommand
//! ```
//!
//! Logs go to `~/.kiln/logs/kiln.log`; stdout carries only command output.

mod commands;

use std::{
    fs::{self, OpenOptions},
    path::PathBuf,
    process::ExitCode,
    sync::Mutex,
};

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use kiln_engine::KilnConfig;

use crate::commands::Cli;

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (log_file, init_warnings) = open_kiln_log_file();

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    // No log file: stay silent rather than mix logs into command output.
    tracing_subscriber::registry().with(env_filter).init();
}

fn open_kiln_log_file() -> (Option<(PathBuf, std::fs::File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in kiln_log_file_candidates() {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "Failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new()
            .create(true)
            .append(true)
            .open(&candidate)
        {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => {
                warnings.push(format!(
                    "Failed to open log file {}: {e}",
                    candidate.display()
                ));
            }
        }
    }

    (None, warnings)
}

fn kiln_log_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    // Primary: ~/.kiln/logs/kiln.log
    if let Some(config_path) = KilnConfig::path()
        && let Some(config_dir) = config_path.parent()
    {
        candidates.push(config_dir.join("logs").join("kiln.log"));
    }

    // Fallback: ./.kiln/logs/kiln.log
    candidates.push(PathBuf::from(".kiln").join("logs").join("kiln.log"));

    candidates
}

fn load_config() -> KilnConfig {
    let mut config = match KilnConfig::load() {
        Ok(Some(config)) => config,
        Ok(None) => KilnConfig::default(),
        Err(e) => {
            eprintln!("Ignoring config: {e}");
            KilnConfig::default()
        }
    };
    config.apply_env_overrides();
    config
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    let config = load_config();
    match cli.command.execute(&config).await {
        Ok(code) => code,
        Err(err) => {
            tracing::warn!("Command failed: {err:#}");
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
