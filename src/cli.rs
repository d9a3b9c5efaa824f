//! CLI parsing and command execution
//!
//! The CLI is the trigger around the rotation engine: it runs rotations on demand or on a
//! schedule, keeps the last-rotation record, and shows what is currently configured.

use anyhow::{Context, Result};
use chrono::{Local, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::rewriter::ConfigRewriter;
use crate::rotation::{RotationResult, Rotator};
use crate::schedule::ScheduleState;

/// Longest sleep between due-checks in `run`
const MAX_CHECK_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[derive(Parser)]
#[command(name = "wpsr")]
#[command(about = "Rotate WordPress keys and salts in wp-config.php", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "WPSR_CONFIG")]
    pub config: Option<PathBuf>,

    /// wp-config.php to rotate (tried before the configured candidates)
    #[arg(long)]
    pub wp_config: Option<PathBuf>,

    /// Salt API URL (overrides config file)
    #[arg(long)]
    pub api_url: Option<String>,

    /// Where the last-rotation record is kept (overrides config file)
    #[arg(long)]
    pub state_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a sample configuration file
    Init {
        /// Output path for the configuration file
        #[arg(short, long, default_value = "wpsr.toml")]
        output: PathBuf,
    },

    /// Rotate keys and salts now
    Rotate {
        /// Fetch new salts and show what would change without writing
        #[arg(long)]
        dry_run: bool,
    },

    /// Show the keys and salts currently in wp-config.php
    Show,

    /// Show the last rotation and when the next one is due
    Status,

    /// Rotate on schedule until interrupted
    Run {
        /// Check once, rotate if due, and exit
        #[arg(long)]
        once: bool,
    },
}

/// Execute a CLI command
pub async fn execute(cli: Cli) -> Result<()> {
    // Handle init command separately as it doesn't need a loaded config
    if let Commands::Init { output } = cli.command {
        Config::create_sample(&output)
            .with_context(|| format!("Failed to create sample config at {:?}", output))?;
        info!("Sample configuration created at {:?}", output);
        return Ok(());
    }

    let mut config = if let Some(ref config_path) = cli.config {
        Config::from_file(config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path))?
    } else {
        Config::from_env().context("Failed to load config from environment")?
    };

    if let Some(wp_config) = cli.wp_config {
        config.target.candidates.retain(|p| p != &wp_config);
        config.target.candidates.insert(0, wp_config);
    }
    if let Some(url) = cli.api_url {
        config.source.url = url;
    }
    if let Some(state_file) = cli.state_file {
        config.schedule.state_file = state_file;
    }

    match cli.command {
        Commands::Init { .. } => unreachable!(), // Handled above

        Commands::Rotate { dry_run: true } => {
            let rotator = Rotator::from_config(&config).context("Failed to set up rotation")?;
            let (path, plan) = rotator
                .preview()
                .await
                .context("Dry run failed")?;

            println!("[DRY RUN] Fetched salts from {}", config.source.url);
            println!("[DRY RUN] Would update {}", path.display());
            for key in &plan.replaced {
                println!("  [DRY RUN] Would replace {}", key);
            }
            for key in &plan.inserted {
                println!("  [DRY RUN] Would insert {}", key);
            }
        }

        Commands::Rotate { dry_run: false } => {
            let result = rotate_and_record(&config).await?;
            print_result(&result);
            if !result.is_success() {
                anyhow::bail!(
                    "Rotation failed: {}",
                    result.error.as_deref().unwrap_or("unknown error")
                );
            }
            println!("⚠️  All logged-in users have been signed out and must log in again.");
        }

        Commands::Show => {
            let rewriter = ConfigRewriter::from_config(&config.target);
            let current = rewriter
                .read_current()
                .context("Failed to read current keys and salts")?;

            eprintln!("⚠️  WARNING: Secret values will be displayed. Ensure this output is secured.");
            println!("Keys and salts in {}:", current.config_path.display());
            for (key, value) in &current.values {
                match value {
                    Some(value) => println!("  {:<16}  {}", key.as_str(), value),
                    None => println!("  {:<16}  (not defined)", key.as_str()),
                }
            }
            eprintln!("⚠️  Please clear your terminal history after viewing.");
        }

        Commands::Status => {
            let state = ScheduleState::load(&config.schedule.state_file)?;
            match state.last_attempt {
                Some(ref last) => {
                    println!("Last rotation:");
                    print_result(last);
                }
                None => println!("No rotation recorded yet."),
            }
            if let Some(success) = state.last_success {
                println!(
                    "Last successful rotation: {}",
                    success.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
                );
            }
            match state.next_due(&config.schedule) {
                Some(due) if due > Utc::now() => {
                    println!("Next rotation due: {}", due.format("%Y-%m-%d %H:%M:%S UTC"))
                }
                _ => println!("Next rotation due: now"),
            }
        }

        Commands::Run { once } => run_schedule(&config, once).await?,
    }

    Ok(())
}

/// Rotate once and persist the result as the last-rotation record
async fn rotate_and_record(config: &Config) -> Result<RotationResult> {
    let result = match Rotator::from_config(config) {
        Ok(rotator) => rotator.rotate().await,
        Err(e) => {
            error!("Cannot start rotation: {}", e);
            RotationResult::failure(&e)
        }
    };

    let state_file = &config.schedule.state_file;
    let mut state = ScheduleState::load(state_file)?;
    state.record(&result);
    state
        .save(state_file)
        .with_context(|| format!("Rotation finished but the result could not be recorded in {:?}", state_file))?;

    Ok(result)
}

async fn run_schedule(config: &Config, once: bool) -> Result<()> {
    info!(
        "Rotating every {} day(s), retrying failures after {} minute(s)",
        config.schedule.interval_days, config.schedule.retry_minutes
    );

    loop {
        let state = ScheduleState::load(&config.schedule.state_file)?;
        let state = if state.is_due(&config.schedule, Utc::now()) {
            let result = rotate_and_record(config).await?;
            if result.is_success() {
                println!("✓ Rotated salts at {}", result.timestamp.with_timezone(&Local));
            } else {
                eprintln!(
                    "✗ Rotation failed: {}",
                    result.error.as_deref().unwrap_or("unknown error")
                );
            }
            ScheduleState::load(&config.schedule.state_file)?
        } else {
            state
        };

        if once {
            return Ok(());
        }

        let wait = state
            .next_due(&config.schedule)
            .and_then(|due| (due - Utc::now()).to_std().ok())
            .unwrap_or(Duration::ZERO)
            .min(MAX_CHECK_INTERVAL)
            .max(Duration::from_secs(1));

        info!("Next check in {}s", wait.as_secs());
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted, stopping scheduler");
                return Ok(());
            }
        }
    }
}

fn print_result(result: &RotationResult) {
    println!(
        "  Time:   {}",
        result
            .timestamp
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S")
    );
    println!(
        "  Status: {}",
        if result.is_success() { "success" } else { "failed" }
    );
    if let Some(ref path) = result.config_path {
        println!("  File:   {}", path.display());
    }
    if let Some(ref backup) = result.backup_path {
        println!("  Backup: {}", backup.display());
    }
    if !result.inserted.is_empty() {
        let names: Vec<&str> = result.inserted.iter().map(|k| k.as_str()).collect();
        println!("  Inserted: {}", names.join(", "));
    }
    if let Some(ref error) = result.error {
        println!("  Error:  {}", error);
    }
}
