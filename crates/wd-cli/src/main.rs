//! Entry point for the `adwatchd` daemon.
//!
//! `adwatchd` watches directory trees and bumps the `[General] Version` key
//! of each tree's `gpt.ini` once a burst of changes has settled, so that
//! clients polling the version know to refresh their copy.
//!
//! # Usage
//!
//! ```bash
//! adwatchd [OPTIONS] <COMMAND>
//!
//! # Watch the directories listed in a configuration file
//! adwatchd run --config /etc/adwatchd.json
//!
//! # Watch explicit directories with a 5 second grace period
//! adwatchd run -d /srv/sysvol/example.com/Policies --grace-period-ms 5000
//!
//! # Print the effective configuration
//! adwatchd check --config /etc/adwatchd.json
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

mod reload;

use std::io::Write;
use std::sync::Arc;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use tracing::{info, info_span, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use wd_core::Config;
use wd_watcher::WatchController;

use crate::reload::{ConfigReloader, RELOAD_DEBOUNCE};

// =============================================================================
// CLI ARGUMENT TYPES
// =============================================================================

/// Watches directory trees and bumps a per-tree version counter on change.
#[derive(Parser)]
#[command(name = "adwatchd", version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Command to execute.
    #[command(subcommand)]
    command: Commands,

    /// Path to the JSON configuration file.
    #[arg(short, long, global = true, env = "ADWATCHD_CONFIG")]
    config: Option<Utf8PathBuf>,

    /// Increase log verbosity (-v for debug, -vv for trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Watch the configured directories until interrupted.
    Run(Overrides),

    /// Validate the configuration and print it as JSON.
    Check(Overrides),
}

/// Command-line values that take precedence over the configuration file.
#[derive(Args, Clone, Default)]
struct Overrides {
    /// Directory to watch (repeatable). Replaces the configured list.
    #[arg(short = 'd', long = "dir", value_name = "DIR")]
    dirs: Vec<Utf8PathBuf>,

    /// Quiet period after the last change before bumping, in milliseconds.
    #[arg(long, value_name = "MS")]
    grace_period_ms: Option<u64>,
}

impl Commands {
    const fn overrides(&self) -> &Overrides {
        match self {
            Self::Run(overrides) | Self::Check(overrides) => overrides,
        }
    }
}

// =============================================================================
// INITIALIZATION FUNCTIONS
// =============================================================================

/// Initializes the tracing subscriber for logging.
///
/// Respects the `RUST_LOG` environment variable if set. Otherwise uses
/// `info`, `debug` with one `-v`, or `trace` with more. `notify` is kept at
/// `warn`.
fn init_tracing(verbose: u8, no_color: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };
        EnvFilter::new(format!("{level},notify=warn,mio=warn"))
    });

    // Check if colors should be disabled (flag or NO_COLOR env var)
    let use_ansi = !no_color && std::env::var("NO_COLOR").is_err();

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_ansi(use_ansi))
        .with(filter)
        .init();
}

/// Builds the effective [`Config`] from the configuration file and overrides.
///
/// # Errors
///
/// Returns an error if the file cannot be loaded or the result is invalid.
fn build_config(path: Option<&Utf8PathBuf>, overrides: &Overrides) -> color_eyre::Result<Config> {
    let mut config = match path {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    if !overrides.dirs.is_empty() {
        config.watch.dirs.clone_from(&overrides.dirs);
    }
    if let Some(grace_period_ms) = overrides.grace_period_ms {
        config.watch.grace_period_ms = grace_period_ms;
    }
    config.watch.dirs = config.watch.unique_dirs();

    config.validate()?;
    Ok(config)
}

// =============================================================================
// COMMAND IMPLEMENTATIONS
// =============================================================================

/// Runs the daemon until Ctrl-C or SIGTERM.
///
/// # Errors
///
/// Returns an error if the watcher cannot start or stop cleanly.
async fn run_daemon(
    config: Config,
    config_path: Option<Utf8PathBuf>,
    dirs_overridden: bool,
) -> color_eyre::Result<()> {
    let controller = Arc::new(WatchController::new(info_span!("adwatchd")));
    controller
        .start(&config.watch.dirs, config.watch.grace_period())
        .await?;

    let reloader = match config_path {
        Some(_) if dirs_overridden => {
            info!("Directories given on the command line, configuration reload disabled");
            None
        }
        Some(path) => match ConfigReloader::spawn(&path, Arc::clone(&controller), RELOAD_DEBOUNCE) {
            Ok(reloader) => Some(reloader),
            Err(err) => {
                warn!(path = %path, error = %err, "Configuration reload unavailable");
                None
            }
        },
        None => None,
    };

    wait_for_shutdown().await?;

    if let Some(reloader) = reloader {
        reloader.shutdown().await;
    }
    controller.stop().await?;
    Ok(())
}

/// Waits for Ctrl-C, or SIGTERM on Unix.
async fn wait_for_shutdown() -> color_eyre::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                info!("Received Ctrl-C, shutting down");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl-C, shutting down");
    }

    Ok(())
}

/// Prints the effective configuration as JSON.
fn run_check(config: &Config) -> color_eyre::Result<()> {
    let json = serde_json::to_string_pretty(config)
        .map_err(|e| color_eyre::eyre::eyre!("Failed to serialize configuration: {}", e))?;

    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    writeln!(handle, "{json}")?;
    Ok(())
}

// =============================================================================
// MAIN ENTRY POINT
// =============================================================================

/// Application entry point.
#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    // 1. Install color-eyre FIRST (before any potential panics)
    color_eyre::install()?;

    // 2. Parse CLI arguments
    let cli = Cli::parse();

    // 3. Build the effective configuration
    let overrides = cli.command.overrides();
    let config = build_config(cli.config.as_ref(), overrides)?;

    // 4. Initialize tracing (flag and configuration verbosity, whichever is higher)
    init_tracing(cli.verbose.max(config.verbose), cli.no_color);

    // 5. Route to appropriate command
    match &cli.command {
        Commands::Run(overrides) => {
            run_daemon(config, cli.config.clone(), !overrides.dirs.is_empty()).await
        }
        Commands::Check(_) => run_check(&config),
    }
}
