//! Tally CLI
//!
//! Command-line interface for Tally - local-first task management.

use std::fs::File;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use tally_core::{Config, DatabaseError, HealthMonitor, LocalStore, SafeOperations};

mod commands;
mod output;

use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "tally")]
#[command(about = "Tally - Local-first task management")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage todos
    Todo {
        #[command(subcommand)]
        command: TodoCommands,
    },
    /// Check database health once
    Health,
    /// Watch database health until interrupted
    Watch {
        /// Seconds between probes (defaults to the configured interval)
        #[arg(short, long)]
        interval: Option<u64>,
    },
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand)]
enum TodoCommands {
    /// Create a new todo
    #[command(alias = "create")]
    Add {
        /// What needs doing
        title: String,
        /// Tags to add
        #[arg(short, long)]
        tag: Vec<String>,
    },
    /// List todos (open ones unless --done)
    #[command(alias = "ls")]
    List {
        /// Filter by tag
        #[arg(short, long)]
        tag: Option<String>,
        /// Show completed todos instead
        #[arg(long)]
        done: bool,
    },
    /// Mark a todo as done
    Done {
        /// Todo ID (full UUID or prefix)
        id: String,
    },
    /// Delete a todo
    #[command(alias = "delete")]
    Rm {
        /// Todo ID (full UUID or prefix)
        id: String,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (data_dir, sync_url, log_level, quota_bytes, ...)
        key: String,
        /// Configuration value
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));

    // Config commands work even when the config file is broken
    if let Commands::Config { command } = &cli.command {
        return match command.clone() {
            Some(ConfigCommands::Show) | None => commands::config::show(&output),
            Some(ConfigCommands::Set { key, value }) => {
                commands::config::set(key, value, &output)
            }
        };
    }

    let config = Config::load().context("Failed to load configuration")?;
    init_logging(&config);

    let result = run(cli.command, &config, &output).await;

    // Classified database errors get their own formatting
    if let Err(ref e) = result {
        if let Some(db_error) = e.downcast_ref::<DatabaseError>() {
            output.print_error(db_error);
            std::process::exit(1);
        }
    }
    result
}

async fn run(command: Commands, config: &Config, output: &Output) -> Result<()> {
    config.ensure_data_dir()?;
    let store = LocalStore::open(config).context("Failed to open local store")?;
    let ops = Arc::new(SafeOperations::new(Arc::new(store)));
    debug!("Opened store in {:?}", config.data_dir);

    match command {
        Commands::Todo { command } => {
            let ops = &*ops;
            match command {
                TodoCommands::Add { title, tag } => {
                    commands::todo::add(ops, title, tag, output).await
                }
                TodoCommands::List { tag, done } => {
                    commands::todo::list(ops, tag, done, output).await
                }
                TodoCommands::Done { id } => commands::todo::done(ops, id, output).await,
                TodoCommands::Rm { id } => commands::todo::remove(ops, id, output).await,
            }
        }
        Commands::Health => {
            let monitor = HealthMonitor::new(ops, config.health.clone());
            commands::health::check(&monitor, output).await
        }
        Commands::Watch { interval } => {
            let period = interval
                .map(Duration::from_secs)
                .unwrap_or_else(|| config.health.probe_interval());
            let monitor = HealthMonitor::with_probe_interval(ops, config.health.clone(), period);
            commands::health::watch(&monitor, output).await
        }
        Commands::Config { .. } => Ok(()), // Handled in main
    }
}

/// Set up tracing from `RUST_LOG`, or the configured level for tally crates
///
/// Logs go to `log_file` when configured, otherwise to stderr.
fn init_logging(config: &Config) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "tally_core={},tally_cli={}",
            config.log_level, config.log_level
        ))
    });

    if let Some(ref log_path) = config.log_file {
        match File::create(log_path) {
            Ok(log_file) => {
                let _ = tracing_subscriber::fmt()
                    .with_env_filter(env_filter)
                    .with_target(false)
                    .with_ansi(false)
                    .with_writer(log_file)
                    .try_init();
                return;
            }
            Err(e) => {
                eprintln!("Warning: Could not create log file {:?}: {}", log_path, e);
            }
        }
    }

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
