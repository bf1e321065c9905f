//! Fieldbook CLI - operator tool for the offline sync engine.
//!
//! Inspects the pending push queue and pull cursors of a local
//! installation, and triggers pushes, pulls or the background scheduler.

use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use fieldbook_app::{AppConfig, Fieldbook};
use fieldbook_common::{EntityId, Timestamp};
use fieldbook_sync::{CursorKey, DrainReport, PullReport};

#[derive(Parser)]
#[command(name = "fieldbook")]
#[command(about = "Fieldbook - offline-first record sync")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Config file (default: <data dir>/fieldbook/config.json).
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the effective configuration.
    Config {
        /// Write it to the config file.
        #[arg(long)]
        write: bool,
    },

    /// List pending push operations.
    Queue,

    /// List pull cursors.
    Cursors {
        /// Forget all cursors so the next pull fetches full history.
        #[arg(long)]
        reset: bool,
    },

    /// Drain the push queue once.
    Push,

    /// Pull server changes.
    Pull {
        /// Entity type to pull (default: every configured target).
        #[arg(short, long)]
        entity: Option<String>,

        /// Parent record id scoping the pull.
        #[arg(short, long, requires = "entity")]
        scope: Option<String>,
    },

    /// Run the background scheduler until Ctrl-C.
    Run,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging; RUST_LOG takes precedence over --verbose.
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config_path = cli.config.unwrap_or_else(AppConfig::default_path);
    let config = AppConfig::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    match cli.command {
        Commands::Config { write } => cmd_config(&config, &config_path, write),
        Commands::Queue => cmd_queue(&config),
        Commands::Cursors { reset } => cmd_cursors(&config, reset),
        Commands::Push => cmd_push(&config).await,
        Commands::Pull { entity, scope } => cmd_pull(&config, entity, scope).await,
        Commands::Run => cmd_run(&config).await,
    }
}

fn open(config: &AppConfig) -> Result<Fieldbook> {
    Fieldbook::open(config).with_context(|| {
        format!(
            "Failed to open installation in {}",
            config.data_dir.display()
        )
    })
}

fn format_timestamp(ts: Timestamp) -> String {
    match Utc.timestamp_millis_opt(ts.as_millis()).single() {
        Some(at) => at.format("%Y-%m-%d %H:%M:%S%.3f UTC").to_string(),
        None => ts.to_string(),
    }
}

/// Show or write the configuration.
fn cmd_config(config: &AppConfig, path: &Path, write: bool) -> Result<()> {
    if write {
        config
            .save(path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("Config written to {}", path.display());
    }
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}

/// List pending operations in push order.
fn cmd_queue(config: &AppConfig) -> Result<()> {
    let app = open(config)?;
    let pending = app
        .engine()
        .queue()
        .get_all_pending()
        .context("Failed to read sync queue")?;

    if pending.is_empty() {
        println!("Queue is empty");
        return Ok(());
    }

    println!("{:<6} {:<8} {:<12} {:<38} STAMPED", "POS", "OP", "TYPE", "ID");
    for op in &pending {
        println!(
            "{:<6} {:<8} {:<12} {:<38} {}",
            op.id,
            op.operation.to_string(),
            op.entity_type_id,
            op.entity_id.to_string(),
            format_timestamp(op.stamped_at)
        );
    }
    println!("\n{} pending operation(s)", pending.len());
    Ok(())
}

/// List or reset pull cursors.
fn cmd_cursors(config: &AppConfig, reset: bool) -> Result<()> {
    let app = open(config)?;
    let cursors = app.puller().cursors();

    if reset {
        cursors.reset().context("Failed to reset cursors")?;
        println!("All pull cursors cleared");
        return Ok(());
    }

    let all = cursors.all().context("Failed to read cursors")?;
    if all.is_empty() {
        println!("No pulls recorded yet");
        return Ok(());
    }
    for (key, at) in all {
        println!("{:<40} {}", key.to_string(), format_timestamp(at));
    }
    Ok(())
}

fn print_drain(report: &DrainReport) {
    println!(
        "Applied: {}, discarded: {}, deferred: {}",
        report.applied, report.discarded, report.deferred
    );
    if let Some(halt) = &report.halted {
        match &halt.operation {
            Some(op) => println!("Halted at {}: {}", op, halt.error),
            None => println!("Halted: {}", halt.error),
        }
    }
}

/// Drain the queue once.
async fn cmd_push(config: &AppConfig) -> Result<()> {
    let app = open(config)?;
    info!("Pushing {} pending operation(s)", app.engine().queue().len()?);

    let report = app.engine().drain().await;
    print_drain(&report);
    println!("Status: {}", app.status());

    if !report.is_complete() {
        anyhow::bail!("Push did not complete");
    }
    Ok(())
}

fn print_pull(report: &PullReport) {
    println!(
        "{}: {} updated, {} deleted, {} skipped (since {})",
        report.key,
        report.stats.updated,
        report.stats.deleted,
        report.stats.skipped,
        format_timestamp(report.since)
    );
}

/// Pull one target or every configured target.
async fn cmd_pull(config: &AppConfig, entity: Option<String>, scope: Option<String>) -> Result<()> {
    let app = open(config)?;

    let keys = match entity {
        Some(entity) => {
            let key = match scope {
                Some(scope) => {
                    CursorKey::scoped(entity, EntityId::new(scope).context("Invalid scope id")?)
                }
                None => CursorKey::unscoped(entity),
            };
            vec![key]
        }
        None => config.pull_targets.clone(),
    };

    let mut failed = 0;
    for (key, result) in keys.iter().zip(app.puller().pull_all(&keys).await) {
        match result {
            Ok(report) => print_pull(&report),
            Err(e) => {
                failed += 1;
                println!("{}: failed: {}", key, e);
            }
        }
    }
    println!("Status: {}", app.status());

    if failed > 0 {
        anyhow::bail!("{} of {} pull(s) failed", failed, keys.len());
    }
    Ok(())
}

/// Run the scheduler until Ctrl-C.
async fn cmd_run(config: &AppConfig) -> Result<()> {
    let app = open(config)?;
    let (scheduler, handle) = app.scheduler(config);

    let mut status = app.engine().status().subscribe();
    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let snapshot = *status.borrow_and_update();
            info!("Sync status: {}", snapshot.status());
        }
    });

    let worker = tokio::spawn(handle.run());
    println!("Scheduler running, press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    info!("Stopping scheduler");
    scheduler.cancel();
    if let Err(e) = worker.await {
        warn!("Scheduler task ended abnormally: {}", e);
    }
    Ok(())
}
