//! pagesmith - build a static site from git and publish it to one live slot
//!
//! ## Commands
//!
//! - `run`: build a commit and publish it
//! - `status`: show the live bundle
//! - `history`: show every activation of the live slot
//! - `rollback`: repoint the live slot to the previous bundle
//! - `runs`: show finished runs
//! - `init`: write a default `pagesmith.toml`

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pagesmith_ci::{Builder, DeploymentSlot, Pipeline, Publisher, TriggerGate};
use pagesmith_core::{Config, Run, RunStatus, TriggerEvent, CONFIG_FILE, DEFAULT_CONFIG_TOML};
use pagesmith_state::{LiveRecord, RunLog, RunOutcome};
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "pagesmith")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Static-site build-and-publish pipeline", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Configuration file
    #[arg(short, long, global = true, env = "PAGESMITH_CONFIG", default_value = CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a commit and publish it to the live slot
    Run {
        /// Commit, tag or branch to build (default: tip of the branch)
        #[arg(short, long = "ref")]
        git_ref: Option<String>,

        /// Branch the event refers to (default: the configured branch)
        #[arg(short, long)]
        branch: Option<String>,

        /// Dispatch manually instead of simulating a push
        #[arg(long)]
        manual: bool,
    },

    /// Show the live bundle
    Status,

    /// Show live slot history, newest first
    History {
        /// Maximum number of entries to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Repoint the live slot to the previous bundle
    Rollback,

    /// Show finished runs, newest first
    Runs {
        /// Maximum number of runs to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Write a default configuration file
    Init {
        /// Directory to initialize (default: current directory)
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Overwrite an existing configuration file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    pagesmith_core::init_tracing(cli.json, level);

    if let Commands::Init { path, force } = &cli.command {
        return cmd_init(path, *force);
    }

    let config = Config::load_or_default(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;

    match cli.command {
        Commands::Run {
            git_ref,
            branch,
            manual,
        } => cmd_run(&config, git_ref, branch, manual).await,
        Commands::Status => cmd_status(&config).await,
        Commands::History { limit } => cmd_history(&config, limit).await,
        Commands::Rollback => cmd_rollback(&config).await,
        Commands::Runs { limit } => cmd_runs(&config, limit).await,
        Commands::Init { .. } => Ok(()),
    }
}

/// Write the default `pagesmith.toml` into `path`.
fn cmd_init(path: &Path, force: bool) -> Result<()> {
    std::fs::create_dir_all(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    let file = path.join(CONFIG_FILE);
    if file.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", file.display());
    }
    std::fs::write(&file, DEFAULT_CONFIG_TOML)
        .with_context(|| format!("Failed to write {}", file.display()))?;

    println!("Wrote {}", file.display());
    Ok(())
}

fn trigger_event(
    config: &Config,
    git_ref: Option<String>,
    branch: Option<String>,
    manual: bool,
) -> TriggerEvent {
    let branch = branch.unwrap_or_else(|| config.trigger.branch.clone());
    let git_ref = git_ref.unwrap_or_default();
    if manual {
        TriggerEvent::manual(branch, git_ref)
    } else {
        TriggerEvent::push(branch, git_ref)
    }
}

async fn cmd_run(
    config: &Config,
    git_ref: Option<String>,
    branch: Option<String>,
    manual: bool,
) -> Result<()> {
    // Runs in other processes are serialized by the slot's writer lock.
    let gate = TriggerGate::new(&config.trigger);
    let event = gate.check(trigger_event(config, git_ref, branch, manual))?;

    let target = config.open_target().context("Failed to open hosting target")?;
    let run_log = Arc::new(config.open_run_log().context("Failed to open run log")?);
    let pipeline = Pipeline::new(
        Builder::from_config(config),
        DeploymentSlot::new(target),
        run_log,
    );

    info!(branch = %event.branch, git_ref = %event.checkout_ref(), "Starting run");
    let run = pipeline.execute(&event).await;

    print_run(&run);
    match run.failure() {
        None => Ok(()),
        Some(failure) => anyhow::bail!("run failed at stage '{}'", failure.stage),
    }
}

fn print_run(run: &Run) {
    println!("Run ID: {}", run.run_id());
    println!("Trigger: {} {}", run.trigger(), run.commit_ref());
    if let Some(sha) = run.resolved_sha() {
        println!("Commit: {}", sha);
    }
    let status = match run.status() {
        RunStatus::Succeeded => "✓ SUCCEEDED",
        RunStatus::Failed => "✗ FAILED",
        other => other.as_str(),
    };
    println!("Status: {}", status);
    println!("Duration: {}ms", run.duration_ms());
    if let Some(url) = run.url() {
        println!("URL: {}", url);
    }
    if let Some(failure) = run.failure() {
        println!("Failed stage: {}", failure.stage);
        println!("Error: {}", failure.message);
    }
}

fn format_live(record: &LiveRecord) -> String {
    let mut line = format!(
        "{}  {}  {}",
        record.activated_at.format("%Y-%m-%d %H:%M:%S"),
        record.bundle_id.short(),
        record.url
    );
    if let Some(note) = &record.note {
        line.push_str(&format!("  ({})", note));
    }
    line
}

async fn cmd_status(config: &Config) -> Result<()> {
    let target = config.open_target()?;
    match Publisher::status(&*target).await? {
        Some(record) => {
            println!("Live bundle: {}", record.bundle_id);
            println!("URL: {}", record.url);
            println!("Activated: {}", record.activated_at);
            if let Some(note) = &record.note {
                println!("Note: {}", note);
            }
        }
        None => println!("Nothing published yet"),
    }
    Ok(())
}

async fn cmd_history(config: &Config, limit: usize) -> Result<()> {
    let target = config.open_target()?;
    let history = Publisher::history(&*target).await?;
    if history.is_empty() {
        println!("Nothing published yet");
        return Ok(());
    }
    for record in history.iter().take(limit) {
        println!("{}", format_live(record));
    }
    Ok(())
}

async fn cmd_rollback(config: &Config) -> Result<()> {
    let slot = DeploymentSlot::new(config.open_target()?);
    let guard = slot.acquire().await.context("Failed to lock the deployment slot")?;
    let publication = Publisher::rollback(&guard).await.context("rollback failed")?;

    println!("Rolled back -> {}", publication.bundle_id.short());
    println!("URL: {}", publication.url);
    Ok(())
}

async fn cmd_runs(config: &Config, limit: usize) -> Result<()> {
    let run_log = config.open_run_log()?;
    let records = run_log.list().await?;
    if records.is_empty() {
        println!("No runs recorded");
        return Ok(());
    }
    for record in records.iter().take(limit) {
        let (mark, detail) = match record.outcome {
            RunOutcome::Succeeded => ("✓", record.url.clone().unwrap_or_default()),
            RunOutcome::Failed => (
                "✗",
                format!(
                    "{}: {}",
                    record.failed_stage.as_deref().unwrap_or("unknown"),
                    record.error.as_deref().unwrap_or("")
                ),
            ),
        };
        let short_id: String = record.run_id.chars().take(8).collect();
        println!(
            "{} {}  {}  {} {}  {}",
            mark,
            record.finished_at.format("%Y-%m-%d %H:%M:%S"),
            short_id,
            record.trigger,
            record.commit_ref,
            detail
        );
    }
    Ok(())
}
