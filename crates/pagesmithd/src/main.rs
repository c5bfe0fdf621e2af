//! pagesmithd - long-running dispatcher.
//!
//! Reads newline-delimited JSON trigger events on stdin, e.g.
//! `{"kind":"push","ref":"3f2c...","branch":"main"}`, and runs admitted
//! events one at a time. Each finished run is written to stdout as one JSON
//! line. On EOF (or Ctrl-C) no new events are read, but everything already
//! admitted or queued still runs before the process exits.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use pagesmith_ci::{Builder, DeploymentSlot, Dispatcher, GateDecision, Pipeline, TriggerGate};
use pagesmith_core::{Config, Run, TriggerEvent, CONFIG_FILE};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "pagesmithd")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "pagesmith dispatcher: trigger events on stdin, runs on stdout", long_about = None)]
struct Args {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json: bool,

    /// Configuration file
    #[arg(short, long, env = "PAGESMITH_CONFIG", default_value = CONFIG_FILE)]
    config: PathBuf,
}

/// Counts of gate decisions made while reading input.
#[derive(Debug, Default, PartialEq, Eq)]
struct Intake {
    admitted: usize,
    queued: usize,
    rejected: usize,
    malformed: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    pagesmith_core::init_tracing(args.json, level);

    let config = Config::load_or_default(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;
    let pipeline = Arc::new(Pipeline::new(
        Builder::from_config(&config),
        DeploymentSlot::new(config.open_target().context("Failed to open hosting target")?),
        Arc::new(config.open_run_log().context("Failed to open run log")?),
    ));
    let gate = Arc::new(TriggerGate::new(&config.trigger));

    info!(
        version = pagesmith_core::VERSION,
        branch = %gate.branch(),
        repository = %config.source.repository,
        "pagesmithd started"
    );

    let (dispatcher, finished) = Dispatcher::spawn(gate, pipeline);
    let reporter = tokio::spawn(report_runs(finished));

    let mut intake = Intake::default();
    tokio::select! {
        read = read_events(BufReader::new(tokio::io::stdin()), &dispatcher, &mut intake) => read?,
        _ = tokio::signal::ctrl_c() => info!("Interrupted; no new events will be read"),
    }

    info!(pending = dispatcher.pending(), "Input closed, draining queue");
    dispatcher.drain().await?;
    reporter.await?;
    info!(?intake, "pagesmithd stopped");
    Ok(())
}

/// Submit every event line from `reader` until EOF, counting decisions in
/// `intake` as they are made.
async fn read_events<R>(reader: R, dispatcher: &Dispatcher, intake: &mut Intake) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let event: TriggerEvent = match serde_json::from_str(line) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Ignoring malformed event");
                intake.malformed += 1;
                continue;
            }
        };

        match dispatcher.submit(event) {
            GateDecision::Admit(event) => {
                info!(git_ref = %event.checkout_ref(), "Run admitted");
                intake.admitted += 1;
            }
            GateDecision::Queued { position } => {
                info!(position, "Run queued");
                intake.queued += 1;
            }
            GateDecision::Reject(err) => {
                info!(reason = %err, "Event rejected");
                intake.rejected += 1;
            }
        }
    }
    Ok(())
}

/// Print each finished run as a JSON line.
async fn report_runs(mut finished: tokio::sync::mpsc::UnboundedReceiver<Run>) {
    while let Some(run) = finished.recv().await {
        let Some(record) = run.to_record() else {
            continue;
        };
        match serde_json::to_string(&record) {
            Ok(line) => println!("{}", line),
            Err(e) => warn!(error = %e, "Failed to serialize run record"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagesmith_core::{BuildConfig, TriggerConfig};
    use pagesmith_state::fakes::{MemoryHostingTarget, MemoryRunLog};
    use pagesmith_state::{RunLog, RunOutcome};
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    /// Dispatcher whose runs all fail at checkout: no repository exists.
    fn failing_dispatcher(dir: &std::path::Path, run_log: Arc<MemoryRunLog>) -> Dispatcher {
        let pipeline = Arc::new(Pipeline::new(
            Builder::new(dir.join("missing").to_string_lossy().into_owned(), BuildConfig::default())
                .with_work_root(dir.join("work")),
            DeploymentSlot::new(Arc::new(MemoryHostingTarget::new())),
            run_log,
        ));
        let gate = Arc::new(TriggerGate::new(&TriggerConfig::default()));
        Dispatcher::spawn(gate, pipeline).0
    }

    #[tokio::test]
    async fn test_reads_events_and_drains_queue() {
        let dir = tempfile::tempdir().unwrap();
        let run_log = Arc::new(MemoryRunLog::new());
        let dispatcher = failing_dispatcher(dir.path(), run_log.clone());

        let input = concat!(
            "{\"kind\":\"push\",\"ref\":\"a1\",\"branch\":\"main\"}\n",
            "\n",
            "not json\n",
            "{\"kind\":\"push\",\"ref\":\"b2\",\"branch\":\"feature\"}\n",
            "{\"kind\":\"tag\",\"ref\":\"v1\",\"branch\":\"main\"}\n",
            "{\"kind\":\"manual\",\"branch\":\"main\"}\n",
        );
        let mut intake = Intake::default();
        read_events(BufReader::new(input.as_bytes()), &dispatcher, &mut intake)
            .await
            .unwrap();

        assert_eq!(intake.malformed, 1);
        assert_eq!(intake.rejected, 2);
        assert_eq!(intake.admitted + intake.queued, 2);

        dispatcher.drain().await.unwrap();
        let records = run_log.list().await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.outcome == RunOutcome::Failed));
        assert!(records
            .iter()
            .all(|r| r.failed_stage.as_deref() == Some("checkout")));
        // Newest first: the manual run ran second.
        assert_eq!(records[0].trigger, "manual");
    }

    #[tokio::test]
    async fn test_interrupted_read_keeps_counts() {
        let dir = tempfile::tempdir().unwrap();
        let run_log = Arc::new(MemoryRunLog::new());
        let dispatcher = failing_dispatcher(dir.path(), run_log.clone());

        // The writer stays open, so the reader never sees EOF.
        let (mut writer, reader) = tokio::io::duplex(1024);
        writer
            .write_all(b"{\"kind\":\"push\",\"ref\":\"a1\",\"branch\":\"main\"}\nnot json\n")
            .await
            .unwrap();

        let mut intake = Intake::default();
        tokio::select! {
            read = read_events(BufReader::new(reader), &dispatcher, &mut intake) => read.unwrap(),
            _ = tokio::time::sleep(Duration::from_millis(200)) => {}
        }

        assert_eq!(intake.admitted, 1);
        assert_eq!(intake.malformed, 1);
        dispatcher.drain().await.unwrap();
        assert_eq!(run_log.list().await.unwrap().len(), 1);
        drop(writer);
    }
}
