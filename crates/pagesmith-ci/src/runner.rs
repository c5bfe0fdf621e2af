//! Build stage execution.

use std::process::Stdio;
use std::time::{Duration, Instant};

use pagesmith_core::BuildError;
use tokio::process::Command;
use tracing::{debug, info};

use crate::stage::StageConfig;

/// Lines of stderr kept in a failure message.
const STDERR_TAIL_LINES: usize = 20;

/// Result of a stage execution.
#[derive(Debug, Clone)]
pub struct StageResult {
    /// Stage name.
    pub stage_name: String,

    /// Exit code; `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,

    /// Captured stdout.
    pub stdout: String,

    /// Captured stderr.
    pub stderr: String,

    /// Duration in milliseconds.
    pub duration_ms: u64,

    /// Whether execution succeeded.
    pub success: bool,
}

impl StageResult {
    /// Whether this stage passed (exit code 0).
    pub fn passed(&self) -> bool {
        self.success && self.exit_code == Some(0)
    }

    /// Convert a failed result into the error reported for the run.
    pub fn to_build_error(&self) -> BuildError {
        let tail = stderr_tail(&self.stderr);
        let message = if tail.is_empty() {
            format!("stage '{}' exited unsuccessfully", self.stage_name)
        } else {
            tail
        };
        BuildError::new(self.stage_name.clone(), self.exit_code, message)
    }
}

fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

/// Build stage runner.
pub struct StageRunner;

impl StageRunner {
    /// Execute a stage, falling back to its `fallback_command` when the
    /// primary command fails.
    ///
    /// Returns `Err` when a process could not be spawned or timed out; the
    /// caller reports those with no exit status.
    pub async fn execute_stage(config: &StageConfig) -> anyhow::Result<StageResult> {
        let first = Self::execute_command(config, &config.command).await;
        let fallback = match &config.fallback_command {
            Some(fallback) => fallback,
            None => return first,
        };

        let passed = match &first {
            Ok(result) => result.passed(),
            Err(e) => {
                debug!(stage = %config.name, error = %e, "Check could not run");
                false
            }
        };
        if passed {
            return first;
        }
        info!(stage = %config.name, command = ?fallback, "Running fallback command");
        Self::execute_command(config, fallback).await
    }

    async fn execute_command(config: &StageConfig, command: &[String]) -> anyhow::Result<StageResult> {
        let start = Instant::now();

        if command.is_empty() {
            anyhow::bail!("Stage {} has empty command", config.name);
        }

        let exe = &command[0];
        let args = &command[1..];

        let mut cmd = Command::new(exe);
        cmd.args(args)
            .envs(&config.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &config.working_dir {
            cmd.current_dir(dir);
        }

        let child = cmd
            .spawn()
            .map_err(|e| anyhow::anyhow!("Stage {} failed to spawn {}: {}", config.name, exe, e))?;

        // Dropping the future on timeout kills the child.
        let output = if config.timeout_secs > 0 {
            tokio::time::timeout(
                Duration::from_secs(config.timeout_secs),
                child.wait_with_output(),
            )
            .await
            .map_err(|_| {
                anyhow::anyhow!(
                    "Stage {} timed out after {} seconds",
                    config.name,
                    config.timeout_secs
                )
            })??
        } else {
            child.wait_with_output().await?
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        Ok(StageResult {
            stage_name: config.name.clone(),
            exit_code: output.status.code(),
            stdout,
            stderr,
            duration_ms,
            success: output.status.success(),
        })
    }
}
