//! Build stage definitions and the stage plan derived from configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use pagesmith_core::BuildConfig;
use serde::{Deserialize, Serialize};

/// Builtin build stages, in execution order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinStage {
    /// git clone + detached checkout of the requested ref
    Checkout,

    /// rustup toolchain install <version> --profile minimal
    Toolchain,

    /// rustup target add --toolchain <version> <target>
    Target,

    /// The configured build command
    Build,

    /// Scan the declared output directory
    Collect,
}

impl BuiltinStage {
    /// Get the stage name as a string.
    pub fn name(&self) -> &'static str {
        match self {
            BuiltinStage::Checkout => "checkout",
            BuiltinStage::Toolchain => "toolchain",
            BuiltinStage::Target => "target",
            BuiltinStage::Build => "build",
            BuiltinStage::Collect => "collect",
        }
    }
}

/// Configuration for one build stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    /// Human-readable stage name.
    pub name: String,

    /// Command to execute (first element is executable).
    pub command: Vec<String>,

    /// Command run when `command` fails; the stage passes if this succeeds.
    /// Used to install a tool that failed its version check.
    pub fallback_command: Option<Vec<String>>,

    /// Extra environment for both commands.
    pub env: BTreeMap<String, String>,

    /// Working directory; inherits the caller's when unset.
    pub working_dir: Option<PathBuf>,

    /// Timeout in seconds (0 = unbounded).
    pub timeout_secs: u64,
}

impl StageConfig {
    /// Create a custom stage configuration.
    pub fn custom(name: impl Into<String>, command: Vec<String>, timeout_secs: u64) -> Self {
        Self {
            name: name.into(),
            command,
            fallback_command: None,
            env: BTreeMap::new(),
            working_dir: None,
            timeout_secs,
        }
    }

    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env.extend(env);
        self
    }

    pub fn with_fallback(mut self, command: Vec<String>) -> Self {
        self.fallback_command = Some(command);
        self
    }
}

fn strings<const N: usize>(parts: [&str; N]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

/// Toolchain, target, tool and build stages for a checkout at `checkout_dir`.
///
/// Checkout and collect are driven by the builder itself since they need
/// more than an exit status.
pub fn plan(build: &BuildConfig, checkout_dir: &Path) -> Vec<StageConfig> {
    let mut stages = Vec::new();
    let mut toolchain_env = BTreeMap::new();

    if let Some(version) = &build.toolchain {
        stages.push(StageConfig::custom(
            BuiltinStage::Toolchain.name(),
            strings(["rustup", "toolchain", "install", version.as_str(), "--profile", "minimal"]),
            build.timeout_secs,
        ));
        toolchain_env.insert("RUSTUP_TOOLCHAIN".to_string(), version.clone());
    }

    if let Some(target) = &build.target {
        let mut command = strings(["rustup", "target", "add"]);
        if let Some(version) = &build.toolchain {
            command.extend(strings(["--toolchain", version.as_str()]));
        }
        command.push(target.clone());
        stages.push(StageConfig::custom(
            BuiltinStage::Target.name(),
            command,
            build.timeout_secs,
        ));
    }

    for tool in &build.tools {
        let package = match &tool.version {
            Some(version) => format!("{}@{}", tool.name, version),
            None => tool.name.clone(),
        };
        stages.push(
            StageConfig::custom(
                format!("tool:{}", tool.name),
                strings([tool.name.as_str(), "--version"]),
                build.timeout_secs,
            )
            .with_fallback(strings(["cargo", "install", "--locked", package.as_str()]))
            .with_env(toolchain_env.clone()),
        );
    }

    let mut env = build.env.clone();
    env.extend(toolchain_env);
    stages.push(
        StageConfig::custom(
            BuiltinStage::Build.name(),
            build.command.clone(),
            build.timeout_secs,
        )
        .in_dir(checkout_dir.join(&build.working_dir))
        .with_env(env),
    );

    stages
}
