//! Pipeline configuration (`pagesmith.toml`).
//!
//! Every section is optional; an absent file yields [`Config::default`],
//! which builds a Trunk/WebAssembly front-end from `main` and publishes it to
//! a local directory. A handful of `PAGESMITH_*` environment variables
//! override file values.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use pagesmith_state::{FsHostingTarget, FsRunLog, HostingTarget, HttpHostingTarget};
use serde::{Deserialize, Serialize};

use crate::domain::error::{PipelineError, Result};

/// Default config file name, looked up in the current directory.
pub const CONFIG_FILE: &str = "pagesmith.toml";

/// Template written by `pagesmith init`.
pub const DEFAULT_CONFIG_TOML: &str = r#"# pagesmith configuration

[trigger]
# Pushes to this branch are deployed.
branch = "main"
# Accept manual dispatches.
allow_manual = true

[source]
# Git URL or local path cloned for every run.
repository = "."

[build]
toolchain = "stable"
target = "wasm32-unknown-unknown"
# Relative to the checkout.
working_dir = "."
# Relative to working_dir.
output_dir = "dist"
command = ["trunk", "build", "--release"]
# 0 = no limit.
timeout_secs = 0

[[build.tools]]
name = "trunk"

[build.env]

[publish]
# "fs" publishes into `root`; "http" talks to `endpoint`.
backend = "fs"
root = ".pagesmith/site"

[state]
dir = ".pagesmith"
"#;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub trigger: TriggerConfig,
    pub source: SourceConfig,
    pub build: BuildConfig,
    pub publish: PublishConfig,
    pub state: StateConfig,
}

/// Which events may start a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TriggerConfig {
    pub branch: String,
    pub allow_manual: bool,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            branch: "main".to_string(),
            allow_manual: true,
        }
    }
}

/// Where the checkout comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SourceConfig {
    pub repository: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            repository: ".".to_string(),
        }
    }
}

/// An auxiliary command-line tool the build needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Toolchain and build command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildConfig {
    /// Pinned rustup toolchain; `None` uses whatever is active.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub toolchain: Option<String>,
    /// Compilation target to install; `None` skips the target stage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub tools: Vec<ToolSpec>,
    pub working_dir: PathBuf,
    pub output_dir: PathBuf,
    pub command: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub timeout_secs: u64,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            toolchain: Some("stable".to_string()),
            target: Some("wasm32-unknown-unknown".to_string()),
            tools: vec![ToolSpec {
                name: "trunk".to_string(),
                version: None,
            }],
            working_dir: PathBuf::from("."),
            output_dir: PathBuf::from("dist"),
            command: vec!["trunk".into(), "build".into(), "--release".into()],
            env: BTreeMap::new(),
            timeout_secs: 0,
        }
    }
}

/// Hosting backend selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishBackend {
    Fs,
    Http,
}

/// Where the built site goes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PublishConfig {
    pub backend: PublishBackend,
    /// Root directory of the `fs` backend.
    pub root: PathBuf,
    /// Base URL of the `http` backend.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// URL reported for the `fs` backend.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_url: Option<String>,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            backend: PublishBackend::Fs,
            root: PathBuf::from(".pagesmith/site"),
            endpoint: None,
            public_url: None,
        }
    }
}

/// Local bookkeeping (run log).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StateConfig {
    pub dir: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".pagesmith"),
        }
    }
}

impl Config {
    /// Parse and validate a TOML document.
    pub fn from_toml(text: &str) -> Result<Self> {
        let config = Self::parse(text)?;
        config.validate()?;
        Ok(config)
    }

    fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| PipelineError::Config(e.to_string()))
    }

    fn read(path: &Path) -> Result<String> {
        std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("failed to read {}: {}", path.display(), e))
        })
    }

    /// Load `path`, failing if it does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        Self::from_toml(&Self::read(path)?)
    }

    /// Load `path` if present (defaults otherwise), then apply environment
    /// overrides and validate.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        Self::load_with_overrides(path, |key| std::env::var(key).ok())
    }

    /// Like [`Config::load_or_default`], reading overrides from `lookup`.
    ///
    /// Validation runs once, after the overrides, so a file may leave a
    /// required value to the environment.
    pub fn load_with_overrides<F>(path: &Path, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = if path.exists() {
            Self::parse(&Self::read(path)?)?
        } else {
            Self::default()
        };
        config.apply_overrides(lookup);
        config.validate()?;
        Ok(config)
    }

    /// Apply `PAGESMITH_*` overrides from `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(branch) = lookup("PAGESMITH_BRANCH") {
            self.trigger.branch = branch;
        }
        if let Some(repo) = lookup("PAGESMITH_REPOSITORY") {
            self.source.repository = repo;
        }
        if let Some(root) = lookup("PAGESMITH_PUBLISH_ROOT") {
            self.publish.root = PathBuf::from(root);
        }
        if let Some(url) = lookup("PAGESMITH_PUBLIC_URL") {
            self.publish.public_url = Some(url);
        }
        if let Some(endpoint) = lookup("PAGESMITH_ENDPOINT") {
            self.publish.endpoint = Some(endpoint);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.trigger.branch.trim().is_empty() {
            return Err(PipelineError::Config("trigger.branch is empty".to_string()));
        }
        if self.source.repository.trim().is_empty() {
            return Err(PipelineError::Config("source.repository is empty".to_string()));
        }
        if self.build.command.is_empty() || self.build.command[0].trim().is_empty() {
            return Err(PipelineError::Config("build.command is empty".to_string()));
        }
        if self.build.tools.iter().any(|t| t.name.trim().is_empty()) {
            return Err(PipelineError::Config("build.tools entry has no name".to_string()));
        }
        check_relative("build.working_dir", &self.build.working_dir)?;
        check_relative("build.output_dir", &self.build.output_dir)?;
        if self.publish.backend == PublishBackend::Http
            && self.publish.endpoint.as_deref().map_or(true, |e| e.trim().is_empty())
        {
            return Err(PipelineError::Config(
                "publish.endpoint is required for the http backend".to_string(),
            ));
        }
        Ok(())
    }

    /// Open the configured hosting target.
    pub fn open_target(&self) -> Result<Arc<dyn HostingTarget>> {
        match self.publish.backend {
            PublishBackend::Fs => Ok(Arc::new(FsHostingTarget::new(
                &self.publish.root,
                self.publish.public_url.clone(),
            )?)),
            PublishBackend::Http => {
                let endpoint = self.publish.endpoint.as_deref().ok_or_else(|| {
                    PipelineError::Config("publish.endpoint is not set".to_string())
                })?;
                Ok(Arc::new(HttpHostingTarget::new(endpoint)?))
            }
        }
    }

    /// Open the run log under `state.dir`.
    pub fn open_run_log(&self) -> Result<FsRunLog> {
        Ok(FsRunLog::new(&self.state.dir)?)
    }
}

fn check_relative(field: &str, path: &Path) -> Result<()> {
    let escapes = path
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)));
    if escapes {
        return Err(PipelineError::Config(format!(
            "{field} must be a relative path inside the checkout: {}",
            path.display()
        )));
    }
    Ok(())
}
