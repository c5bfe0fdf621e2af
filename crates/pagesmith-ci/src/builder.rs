//! Builder: checkout, toolchain, build command, artifact collection.

use std::path::PathBuf;

use pagesmith_core::{git, ArtifactSet, BuildConfig, BuildError, Config};
use tracing::info;

use crate::runner::{StageResult, StageRunner};
use crate::stage::{self, BuiltinStage, StageConfig};

/// A successful build.
#[derive(Debug)]
pub struct BuildOutput {
    pub artifacts: ArtifactSet,
    /// Commit that was actually checked out.
    pub resolved_sha: String,
    pub stages: Vec<StageResult>,
}

/// Turns a commit reference into an [`ArtifactSet`].
///
/// Every build runs in a fresh temporary checkout. On success the checkout
/// moves into the artifact set; on failure it is deleted before the error
/// is returned, so no partial output outlives a failed build.
#[derive(Debug, Clone)]
pub struct Builder {
    repository: String,
    build: BuildConfig,
    work_root: Option<PathBuf>,
}

impl Builder {
    pub fn new(repository: impl Into<String>, build: BuildConfig) -> Self {
        Self {
            repository: repository.into(),
            build,
            work_root: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.source.repository.clone(), config.build.clone())
    }

    /// Create checkouts under `dir` instead of the system temp directory.
    pub fn with_work_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_root = Some(dir.into());
        self
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// Check out `checkout_ref`, run the stage plan and collect the output.
    pub async fn build(&self, checkout_ref: &str) -> Result<BuildOutput, BuildError> {
        let checkout = BuiltinStage::Checkout.name();
        let workspace = self
            .create_workspace()
            .map_err(|e| BuildError::new(checkout, None, format!("failed to create workspace: {e}")))?;
        let checkout_dir = workspace.path().join("src");
        let mut results = Vec::new();

        info!(repository = %self.repository, git_ref = %checkout_ref, "Checking out");
        let clone = StageConfig::custom(
            checkout,
            git::clone_args(&self.repository, &checkout_dir),
            self.build.timeout_secs,
        );
        self.run_stage(&clone, &mut results).await?;

        let resolved_sha = {
            let dir = checkout_dir.clone();
            let git_ref = checkout_ref.to_string();
            tokio::task::spawn_blocking(move || git::resolve_commit(&dir, &git_ref))
                .await
                .map_err(|e| BuildError::new(checkout, None, e.to_string()))?
                .map_err(|e| BuildError::new(checkout, None, e.to_string()))?
        };

        let detach = StageConfig::custom(
            checkout,
            git::checkout_args(&checkout_dir, &resolved_sha),
            self.build.timeout_secs,
        );
        self.run_stage(&detach, &mut results).await?;

        for config in stage::plan(&self.build, &checkout_dir) {
            self.run_stage(&config, &mut results).await?;
        }

        let output_dir = checkout_dir
            .join(&self.build.working_dir)
            .join(&self.build.output_dir);
        let artifacts = ArtifactSet::collect(output_dir, Some(workspace))
            .map_err(|e| BuildError::new(BuiltinStage::Collect.name(), None, e.to_string()))?;

        info!(
            sha = %resolved_sha,
            files = artifacts.file_count(),
            bytes = artifacts.total_size(),
            "Build complete"
        );

        Ok(BuildOutput {
            artifacts,
            resolved_sha,
            stages: results,
        })
    }

    fn create_workspace(&self) -> std::io::Result<tempfile::TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("pagesmith-run-");
        match &self.work_root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)
            }
            None => builder.tempdir(),
        }
    }

    async fn run_stage(
        &self,
        config: &StageConfig,
        results: &mut Vec<StageResult>,
    ) -> Result<(), BuildError> {
        info!(stage = %config.name, "Executing stage");
        match StageRunner::execute_stage(config).await {
            Ok(result) => {
                pagesmith_core::obs::emit_stage_finished(
                    &result.stage_name,
                    result.exit_code,
                    result.duration_ms,
                    result.passed(),
                );
                if !result.passed() {
                    return Err(result.to_build_error());
                }
                results.push(result);
                Ok(())
            }
            Err(e) => {
                pagesmith_core::obs::emit_stage_finished(&config.name, None, 0, false);
                Err(BuildError::new(config.name.clone(), None, e.to_string()))
            }
        }
    }
}
