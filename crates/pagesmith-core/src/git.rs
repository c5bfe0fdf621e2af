//! Git helpers for checkouts.

use std::path::Path;
use std::process::Command;

use crate::domain::error::{PipelineError, Result};

/// Arguments for a quiet clone of `repository` into `dest`.
pub fn clone_args(repository: &str, dest: &Path) -> Vec<String> {
    vec![
        "git".to_string(),
        "clone".to_string(),
        "--quiet".to_string(),
        repository.to_string(),
        dest.to_string_lossy().into_owned(),
    ]
}

/// Resolve `git_ref` to a commit SHA inside a fresh clone.
///
/// Tries the ref as given, then as a remote-tracking branch `origin/<ref>`,
/// so branches other than the clone's default are usable without creating
/// local ones.
pub fn resolve_commit(repo_dir: &Path, git_ref: &str) -> Result<String> {
    for candidate in [git_ref.to_string(), format!("origin/{git_ref}")] {
        let output = Command::new("git")
            .args(["rev-parse", "--verify", "--quiet"])
            .arg(format!("{candidate}^{{commit}}"))
            .current_dir(repo_dir)
            .output()
            .map_err(|e| PipelineError::Git(format!("failed to run git: {e}")))?;
        if output.status.success() {
            let sha = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if !sha.is_empty() {
                return Ok(sha);
            }
        }
    }
    Err(PipelineError::Git(format!("unknown revision: {git_ref}")))
}

/// Arguments for a detached checkout of `commit` inside `repo_dir`.
pub fn checkout_args(repo_dir: &Path, commit: &str) -> Vec<String> {
    vec![
        "git".to_string(),
        "-C".to_string(),
        repo_dir.to_string_lossy().into_owned(),
        "checkout".to_string(),
        "--quiet".to_string(),
        "--detach".to_string(),
        commit.to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command as StdCommand;

    fn run_git(repo_dir: &Path, args: &[&str]) {
        let output = StdCommand::new("git")
            .args(args)
            .current_dir(repo_dir)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
    }

    fn make_git_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        run_git(dir.path(), &["init", "--quiet"]);
        run_git(dir.path(), &["checkout", "--quiet", "-b", "main"]);
        run_git(dir.path(), &["config", "user.name", "test-user"]);
        run_git(dir.path(), &["config", "user.email", "test@example.com"]);
        run_git(dir.path(), &["commit", "--allow-empty", "-m", "initial"]);
        dir
    }

    fn head_of(repo_dir: &Path) -> String {
        let output = StdCommand::new("git")
            .args(["rev-parse", "HEAD"])
            .current_dir(repo_dir)
            .output()
            .unwrap();
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }

    #[test]
    fn resolve_commit_finds_branches_and_rejects_unknown() {
        let repo = make_git_repo();
        let head = head_of(repo.path());
        assert_eq!(resolve_commit(repo.path(), "main").unwrap(), head);
        assert_eq!(resolve_commit(repo.path(), &head).unwrap(), head);
        assert!(matches!(
            resolve_commit(repo.path(), "no-such-branch"),
            Err(PipelineError::Git(_))
        ));
    }

    #[test]
    fn checkout_args_are_detached() {
        let args = checkout_args(Path::new("/tmp/w"), "abc123");
        assert_eq!(args[0], "git");
        assert!(args.contains(&"--detach".to_string()));
        assert_eq!(args.last().unwrap(), "abc123");
    }
}
