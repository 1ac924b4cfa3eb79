//! Git worktree provisioning.
//!
//! Every trial gets its own worktree on its own branch, created from the
//! repository's current HEAD, so concurrent trials never share a checkout.
//!
//! # Layout
//!
//! - Worktree path: `<data_root>/worktrees/<project_id>/<branch>`
//! - Branch: whatever the supervisor named it (`debug-<session>-<n>-<ms>`)

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, error, info, instrument, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::project_id;
use crate::domain::ports::WorkspaceProvisioner;

/// Provisions trial workspaces as git worktrees of the investigated repository.
#[derive(Debug, Clone)]
pub struct GitWorktreeProvisioner {
    root: PathBuf,
}

impl GitWorktreeProvisioner {
    /// `data_root` is the directory that holds the memory bank; worktrees
    /// live under its `worktrees/` subdirectory.
    pub fn new(data_root: impl AsRef<Path>) -> Self {
        Self {
            root: data_root.as_ref().join("worktrees"),
        }
    }

    /// Where the worktree for `branch` of `repo` is placed.
    pub fn workspace_path(&self, repo: &Path, branch: &str) -> DomainResult<PathBuf> {
        let path = self.root.join(project_id(repo)).join(branch);
        std::path::absolute(&path).map_err(|e| {
            DomainError::Workspace(format!("cannot resolve {}: {e}", path.display()))
        })
    }

    async fn branch_exists(repo: &Path, branch: &str) -> bool {
        Command::new("git")
            .arg("-C")
            .arg(repo)
            .args(["show-ref", "--verify", "--quiet", &format!("refs/heads/{branch}")])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    async fn git(repo: &Path, args: &[&str]) -> DomainResult<std::process::Output> {
        Command::new("git")
            .arg("-C")
            .arg(repo)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| DomainError::Workspace(format!("failed to run git {}: {e}", args.join(" "))))
    }
}

#[async_trait]
impl WorkspaceProvisioner for GitWorktreeProvisioner {
    #[instrument(skip(self), fields(repo = %repo.display()))]
    async fn provision(&self, repo: &Path, branch: &str) -> DomainResult<PathBuf> {
        let workspace = self.workspace_path(repo, branch)?;

        if Self::branch_exists(repo, branch).await {
            return Err(DomainError::Workspace(format!(
                "branch '{branch}' already exists"
            )));
        }
        if workspace.exists() {
            warn!(workspace = %workspace.display(), "Removing stale workspace directory");
            tokio::fs::remove_dir_all(&workspace).await?;
        }
        if let Some(parent) = workspace.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let path = workspace.to_string_lossy();
        let output = Self::git(repo, &["worktree", "add", "-b", branch, &path, "HEAD"]).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!(
                branch = %branch,
                workspace = %workspace.display(),
                stderr = %stderr.trim(),
                "Failed to create git worktree"
            );
            return Err(DomainError::Workspace(format!(
                "git worktree add failed: {}",
                stderr.trim()
            )));
        }

        info!(branch = %branch, workspace = %workspace.display(), "Trial workspace provisioned");
        Ok(workspace)
    }

    #[instrument(skip(self), fields(repo = %repo.display()))]
    async fn reclaim(&self, repo: &Path, workspace: &Path, branch: &str) -> DomainResult<()> {
        if workspace.exists() {
            let path = workspace.to_string_lossy();
            let output = Self::git(repo, &["worktree", "remove", "--force", &path]).await?;
            if !output.status.success() {
                warn!(
                    workspace = %workspace.display(),
                    stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                    "git worktree remove failed, deleting directory"
                );
                tokio::fs::remove_dir_all(workspace).await?;
            }
        }

        let prune = Self::git(repo, &["worktree", "prune"]).await?;
        if !prune.status.success() {
            debug!(
                stderr = %String::from_utf8_lossy(&prune.stderr).trim(),
                "git worktree prune failed"
            );
        }

        if Self::branch_exists(repo, branch).await {
            let output = Self::git(repo, &["branch", "-D", branch]).await?;
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(DomainError::Workspace(format!(
                    "failed to delete branch '{branch}': {}",
                    stderr.trim()
                )));
            }
        }

        info!(branch = %branch, "Trial workspace reclaimed");
        Ok(())
    }
}
