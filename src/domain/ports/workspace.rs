//! Workspace port - provisioning of isolated branch workspaces.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::domain::errors::DomainResult;

/// Creates and reclaims the branch workspace of each trial.
///
/// Only the supervisor calls this; workers never create or delete branches.
#[async_trait]
pub trait WorkspaceProvisioner: Send + Sync {
    /// Create `branch` from the repository's current HEAD and return the
    /// workspace path it is checked out in.
    async fn provision(&self, repo: &Path, branch: &str) -> DomainResult<PathBuf>;

    /// Remove the workspace and its branch.
    async fn reclaim(&self, repo: &Path, workspace: &Path, branch: &str) -> DomainResult<()>;
}
