//! Version-control capability: `git` subcommands run inside a workspace.

use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use crate::domain::errors::CapabilityError;
use crate::domain::models::GitOperation;

/// Identity used for commits made inside trial workspaces.
const COMMIT_IDENTITY: [&str; 4] = ["-c", "user.name=sleuth", "-c", "user.email=sleuth@localhost"];

/// Run one version-control operation in `workspace`.
pub async fn run(workspace: &Path, op: &GitOperation) -> Result<String, CapabilityError> {
    match op {
        GitOperation::GitStatus => git(workspace, &["status"]).await,
        GitOperation::GitDiffUnstaged => git(workspace, &["diff"]).await,
        GitOperation::GitDiffStaged => git(workspace, &["diff", "--cached"]).await,
        GitOperation::GitDiff { target } => {
            git(workspace, &["diff", revision_arg(target)?]).await
        }
        GitOperation::GitLog { max_count } => {
            let count = format!("--max-count={max_count}");
            git(workspace, &["log", &count, "--format=%h %ad %an%n    %s", "--date=short"]).await
        }
        GitOperation::GitShow { revision } => {
            git(workspace, &["show", revision_arg(revision)?]).await
        }
        GitOperation::GitAdd { files } => {
            if files.is_empty() {
                return Err(CapabilityError::InvalidArguments(
                    "git_add needs at least one file".to_string(),
                ));
            }
            let mut args: Vec<&str> = vec!["add", "--"];
            args.extend(files.iter().map(String::as_str));
            git(workspace, &args).await
        }
        GitOperation::GitCommit { message } => {
            let mut args: Vec<&str> = COMMIT_IDENTITY.to_vec();
            args.extend(["commit", "-m", message.as_str()]);
            git(workspace, &args).await
        }
        GitOperation::GitReset => git(workspace, &["reset"]).await,
        // No DWIM: a bare remote branch name must not create a local branch.
        GitOperation::GitCheckout { target } => {
            git(workspace, &["checkout", "--no-guess", revision_arg(target)?]).await
        }
        GitOperation::GitCreateBranch { .. } | GitOperation::GitDeleteBranch { .. } => {
            Err(CapabilityError::InvalidArguments(
                "branch creation and deletion are reserved for the supervisor".to_string(),
            ))
        }
        GitOperation::GitRevParse { revision } => {
            let out = git(workspace, &["rev-parse", "--verify", revision_arg(revision)?]).await?;
            Ok(out.trim().to_string())
        }
        GitOperation::GitRestore { revision, branch } => {
            let revision = revision_arg(revision)?;
            // The reset moves whatever branch is checked out, so that must be ours.
            git(workspace, &["checkout", "--force", revision_arg(branch)?, "--"]).await?;
            let reset = git(workspace, &["reset", "--hard", revision]).await?;
            let clean = git(workspace, &["clean", "-fd"]).await?;
            Ok(format!("{reset}{clean}"))
        }
    }
}

/// Refuse revisions that git would read as options.
fn revision_arg(value: &str) -> Result<&str, CapabilityError> {
    let value = value.trim();
    if value.is_empty() || value.starts_with('-') {
        return Err(CapabilityError::InvalidArguments(format!(
            "invalid revision '{value}'"
        )));
    }
    Ok(value)
}

async fn git(workspace: &Path, args: &[&str]) -> Result<String, CapabilityError> {
    debug!(workspace = %workspace.display(), args = ?args, "Running git");
    let output = Command::new("git")
        .args(args)
        .current_dir(workspace)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        Err(CapabilityError::CommandFailed {
            command: format!("git {}", args.join(" ")),
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}
