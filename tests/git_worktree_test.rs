//! Workspace provisioning and capability calls against a real git repository.

mod common;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use common::{git, scenario_config, setup_test_git_repo, temp_dir};
use sleuth::adapters::capabilities::LocalCapabilityBroker;
use sleuth::adapters::completion::ScriptedCompletionClient;
use sleuth::adapters::storage::{FileReportStore, JsonlObservationStore};
use sleuth::adapters::workspace::GitWorktreeProvisioner;
use sleuth::domain::errors::{CapabilityError, DomainError};
use sleuth::domain::models::{CapabilityRequest, FileOperation, GitOperation, Termination};
use sleuth::domain::ports::{CapabilityBroker, WorkspaceProvisioner};
use sleuth::services::TrialWorker;

/// Add a `develop` branch one commit ahead of the current one; returns its tip.
fn add_develop_branch(repo: &Path) -> String {
    git(repo, &["checkout", "--quiet", "-b", "develop"]);
    std::fs::write(repo.join("feature.js"), "export const flag = true;\n").unwrap();
    git(repo, &["add", "feature.js"]);
    git(repo, &["commit", "--quiet", "-m", "develop work"]);
    git(repo, &["checkout", "--quiet", "-"]);
    git(repo, &["rev-parse", "develop"]).trim().to_string()
}

#[tokio::test]
async fn test_provision_and_reclaim_worktree() {
    let (_repo_dir, repo) = setup_test_git_repo();
    let data = temp_dir();
    let provisioner = GitWorktreeProvisioner::new(data.path());
    let branch = "debug-session-1-1-1700000000000";

    let workspace = provisioner.provision(&repo, branch).await.unwrap();

    assert!(workspace.join("cache.js").exists());
    assert!(git(&repo, &["branch", "--list", branch]).contains(branch));
    assert_eq!(
        git(&workspace, &["rev-parse", "--abbrev-ref", "HEAD"]).trim(),
        branch
    );

    provisioner.reclaim(&repo, &workspace, branch).await.unwrap();

    assert!(!workspace.exists());
    assert!(git(&repo, &["branch", "--list", branch]).trim().is_empty());
    assert!(!git(&repo, &["worktree", "list"]).contains(branch));
}

#[tokio::test]
async fn test_existing_branch_is_not_reused() {
    let (_repo_dir, repo) = setup_test_git_repo();
    let data = temp_dir();
    let provisioner = GitWorktreeProvisioner::new(data.path());
    let branch = "debug-session-1-2-1700000000000";
    git(&repo, &["branch", branch]);

    let err = provisioner.provision(&repo, branch).await.unwrap_err();

    assert!(matches!(err, DomainError::Workspace(msg) if msg.contains("already exists")));
}

#[tokio::test]
async fn test_reclaim_is_idempotent() {
    let (_repo_dir, repo) = setup_test_git_repo();
    let data = temp_dir();
    let provisioner = GitWorktreeProvisioner::new(data.path());
    let branch = "debug-session-1-3-1700000000000";

    let workspace = provisioner.provision(&repo, branch).await.unwrap();
    provisioner.reclaim(&repo, &workspace, branch).await.unwrap();
    provisioner.reclaim(&repo, &workspace, branch).await.unwrap();
}

#[tokio::test]
async fn test_concurrent_worktrees_do_not_share_files() {
    let (_repo_dir, repo) = setup_test_git_repo();
    let data = temp_dir();
    let provisioner = GitWorktreeProvisioner::new(data.path());

    let a = provisioner.provision(&repo, "debug-s-1-1").await.unwrap();
    let b = provisioner.provision(&repo, "debug-s-2-1").await.unwrap();
    std::fs::write(a.join("cache.js"), "changed in a\n").unwrap();

    assert_eq!(
        std::fs::read_to_string(b.join("cache.js")).unwrap(),
        "let taskCache = {};\n"
    );
    assert_eq!(
        std::fs::read_to_string(repo.join("cache.js")).unwrap(),
        "let taskCache = {};\n"
    );

    provisioner.reclaim(&repo, &a, "debug-s-1-1").await.unwrap();
    provisioner.reclaim(&repo, &b, "debug-s-2-1").await.unwrap();
}

#[tokio::test]
async fn test_capabilities_edit_commit_and_restore() {
    let (_repo_dir, repo) = setup_test_git_repo();
    let data = temp_dir();
    let provisioner = GitWorktreeProvisioner::new(data.path());
    let branch = "debug-s-1-4";
    let workspace = provisioner.provision(&repo, branch).await.unwrap();

    let mut conn = LocalCapabilityBroker::new().open(&workspace).await.unwrap();
    let base = conn
        .invoke(&CapabilityRequest::Git(GitOperation::GitRevParse {
            revision: "HEAD".into(),
        }))
        .await
        .unwrap();
    assert_eq!(base.len(), 40);

    conn.invoke(&CapabilityRequest::File(FileOperation::EditFile {
        path: "cache.js".into(),
        old_text: "{}".into(),
        new_text: "new Map()".into(),
    }))
    .await
    .unwrap();
    conn.invoke(&CapabilityRequest::File(FileOperation::WriteFile {
        path: "notes/scratch.txt".into(),
        content: "temporary".into(),
    }))
    .await
    .unwrap();
    conn.invoke(&CapabilityRequest::Git(GitOperation::GitAdd {
        files: vec!["cache.js".into()],
    }))
    .await
    .unwrap();
    conn.invoke(&CapabilityRequest::Git(GitOperation::GitCommit {
        message: "try a map".into(),
    }))
    .await
    .unwrap();

    let diff = conn
        .invoke(&CapabilityRequest::Git(GitOperation::GitDiff {
            target: base.clone(),
        }))
        .await
        .unwrap();
    assert!(diff.contains("new Map()"));

    conn.invoke(&CapabilityRequest::Git(GitOperation::GitRestore {
        revision: base.clone(),
        branch: branch.to_string(),
    }))
    .await
    .unwrap();
    conn.close().await;

    assert_eq!(git(&workspace, &["rev-parse", "HEAD"]).trim(), base);
    assert_eq!(
        std::fs::read_to_string(workspace.join("cache.js")).unwrap(),
        "let taskCache = {};\n"
    );
    assert!(!workspace.join("notes").exists());

    provisioner.reclaim(&repo, &workspace, branch).await.unwrap();
}

#[tokio::test]
async fn test_paths_cannot_escape_workspace() {
    let (_repo_dir, repo) = setup_test_git_repo();
    let mut conn = LocalCapabilityBroker::new().open(&repo).await.unwrap();

    let err = conn
        .invoke(&CapabilityRequest::File(FileOperation::ReadFile {
            path: "../../etc/passwd".into(),
        }))
        .await
        .unwrap_err();

    assert!(matches!(err, CapabilityError::PathOutsideWorkspace(_)));
}

#[tokio::test]
async fn test_restore_returns_to_workspace_branch_before_reset() {
    let (_repo_dir, repo) = setup_test_git_repo();
    let develop = add_develop_branch(&repo);
    let data = temp_dir();
    let provisioner = GitWorktreeProvisioner::new(data.path());
    let branch = "debug-s-1-5";
    let workspace = provisioner.provision(&repo, branch).await.unwrap();

    let mut conn = LocalCapabilityBroker::new().open(&workspace).await.unwrap();
    let base = conn
        .invoke(&CapabilityRequest::Git(GitOperation::GitRevParse {
            revision: "HEAD".into(),
        }))
        .await
        .unwrap();
    git(&workspace, &["checkout", "--quiet", "develop"]);

    conn.invoke(&CapabilityRequest::Git(GitOperation::GitRestore {
        revision: base.clone(),
        branch: branch.to_string(),
    }))
    .await
    .unwrap();
    conn.close().await;

    assert_eq!(git(&repo, &["rev-parse", "develop"]).trim(), develop);
    assert_eq!(
        git(&workspace, &["rev-parse", "--abbrev-ref", "HEAD"]).trim(),
        branch
    );
    assert_eq!(git(&workspace, &["rev-parse", "HEAD"]).trim(), base);

    provisioner.reclaim(&repo, &workspace, branch).await.unwrap();
}

#[tokio::test]
async fn test_trial_cannot_check_out_or_rewrite_other_branches() {
    let (_repo_dir, repo) = setup_test_git_repo();
    let develop = add_develop_branch(&repo);
    let data = temp_dir();
    let provisioner = GitWorktreeProvisioner::new(data.path());
    let branch = "debug-s-1-6";
    let workspace = provisioner.provision(&repo, branch).await.unwrap();

    let checkout = "<use_mcp_tool>\n<server_name>git-mcp</server_name>\n\
        <tool_name>git_checkout</tool_name>\n<arguments>{\"target\": \"develop\"}</arguments>\n\
        </use_mcp_tool>";
    let completion = Arc::new(ScriptedCompletionClient::new([
        checkout,
        "<report>CONFIRMED: no</report>",
    ]));
    let worker = TrialWorker::new(
        completion.clone(),
        Arc::new(LocalCapabilityBroker::new()),
        Arc::new(FileReportStore::new(data.path())),
        Arc::new(JsonlObservationStore::new(data.path())),
        Duration::from_millis(1),
    );
    let mut config = scenario_config(data.path(), &workspace, "scenario-1-1");
    config.branch_name = branch.to_string();

    let result = worker.run(&config, &CancellationToken::new()).await.unwrap();

    assert_eq!(result.termination, Termination::Reported);
    assert_eq!(git(&repo, &["rev-parse", "develop"]).trim(), develop);
    assert_eq!(
        git(&workspace, &["rev-parse", "--abbrev-ref", "HEAD"]).trim(),
        branch
    );
    let calls = completion.calls().await;
    let feedback = &calls[1].last().unwrap().content;
    assert!(feedback.contains("'develop' is a local branch outside this trial"));

    provisioner.reclaim(&repo, &workspace, branch).await.unwrap();
}

#[tokio::test]
async fn test_checkout_of_own_branch_and_commits_is_allowed() {
    let (_repo_dir, repo) = setup_test_git_repo();
    let data = temp_dir();
    let provisioner = GitWorktreeProvisioner::new(data.path());
    let branch = "debug-s-1-7";
    let workspace = provisioner.provision(&repo, branch).await.unwrap();
    let mut conn = LocalCapabilityBroker::new().open(&workspace).await.unwrap();

    conn.invoke(&CapabilityRequest::Git(GitOperation::GitCheckout {
        target: "HEAD~0".into(),
    }))
    .await
    .unwrap();
    conn.invoke(&CapabilityRequest::Git(GitOperation::GitCheckout {
        target: branch.into(),
    }))
    .await
    .unwrap();
    conn.close().await;

    assert_eq!(
        git(&workspace, &["rev-parse", "--abbrev-ref", "HEAD"]).trim(),
        branch
    );
    provisioner.reclaim(&repo, &workspace, branch).await.unwrap();
}
