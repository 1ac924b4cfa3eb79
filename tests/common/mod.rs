//! Common test utilities for integration tests
//!
//! Provides shared fixtures, helpers, and test doubles used across
//! multiple integration test files.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use sleuth::domain::errors::{CapabilityError, CompletionError, DomainError, DomainResult};
use sleuth::domain::models::{
    CapabilityRequest, GitOperation, Hypothesis, InvestigationRequest, LlmSettings,
    ScenarioConfig, ScenarioResult, WorkerExit,
};
use sleuth::domain::ports::{
    CapabilityBroker, CapabilityConnection, CompletionClient, CompletionClientFactory,
    ReportStore, WorkerLauncher, WorkspaceProvisioner,
};

/// Base revision the recording broker reports for `git_rev_parse`.
pub const BASE_REVISION: &str = "0123456789abcdef";

/// Create a temporary directory for test isolation
pub fn temp_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

/// Setup test logging
///
/// Initializes tracing subscriber for test output.
pub fn setup_test_logging() {
    use tracing_subscriber::fmt;

    let _ = fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Setup a git repository in a temp directory for testing
///
/// Creates an initialized git repo with one committed file.
/// Returns the TempDir (for lifetime management) and the canonical repo path.
pub fn setup_test_git_repo() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir for git repo");
    let path = dir
        .path()
        .canonicalize()
        .expect("Failed to canonicalize temp dir");

    git(&path, &["init", "--quiet"]);
    git(&path, &["config", "user.email", "test@test.com"]);
    git(&path, &["config", "user.name", "Test User"]);
    std::fs::write(path.join("cache.js"), "let taskCache = {};\n").expect("write file");
    git(&path, &["add", "."]);
    git(&path, &["commit", "--quiet", "-m", "initial commit"]);

    (dir, path)
}

/// Run git in `repo`, asserting success; returns stdout.
pub fn git(repo: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo)
        .output()
        .expect("Failed to run git");
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).into_owned()
}

/// Scenario config for a trial running in `workspace`, with reports under `data_root`.
pub fn scenario_config(data_root: &Path, workspace: &Path, id: &str) -> ScenarioConfig {
    ScenarioConfig {
        id: id.to_string(),
        session_id: "session-test".to_string(),
        iteration: 1,
        hypothesis: Hypothesis::new("cache", "stale taskCache entry"),
        branch_name: format!("debug-session-test-1-{}", Utc::now().timestamp_millis()),
        workspace_path: workspace.to_path_buf(),
        request: InvestigationRequest::new("TypeError: cannot read 'id' of undefined", workspace)
            .with_context("started after the cache refactor"),
        data_root: data_root.to_path_buf(),
        timeout_ms: 30_000,
        started_at: Utc::now(),
    }
}

/// Broker whose connections record every request and answer from a script.
#[derive(Clone, Default)]
pub struct RecordingBroker {
    pub requests: Arc<Mutex<Vec<CapabilityRequest>>>,
    pub closed: Arc<Mutex<usize>>,
    /// Canned output per tool name; unknown tools answer "ok"
    pub outputs: Arc<Mutex<HashMap<&'static str, String>>>,
    /// Per-tool delay before a request is answered
    pub delays: Arc<Mutex<HashMap<&'static str, Duration>>>,
    pub fail_open: bool,
}

impl RecordingBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_open() -> Self {
        Self {
            fail_open: true,
            ..Self::default()
        }
    }

    pub fn answer(&self, tool: &'static str, output: &str) {
        self.outputs
            .lock()
            .unwrap()
            .insert(tool, output.to_string());
    }

    pub fn slow(&self, tool: &'static str, delay: Duration) {
        self.delays.lock().unwrap().insert(tool, delay);
    }

    pub fn requests(&self) -> Vec<CapabilityRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Requests a model directed, i.e. without the worker's own bookkeeping.
    pub fn directed(&self) -> Vec<CapabilityRequest> {
        self.requests()
            .into_iter()
            .filter(|r| {
                !matches!(
                    r,
                    CapabilityRequest::Git(
                        GitOperation::GitRevParse { .. }
                            | GitOperation::GitRestore { .. }
                            | GitOperation::GitDiff { .. }
                    )
                )
            })
            .collect()
    }

    pub fn restored(&self) -> bool {
        self.requests().iter().any(|r| {
            matches!(
                r,
                CapabilityRequest::Git(GitOperation::GitRestore { revision, .. }) if revision == BASE_REVISION
            )
        })
    }

    pub fn close_count(&self) -> usize {
        *self.closed.lock().unwrap()
    }
}

pub struct RecordingConnection {
    broker: RecordingBroker,
}

#[async_trait]
impl CapabilityBroker for RecordingBroker {
    async fn open(
        &self,
        workspace: &Path,
    ) -> Result<Box<dyn CapabilityConnection>, CapabilityError> {
        if self.fail_open {
            return Err(CapabilityError::Io(format!(
                "{} is unavailable",
                workspace.display()
            )));
        }
        Ok(Box::new(RecordingConnection {
            broker: self.clone(),
        }))
    }
}

#[async_trait]
impl CapabilityConnection for RecordingConnection {
    async fn invoke(&mut self, request: &CapabilityRequest) -> Result<String, CapabilityError> {
        self.broker.requests.lock().unwrap().push(request.clone());
        let delay = self.broker.delays.lock().unwrap().get(request.tool_name()).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let CapabilityRequest::Git(GitOperation::GitRevParse { .. }) = request {
            return Ok(BASE_REVISION.to_string());
        }
        let canned = self
            .broker
            .outputs
            .lock()
            .unwrap()
            .get(request.tool_name())
            .cloned();
        Ok(canned.unwrap_or_else(|| "ok".to_string()))
    }

    async fn close(&mut self) {
        *self.broker.closed.lock().unwrap() += 1;
    }
}

/// Factory handing out fixed clients by the `model` field of the settings.
pub struct FixedFactory {
    clients: HashMap<String, Arc<dyn CompletionClient>>,
}

impl FixedFactory {
    pub fn new() -> Self {
        Self {
            clients: HashMap::new(),
        }
    }

    pub fn with(mut self, model: &str, client: Arc<dyn CompletionClient>) -> Self {
        self.clients.insert(model.to_string(), client);
        self
    }
}

impl CompletionClientFactory for FixedFactory {
    fn create(&self, settings: &LlmSettings) -> Result<Arc<dyn CompletionClient>, CompletionError> {
        self.clients
            .get(&settings.model)
            .cloned()
            .ok_or_else(|| CompletionError::MissingCredential {
                backend: settings.provider.clone(),
                env_var: "TEST_API_KEY".to_string(),
            })
    }
}

/// Provisioner that creates plain directories and records what it did.
#[derive(Default)]
pub struct DirProvisioner {
    pub root: PathBuf,
    pub provisioned: Mutex<Vec<String>>,
    pub reclaimed: Mutex<Vec<String>>,
    /// Ordinals (1-based, in provisioning order) that fail
    pub fail_on: Vec<usize>,
}

impl DirProvisioner {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            ..Self::default()
        }
    }

    pub fn failing_on(root: &Path, fail_on: Vec<usize>) -> Self {
        Self {
            fail_on,
            ..Self::new(root)
        }
    }

    pub fn provisioned(&self) -> Vec<String> {
        self.provisioned.lock().unwrap().clone()
    }

    pub fn reclaimed(&self) -> Vec<String> {
        self.reclaimed.lock().unwrap().clone()
    }
}

#[async_trait]
impl WorkspaceProvisioner for DirProvisioner {
    async fn provision(&self, _repo: &Path, branch: &str) -> DomainResult<PathBuf> {
        let ordinal = {
            let mut provisioned = self.provisioned.lock().unwrap();
            provisioned.push(branch.to_string());
            provisioned.len()
        };
        if self.fail_on.contains(&ordinal) {
            return Err(DomainError::Workspace(format!("branch {branch} already exists")));
        }
        let path = self.root.join(branch);
        std::fs::create_dir_all(&path)?;
        Ok(path)
    }

    async fn reclaim(&self, _repo: &Path, workspace: &Path, branch: &str) -> DomainResult<()> {
        self.reclaimed.lock().unwrap().push(branch.to_string());
        let _ = std::fs::remove_dir_all(workspace);
        Ok(())
    }
}

/// How a `ScriptedLauncher` plays one hypothesis type.
#[derive(Clone)]
pub enum Play {
    /// Write this report (id and hypothesis are filled in) and exit 0
    Report(ScenarioResult),
    /// Exit without writing anything
    Vanish(WorkerExit),
    /// Wait for cancellation, then exit
    Hang,
    /// Panic inside the launcher, taking the supervisor task down with it
    Panic,
}

/// Launcher that plays scripted trials keyed by hypothesis type.
pub struct ScriptedLauncher {
    reports: Arc<dyn ReportStore>,
    plays: HashMap<String, Play>,
    pub launched: Mutex<Vec<String>>,
}

impl ScriptedLauncher {
    pub fn new(reports: Arc<dyn ReportStore>) -> Self {
        Self {
            reports,
            plays: HashMap::new(),
            launched: Mutex::new(Vec::new()),
        }
    }

    pub fn play(mut self, hypothesis_type: &str, play: Play) -> Self {
        self.plays.insert(hypothesis_type.to_string(), play);
        self
    }

    pub fn launched(&self) -> Vec<String> {
        self.launched.lock().unwrap().clone()
    }
}

#[async_trait]
impl WorkerLauncher for ScriptedLauncher {
    async fn launch(&self, config: &ScenarioConfig, cancel: CancellationToken) -> WorkerExit {
        self.launched.lock().unwrap().push(config.id.clone());
        let play = self
            .plays
            .get(&config.hypothesis.kind)
            .cloned()
            .unwrap_or(Play::Vanish(WorkerExit::Crashed("unscripted".into())));
        match play {
            Play::Report(template) => {
                let mut report = template;
                report.id.clone_from(&config.id);
                report.hypothesis_type.clone_from(&config.hypothesis.kind);
                report.hypothesis.clone_from(&config.hypothesis.description);
                self.reports
                    .write(&config.scope(), &report)
                    .await
                    .expect("write scripted report");
                WorkerExit::Exited { code: 0 }
            }
            Play::Vanish(exit) => exit,
            Play::Hang => {
                cancel.cancelled().await;
                WorkerExit::Cancelled
            }
            Play::Panic => panic!("scripted launcher panic for {}", config.id),
        }
    }
}

/// A successful report template touching `resources`.
pub fn success(confidence: f64, explanation: &str, resources: &[&str]) -> ScenarioResult {
    ScenarioResult::new("template", &Hypothesis::new("template", "template"))
        .succeeded()
        .with_confidence(confidence)
        .with_explanation(explanation)
        .with_resources(resources.iter().copied())
}

/// A failed report template.
pub fn failure(explanation: &str) -> ScenarioResult {
    ScenarioResult::new("template", &Hypothesis::new("template", "template"))
        .with_explanation(explanation)
}
