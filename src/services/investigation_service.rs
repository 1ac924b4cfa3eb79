//! Investigation service: the session query surface.
//!
//! Callers start investigations, poll their status, cancel them, and feed
//! them observations. Each started session runs its supervisor on its own
//! tokio task with its own cancellation token.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use super::session_store::SessionStore;
use super::supervisor::{failure_of, Supervisor, SupervisorDeps, SupervisorSettings, SUPERVISOR_AGENT};
use super::task_launcher::TaskWorkerLauncher;
use super::trial_worker::TrialWorker;
use crate::adapters::capabilities::LocalCapabilityBroker;
use crate::adapters::completion::CompletionRegistry;
use crate::adapters::launchers::ProcessWorkerLauncher;
use crate::adapters::storage::{FileReportStore, JsonlObservationStore, ProgressJournal};
use crate::adapters::workspace::GitWorktreeProvisioner;
use crate::domain::errors::{CompletionError, DomainError, DomainResult};
use crate::domain::models::{
    AggregatedResult, Config, FailureKind, InvestigationRequest, IsolationMode, Session,
    SessionFailure, SessionScope, BROADCAST_CHANNEL,
};
use crate::domain::ports::{
    CapabilityBroker, CompletionClient, CompletionClientFactory, ObservationStore, ProgressLog,
    ReportStore, WorkerLauncher, WorkspaceProvisioner,
};

/// Log source for entries written by the service itself.
const SESSION_SOURCE: &str = "session";

/// Adapters a service runs sessions with.
#[derive(Clone)]
pub struct ServiceComponents {
    pub factory: Arc<dyn CompletionClientFactory>,
    pub broker: Arc<dyn CapabilityBroker>,
    pub provisioner: Arc<dyn WorkspaceProvisioner>,
    pub reports: Arc<dyn ReportStore>,
    pub observations: Arc<dyn ObservationStore>,
    pub journal: Option<Arc<dyn ProgressLog>>,
    /// Shared launcher; `None` runs trials as tasks of this process
    pub launcher: Option<Arc<dyn WorkerLauncher>>,
}

impl ServiceComponents {
    /// Local adapters under the configured data root.
    ///
    /// `config_file` is handed on to worker processes so they load the same
    /// configuration as the supervisor.
    pub fn local(config: &Config, config_file: Option<&Path>) -> Result<Self> {
        let data_root = PathBuf::from(&config.data_root);
        let data_root = std::path::absolute(&data_root)
            .with_context(|| format!("Failed to resolve data root {}", data_root.display()))?;

        let launcher: Option<Arc<dyn WorkerLauncher>> = match config.trial.isolation {
            IsolationMode::Process => {
                let grace = Duration::from_secs(config.trial.reap_grace_secs);
                let mut launcher = match &config.trial.worker_binary {
                    Some(binary) => ProcessWorkerLauncher::new(binary, grace),
                    None => ProcessWorkerLauncher::current_exe(grace)
                        .context("Failed to locate the executable for worker processes")?,
                };
                if let Some(file) = config_file {
                    let file = std::path::absolute(file).with_context(|| {
                        format!("Failed to resolve config file {}", file.display())
                    })?;
                    launcher = launcher.with_config_file(file);
                }
                Some(Arc::new(launcher))
            }
            IsolationMode::Task => None,
        };

        Ok(Self {
            factory: Arc::new(CompletionRegistry::new(
                config.rate_limit.clone(),
                config.retry.clone(),
            )),
            broker: Arc::new(LocalCapabilityBroker::new()),
            provisioner: Arc::new(GitWorktreeProvisioner::new(&data_root)),
            reports: Arc::new(FileReportStore::new(&data_root)),
            observations: Arc::new(JsonlObservationStore::new(&data_root)),
            journal: Some(Arc::new(ProgressJournal::new(&data_root))),
            launcher,
        })
    }
}

type RunningSessions = Arc<Mutex<HashMap<String, RunningSession>>>;

/// Entry for a session whose supervisor has not finished yet.
struct RunningSession {
    cancel: CancellationToken,
    /// Flips to true once the supervisor task is over and its outcome recorded
    finished: watch::Receiver<bool>,
}

pub struct InvestigationService {
    store: SessionStore,
    components: ServiceComponents,
    config: Config,
    settings: SupervisorSettings,
    running: RunningSessions,
}

impl InvestigationService {
    pub fn new(config: Config, components: ServiceComponents) -> Self {
        Self {
            store: SessionStore::new(),
            settings: SupervisorSettings::from_config(&config),
            components,
            config,
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Service backed by the local adapters.
    pub fn local(config: Config, config_file: Option<&Path>) -> Result<Self> {
        let components = ServiceComponents::local(&config, config_file)?;
        Ok(Self::new(config, components))
    }

    pub const fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Create a session and start its supervisor in the background.
    ///
    /// A backend that cannot be configured fails the session at once and the
    /// error is returned to the caller.
    #[instrument(skip(self, request), fields(repo = %request.repo_path.display()))]
    pub async fn start(&self, request: InvestigationRequest) -> DomainResult<String> {
        request.validate()?;
        let session = self.store.create(request.clone()).await;
        let session_id = session.id;

        let (completion, launcher) = match self.prepare() {
            Ok(parts) => parts,
            Err(e) => {
                let error = DomainError::from(e);
                warn!(session_id = %session_id, error = %error, "Session configuration rejected");
                self.store.fail(&session_id, failure_of(&error)).await?;
                self.journal(&session_id).await;
                return Err(error);
            }
        };

        let deps = SupervisorDeps {
            store: self.store.clone(),
            launcher,
            provisioner: Arc::clone(&self.components.provisioner),
            reports: Arc::clone(&self.components.reports),
            observations: Arc::clone(&self.components.observations),
            journal: self.components.journal.clone(),
        };
        let mut supervisor = Supervisor::new(
            session_id.clone(),
            request,
            completion,
            deps,
            self.settings.clone(),
        );

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let (finished_tx, finished) = watch::channel(false);
        let task = tokio::spawn(async move { supervisor.run(&token).await });
        // Registered before the watcher exists, so its removal always comes after.
        self.running
            .lock()
            .await
            .insert(session_id.clone(), RunningSession { cancel, finished });
        tokio::spawn(watch_supervisor(
            SessionWatch {
                session_id: session_id.clone(),
                store: self.store.clone(),
                journal: self.components.journal.clone(),
                running: Arc::clone(&self.running),
            },
            task,
            finished_tx,
        ));

        info!(session_id = %session_id, "Investigation session started");
        Ok(session_id)
    }

    /// Resolve both backends before anything is spawned.
    fn prepare(
        &self,
    ) -> Result<(Arc<dyn CompletionClient>, Arc<dyn WorkerLauncher>), CompletionError> {
        let factory = &self.components.factory;
        let supervisor = factory.create(&self.config.supervisor_llm)?;
        let worker = factory.create(&self.config.worker_llm)?;

        let launcher = match &self.components.launcher {
            Some(launcher) => Arc::clone(launcher),
            None => {
                let trial = TrialWorker::new(
                    worker,
                    Arc::clone(&self.components.broker),
                    Arc::clone(&self.components.reports),
                    Arc::clone(&self.components.observations),
                    Duration::from_millis(self.config.trial.turn_delay_ms),
                );
                Arc::new(TaskWorkerLauncher::new(
                    Arc::new(trial),
                    Duration::from_secs(self.config.trial.reap_grace_secs),
                ))
            }
        };
        Ok((supervisor, launcher))
    }

    /// Snapshot of a session: status, logs, agents and final result.
    pub async fn status(&self, session_id: &str) -> DomainResult<Session> {
        self.store.get(session_id).await
    }

    pub async fn list(&self) -> Vec<Session> {
        self.store.list().await
    }

    /// Cancel a running session.
    ///
    /// The session turns `cancelled` immediately. Workers are terminated and
    /// their workspaces reclaimed in the background; `wait` observes the end.
    #[instrument(skip(self))]
    pub async fn cancel(&self, session_id: &str) -> DomainResult<()> {
        self.store
            .fail(
                session_id,
                SessionFailure::new(FailureKind::Cancelled, "session cancelled by caller"),
            )
            .await?;

        if let Some(running) = self.running.lock().await.get(session_id) {
            running.cancel.cancel();
        }
        let failed = self
            .store
            .fail_unfinished_agents(session_id, "session cancelled")
            .await?;
        self.store
            .log(
                session_id,
                SESSION_SOURCE,
                format!("Session cancelled; {failed} agent(s) stopped"),
            )
            .await?;
        info!(agents = failed, "Session cancelled");
        Ok(())
    }

    /// Record an observation for every agent of a session, or for one agent.
    #[instrument(skip(self, text))]
    pub async fn add_observation(
        &self,
        session_id: &str,
        agent_id: Option<&str>,
        text: &str,
    ) -> DomainResult<()> {
        if text.trim().is_empty() {
            return Err(DomainError::InvalidRequest(
                "observation text must not be empty".to_string(),
            ));
        }
        let session = self.store.get(session_id).await?;
        let channel = match agent_id {
            None => BROADCAST_CHANNEL,
            Some(agent) if agent == SUPERVISOR_AGENT || session.agents.iter().any(|a| a.id == agent) => {
                agent
            }
            Some(agent) => {
                return Err(DomainError::AgentNotFound {
                    session_id: session_id.to_string(),
                    agent_id: agent.to_string(),
                })
            }
        };

        let scope = SessionScope::new(&session.id, &session.request.repo_path);
        self.components
            .observations
            .record(&scope, channel, text)
            .await?;
        self.store
            .log(session_id, SESSION_SOURCE, format!("Observation recorded for {channel}"))
            .await
    }

    /// Wait for a session's supervisor to finish and return the final state.
    pub async fn wait(&self, session_id: &str) -> DomainResult<Session> {
        let finished = self
            .running
            .lock()
            .await
            .get(session_id)
            .map(|running| running.finished.clone());

        if let Some(mut finished) = finished {
            // A dropped sender means the watcher is gone, which also ends the wait.
            let _ = finished.wait_for(|done| *done).await;
        }
        self.store.get(session_id).await
    }

    /// Whether a session's supervisor is still running.
    pub async fn is_active(&self, session_id: &str) -> bool {
        self.running.lock().await.contains_key(session_id)
    }

    async fn journal(&self, session_id: &str) {
        append_journal(self.components.journal.as_ref(), &self.store, session_id).await;
    }
}

/// What the watcher of one supervisor task needs to settle the session.
struct SessionWatch {
    session_id: String,
    store: SessionStore,
    journal: Option<Arc<dyn ProgressLog>>,
    running: RunningSessions,
}

/// Await a supervisor task, record a crash it could not record itself, and
/// drop the session from the running set.
async fn watch_supervisor(
    session: SessionWatch,
    task: JoinHandle<DomainResult<AggregatedResult>>,
    finished: watch::Sender<bool>,
) {
    let session_id = session.session_id.as_str();
    match task.await {
        Ok(Ok(result)) => {
            info!(session_id, confidence = result.confidence, "Supervisor finished");
        }
        Ok(Err(e)) => info!(session_id, error = %e, "Supervisor finished without a decision"),
        Err(e) => {
            warn!(session_id, error = %e, "Supervisor task failed");
            let failure =
                SessionFailure::new(FailureKind::Crashed, format!("supervisor task failed: {e}"));
            if session.store.fail(session_id, failure).await.is_ok() {
                if let Err(e) = session
                    .store
                    .fail_unfinished_agents(session_id, "supervisor crashed")
                    .await
                {
                    warn!(session_id, error = %e, "Failed to stop agents of crashed session");
                }
                append_journal(session.journal.as_ref(), &session.store, session_id).await;
            }
        }
    }
    session.running.lock().await.remove(session_id);
    finished.send_replace(true);
}

async fn append_journal(
    journal: Option<&Arc<dyn ProgressLog>>,
    store: &SessionStore,
    session_id: &str,
) {
    let Some(journal) = journal else {
        return;
    };
    if let Ok(session) = store.get(session_id).await {
        if let Err(e) = journal.append(&session).await {
            warn!(session_id, error = %e, "Failed to append progress journal");
        }
    }
}

impl Drop for InvestigationService {
    fn drop(&mut self) {
        if let Ok(running) = self.running.try_lock() {
            for session in running.values() {
                session.cancel.cancel();
            }
        }
    }
}
