//! Investigation supervisor: the observe/orient/decide/act/evaluate cycle.
//!
//! Each iteration reads what earlier trials reported, asks the model for a
//! fresh set of hypotheses, provisions one branch workspace per hypothesis,
//! runs all trials concurrently, waits for every one of them, and aggregates
//! their reports. A confident aggregate completes the session. Otherwise the
//! next iteration starts, until the iteration budget runs out.

use chrono::Utc;
use futures::future::join_all;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::aggregator::Aggregator;
use super::session_store::SessionStore;
use crate::domain::errors::{CompletionError, DomainError, DomainResult};
use crate::domain::models::{
    parse_hypotheses, AgentState, AgentStatus, AggregatedResult, BranchNamer, Config, FailureKind,
    Hypothesis, InvestigationRequest, MacroPhase, Message, ScenarioConfig, ScenarioResult,
    SessionFailure, SessionScope, SessionStatus, Termination, SUPERVISOR_CHANNEL,
};
use crate::domain::ports::{
    CompletionClient, ObservationStore, ProgressLog, ReportStore, WorkerLauncher,
    WorkspaceProvisioner,
};

/// Agent id the supervisor is tracked under.
pub const SUPERVISOR_AGENT: &str = "supervisor";

const PHASES_PER_ITERATION: u32 = 5;

/// Collaborators shared by every supervisor of a service.
#[derive(Clone)]
pub struct SupervisorDeps {
    pub store: SessionStore,
    pub launcher: Arc<dyn WorkerLauncher>,
    pub provisioner: Arc<dyn WorkspaceProvisioner>,
    pub reports: Arc<dyn ReportStore>,
    pub observations: Arc<dyn ObservationStore>,
    pub journal: Option<Arc<dyn ProgressLog>>,
}

/// Budgets and locations for one supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub max_iterations: u32,
    pub max_trials_per_iteration: usize,
    pub trial_timeout: Duration,
    pub data_root: PathBuf,
}

impl SupervisorSettings {
    pub fn from_config(config: &Config) -> Self {
        let data_root = PathBuf::from(&config.data_root);
        Self {
            max_iterations: config.supervisor.max_iterations,
            max_trials_per_iteration: config.supervisor.max_trials_per_iteration,
            trial_timeout: Duration::from_secs(config.trial.timeout_secs),
            data_root: std::path::absolute(&data_root).unwrap_or(data_root),
        }
    }
}

/// What observe hands to orient.
#[derive(Debug, Default)]
struct Observations {
    reports: Vec<ScenarioResult>,
    notes: Vec<String>,
}

/// A hypothesis that made it through decide with a provisioned workspace.
struct Trial {
    config: ScenarioConfig,
}

pub struct Supervisor {
    session_id: String,
    request: InvestigationRequest,
    scope: SessionScope,
    completion: Arc<dyn CompletionClient>,
    deps: SupervisorDeps,
    settings: SupervisorSettings,
    aggregator: Aggregator,
    namer: BranchNamer,
}

impl Supervisor {
    pub fn new(
        session_id: impl Into<String>,
        request: InvestigationRequest,
        completion: Arc<dyn CompletionClient>,
        deps: SupervisorDeps,
        settings: SupervisorSettings,
    ) -> Self {
        let session_id = session_id.into();
        Self {
            scope: SessionScope::new(&session_id, &request.repo_path),
            namer: BranchNamer::new(&session_id),
            session_id,
            request,
            completion,
            deps,
            settings,
            aggregator: Aggregator::new(),
        }
    }

    /// Drive the session to a terminal state and return the decision.
    #[instrument(skip(self, cancel), fields(session_id = %self.session_id))]
    pub async fn run(&mut self, cancel: &CancellationToken) -> DomainResult<AggregatedResult> {
        let outcome = self.cycle(cancel).await;
        self.conclude(&outcome).await;
        outcome
    }

    async fn cycle(&mut self, cancel: &CancellationToken) -> DomainResult<AggregatedResult> {
        let store = &self.deps.store;
        store.transition(&self.session_id, SessionStatus::Running).await?;
        store
            .register_agent(&self.session_id, AgentState::supervisor(SUPERVISOR_AGENT))
            .await?;
        store
            .update_agent(&self.session_id, SUPERVISOR_AGENT, AgentStatus::Running, 0, None)
            .await?;
        info!(max_iterations = self.settings.max_iterations, "Investigation started");

        for iteration in 1..=self.settings.max_iterations {
            ensure_live(cancel)?;

            self.enter(MacroPhase::Observe, iteration).await?;
            let observations = self.observe(iteration).await;

            ensure_live(cancel)?;
            self.enter(MacroPhase::Orient, iteration).await?;
            let hypotheses = tokio::select! {
                () = cancel.cancelled() => return Err(cancelled()),
                hypotheses = self.orient(&observations, iteration) => hypotheses?,
            };

            ensure_live(cancel)?;
            self.enter(MacroPhase::Decide, iteration).await?;
            let (trials, mut results) = self.decide(&hypotheses, iteration).await?;

            self.enter(MacroPhase::Act, iteration).await?;
            results.extend(self.act(trials, cancel).await?);
            ensure_live(cancel)?;

            self.enter(MacroPhase::Evaluate, iteration).await?;
            let aggregated = self.evaluate(results).await?;
            if aggregated.success {
                return Ok(aggregated);
            }
            self.note(format!(
                "Iteration {iteration} found no confident fix ({} of {} iterations used)",
                iteration, self.settings.max_iterations
            ))
            .await?;
        }

        Err(DomainError::IterationBudgetExhausted {
            iterations: self.settings.max_iterations,
        })
    }

    /// Read earlier reports and the supervisor's observation channel.
    /// Failures degrade to "nothing observed".
    async fn observe(&self, iteration: u32) -> Observations {
        let reports = self
            .deps
            .reports
            .list(&self.scope)
            .await
            .unwrap_or_else(|e| {
                warn!(iteration, error = %e, "Failed to read earlier reports");
                Vec::new()
            });
        let notes = self
            .deps
            .observations
            .read(&self.scope, SUPERVISOR_CHANNEL)
            .await
            .map(|recorded| recorded.into_iter().map(|o| o.observation).collect())
            .unwrap_or_else(|e| {
                warn!(iteration, error = %e, "Failed to read supervisor observations");
                Vec::new()
            });
        debug!(iteration, reports = reports.len(), notes = notes.len(), "Observed");
        Observations { reports, notes }
    }

    /// One completion call that must yield a hypothesis list.
    async fn orient(
        &self,
        observations: &Observations,
        iteration: u32,
    ) -> DomainResult<Vec<Hypothesis>> {
        let prompt = orientation_prompt(
            &self.request,
            observations,
            iteration,
            self.settings.max_trials_per_iteration,
        );
        let reply = self.completion.complete(&[Message::user(prompt)]).await?;
        let mut hypotheses = parse_hypotheses(&reply)?;
        hypotheses.truncate(self.settings.max_trials_per_iteration);

        let summary: Vec<&str> = hypotheses.iter().map(|h| h.kind.as_str()).collect();
        info!(iteration, hypotheses = ?summary, "Hypotheses generated");
        self.note(format!(
            "Iteration {iteration}: testing {} hypotheses ({})",
            hypotheses.len(),
            summary.join(", ")
        ))
        .await?;
        Ok(hypotheses)
    }

    /// Allocate a branch and workspace per hypothesis.
    ///
    /// Every agent is registered before any worker is spawned. A hypothesis
    /// whose workspace cannot be provisioned gets a failed report instead.
    async fn decide(
        &self,
        hypotheses: &[Hypothesis],
        iteration: u32,
    ) -> DomainResult<(Vec<Trial>, Vec<ScenarioResult>)> {
        let mut trials = Vec::with_capacity(hypotheses.len());
        let mut failures = Vec::new();

        for hypothesis in hypotheses {
            let spawned_at = Utc::now();
            let (ordinal, branch) = self.namer.next(spawned_at);
            let scenario_id = format!("scenario-{iteration}-{ordinal}");
            self.deps
                .store
                .register_agent(&self.session_id, AgentState::scenario(&scenario_id, &branch))
                .await?;

            let mut config = ScenarioConfig {
                id: scenario_id.clone(),
                session_id: self.session_id.clone(),
                iteration,
                hypothesis: hypothesis.clone(),
                branch_name: branch.clone(),
                workspace_path: PathBuf::new(),
                request: self.request.clone(),
                data_root: self.settings.data_root.clone(),
                timeout_ms: u64::try_from(self.settings.trial_timeout.as_millis())
                    .unwrap_or(u64::MAX),
                started_at: spawned_at,
            };

            match self
                .deps
                .provisioner
                .provision(&self.request.repo_path, &branch)
                .await
            {
                Ok(workspace) => {
                    config.workspace_path = workspace;
                    trials.push(Trial { config });
                }
                Err(e) => {
                    warn!(scenario_id = %scenario_id, branch = %branch, error = %e, "Workspace provisioning failed");
                    let result = ScenarioResult::failed(
                        &config,
                        Termination::SetupFailed,
                        format!("workspace provisioning failed: {e}"),
                    );
                    self.persist_synthesized(&result).await;
                    self.deps
                        .store
                        .update_agent(
                            &self.session_id,
                            &scenario_id,
                            AgentStatus::Error,
                            100,
                            Some(e.to_string()),
                        )
                        .await?;
                    failures.push(result);
                }
            }
        }
        Ok((trials, failures))
    }

    /// Run every trial concurrently and wait for all of them.
    async fn act(
        &self,
        trials: Vec<Trial>,
        cancel: &CancellationToken,
    ) -> DomainResult<Vec<ScenarioResult>> {
        for trial in &trials {
            self.deps
                .store
                .update_agent(&self.session_id, &trial.config.id, AgentStatus::Running, 10, None)
                .await?;
        }

        let runs = trials.iter().map(|trial| self.run_trial(trial, cancel.child_token()));
        let results = join_all(runs).await;

        for result in &results {
            let (status, error) = if result.termination == Termination::Reported {
                (AgentStatus::Complete, None)
            } else {
                (AgentStatus::Error, Some(result.explanation.clone()))
            };
            self.deps
                .store
                .update_agent(&self.session_id, &result.id, status, 100, error)
                .await?;
        }
        Ok(results)
    }

    async fn run_trial(&self, trial: &Trial, cancel: CancellationToken) -> ScenarioResult {
        let config = &trial.config;
        let exit = self.deps.launcher.launch(config, cancel).await;
        debug!(scenario_id = %config.id, exit = ?exit, "Trial worker ended");

        let result = match self.deps.reports.read(&self.scope, &config.id).await {
            Ok(Some(report)) => report,
            Ok(None) => {
                let result = ScenarioResult::failed(
                    config,
                    exit.missing_report_termination(),
                    exit.describe(),
                );
                self.persist_synthesized(&result).await;
                result
            }
            Err(e) => {
                warn!(scenario_id = %config.id, error = %e, "Unreadable trial report");
                ScenarioResult::failed(
                    config,
                    Termination::Crashed,
                    format!("{}; report unreadable: {e}", exit.describe()),
                )
            }
        };

        if let Err(e) = self
            .deps
            .provisioner
            .reclaim(&self.request.repo_path, &config.workspace_path, &config.branch_name)
            .await
        {
            warn!(scenario_id = %config.id, branch = %config.branch_name, error = %e, "Workspace reclaim failed");
        }
        result
    }

    async fn evaluate(&mut self, results: Vec<ScenarioResult>) -> DomainResult<AggregatedResult> {
        let aggregated = self.aggregator.aggregate(&results);
        let succeeded = results.iter().filter(|r| r.success).count();
        self.deps
            .store
            .push_results(&self.session_id, results)
            .await?;
        info!(
            succeeded,
            confidence = aggregated.confidence,
            conflicts = aggregated.conflicts.len(),
            "Reports aggregated"
        );
        self.note(format!(
            "{succeeded} trial(s) succeeded; combined confidence {:.3}, {} conflict(s); primary fix: {}",
            aggregated.confidence,
            aggregated.conflicts.len(),
            aggregated.primary_fix
        ))
        .await?;
        Ok(aggregated)
    }

    /// Record the terminal state. Never fails: the session may already have
    /// been ended by the caller.
    async fn conclude(&self, outcome: &DomainResult<AggregatedResult>) {
        let store = &self.deps.store;
        let recorded = match outcome {
            Ok(result) => store.complete(&self.session_id, result.clone()).await,
            Err(e) => store.fail(&self.session_id, failure_of(e)).await,
        };
        if let Err(e) = recorded {
            debug!(error = %e, "Session already terminated");
        }

        let (status, error) = match outcome {
            Ok(_) => (AgentStatus::Complete, None),
            Err(e) => (AgentStatus::Error, Some(e.to_string())),
        };
        let _ = store
            .update_agent(&self.session_id, SUPERVISOR_AGENT, status, 100, error)
            .await;

        match outcome {
            Ok(result) => info!(confidence = result.confidence, "Investigation complete"),
            Err(e) => warn!(error = %e, "Investigation ended without a decision"),
        }

        if let Some(journal) = &self.deps.journal {
            match store.get(&self.session_id).await {
                Ok(session) => {
                    if let Err(e) = journal.append(&session).await {
                        warn!(error = %e, "Failed to append progress journal");
                    }
                }
                Err(e) => warn!(error = %e, "Session vanished before journaling"),
            }
        }
    }

    /// Write a report the worker never wrote, unless it raced us to it.
    async fn persist_synthesized(&self, result: &ScenarioResult) {
        match self.deps.reports.write(&self.scope, result).await {
            Ok(()) | Err(DomainError::ReportAlreadyWritten { .. }) => {}
            Err(e) => warn!(scenario_id = %result.id, error = %e, "Failed to persist synthesized report"),
        }
    }

    async fn enter(&self, phase: MacroPhase, iteration: u32) -> DomainResult<()> {
        let done = (iteration - 1) * PHASES_PER_ITERATION + phase.ordinal();
        let total = self.settings.max_iterations.max(1) * PHASES_PER_ITERATION;
        let progress = u8::try_from(done * 100 / total).unwrap_or(99);
        debug!(iteration, phase = %phase, progress, "Phase transition");
        self.deps
            .store
            .set_phase(&self.session_id, phase, iteration, progress)
            .await?;
        let _ = self
            .deps
            .store
            .update_agent(&self.session_id, SUPERVISOR_AGENT, AgentStatus::Running, progress, None)
            .await;
        Ok(())
    }

    async fn note(&self, message: String) -> DomainResult<()> {
        self.deps
            .store
            .log(&self.session_id, SUPERVISOR_AGENT, message)
            .await
    }
}

fn ensure_live(cancel: &CancellationToken) -> DomainResult<()> {
    if cancel.is_cancelled() {
        Err(cancelled())
    } else {
        Ok(())
    }
}

fn cancelled() -> DomainError {
    DomainError::Cancelled("session cancelled by caller".to_string())
}

/// Map a supervisor error to the session's failure designation.
pub fn failure_of(error: &DomainError) -> SessionFailure {
    let kind = match error {
        DomainError::IterationBudgetExhausted { .. } => FailureKind::NoSolutionFound,
        DomainError::Cancelled(_) => FailureKind::Cancelled,
        DomainError::Configuration(_) => FailureKind::Configuration,
        DomainError::Completion(e) if e.is_configuration() => FailureKind::Configuration,
        _ => FailureKind::Crashed,
    };
    let message = match error {
        DomainError::IterationBudgetExhausted { .. } => format!("no solution found: {error}"),
        DomainError::Completion(CompletionError::EmptyResponse) => {
            "orientation failed: the completion backend returned an empty reply".to_string()
        }
        _ => error.to_string(),
    };
    SessionFailure::new(kind, message)
}

fn orientation_prompt(
    request: &InvestigationRequest,
    observations: &Observations,
    iteration: u32,
    max_hypotheses: usize,
) -> String {
    let mut prompt = format!(
        "You are supervising a root-cause investigation of a software defect \
         (iteration {iteration}).\n\nError:\n{}\n",
        request.error
    );
    if !request.context.trim().is_empty() {
        let _ = write!(prompt, "\nContext:\n{}\n", request.context);
    }
    if let Some(language) = &request.language {
        let _ = writeln!(prompt, "\nLanguage: {language}");
    }
    if let Some(file) = &request.file_path {
        let _ = writeln!(prompt, "File: {file}");
    }

    if !observations.reports.is_empty() {
        prompt.push_str("\nTrials already run:\n");
        for report in &observations.reports {
            let outcome = if report.success { "confirmed" } else { "not confirmed" };
            let _ = writeln!(
                prompt,
                "- [{}] {}: {outcome}, confidence {:.2} ({}): {}",
                report.hypothesis_type,
                report.hypothesis,
                report.confidence,
                report.termination,
                report.insight()
            );
        }
    }
    if !observations.notes.is_empty() {
        prompt.push_str("\nObservations:\n");
        for note in &observations.notes {
            let _ = writeln!(prompt, "- {note}");
        }
    }

    let _ = write!(
        prompt,
        "\nPropose up to {max_hypotheses} distinct, testable hypotheses about the root cause. \
         Do not repeat hypotheses that were already rejected. Respond with a JSON array only:\n\
         [{{\"type\": \"short_label\", \"description\": \"what is wrong and how to test it\"}}]"
    );
    prompt
}
