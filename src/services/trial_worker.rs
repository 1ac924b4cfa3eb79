//! Trial worker: tests one hypothesis inside its own branch workspace.
//!
//! A worker runs a strictly sequential micro-cycle. Each turn it asks the
//! model for the next step, then either finishes on a `<report>` block or
//! executes the reply's tool calls one by one and feeds their output back.
//! Whatever happens, the worker writes exactly one report, restores its
//! workspace to the base revision and closes its capability connection.

use chrono::Utc;
use std::collections::{BTreeSet, HashMap};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::reply_parser::{apply_report, parse_reply, Directive, Reply};
use crate::domain::errors::{CompletionError, DirectiveParseError, DomainResult};
use crate::domain::models::{
    CapabilityRequest, FileOperation, GitOperation, ScenarioConfig, ScenarioResult, SessionScope,
    Termination, Transcript, BROADCAST_CHANNEL,
};
use crate::domain::ports::{
    CapabilityBroker, CapabilityConnection, CompletionClient, ObservationStore, ReportStore,
};
use crate::infrastructure::logging::redact;

/// Tool output beyond this many bytes is cut before it enters the transcript.
const MAX_TOOL_OUTPUT: usize = 16 * 1024;

const CORRECTIVE_HEADER: &str =
    "Tool call parsing failed; no tool calls from this message were executed:";

const CONTINUE_PROMPT: &str = "Continue the investigation. Use tool calls to gather evidence or \
     test a fix, or finish with a <report> block once you can confirm or reject the hypothesis.";

const PROTOCOL: &str = r#"You have two tool servers. Call a tool with a block like:

<use_mcp_tool>
<server_name>git-mcp</server_name>
<tool_name>git_diff</tool_name>
<arguments>{"target": "HEAD"}</arguments>
</use_mcp_tool>

Server "git-mcp": git_status, git_diff_unstaged, git_diff_staged, git_diff {target},
git_log {max_count}, git_show {revision}, git_add {files}, git_commit {message},
git_reset, git_checkout {target} (a commit or your own branch, never another
local branch).
Server "desktop-commander": read_file {path}, read_multiple_files {paths},
write_file {path, content}, edit_file {path, old_text, new_text},
list_directory {path}, create_directory {path}, search_files {path, pattern},
search_code {path, pattern, file_pattern}, execute_command {command, timeout_ms},
read_output {pid}, force_terminate {pid}.

Paths are relative to your workspace. Your branch already exists; do not create
or delete branches. Several tool calls in one message run in order. If any of
them is malformed, none of them run.

When you are done, reply with a single report block:

<report>
{"success": true, "confidence": 0.8, "fix_attempted": "...", "findings": "...",
 "explanation": "...", "metrics": {"fix_complexity": 2, "side_effect_risk": 1,
 "testing": {"cases_run": 3, "cases_passed": 3}}}
</report>

Plain "CONFIRMED: yes|no", "CONFIDENCE: high|medium|low", "FIX: ..." and
"EXPLANATION: ..." lines inside the report block are accepted too. Anything
after a report block is ignored."#;

/// How the micro-cycle ended, before the report is assembled.
enum Outcome {
    Reported(String),
    Failed(Termination, String),
}

/// What the worker observed while driving the micro-cycle.
#[derive(Default)]
struct TrialState {
    transcript: Transcript,
    turns: u32,
    tool_calls: u32,
    resources: BTreeSet<String>,
    validation_steps: Vec<String>,
    seen_observations: HashMap<String, usize>,
}

pub struct TrialWorker {
    completion: Arc<dyn CompletionClient>,
    broker: Arc<dyn CapabilityBroker>,
    reports: Arc<dyn ReportStore>,
    observations: Arc<dyn ObservationStore>,
    turn_delay: Duration,
}

impl TrialWorker {
    pub fn new(
        completion: Arc<dyn CompletionClient>,
        broker: Arc<dyn CapabilityBroker>,
        reports: Arc<dyn ReportStore>,
        observations: Arc<dyn ObservationStore>,
        turn_delay: Duration,
    ) -> Self {
        Self {
            completion,
            broker,
            reports,
            observations,
            turn_delay,
        }
    }

    /// Run the trial to completion and write its report.
    ///
    /// Only a failure to persist the report is returned as an error; every
    /// other failure becomes part of the report.
    #[instrument(skip(self, config, cancel), fields(scenario_id = %config.id, branch = %config.branch_name))]
    pub async fn run(
        &self,
        config: &ScenarioConfig,
        cancel: &CancellationToken,
    ) -> DomainResult<ScenarioResult> {
        let started = Instant::now();
        let deadline = started + config.timeout();
        let scope = config.scope();

        let mut conn = match self.broker.open(&config.workspace_path).await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, "Failed to open capability connection");
                let result = ScenarioResult::failed(
                    config,
                    Termination::SetupFailed,
                    format!("could not open workspace {}: {e}", config.workspace_path.display()),
                );
                self.reports.write(&scope, &result).await?;
                return Ok(result);
            }
        };

        let base = match conn
            .invoke(&CapabilityRequest::Git(GitOperation::GitRevParse {
                revision: "HEAD".to_string(),
            }))
            .await
        {
            Ok(revision) => Some(revision),
            Err(e) => {
                warn!(error = %e, "Could not record base revision; workspace will not be restored");
                None
            }
        };

        let mut state = TrialState::default();
        let outcome = self
            .drive(config, &scope, conn.as_mut(), &mut state, deadline, cancel)
            .await;

        let changes = match &base {
            Some(base) => self.restore(conn.as_mut(), base, &config.branch_name).await,
            None => None,
        };
        conn.close().await;

        let mut result = match outcome {
            Outcome::Reported(body) => apply_report(
                &body,
                ScenarioResult::new(&config.id, &config.hypothesis),
            ),
            Outcome::Failed(termination, explanation) => {
                ScenarioResult::failed(config, termination, explanation)
            }
        };
        finish_metrics(&mut result, config, &state, started.elapsed());
        result.changes = changes;
        result.completed_at = Utc::now();

        info!(
            termination = %result.termination,
            success = result.success,
            confidence = result.confidence,
            turns = state.turns,
            "Trial finished"
        );
        self.reports.write(&scope, &result).await?;
        Ok(result)
    }

    async fn drive(
        &self,
        config: &ScenarioConfig,
        scope: &SessionScope,
        conn: &mut dyn CapabilityConnection,
        state: &mut TrialState,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Outcome {
        let mut seed = initial_prompt(config);
        let observations = self.new_observations(scope, &config.id, state).await;
        if !observations.is_empty() {
            seed.push_str("\n\nObservations recorded so far:\n");
            for observation in &observations {
                let _ = writeln!(seed, "- {observation}");
            }
        }
        state.transcript.push_user(seed);

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return timed_out(config);
            }

            let reply = tokio::select! {
                () = cancel.cancelled() => {
                    return Outcome::Failed(Termination::Cancelled, "trial cancelled".to_string());
                }
                reply = tokio::time::timeout(
                    remaining,
                    self.completion.complete(state.transcript.messages()),
                ) => reply,
            };
            let text = match reply {
                Err(_) => return timed_out(config),
                Ok(Err(CompletionError::EmptyResponse)) => {
                    return Outcome::Failed(
                        Termination::EmptyCompletion,
                        "completion backend returned an empty reply".to_string(),
                    );
                }
                Ok(Err(e)) => {
                    return Outcome::Failed(
                        Termination::CompletionFailed,
                        format!("completion call failed: {e}"),
                    );
                }
                Ok(Ok(text)) => text,
            };

            state.turns += 1;
            debug!(turn = state.turns, reply_bytes = text.len(), "Model turn");
            state.transcript.push_assistant(text.as_str());

            let mut feedback = match parse_reply(&text) {
                Reply::Report(body) => return Outcome::Reported(body),
                Reply::Malformed(errors) => {
                    debug!(turn = state.turns, errors = errors.len(), "Rejected malformed tool calls");
                    corrective_message(&errors)
                }
                Reply::Directives(directives) => {
                    self.execute_all(config, conn, state, &directives, deadline).await
                }
                Reply::Narrative => CONTINUE_PROMPT.to_string(),
            };

            let observations = self.new_observations(scope, &config.id, state).await;
            for observation in observations {
                let _ = write!(feedback, "\n\nScientific observation: {observation}");
            }
            state.transcript.push_user(feedback);

            if Instant::now() >= deadline {
                return timed_out(config);
            }

            tokio::select! {
                () = cancel.cancelled() => {
                    return Outcome::Failed(Termination::Cancelled, "trial cancelled".to_string());
                }
                () = tokio::time::sleep(self.turn_delay.min(
                    deadline.saturating_duration_since(Instant::now()),
                )) => {}
            }
        }
    }

    /// Execute validated directives in reply order and render their output.
    async fn execute_all(
        &self,
        config: &ScenarioConfig,
        conn: &mut dyn CapabilityConnection,
        state: &mut TrialState,
        directives: &[Directive],
        deadline: Instant,
    ) -> String {
        let mut feedback = String::new();
        for directive in directives {
            let tool = directive.request.tool_name();
            if !feedback.is_empty() {
                feedback.push_str("\n\n");
            }

            if directive.request.mutates_branches() {
                debug!(tool, "Rejected branch mutation");
                let _ = write!(
                    feedback,
                    "Tool call '{tool}' was rejected: the workspace branch '{}' was already \
                     provisioned by the supervisor, and trials may not create or delete branches.",
                    config.branch_name
                );
                continue;
            }

            if let Some(branch) = foreign_branch(conn, config, &directive.request).await {
                debug!(tool, branch = %branch, "Rejected checkout of a foreign branch");
                let _ = write!(
                    feedback,
                    "Tool call '{tool}' was rejected: '{branch}' is a local branch outside this \
                     trial. Only the workspace branch '{}' or a detached commit may be checked out.",
                    config.branch_name
                );
                continue;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            let output = tokio::time::timeout(remaining, conn.invoke(&directive.request)).await;
            state.tool_calls += 1;
            match output {
                Ok(Ok(output)) => {
                    debug!(tool, output_bytes = output.len(), "Tool call succeeded");
                    track(state, &directive.request);
                    let _ = write!(
                        feedback,
                        "Result of '{tool}':\n{}",
                        truncate(&redact(&output), MAX_TOOL_OUTPUT)
                    );
                }
                Ok(Err(e)) => {
                    debug!(tool, error = %e, "Tool call failed");
                    let _ = write!(feedback, "Tool call failed for '{tool}': {}", redact(&e.to_string()));
                }
                Err(_) => {
                    let _ = write!(
                        feedback,
                        "Tool call failed for '{tool}': the trial's time budget ran out"
                    );
                    break;
                }
            }
        }
        feedback
    }

    /// Observations recorded on the broadcast channel and this trial's own
    /// channel since the last call.
    async fn new_observations(
        &self,
        scope: &SessionScope,
        scenario_id: &str,
        state: &mut TrialState,
    ) -> Vec<String> {
        let mut fresh = Vec::new();
        for channel in [BROADCAST_CHANNEL, scenario_id] {
            let recorded = match self.observations.read(scope, channel).await {
                Ok(recorded) => recorded,
                Err(e) => {
                    warn!(channel, error = %e, "Failed to read observations");
                    continue;
                }
            };
            let total = recorded.len();
            let seen = state.seen_observations.entry(channel.to_string()).or_insert(0);
            fresh.extend(recorded.into_iter().skip(*seen).map(|o| o.observation));
            *seen = total.max(*seen);
        }
        fresh
    }

    /// Capture the diff against `base`, then put `branch` back at it.
    async fn restore(
        &self,
        conn: &mut dyn CapabilityConnection,
        base: &str,
        branch: &str,
    ) -> Option<String> {
        let changes = match conn
            .invoke(&CapabilityRequest::Git(GitOperation::GitDiff {
                target: base.to_string(),
            }))
            .await
        {
            Ok(diff) if !diff.trim().is_empty() => Some(diff),
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "Failed to capture workspace changes");
                None
            }
        };
        if let Err(e) = conn
            .invoke(&CapabilityRequest::Git(GitOperation::GitRestore {
                revision: base.to_string(),
                branch: branch.to_string(),
            }))
            .await
        {
            warn!(error = %e, "Failed to restore workspace to its base revision");
        }
        changes
    }
}

fn initial_prompt(config: &ScenarioConfig) -> String {
    let request = &config.request;
    let mut prompt = format!(
        "You are testing one hypothesis about the cause of a software defect.\n\n\
         Branch: {}\nHypothesis ({}): {}\n\nError:\n{}\n",
        config.branch_name, config.hypothesis.kind, config.hypothesis.description, request.error
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
    let _ = write!(
        prompt,
        "\nYou have {} seconds. Reproduce the problem, try a fix, and validate it.\n\n{PROTOCOL}",
        config.timeout().as_secs()
    );
    prompt
}

/// The local branch a `git_checkout` would switch to, when it is not the
/// trial's own. Anything that does not resolve under `refs/heads/` detaches.
async fn foreign_branch(
    conn: &mut dyn CapabilityConnection,
    config: &ScenarioConfig,
    request: &CapabilityRequest,
) -> Option<String> {
    let CapabilityRequest::Git(GitOperation::GitCheckout { target }) = request else {
        return None;
    };
    let target = target.trim();
    if target == config.branch_name {
        return None;
    }
    let local = conn
        .invoke(&CapabilityRequest::Git(GitOperation::GitRevParse {
            revision: format!("refs/heads/{target}"),
        }))
        .await
        .is_ok();
    local.then(|| target.to_string())
}

fn corrective_message(errors: &[DirectiveParseError]) -> String {
    let mut message = CORRECTIVE_HEADER.to_string();
    for error in errors {
        let _ = write!(message, "\n- {error}");
    }
    message
}

fn timed_out(config: &ScenarioConfig) -> Outcome {
    Outcome::Failed(
        Termination::TimedOut,
        format!(
            "trial exceeded its {}s time budget before reporting",
            config.timeout().as_secs()
        ),
    )
}

/// Record resources a successful call mutated and validation it performed.
fn track(state: &mut TrialState, request: &CapabilityRequest) {
    match request {
        CapabilityRequest::File(op) => {
            if let Some(path) = op.written_path() {
                state.resources.insert(path.to_string());
            }
            if let FileOperation::ExecuteCommand { command, .. } = op {
                if !state.validation_steps.contains(command) {
                    state.validation_steps.push(command.clone());
                }
            }
        }
        CapabilityRequest::Git(GitOperation::GitAdd { files }) => {
            state.resources.extend(files.iter().cloned());
        }
        CapabilityRequest::Git(_) => {}
    }
}

fn finish_metrics(
    result: &mut ScenarioResult,
    config: &ScenarioConfig,
    state: &TrialState,
    elapsed: Duration,
) {
    let metrics = &mut result.metrics;
    metrics.progress.time_spent_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
    metrics.progress.steps_completed = metrics.progress.steps_completed.max(state.tool_calls);
    metrics.progress.total_steps = metrics.progress.total_steps.max(state.turns);
    metrics
        .progress
        .resources_used
        .extend(state.resources.iter().cloned());
    for step in &state.validation_steps {
        if !metrics.testing.validation_steps.contains(step) {
            metrics.testing.validation_steps.push(step.clone());
        }
    }
    if metrics.adaptation.attempt_number == 0 {
        metrics.adaptation.attempt_number = config.iteration;
    }
    if result.success && metrics.success_probability <= 0.0 {
        metrics.success_probability = result.confidence;
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n[output truncated: {} bytes omitted]", &text[..end], text.len() - end)
}
