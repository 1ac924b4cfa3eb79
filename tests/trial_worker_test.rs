//! Trial worker micro-cycle tests against a recording capability broker.

mod common;

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use common::{scenario_config, temp_dir, RecordingBroker};
use sleuth::adapters::completion::ScriptedCompletionClient;
use sleuth::adapters::storage::{FileReportStore, JsonlObservationStore};
use sleuth::domain::errors::CompletionError;
use sleuth::domain::models::{
    CapabilityRequest, FileOperation, GitOperation, Role, Termination, WorkerExit,
    BROADCAST_CHANNEL,
};
use sleuth::domain::ports::{ObservationStore, ReportStore, WorkerLauncher};
use sleuth::services::{TaskWorkerLauncher, TrialWorker};

const REPORT: &str = r#"I reproduced it and the fix holds.
<report>
{"success": true, "confidence": 0.85, "fix_attempted": "invalidate taskCache on write",
 "explanation": "stale cache entries survive task updates"}
</report>"#;

struct Harness {
    _dir: tempfile::TempDir,
    broker: RecordingBroker,
    completion: Arc<ScriptedCompletionClient>,
    reports: Arc<FileReportStore>,
    observations: Arc<JsonlObservationStore>,
    worker: TrialWorker,
    config: sleuth::domain::models::ScenarioConfig,
}

fn harness(completion: ScriptedCompletionClient, broker: RecordingBroker) -> Harness {
    let dir = temp_dir();
    let workspace = dir.path().join("workspace");
    std::fs::create_dir_all(&workspace).unwrap();
    let completion = Arc::new(completion);
    let reports = Arc::new(FileReportStore::new(dir.path()));
    let observations = Arc::new(JsonlObservationStore::new(dir.path()));
    let worker = TrialWorker::new(
        completion.clone(),
        Arc::new(broker.clone()),
        reports.clone(),
        observations.clone(),
        Duration::from_millis(1),
    );
    let config = scenario_config(dir.path(), &workspace, "scenario-1-1");
    Harness {
        _dir: dir,
        broker,
        completion,
        reports,
        observations,
        worker,
        config,
    }
}

#[tokio::test]
async fn test_report_on_first_turn_is_persisted() {
    let h = harness(ScriptedCompletionClient::new([REPORT]), RecordingBroker::new());

    let result = h
        .worker
        .run(&h.config, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.termination, Termination::Reported);
    assert!(result.success);
    assert!((result.confidence - 0.85).abs() < f64::EPSILON);
    assert_eq!(result.fix_attempted, "invalidate taskCache on write");
    assert_eq!(result.termination.exit_code(), 0);

    let stored = h
        .reports
        .read(&h.config.scope(), &h.config.id)
        .await
        .unwrap()
        .expect("report written");
    assert_eq!(stored.id, "scenario-1-1");
    assert!(stored.success);
    assert!(h.broker.restored());
    assert_eq!(h.broker.close_count(), 1);
}

#[tokio::test]
async fn test_report_wins_over_tool_calls_in_same_reply() {
    let reply = format!(
        "<use_mcp_tool>\n<server_name>desktop-commander</server_name>\n\
         <tool_name>write_file</tool_name>\n\
         <arguments>{{\"path\": \"cache.js\", \"content\": \"x\"}}</arguments>\n\
         </use_mcp_tool>\n{REPORT}"
    );
    let h = harness(ScriptedCompletionClient::new([reply]), RecordingBroker::new());

    let result = h
        .worker
        .run(&h.config, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.termination, Termination::Reported);
    assert!(h.broker.directed().is_empty(), "no tool call may run");
    assert_eq!(h.completion.call_count().await, 1);
}

#[tokio::test]
async fn test_empty_first_completion_fails_but_restores_and_closes() {
    let h = harness(
        ScriptedCompletionClient::with_results([Err(CompletionError::EmptyResponse)]),
        RecordingBroker::new(),
    );

    let result = h
        .worker
        .run(&h.config, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.termination, Termination::EmptyCompletion);
    assert!(!result.success);
    assert_ne!(result.termination.exit_code(), 0);
    assert!(h.broker.restored());
    assert_eq!(h.broker.close_count(), 1);
    let stored = h
        .reports
        .read(&h.config.scope(), &h.config.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.termination, Termination::EmptyCompletion);
}

#[tokio::test]
async fn test_completion_error_is_recorded() {
    let h = harness(
        ScriptedCompletionClient::with_results([Err(CompletionError::Api {
            status: 400,
            body: "bad request".into(),
        })]),
        RecordingBroker::new(),
    );

    let result = h
        .worker
        .run(&h.config, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.termination, Termination::CompletionFailed);
    assert!(result.explanation.contains("bad request"));
}

#[tokio::test]
async fn test_malformed_batch_executes_nothing_and_adds_one_message() {
    let malformed = "<use_mcp_tool>\n<server_name>git-mcp</server_name>\n\
        <tool_name>git_status</tool_name>\n<arguments>{}</arguments>\n</use_mcp_tool>\n\
        <use_mcp_tool>\n<server_name>slack</server_name>\n<tool_name>post</tool_name>\n\
        <arguments>{}</arguments>\n</use_mcp_tool>";
    let h = harness(
        ScriptedCompletionClient::new([malformed, REPORT]),
        RecordingBroker::new(),
    );

    h.worker
        .run(&h.config, &CancellationToken::new())
        .await
        .unwrap();

    assert!(h.broker.directed().is_empty());
    let calls = h.completion.calls().await;
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].len(), 1);
    // seed, the malformed reply, one corrective message
    assert_eq!(calls[1].len(), 3);
    let corrective = &calls[1][2];
    assert_eq!(corrective.role, Role::User);
    assert!(corrective
        .content
        .starts_with("Tool call parsing failed; no tool calls from this message were executed:"));
    assert!(corrective.content.contains("unknown server 'slack'"));
}

#[tokio::test]
async fn test_directives_run_in_order_and_feed_back() {
    let batch = "<use_mcp_tool>\n<server_name>desktop-commander</server_name>\n\
        <tool_name>edit_file</tool_name>\n\
        <arguments>{\"path\": \"cache.js\", \"old_text\": \"{}\", \"new_text\": \"new Map()\"}</arguments>\n\
        </use_mcp_tool>\n\
        <use_mcp_tool>\n<server_name>desktop-commander</server_name>\n\
        <tool_name>execute_command</tool_name>\n<arguments>{\"command\": \"npm test\"}</arguments>\n\
        </use_mcp_tool>";
    let broker = RecordingBroker::new();
    broker.answer("execute_command", "12 passing");
    let h = harness(ScriptedCompletionClient::new([batch, REPORT]), broker);

    let result = h
        .worker
        .run(&h.config, &CancellationToken::new())
        .await
        .unwrap();

    let directed = h.broker.directed();
    assert_eq!(directed.len(), 2);
    assert!(matches!(
        &directed[0],
        CapabilityRequest::File(FileOperation::EditFile { path, .. }) if path == "cache.js"
    ));
    assert!(matches!(
        &directed[1],
        CapabilityRequest::File(FileOperation::ExecuteCommand { command, .. }) if command == "npm test"
    ));

    let calls = h.completion.calls().await;
    let feedback = &calls[1].last().unwrap().content;
    let edit = feedback.find("Result of 'edit_file'").unwrap();
    let test = feedback.find("Result of 'execute_command':\n12 passing").unwrap();
    assert!(edit < test);

    assert!(result.metrics.progress.resources_used.contains("cache.js"));
    assert_eq!(result.metrics.testing.validation_steps, vec!["npm test"]);
    assert_eq!(result.metrics.progress.steps_completed, 2);
}

#[tokio::test]
async fn test_branch_mutation_is_rejected_not_executed() {
    let create = "<use_mcp_tool>\n<server_name>git-mcp</server_name>\n\
        <tool_name>git_create_branch</tool_name>\n\
        <arguments>{\"branch_name\": \"my-fix\"}</arguments>\n</use_mcp_tool>";
    let h = harness(
        ScriptedCompletionClient::new([create, REPORT]),
        RecordingBroker::new(),
    );

    h.worker
        .run(&h.config, &CancellationToken::new())
        .await
        .unwrap();

    assert!(h.broker.directed().is_empty());
    let calls = h.completion.calls().await;
    let feedback = &calls[1].last().unwrap().content;
    assert!(feedback.contains("'git_create_branch' was rejected"));
    assert!(feedback.contains(&h.config.branch_name));
}

#[tokio::test]
async fn test_wall_clock_budget_ends_trial() {
    let mut h = harness(
        ScriptedCompletionClient::new(Vec::<String>::new())
            .with_fallback("Still looking at the code."),
        RecordingBroker::new(),
    );
    h.config.timeout_ms = 50;

    let result = h
        .worker
        .run(&h.config, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.termination, Termination::TimedOut);
    assert!(h.broker.restored());
    assert_eq!(h.broker.close_count(), 1);
}

#[tokio::test]
async fn test_cancelled_trial_still_reports() {
    let h = harness(
        ScriptedCompletionClient::new(Vec::<String>::new()).with_fallback("thinking"),
        RecordingBroker::new(),
    );
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = h.worker.run(&h.config, &cancel).await.unwrap();

    assert_eq!(result.termination, Termination::Cancelled);
    assert!(h
        .reports
        .read(&h.config.scope(), &h.config.id)
        .await
        .unwrap()
        .is_some());
    assert_eq!(h.broker.close_count(), 1);
}

#[tokio::test]
async fn test_unavailable_workspace_is_a_setup_failure() {
    let h = harness(
        ScriptedCompletionClient::new([REPORT]),
        RecordingBroker::failing_open(),
    );

    let result = h
        .worker
        .run(&h.config, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.termination, Termination::SetupFailed);
    assert_eq!(h.completion.call_count().await, 0);
}

#[tokio::test]
async fn test_observations_reach_the_transcript() {
    let h = harness(
        ScriptedCompletionClient::new(["Reading the code first.", REPORT]),
        RecordingBroker::new(),
    );
    let scope = h.config.scope();
    h.observations
        .record(&scope, BROADCAST_CHANNEL, "only fails under load")
        .await
        .unwrap();
    h.observations
        .record(&scope, &h.config.id, "check the eviction timer")
        .await
        .unwrap();

    h.worker
        .run(&h.config, &CancellationToken::new())
        .await
        .unwrap();

    let calls = h.completion.calls().await;
    let seed = &calls[0][0].content;
    assert!(seed.contains("only fails under load"));
    assert!(seed.contains("check the eviction timer"));
    assert!(seed.contains(&h.config.branch_name));
    // Already-seen observations are not repeated on later turns.
    assert!(!calls[1].last().unwrap().content.contains("Scientific observation"));
}

#[tokio::test]
async fn test_checkout_is_limited_to_the_workspace_branch() {
    let checkout = |target: &str| {
        format!(
            "<use_mcp_tool>\n<server_name>git-mcp</server_name>\n\
             <tool_name>git_checkout</tool_name>\n\
             <arguments>{{\"target\": \"{target}\"}}</arguments>\n</use_mcp_tool>"
        )
    };
    let mut h = harness(ScriptedCompletionClient::new([REPORT]), RecordingBroker::new());
    let own = h.config.branch_name.clone();
    h.completion = Arc::new(ScriptedCompletionClient::new([
        checkout("main"),
        checkout(&own),
        REPORT.to_string(),
    ]));
    let worker = TrialWorker::new(
        h.completion.clone(),
        Arc::new(h.broker.clone()),
        h.reports.clone(),
        h.observations.clone(),
        Duration::from_millis(1),
    );

    worker.run(&h.config, &CancellationToken::new()).await.unwrap();

    let checkouts: Vec<_> = h
        .broker
        .directed()
        .into_iter()
        .filter_map(|r| match r {
            CapabilityRequest::Git(GitOperation::GitCheckout { target }) => Some(target),
            _ => None,
        })
        .collect();
    assert_eq!(checkouts, vec![own.clone()]);
    let calls = h.completion.calls().await;
    assert!(calls[1]
        .last()
        .unwrap()
        .content
        .contains("'main' is a local branch outside this trial"));
    assert!(h.broker.requests().iter().any(|r| matches!(
        r,
        CapabilityRequest::Git(GitOperation::GitRestore { branch, .. }) if *branch == own
    )));
}

#[tokio::test]
async fn test_overrunning_task_trial_unwinds_before_abort() {
    let broker = RecordingBroker::new();
    // Setup outlasts the trial's whole budget, past the launcher's deadline.
    broker.slow("git_rev_parse", Duration::from_millis(300));
    let mut h = harness(ScriptedCompletionClient::new([REPORT]), broker);
    h.config.timeout_ms = 50;
    let launcher = TaskWorkerLauncher::new(Arc::new(h.worker), Duration::ZERO);

    let exit = launcher.launch(&h.config, CancellationToken::new()).await;

    assert_eq!(exit, WorkerExit::TimedOut);
    assert!(h.broker.restored());
    assert_eq!(h.broker.close_count(), 1);
    let stored = h
        .reports
        .read(&h.config.scope(), &h.config.id)
        .await
        .unwrap()
        .expect("report written while unwinding");
    assert_ne!(stored.termination, Termination::Reported);
}
