//! Investigate command: run one session in the foreground.

use anyhow::{Context, Result};
use clap::Args;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::cli::output::{output, CommandOutput, ScenarioSummary, TableFormatter};
use crate::domain::models::{Config, InvestigationRequest, Session, SessionStatus};
use crate::services::InvestigationService;

#[derive(Args, Debug)]
pub struct InvestigateArgs {
    /// Error message or symptom to investigate
    #[arg(short, long)]
    pub error: String,

    /// Extra context: stack trace, recent changes, reproduction notes
    #[arg(short = 'x', long, default_value = "")]
    pub context: String,

    /// Language of the code under investigation
    #[arg(short, long)]
    pub language: Option<String>,

    /// File the error points at
    #[arg(short, long)]
    pub file: Option<String>,

    /// Repository to investigate
    #[arg(short, long, default_value = ".")]
    pub repo: PathBuf,
}

#[derive(Debug, serde::Serialize)]
pub struct InvestigationOutput {
    pub session_id: String,
    pub status: String,
    pub iterations: u32,
    pub confidence: Option<f64>,
    pub primary_fix: Option<String>,
    pub supporting_fixes: Vec<String>,
    pub conflicts: Vec<String>,
    pub failure: Option<String>,
    pub scenarios: Vec<ScenarioSummary>,
}

impl From<&Session> for InvestigationOutput {
    fn from(session: &Session) -> Self {
        let result = session.final_result.as_ref();
        Self {
            session_id: session.id.clone(),
            status: session.status.to_string(),
            iterations: session.iteration,
            confidence: result.map(|r| r.confidence),
            primary_fix: result.map(|r| r.primary_fix.clone()),
            supporting_fixes: result.map(|r| r.supporting_fixes.clone()).unwrap_or_default(),
            conflicts: result
                .map(|r| r.conflicts.iter().map(|c| c.reason.clone()).collect())
                .unwrap_or_default(),
            failure: session
                .failure
                .as_ref()
                .map(|f| format!("{}: {}", f.kind.as_str(), f.message)),
            scenarios: session
                .scenario_results
                .iter()
                .map(ScenarioSummary::from)
                .collect(),
        }
    }
}

impl CommandOutput for InvestigationOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![
            format!("Session: {}", self.session_id),
            format!("Status: {}", self.status),
            format!("Iterations: {}", self.iterations),
        ];
        if let (Some(confidence), Some(fix)) = (self.confidence, &self.primary_fix) {
            lines.push(format!("Confidence: {confidence:.3}"));
            lines.push(format!("Primary fix: {fix}"));
        }
        for fix in &self.supporting_fixes {
            lines.push(format!("  supporting: {fix}"));
        }
        for conflict in &self.conflicts {
            lines.push(format!("  conflict: {conflict}"));
        }
        if let Some(failure) = &self.failure {
            lines.push(format!("Failure: {failure}"));
        }

        if !self.scenarios.is_empty() {
            lines.push(String::new());
            lines.push(TableFormatter::new().format_scenarios(&self.scenarios));
        }
        lines.join("\n")
    }
}

fn build_request(args: InvestigateArgs) -> Result<InvestigationRequest> {
    let repo = std::fs::canonicalize(&args.repo)
        .with_context(|| format!("Repository path {} does not exist", args.repo.display()))?;
    let mut request = InvestigationRequest::new(args.error, repo).with_context(args.context);
    if let Some(language) = args.language {
        request = request.with_language(language);
    }
    if let Some(file) = args.file {
        request = request.with_file_path(file);
    }
    Ok(request)
}

pub async fn execute(
    args: InvestigateArgs,
    config: Config,
    config_file: Option<&Path>,
    json_mode: bool,
) -> Result<i32> {
    let request = build_request(args)?;
    let service = InvestigationService::local(config, config_file)?;
    let session_id = service
        .start(request)
        .await
        .context("Failed to start investigation")?;

    let wait = service.wait(&session_id);
    tokio::pin!(wait);
    let session = tokio::select! {
        session = &mut wait => session?,
        _ = tokio::signal::ctrl_c() => {
            warn!(session_id = %session_id, "Interrupted, cancelling session");
            service.cancel(&session_id).await?;
            wait.await?
        }
    };

    output(&InvestigationOutput::from(&session), json_mode);
    Ok(exit_code(session.status))
}

/// 0 for a confident decision, 2 for none; 1 is left to command failures.
const fn exit_code(status: SessionStatus) -> i32 {
    match status {
        SessionStatus::Complete => 0,
        _ => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{AggregatedResult, FailureKind, Hypothesis, ScenarioResult, SessionFailure};

    #[test]
    fn test_output_of_failed_session() {
        let mut session = Session::new("session-1", InvestigationRequest::new("boom", "/tmp"));
        session
            .fail(SessionFailure::new(FailureKind::NoSolutionFound, "no solution found"))
            .unwrap();
        let out = InvestigationOutput::from(&session);
        assert_eq!(out.status, "error");
        assert!(out.primary_fix.is_none());
        assert!(out.to_human().contains("Failure: no_solution_found: no solution found"));
    }

    #[test]
    fn test_output_of_complete_session() {
        let mut session = Session::new("session-2", InvestigationRequest::new("boom", "/tmp"));
        let mut result = AggregatedResult::no_solution();
        result.success = true;
        result.confidence = 0.768;
        result.primary_fix = "invalidate the cache on write".into();
        session.complete(result).unwrap();

        let human = InvestigationOutput::from(&session).to_human();
        assert!(human.contains("Confidence: 0.768"));
        assert!(human.contains("Primary fix: invalidate the cache on write"));
    }

    #[test]
    fn test_scenarios_render_as_table() {
        let mut session = Session::new("session-3", InvestigationRequest::new("boom", "/tmp"));
        session.scenario_results.push(
            ScenarioResult::new("scenario-1-1", &Hypothesis::new("cache", "stale cache"))
                .succeeded()
                .with_confidence(0.9)
                .with_explanation("stale entries survive updates"),
        );

        let human = InvestigationOutput::from(&session).to_human();
        assert!(human.contains("Scenario"));
        assert!(human.contains("Insight"));
        assert!(human.contains("scenario-1-1"));
        assert!(human.contains("0.90"));
    }
}
