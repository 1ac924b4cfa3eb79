//! Report CLI commands: read what trial workers persisted.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use std::path::{Path, PathBuf};

use crate::adapters::storage::FileReportStore;
use crate::cli::output::{output, CommandOutput, ScenarioSummary, TableFormatter};
use crate::domain::models::{Config, ScenarioResult, SessionScope};
use crate::domain::ports::ReportStore;

#[derive(Args, Debug)]
pub struct ReportArgs {
    #[command(subcommand)]
    pub command: ReportCommands,
}

#[derive(Subcommand, Debug)]
pub enum ReportCommands {
    /// List the reports of a session
    List {
        /// Repository the session investigated
        #[arg(short, long, default_value = ".")]
        repo: PathBuf,
        /// Session ID
        #[arg(short, long)]
        session: String,
    },
    /// Show one report in full
    Show {
        #[arg(short, long, default_value = ".")]
        repo: PathBuf,
        #[arg(short, long)]
        session: String,
        /// Scenario ID
        scenario: String,
    },
}

#[derive(Debug, serde::Serialize)]
pub struct ReportListOutput {
    pub session_id: String,
    pub reports: Vec<ScenarioResult>,
    pub total: usize,
}

impl CommandOutput for ReportListOutput {
    fn to_human(&self) -> String {
        if self.reports.is_empty() {
            return format!("No reports found for session {}.", self.session_id);
        }

        let rows: Vec<ScenarioSummary> = self.reports.iter().map(ScenarioSummary::from).collect();
        format!(
            "Found {} report(s):\n{}",
            self.total,
            TableFormatter::new().format_reports(&rows)
        )
    }
}

#[derive(Debug, serde::Serialize)]
pub struct ReportDetailOutput {
    pub report: ScenarioResult,
}

impl CommandOutput for ReportDetailOutput {
    fn to_human(&self) -> String {
        let r = &self.report;
        let mut lines = vec![
            format!("Scenario: {}", r.id),
            format!("Hypothesis: [{}] {}", r.hypothesis_type, r.hypothesis),
            format!("Success: {}", r.success),
            format!("Confidence: {:.2}", r.confidence),
            format!("Termination: {}", r.termination),
            format!("Completed: {}", r.completed_at.to_rfc3339()),
        ];
        if !r.fix_attempted.is_empty() {
            lines.push(format!("Fix attempted: {}", r.fix_attempted));
        }
        if !r.explanation.is_empty() {
            lines.push(format!("Explanation: {}", r.explanation));
        }
        let resources = &r.metrics.progress.resources_used;
        if !resources.is_empty() {
            let names: Vec<&str> = resources.iter().map(String::as_str).collect();
            lines.push(format!("Resources: {}", names.join(", ")));
        }
        lines.push(format!("\nFindings:\n{}", r.findings));
        if let Some(changes) = &r.changes {
            lines.push(format!("\nChanges:\n{changes}"));
        }
        lines.join("\n")
    }
}

fn scope_for(repo: &Path, session: &str) -> Result<SessionScope> {
    let repo = std::fs::canonicalize(repo)
        .with_context(|| format!("Repository path {} does not exist", repo.display()))?;
    Ok(SessionScope::new(session, &repo))
}

pub async fn execute(args: ReportArgs, config: Config, json_mode: bool) -> Result<()> {
    let store = FileReportStore::new(&config.data_root);

    match args.command {
        ReportCommands::List { repo, session } => {
            let scope = scope_for(&repo, &session)?;
            let reports = store.list(&scope).await?;
            let out = ReportListOutput {
                session_id: session,
                total: reports.len(),
                reports,
            };
            output(&out, json_mode);
        }
        ReportCommands::Show {
            repo,
            session,
            scenario,
        } => {
            let scope = scope_for(&repo, &session)?;
            let report = store
                .read(&scope, &scenario)
                .await?
                .ok_or_else(|| anyhow::anyhow!("Report not found: {scenario} in {session}"))?;
            output(&ReportDetailOutput { report }, json_mode);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::Hypothesis;

    #[test]
    fn test_empty_report_list() {
        let out = ReportListOutput {
            session_id: "session-1".into(),
            reports: Vec::new(),
            total: 0,
        };
        assert_eq!(out.to_human(), "No reports found for session session-1.");
    }

    #[test]
    fn test_report_list_renders_table() {
        let report = ScenarioResult::new("scenario-2-3", &Hypothesis::new("async", "missing await"))
            .with_confidence(0.4);
        let out = ReportListOutput {
            session_id: "session-1".into(),
            reports: vec![report],
            total: 1,
        };
        let human = out.to_human();
        assert!(human.starts_with("Found 1 report(s):"));
        assert!(human.contains("scenario-2-3"));
        assert!(human.contains("Termination"));
        assert!(!human.contains("Insight"));
    }
}
