//! Per-project progress journal: one markdown line per finished session.

use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use super::{file_component, memory_bank_root};
use crate::domain::errors::DomainResult;
use crate::domain::models::{Session, SessionStatus};
use crate::domain::ports::ProgressLog;

#[derive(Debug, Clone)]
pub struct ProgressJournal {
    root: PathBuf,
}

impl ProgressJournal {
    pub fn new(data_root: impl AsRef<Path>) -> Self {
        Self {
            root: memory_bank_root(data_root.as_ref()),
        }
    }

    pub fn path(&self, project_id: &str) -> DomainResult<PathBuf> {
        Ok(self.root.join(file_component(project_id)?).join("progress.md"))
    }
}

#[async_trait]
impl ProgressLog for ProgressJournal {
    /// Append the summary line for a finished session.
    async fn append(&self, session: &Session) -> DomainResult<()> {
        let path = self.path(&session.request.project_id())?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(summary_line(session).as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

fn summary_line(session: &Session) -> String {
    let outcome = match (&session.status, &session.final_result, &session.failure) {
        (SessionStatus::Complete, Some(result), _) => format!(
            "complete, confidence {:.2}: {}",
            result.confidence,
            single_line(&result.primary_fix)
        ),
        (_, _, Some(failure)) => format!(
            "{} ({}): {}",
            session.status,
            failure.kind.as_str(),
            single_line(&failure.message)
        ),
        _ => session.status.to_string(),
    };
    format!(
        "- {} `{}` {} iteration(s), {} scenario(s): {} | {}\n",
        Utc::now().format("%Y-%m-%d %H:%M:%S"),
        session.id,
        session.iteration,
        session.scenario_results.len(),
        outcome,
        single_line(&session.request.error)
    )
}

fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
