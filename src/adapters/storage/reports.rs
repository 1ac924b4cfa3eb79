//! Scenario reports, one JSON file per scenario.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::{file_component, memory_bank_root, session_dir};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{ScenarioResult, SessionScope};
use crate::domain::ports::ReportStore;

#[derive(Debug, Clone)]
pub struct FileReportStore {
    root: PathBuf,
}

impl FileReportStore {
    pub fn new(data_root: impl AsRef<Path>) -> Self {
        Self {
            root: memory_bank_root(data_root.as_ref()),
        }
    }

    fn reports_dir(&self, scope: &SessionScope) -> DomainResult<PathBuf> {
        Ok(session_dir(&self.root, scope)?.join("reports"))
    }

    fn report_path(&self, scope: &SessionScope, scenario_id: &str) -> DomainResult<PathBuf> {
        Ok(self
            .reports_dir(scope)?
            .join(format!("{}.json", file_component(scenario_id)?)))
    }
}

#[async_trait]
impl ReportStore for FileReportStore {
    /// The report is staged next to its final name and hard-linked into
    /// place, so readers never see a partial file and a second write fails.
    async fn write(&self, scope: &SessionScope, result: &ScenarioResult) -> DomainResult<()> {
        let path = self.report_path(scope, &result.id)?;
        let dir = self.reports_dir(scope)?;
        tokio::fs::create_dir_all(&dir).await?;

        let staged = dir.join(format!(".{}.{}.tmp", result.id, uuid::Uuid::new_v4()));
        tokio::fs::write(&staged, serde_json::to_vec_pretty(result)?).await?;
        let linked = tokio::fs::hard_link(&staged, &path).await;
        let _ = tokio::fs::remove_file(&staged).await;

        match linked {
            Ok(()) => {
                debug!(
                    session_id = %scope.session_id,
                    scenario_id = %result.id,
                    success = result.success,
                    "Report written"
                );
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(DomainError::ReportAlreadyWritten {
                session_id: scope.session_id.clone(),
                scenario_id: result.id.clone(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn read(
        &self,
        scope: &SessionScope,
        scenario_id: &str,
    ) -> DomainResult<Option<ScenarioResult>> {
        let path = self.report_path(scope, scenario_id)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, scope: &SessionScope) -> DomainResult<Vec<ScenarioResult>> {
        let dir = self.reports_dir(scope)?;
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_report = path.extension().is_some_and(|ext| ext == "json")
                && !entry.file_name().to_string_lossy().starts_with('.');
            if is_report {
                paths.push(path);
            }
        }
        paths.sort();

        let mut reports = Vec::with_capacity(paths.len());
        for path in paths {
            let bytes = tokio::fs::read(&path).await?;
            match serde_json::from_slice(&bytes) {
                Ok(report) => reports.push(report),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable report"),
            }
        }
        Ok(reports)
    }
}
