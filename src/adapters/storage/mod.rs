//! File-backed memory bank.
//!
//! ```text
//! <data_root>/memory-bank/<project_id>/
//!     progress.md
//!     sessions/<session_id>/reports/<scenario_id>.json
//!     sessions/<session_id>/observations/<channel>.log
//!     sessions/<session_id>/scenarios/<scenario_id>.json
//! ```

pub mod observations;
pub mod progress;
pub mod reports;

use std::path::{Path, PathBuf};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::SessionScope;

pub use observations::JsonlObservationStore;
pub use progress::ProgressJournal;
pub use reports::FileReportStore;

/// Root of the memory bank under a data root.
pub fn memory_bank_root(data_root: &Path) -> PathBuf {
    data_root.join("memory-bank")
}

fn session_dir(root: &Path, scope: &SessionScope) -> DomainResult<PathBuf> {
    Ok(root
        .join(file_component(&scope.project_id)?)
        .join("sessions")
        .join(file_component(&scope.session_id)?))
}

/// Where the scenario config handed to an out-of-process worker is written.
pub fn scenario_file(
    data_root: &Path,
    scope: &SessionScope,
    scenario_id: &str,
) -> DomainResult<PathBuf> {
    Ok(session_dir(&memory_bank_root(data_root), scope)?
        .join("scenarios")
        .join(format!("{}.json", file_component(scenario_id)?)))
}

/// Reject names that would escape their directory.
fn file_component(name: &str) -> DomainResult<&str> {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0']);
    if valid {
        Ok(name)
    } else {
        Err(DomainError::InvalidRequest(format!(
            "'{name}' is not a valid memory bank name"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_component_rejects_traversal() {
        assert!(file_component("scenario-1-1").is_ok());
        assert!(file_component("..").is_err());
        assert!(file_component("a/b").is_err());
        assert!(file_component("").is_err());
    }
}
