//! The defect report an investigation starts from, and the keys that scope
//! its persisted artifacts.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::domain::errors::{DomainError, DomainResult};

/// What the caller knows about the defect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct InvestigationRequest {
    /// Error message or symptom description
    pub error: String,

    /// Free-text context (stack traces, recent changes, reproduction notes)
    #[serde(default)]
    pub context: String,

    #[serde(default)]
    pub language: Option<String>,

    /// File the error points at, if known
    #[serde(default)]
    pub file_path: Option<String>,

    /// Repository under investigation
    pub repo_path: PathBuf,
}

impl InvestigationRequest {
    pub fn new(error: impl Into<String>, repo_path: impl Into<PathBuf>) -> Self {
        Self {
            error: error.into(),
            context: String::new(),
            language: None,
            file_path: None,
            repo_path: repo_path.into(),
        }
    }

    #[must_use]
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    #[must_use]
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    #[must_use]
    pub fn with_file_path(mut self, file_path: impl Into<String>) -> Self {
        self.file_path = Some(file_path.into());
        self
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.error.trim().is_empty() {
            return Err(DomainError::InvalidRequest(
                "error description cannot be empty".to_string(),
            ));
        }
        if !self.repo_path.is_dir() {
            return Err(DomainError::InvalidRequest(format!(
                "repository path {} is not a directory",
                self.repo_path.display()
            )));
        }
        Ok(())
    }

    pub fn project_id(&self) -> String {
        project_id(&self.repo_path)
    }
}

/// Stable identifier of a repository: first 12 hex chars of SHA-256 of its path.
pub fn project_id(repo_path: &Path) -> String {
    let digest = Sha256::digest(repo_path.to_string_lossy().as_bytes());
    let mut id = hex::encode(digest);
    id.truncate(12);
    id
}

/// Addresses the memory bank of one session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionScope {
    pub project_id: String,
    pub session_id: String,
}

impl SessionScope {
    pub fn new(session_id: impl Into<String>, repo_path: &Path) -> Self {
        Self {
            project_id: project_id(repo_path),
            session_id: session_id.into(),
        }
    }
}
