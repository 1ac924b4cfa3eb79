//! File capability: reads, writes and searches confined to one workspace.

use std::fmt::Write as _;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

use crate::domain::errors::CapabilityError;

/// Cap on search results returned to the model.
const MAX_SEARCH_RESULTS: usize = 200;

/// Files larger than this are skipped by code search.
const MAX_SEARCHABLE_BYTES: u64 = 1024 * 1024;

/// File operations rooted at a workspace directory.
#[derive(Debug, Clone)]
pub struct FileSystemCapability {
    root: PathBuf,
}

impl FileSystemCapability {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `path` against the workspace, rejecting anything outside it.
    pub fn resolve(&self, path: &str) -> Result<PathBuf, CapabilityError> {
        let candidate = Path::new(path.trim());
        let joined = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.root.join(candidate)
        };

        let mut normalized = PathBuf::new();
        for component in joined.components() {
            match component {
                Component::ParentDir => {
                    if !normalized.pop() {
                        return Err(CapabilityError::PathOutsideWorkspace(path.to_string()));
                    }
                }
                Component::CurDir => {}
                other => normalized.push(other),
            }
        }

        if normalized.starts_with(&self.root) {
            Ok(normalized)
        } else {
            Err(CapabilityError::PathOutsideWorkspace(path.to_string()))
        }
    }

    fn display(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .display()
            .to_string()
    }

    pub async fn read_file(&self, path: &str) -> Result<String, CapabilityError> {
        let resolved = self.resolve(path)?;
        Ok(tokio::fs::read_to_string(&resolved).await?)
    }

    pub async fn read_multiple_files(&self, paths: &[String]) -> Result<String, CapabilityError> {
        let mut out = String::new();
        for path in paths {
            let _ = writeln!(out, "=== {path} ===");
            match self.read_file(path).await {
                Ok(content) => out.push_str(&content),
                Err(e) => {
                    let _ = write!(out, "error: {e}");
                }
            }
            out.push('\n');
        }
        Ok(out)
    }

    pub async fn write_file(&self, path: &str, content: &str) -> Result<String, CapabilityError> {
        let resolved = self.resolve(path)?;
        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&resolved, content).await?;
        Ok(format!(
            "Wrote {} bytes to {}",
            content.len(),
            self.display(&resolved)
        ))
    }

    pub async fn edit_file(
        &self,
        path: &str,
        old_text: &str,
        new_text: &str,
    ) -> Result<String, CapabilityError> {
        if old_text.is_empty() {
            return Err(CapabilityError::InvalidArguments(
                "old_text cannot be empty".to_string(),
            ));
        }
        let resolved = self.resolve(path)?;
        let content = tokio::fs::read_to_string(&resolved).await?;
        let occurrences = content.matches(old_text).count();
        if occurrences == 0 {
            return Err(CapabilityError::InvalidArguments(format!(
                "text to replace not found in {path}"
            )));
        }
        tokio::fs::write(&resolved, content.replacen(old_text, new_text, 1)).await?;
        Ok(format!(
            "Replaced 1 of {occurrences} occurrence(s) in {}",
            self.display(&resolved)
        ))
    }

    pub async fn list_directory(&self, path: &str) -> Result<String, CapabilityError> {
        let resolved = self.resolve(path)?;
        let mut entries = tokio::fs::read_dir(&resolved).await?;
        let mut lines = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let tag = if entry.file_type().await?.is_dir() {
                "[DIR]"
            } else {
                "[FILE]"
            };
            lines.push(format!("{tag} {}", entry.file_name().to_string_lossy()));
        }
        lines.sort();
        Ok(lines.join("\n"))
    }

    pub async fn create_directory(&self, path: &str) -> Result<String, CapabilityError> {
        let resolved = self.resolve(path)?;
        tokio::fs::create_dir_all(&resolved).await?;
        Ok(format!("Created directory {}", self.display(&resolved)))
    }

    /// Find files whose workspace-relative path or name matches a glob.
    pub async fn search_files(&self, path: &str, pattern: &str) -> Result<String, CapabilityError> {
        let start = self.resolve(path)?;
        let glob = glob::Pattern::new(pattern)
            .map_err(|e| CapabilityError::InvalidArguments(format!("invalid glob: {e}")))?;
        let this = self.clone();

        let matches = tokio::task::spawn_blocking(move || {
            walk_files(&start)
                .filter(|p| {
                    let relative = this.display(p);
                    let name = p
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    glob.matches(&relative) || glob.matches(&name)
                })
                .map(|p| this.display(&p))
                .take(MAX_SEARCH_RESULTS)
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| CapabilityError::Io(e.to_string()))?;

        if matches.is_empty() {
            Ok(format!("No files matching '{pattern}'"))
        } else {
            Ok(matches.join("\n"))
        }
    }

    /// Substring search in file contents, reported as `path:line: text`.
    pub async fn search_code(
        &self,
        path: &str,
        pattern: &str,
        file_pattern: Option<&str>,
    ) -> Result<String, CapabilityError> {
        if pattern.is_empty() {
            return Err(CapabilityError::InvalidArguments(
                "search pattern cannot be empty".to_string(),
            ));
        }
        let start = self.resolve(path)?;
        let file_glob = file_pattern
            .map(glob::Pattern::new)
            .transpose()
            .map_err(|e| CapabilityError::InvalidArguments(format!("invalid glob: {e}")))?;
        let pattern = pattern.to_string();
        let this = self.clone();

        let hits = tokio::task::spawn_blocking(move || {
            let mut hits = Vec::new();
            for file in walk_files(&start) {
                let name = file
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                if file_glob.as_ref().is_some_and(|g| !g.matches(&name)) {
                    continue;
                }
                let small_enough = std::fs::metadata(&file)
                    .map(|m| m.len() <= MAX_SEARCHABLE_BYTES)
                    .unwrap_or(false);
                if !small_enough {
                    continue;
                }
                let Ok(content) = std::fs::read_to_string(&file) else {
                    continue;
                };
                for (number, line) in content.lines().enumerate() {
                    if line.contains(&pattern) {
                        hits.push(format!("{}:{}: {}", this.display(&file), number + 1, line.trim()));
                        if hits.len() >= MAX_SEARCH_RESULTS {
                            return hits;
                        }
                    }
                }
            }
            hits
        })
        .await
        .map_err(|e| CapabilityError::Io(e.to_string()))?;

        if hits.is_empty() {
            Ok("No matches".to_string())
        } else {
            Ok(hits.join("\n"))
        }
    }
}

/// Regular files under `start`, skipping `.git` and `node_modules`.
fn walk_files(start: &Path) -> impl Iterator<Item = PathBuf> {
    WalkDir::new(start)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            let name = e.file_name().to_string_lossy();
            name != ".git" && name != "node_modules"
        })
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(walkdir::DirEntry::into_path)
}
