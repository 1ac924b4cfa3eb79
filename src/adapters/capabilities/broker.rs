//! Local capability broker: git, files and shell commands on this machine.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::filesystem::FileSystemCapability;
use super::git;
use super::processes::ProcessTable;
use crate::domain::errors::CapabilityError;
use crate::domain::models::{CapabilityRequest, FileOperation};
use crate::domain::ports::{CapabilityBroker, CapabilityConnection};

/// Opens connections that operate directly on a local workspace.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalCapabilityBroker;

impl LocalCapabilityBroker {
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CapabilityBroker for LocalCapabilityBroker {
    async fn open(&self, workspace: &Path) -> Result<Box<dyn CapabilityConnection>, CapabilityError> {
        let root = tokio::fs::canonicalize(workspace).await?;
        if !tokio::fs::metadata(&root).await?.is_dir() {
            return Err(CapabilityError::InvalidArguments(format!(
                "workspace {} is not a directory",
                root.display()
            )));
        }
        debug!(workspace = %root.display(), "Opened capability connection");
        Ok(Box::new(LocalConnection::new(root)))
    }
}

/// Connection bound to one workspace. Background commands it started are
/// stopped when it closes.
pub struct LocalConnection {
    workspace: PathBuf,
    files: FileSystemCapability,
    processes: ProcessTable,
    closed: bool,
}

impl LocalConnection {
    fn new(workspace: PathBuf) -> Self {
        Self {
            files: FileSystemCapability::new(workspace.clone()),
            processes: ProcessTable::new(workspace.clone()),
            workspace,
            closed: false,
        }
    }

    async fn file_operation(&mut self, op: &FileOperation) -> Result<String, CapabilityError> {
        match op {
            FileOperation::ReadFile { path } => self.files.read_file(path).await,
            FileOperation::ReadMultipleFiles { paths } => self.files.read_multiple_files(paths).await,
            FileOperation::WriteFile { path, content } => self.files.write_file(path, content).await,
            FileOperation::EditFile {
                path,
                old_text,
                new_text,
            } => self.files.edit_file(path, old_text, new_text).await,
            FileOperation::ListDirectory { path } => self.files.list_directory(path).await,
            FileOperation::CreateDirectory { path } => self.files.create_directory(path).await,
            FileOperation::SearchFiles { path, pattern } => {
                self.files.search_files(path, pattern).await
            }
            FileOperation::SearchCode {
                path,
                pattern,
                file_pattern,
            } => {
                self.files
                    .search_code(path, pattern, file_pattern.as_deref())
                    .await
            }
            FileOperation::ExecuteCommand {
                command,
                timeout_ms,
            } => self.processes.execute(command, *timeout_ms).await,
            FileOperation::ReadOutput { pid } => self.processes.read_output(*pid).await,
            FileOperation::ForceTerminate { pid } => self.processes.force_terminate(*pid).await,
        }
    }
}

#[async_trait]
impl CapabilityConnection for LocalConnection {
    async fn invoke(&mut self, request: &CapabilityRequest) -> Result<String, CapabilityError> {
        if self.closed {
            return Err(CapabilityError::ConnectionClosed);
        }
        match request {
            CapabilityRequest::Git(op) => git::run(&self.workspace, op).await,
            CapabilityRequest::File(op) => self.file_operation(op).await,
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.processes.shutdown().await;
        self.closed = true;
        debug!(workspace = %self.workspace.display(), "Closed capability connection");
    }
}
