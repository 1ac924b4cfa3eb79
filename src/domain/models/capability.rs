//! Typed requests for the two capability sets a trial worker may invoke.
//!
//! A tool-call directive names a server, a tool and a JSON object of
//! arguments. The tool name selects the enum variant (internally tagged on
//! `tool`) and the arguments fill its fields, so a directive either becomes a
//! fully typed request or fails to parse.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// The capability set a directive targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityKind {
    VersionControl,
    FileSystem,
}

impl CapabilityKind {
    /// Map a server name from a tool-call directive.
    pub fn from_server_name(server: &str) -> Option<Self> {
        match server.trim().to_ascii_lowercase().as_str() {
            "git-mcp" | "git" => Some(Self::VersionControl),
            "desktop-commander" | "filesystem-mcp" | "filesystem" => Some(Self::FileSystem),
            _ => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::VersionControl => "git",
            Self::FileSystem => "filesystem",
        }
    }
}

const fn default_log_count() -> u32 {
    10
}

const fn default_command_timeout_ms() -> u64 {
    30_000
}

/// Version-control operations, run against the worker's workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tool", rename_all = "snake_case")]
pub enum GitOperation {
    GitStatus,
    GitDiffUnstaged,
    GitDiffStaged,
    GitDiff {
        target: String,
    },
    GitLog {
        #[serde(default = "default_log_count")]
        max_count: u32,
    },
    GitShow {
        revision: String,
    },
    GitAdd {
        files: Vec<String>,
    },
    GitCommit {
        message: String,
    },
    /// Unstage everything
    GitReset,
    GitCheckout {
        #[serde(alias = "branch_name")]
        target: String,
    },
    GitCreateBranch {
        branch_name: String,
        #[serde(default)]
        base_branch: Option<String>,
    },
    GitDeleteBranch {
        branch_name: String,
    },
    #[serde(skip_deserializing)]
    GitRevParse { revision: String },
    /// Force `branch` back into the checkout, then hard reset plus clean;
    /// only issued by the worker when it restores its base
    #[serde(skip_deserializing)]
    GitRestore { revision: String, branch: String },
}

impl GitOperation {
    /// Branch creation and deletion belong to the supervisor alone.
    pub const fn mutates_branches(&self) -> bool {
        matches!(self, Self::GitCreateBranch { .. } | Self::GitDeleteBranch { .. })
    }

    pub const fn tool_name(&self) -> &'static str {
        match self {
            Self::GitStatus => "git_status",
            Self::GitDiffUnstaged => "git_diff_unstaged",
            Self::GitDiffStaged => "git_diff_staged",
            Self::GitDiff { .. } => "git_diff",
            Self::GitLog { .. } => "git_log",
            Self::GitShow { .. } => "git_show",
            Self::GitAdd { .. } => "git_add",
            Self::GitCommit { .. } => "git_commit",
            Self::GitReset => "git_reset",
            Self::GitCheckout { .. } => "git_checkout",
            Self::GitCreateBranch { .. } => "git_create_branch",
            Self::GitDeleteBranch { .. } => "git_delete_branch",
            Self::GitRevParse { .. } => "git_rev_parse",
            Self::GitRestore { .. } => "git_restore",
        }
    }
}

/// File and command operations, scoped to the worker's workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tool", rename_all = "snake_case")]
pub enum FileOperation {
    ReadFile {
        path: String,
    },
    ReadMultipleFiles {
        paths: Vec<String>,
    },
    WriteFile {
        path: String,
        content: String,
    },
    /// Replace the first occurrence of `old_text`
    #[serde(alias = "edit_block")]
    EditFile {
        path: String,
        #[serde(alias = "old_string")]
        old_text: String,
        #[serde(alias = "new_string")]
        new_text: String,
    },
    ListDirectory {
        #[serde(default = "default_dot")]
        path: String,
    },
    CreateDirectory {
        path: String,
    },
    /// Glob search for file names
    SearchFiles {
        #[serde(default = "default_dot")]
        path: String,
        pattern: String,
    },
    /// Substring search in file contents
    SearchCode {
        #[serde(default = "default_dot")]
        path: String,
        pattern: String,
        #[serde(default)]
        file_pattern: Option<String>,
    },
    ExecuteCommand {
        command: String,
        #[serde(default = "default_command_timeout_ms")]
        timeout_ms: u64,
    },
    ReadOutput {
        pid: u32,
    },
    ForceTerminate {
        pid: u32,
    },
}

fn default_dot() -> String {
    ".".to_string()
}

impl FileOperation {
    pub const fn tool_name(&self) -> &'static str {
        match self {
            Self::ReadFile { .. } => "read_file",
            Self::ReadMultipleFiles { .. } => "read_multiple_files",
            Self::WriteFile { .. } => "write_file",
            Self::EditFile { .. } => "edit_file",
            Self::ListDirectory { .. } => "list_directory",
            Self::CreateDirectory { .. } => "create_directory",
            Self::SearchFiles { .. } => "search_files",
            Self::SearchCode { .. } => "search_code",
            Self::ExecuteCommand { .. } => "execute_command",
            Self::ReadOutput { .. } => "read_output",
            Self::ForceTerminate { .. } => "force_terminate",
        }
    }

    /// Path this operation writes to, if any.
    pub fn written_path(&self) -> Option<&str> {
        match self {
            Self::WriteFile { path, .. } | Self::EditFile { path, .. } => Some(path),
            _ => None,
        }
    }
}

/// One capability invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityRequest {
    Git(GitOperation),
    File(FileOperation),
}

impl CapabilityRequest {
    /// Build a request from a directive's tool name and argument object.
    pub fn from_directive(
        kind: CapabilityKind,
        tool: &str,
        arguments: Map<String, Value>,
    ) -> Result<Self, String> {
        let mut object = arguments;
        object.insert("tool".to_string(), Value::String(tool.trim().to_string()));
        let value = Value::Object(object);
        match kind {
            CapabilityKind::VersionControl => serde_json::from_value(value)
                .map(Self::Git)
                .map_err(|e| e.to_string()),
            CapabilityKind::FileSystem => serde_json::from_value(value)
                .map(Self::File)
                .map_err(|e| e.to_string()),
        }
    }

    pub const fn kind(&self) -> CapabilityKind {
        match self {
            Self::Git(_) => CapabilityKind::VersionControl,
            Self::File(_) => CapabilityKind::FileSystem,
        }
    }

    pub const fn tool_name(&self) -> &'static str {
        match self {
            Self::Git(op) => op.tool_name(),
            Self::File(op) => op.tool_name(),
        }
    }

    pub const fn mutates_branches(&self) -> bool {
        match self {
            Self::Git(op) => op.mutates_branches(),
            Self::File(_) => false,
        }
    }
}

impl fmt::Display for CapabilityRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind().as_str(), self.tool_name())
    }
}
