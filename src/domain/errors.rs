//! Domain errors for the sleuth investigation engine.

use thiserror::Error;

/// Domain-level errors that can occur while running an investigation.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Agent not found: {agent_id} in session {session_id}")]
    AgentNotFound { session_id: String, agent_id: String },

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Invalid investigation request: {0}")]
    InvalidRequest(String),

    #[error("Orientation failed: {0}")]
    OrientationFailed(String),

    #[error(transparent)]
    Completion(#[from] CompletionError),

    #[error("No solution found after {iterations} iteration(s)")]
    IterationBudgetExhausted { iterations: u32 },

    #[error("Session cancelled: {0}")]
    Cancelled(String),

    #[error("Report for scenario {scenario_id} in session {session_id} was already written")]
    ReportAlreadyWritten {
        session_id: String,
        scenario_id: String,
    },

    #[error("Workspace error: {0}")]
    Workspace(String),

    #[error("Worker launch failed: {0}")]
    WorkerLaunch(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

impl From<std::io::Error> for DomainError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

/// Failures of a single text-completion call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CompletionError {
    #[error("Missing credential for backend '{backend}' (set {env_var})")]
    MissingCredential { backend: String, env_var: String },

    #[error("Missing model identifier for backend '{0}'")]
    MissingModel(String),

    #[error("Unsupported completion backend: {0}")]
    UnsupportedBackend(String),

    #[error("Completion backend returned an empty response")]
    EmptyResponse,

    #[error("HTTP transport error: {0}")]
    Http(String),

    #[error("Completion API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("Failed to decode completion response: {0}")]
    Decode(String),
}

impl CompletionError {
    /// Whether the failure comes from configuration rather than from a call.
    pub const fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::MissingCredential { .. } | Self::MissingModel(_) | Self::UnsupportedBackend(_)
        )
    }

    /// Whether retrying the same request may succeed.
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Http(_) => true,
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Failures of a version-control or file/command capability call.
///
/// These never abort a trial: the worker renders them into the transcript.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CapabilityError {
    #[error("Capability connection is closed")]
    ConnectionClosed,

    #[error("Path escapes the workspace: {0}")]
    PathOutsideWorkspace(String),

    #[error("Command `{command}` failed (exit code {code:?}): {stderr}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Command `{command}` did not finish within {timeout_ms}ms")]
    CommandTimedOut { command: String, timeout_ms: u64 },

    #[error("No background process with pid {0}")]
    UnknownProcess(u32),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for CapabilityError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// A tool-call block in a model reply that could not be turned into a request.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DirectiveParseError {
    #[error("tool call #{index}: missing closing </use_mcp_tool> tag")]
    Unterminated { index: usize },

    #[error("tool call #{index}: missing <{element}> element")]
    MissingElement { index: usize, element: &'static str },

    #[error("tool call #{index}: unknown server '{server}'")]
    UnknownServer { index: usize, server: String },

    #[error("tool call #{index}: arguments are not a JSON object: {reason}")]
    InvalidJson { index: usize, reason: String },

    #[error("tool call #{index}: invalid call to '{tool}': {reason}")]
    InvalidCall {
        index: usize,
        tool: String,
        reason: String,
    },
}
