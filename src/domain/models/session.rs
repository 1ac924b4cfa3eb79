//! Domain models for investigation sessions.
//!
//! A session tracks one investigation from request to decision: its status,
//! the supervisor's macro phase, a log stream, the agents it spawned, and the
//! reports and final result they produced.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::aggregation::AggregatedResult;
use super::investigation::InvestigationRequest;
use super::scenario::ScenarioResult;
use crate::domain::errors::{DomainError, DomainResult};

/// Session lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Created, supervisor not yet running
    Initializing,
    Running,
    /// Terminated with a confident decision
    Complete,
    /// Terminated without a decision
    Error,
    /// Terminated by the caller
    Cancelled,
}

impl SessionStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Running => "running",
            Self::Complete => "complete",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Error | Self::Cancelled)
    }

    /// Whether `self -> next` is a legal transition.
    pub const fn can_transition_to(self, next: Self) -> bool {
        match self {
            Self::Initializing => !matches!(next, Self::Initializing),
            Self::Running => !matches!(next, Self::Initializing | Self::Running),
            Self::Complete | Self::Error | Self::Cancelled => false,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phase of the supervisor's macro-cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MacroPhase {
    Observe,
    Orient,
    Decide,
    Act,
    Evaluate,
}

impl MacroPhase {
    pub const ALL: [Self; 5] = [
        Self::Observe,
        Self::Orient,
        Self::Decide,
        Self::Act,
        Self::Evaluate,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Observe => "observe",
            Self::Orient => "orient",
            Self::Decide => "decide",
            Self::Act => "act",
            Self::Evaluate => "evaluate",
        }
    }

    pub const fn ordinal(self) -> u32 {
        match self {
            Self::Observe => 0,
            Self::Orient => 1,
            Self::Decide => 2,
            Self::Act => 3,
            Self::Evaluate => 4,
        }
    }
}

impl fmt::Display for MacroPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a session ended in `error` or `cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Iteration budget exhausted without a confident decision
    NoSolutionFound,
    Configuration,
    /// Unrecoverable error in the supervisor
    Crashed,
    Cancelled,
}

impl FailureKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NoSolutionFound => "no_solution_found",
            Self::Configuration => "configuration",
            Self::Crashed => "crashed",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl SessionFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// One line of the session's observable log stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    /// Agent id or `session`
    pub source: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    Supervisor,
    Scenario,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Initializing,
    Running,
    Complete,
    Error,
}

impl AgentStatus {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }
}

/// An agent tracked by the session: the supervisor itself or one trial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentState {
    pub id: String,
    pub kind: AgentKind,
    pub status: AgentStatus,
    /// 0-100
    pub progress: u8,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl AgentState {
    pub fn supervisor(id: impl Into<String>) -> Self {
        Self::new(id, AgentKind::Supervisor, None)
    }

    pub fn scenario(id: impl Into<String>, branch: impl Into<String>) -> Self {
        Self::new(id, AgentKind::Scenario, Some(branch.into()))
    }

    fn new(id: impl Into<String>, kind: AgentKind, branch: Option<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            status: AgentStatus::Initializing,
            progress: 0,
            branch,
            error: None,
            updated_at: Utc::now(),
        }
    }

    /// Apply an update unless the agent already finished. Returns whether it applied.
    pub fn update(&mut self, status: AgentStatus, progress: u8, error: Option<String>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = status;
        self.progress = progress.min(100);
        if error.is_some() {
            self.error = error;
        }
        self.updated_at = Utc::now();
        true
    }
}

/// One investigation, owned by its supervisor and read by callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub status: SessionStatus,
    pub request: InvestigationRequest,
    pub phase: MacroPhase,
    /// 1-based; 0 before the first iteration starts
    pub iteration: u32,
    /// 0-100
    pub progress: u8,
    pub logs: Vec<LogEntry>,
    pub agents: Vec<AgentState>,
    pub scenario_results: Vec<ScenarioResult>,
    pub final_result: Option<AggregatedResult>,
    pub failure: Option<SessionFailure>,
    pub created_at: DateTime<Utc>,
    pub last_checked: DateTime<Utc>,
}

impl Session {
    pub fn new(id: impl Into<String>, request: InvestigationRequest) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            status: SessionStatus::Initializing,
            request,
            phase: MacroPhase::Observe,
            iteration: 0,
            progress: 0,
            logs: Vec::new(),
            agents: Vec::new(),
            scenario_results: Vec::new(),
            final_result: None,
            failure: None,
            created_at: now,
            last_checked: now,
        }
    }

    /// `session-<millis>-<8 hex>`
    pub fn generate_id() -> String {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        format!("session-{}-{}", Utc::now().timestamp_millis(), &suffix[..8])
    }

    pub fn transition_to(&mut self, next: SessionStatus) -> DomainResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::InvalidStateTransition {
                from: self.status.to_string(),
                to: next.to_string(),
                reason: if self.status.is_terminal() {
                    "session already terminated".to_string()
                } else {
                    "transition not allowed".to_string()
                },
            });
        }
        self.status = next;
        Ok(())
    }

    /// Terminate with a confident decision.
    pub fn complete(&mut self, result: AggregatedResult) -> DomainResult<()> {
        self.transition_to(SessionStatus::Complete)?;
        self.progress = 100;
        self.final_result = Some(result);
        Ok(())
    }

    /// Terminate without a decision. Cancellation ends in `cancelled`, anything else in `error`.
    pub fn fail(&mut self, failure: SessionFailure) -> DomainResult<()> {
        let next = if failure.kind == FailureKind::Cancelled {
            SessionStatus::Cancelled
        } else {
            SessionStatus::Error
        };
        self.transition_to(next)?;
        self.failure = Some(failure);
        Ok(())
    }

    pub fn log(&mut self, source: impl Into<String>, message: impl Into<String>) {
        self.logs.push(LogEntry {
            timestamp: Utc::now(),
            source: source.into(),
            message: message.into(),
        });
    }

    pub fn agent_mut(&mut self, agent_id: &str) -> Option<&mut AgentState> {
        self.agents.iter_mut().find(|a| a.id == agent_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new("session-1", InvestigationRequest::new("boom", "/tmp"))
    }

    #[test]
    fn test_terminal_states_are_sticky() {
        for terminal in [
            SessionStatus::Complete,
            SessionStatus::Error,
            SessionStatus::Cancelled,
        ] {
            let mut s = session();
            s.transition_to(SessionStatus::Running).unwrap();
            s.transition_to(terminal).unwrap();
            for next in [
                SessionStatus::Initializing,
                SessionStatus::Running,
                SessionStatus::Complete,
                SessionStatus::Error,
                SessionStatus::Cancelled,
            ] {
                assert!(s.transition_to(next).is_err());
                assert_eq!(s.status, terminal);
            }
        }
    }

    #[test]
    fn test_running_cannot_go_back_to_initializing() {
        let mut s = session();
        s.transition_to(SessionStatus::Running).unwrap();
        assert!(matches!(
            s.transition_to(SessionStatus::Initializing),
            Err(DomainError::InvalidStateTransition { .. })
        ));
    }

    #[test]
    fn test_fail_with_cancelled_kind_ends_cancelled() {
        let mut s = session();
        s.fail(SessionFailure::new(FailureKind::Cancelled, "by user"))
            .unwrap();
        assert_eq!(s.status, SessionStatus::Cancelled);
        assert!(s.complete(AggregatedResult::no_solution()).is_err());
        assert!(s.final_result.is_none());
    }

    #[test]
    fn test_agent_updates_stop_after_terminal_status() {
        let mut agent = AgentState::scenario("scenario-1-1", "debug-x-1-0");
        assert!(agent.update(AgentStatus::Running, 10, None));
        assert!(agent.update(AgentStatus::Error, 100, Some("cancelled".into())));
        assert!(!agent.update(AgentStatus::Complete, 100, None));
        assert_eq!(agent.status, AgentStatus::Error);
        assert_eq!(agent.error.as_deref(), Some("cancelled"));
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let a = Session::generate_id();
        let b = Session::generate_id();
        assert!(a.starts_with("session-"));
        assert_ne!(a, b);
    }
}
