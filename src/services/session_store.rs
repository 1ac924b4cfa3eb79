//! In-memory session store.
//!
//! Sessions are shared between the supervisor that drives them and callers
//! polling their status, so every mutation goes through this store and the
//! state-machine rules on [`Session`]. Terminal states are sticky: status
//! changes after `complete`, `error` or `cancelled` are rejected, phase and
//! progress updates are ignored, and reads keep working.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    AgentState, AgentStatus, AggregatedResult, InvestigationRequest, MacroPhase, ScenarioResult,
    Session, SessionFailure, SessionStatus,
};

#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session in `initializing` with a fresh id.
    #[instrument(skip(self, request), fields(repo = %request.repo_path.display()))]
    pub async fn create(&self, request: InvestigationRequest) -> Session {
        let session = Session::new(Session::generate_id(), request);
        self.sessions
            .write()
            .await
            .insert(session.id.clone(), session.clone());
        debug!(session_id = %session.id, "Session created");
        session
    }

    /// Snapshot of a session. Records the read time.
    pub async fn get(&self, session_id: &str) -> DomainResult<Session> {
        self.mutate(session_id, |session| {
            session.last_checked = chrono::Utc::now();
            Ok(session.clone())
        })
        .await
    }

    pub async fn list(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self.sessions.read().await.values().cloned().collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        sessions
    }

    pub async fn transition(&self, session_id: &str, next: SessionStatus) -> DomainResult<()> {
        self.mutate(session_id, |session| session.transition_to(next))
            .await
    }

    /// Record the supervisor's position. Returns false once the session has ended.
    pub async fn set_phase(
        &self,
        session_id: &str,
        phase: MacroPhase,
        iteration: u32,
        progress: u8,
    ) -> DomainResult<bool> {
        self.mutate(session_id, |session| {
            if session.status.is_terminal() {
                return Ok(false);
            }
            session.phase = phase;
            session.iteration = iteration;
            session.progress = progress.min(99);
            Ok(true)
        })
        .await
    }

    pub async fn log(
        &self,
        session_id: &str,
        source: &str,
        message: impl Into<String>,
    ) -> DomainResult<()> {
        let message = message.into();
        self.mutate(session_id, |session| {
            session.log(source, message);
            Ok(())
        })
        .await
    }

    pub async fn register_agent(&self, session_id: &str, agent: AgentState) -> DomainResult<()> {
        self.mutate(session_id, |session| {
            if session.agent_mut(&agent.id).is_none() {
                session.agents.push(agent);
            }
            Ok(())
        })
        .await
    }

    /// Update a tracked agent. Returns false when the agent already finished.
    pub async fn update_agent(
        &self,
        session_id: &str,
        agent_id: &str,
        status: AgentStatus,
        progress: u8,
        error: Option<String>,
    ) -> DomainResult<bool> {
        self.mutate(session_id, |session| {
            let agent = session
                .agent_mut(agent_id)
                .ok_or_else(|| DomainError::AgentNotFound {
                    session_id: session_id.to_string(),
                    agent_id: agent_id.to_string(),
                })?;
            Ok(agent.update(status, progress, error))
        })
        .await
    }

    /// Mark every agent that has not finished as failed.
    pub async fn fail_unfinished_agents(&self, session_id: &str, reason: &str) -> DomainResult<usize> {
        self.mutate(session_id, |session| {
            let mut failed = 0;
            for agent in &mut session.agents {
                let progress = agent.progress;
                if agent.update(AgentStatus::Error, progress, Some(reason.to_string())) {
                    failed += 1;
                }
            }
            Ok(failed)
        })
        .await
    }

    pub async fn push_results(
        &self,
        session_id: &str,
        results: Vec<ScenarioResult>,
    ) -> DomainResult<()> {
        self.mutate(session_id, |session| {
            session.scenario_results.extend(results);
            Ok(())
        })
        .await
    }

    pub async fn complete(&self, session_id: &str, result: AggregatedResult) -> DomainResult<()> {
        self.mutate(session_id, |session| session.complete(result))
            .await
    }

    pub async fn fail(&self, session_id: &str, failure: SessionFailure) -> DomainResult<()> {
        self.mutate(session_id, |session| session.fail(failure))
            .await
    }

    async fn mutate<T>(
        &self,
        session_id: &str,
        f: impl FnOnce(&mut Session) -> DomainResult<T>,
    ) -> DomainResult<T> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| DomainError::SessionNotFound(session_id.to_string()))?;
        f(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::FailureKind;

    fn request() -> InvestigationRequest {
        InvestigationRequest::new("TypeError: x is undefined", "/tmp")
    }

    #[tokio::test]
    async fn test_terminal_status_is_sticky() {
        let store = SessionStore::new();
        let session = store.create(request()).await;
        store.transition(&session.id, SessionStatus::Running).await.unwrap();
        store
            .fail(&session.id, SessionFailure::new(FailureKind::Cancelled, "caller cancelled"))
            .await
            .unwrap();

        let err = store
            .complete(&session.id, AggregatedResult::no_solution())
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidStateTransition { .. }));
        assert!(!store
            .set_phase(&session.id, MacroPhase::Act, 2, 50)
            .await
            .unwrap());

        let snapshot = store.get(&session.id).await.unwrap();
        assert_eq!(snapshot.status, SessionStatus::Cancelled);
        assert!(snapshot.final_result.is_none());
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let store = SessionStore::new();
        assert!(matches!(
            store.get("session-0-deadbeef").await,
            Err(DomainError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_agents_are_tracked() {
        let store = SessionStore::new();
        let session = store.create(request()).await;
        store
            .register_agent(&session.id, AgentState::scenario("scenario-1-1", "debug-x-1-0"))
            .await
            .unwrap();
        store
            .register_agent(&session.id, AgentState::scenario("scenario-1-2", "debug-x-2-0"))
            .await
            .unwrap();
        assert!(store
            .update_agent(&session.id, "scenario-1-1", AgentStatus::Complete, 100, None)
            .await
            .unwrap());

        let failed = store.fail_unfinished_agents(&session.id, "cancelled").await.unwrap();
        assert_eq!(failed, 1);

        let snapshot = store.get(&session.id).await.unwrap();
        assert_eq!(snapshot.agents[0].status, AgentStatus::Complete);
        assert_eq!(snapshot.agents[1].status, AgentStatus::Error);
        assert!(matches!(
            store
                .update_agent(&session.id, "scenario-9-9", AgentStatus::Running, 10, None)
                .await,
            Err(DomainError::AgentNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_get_records_read_time() {
        let store = SessionStore::new();
        let session = store.create(request()).await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let snapshot = store.get(&session.id).await.unwrap();
        assert!(snapshot.last_checked > session.last_checked);
    }
}
