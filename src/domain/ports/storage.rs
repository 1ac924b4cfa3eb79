//! Storage ports for the per-session memory bank.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Observation, ScenarioResult, Session, SessionScope};

/// Durable record of trial reports, keyed by (session, scenario).
#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Persist a report. Fails with `ReportAlreadyWritten` on a second write.
    async fn write(&self, scope: &SessionScope, result: &ScenarioResult) -> DomainResult<()>;

    async fn read(&self, scope: &SessionScope, scenario_id: &str)
        -> DomainResult<Option<ScenarioResult>>;

    /// All reports of a session, ordered by scenario id.
    async fn list(&self, scope: &SessionScope) -> DomainResult<Vec<ScenarioResult>>;
}

/// Append-only observation channels, one per agent plus a broadcast channel.
#[async_trait]
pub trait ObservationStore: Send + Sync {
    async fn record(&self, scope: &SessionScope, channel: &str, text: &str) -> DomainResult<()>;

    /// Observations of one channel in the order they were recorded.
    async fn read(&self, scope: &SessionScope, channel: &str) -> DomainResult<Vec<Observation>>;
}

/// Per-project journal of finished sessions.
#[async_trait]
pub trait ProgressLog: Send + Sync {
    async fn append(&self, session: &Session) -> DomainResult<()>;
}
