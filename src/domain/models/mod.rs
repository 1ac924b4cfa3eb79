//! Domain models for the investigation engine.

pub mod aggregation;
pub mod capability;
pub mod completion;
pub mod config;
pub mod hypothesis;
pub mod investigation;
pub mod metrics;
pub mod observation;
pub mod scenario;
pub mod session;

pub use aggregation::{AggregatedResult, Conflict};
pub use capability::{CapabilityKind, CapabilityRequest, FileOperation, GitOperation};
pub use completion::{
    Backend, BackendKind, Endpoint, LlmSettings, Message, OpenAiFlavor, Role, Transcript,
};
pub use config::{
    Config, IsolationMode, LoggingConfig, RateLimitConfig, RetryConfig, SupervisorConfig,
    TrialConfig,
};
pub use hypothesis::{parse_hypotheses, Hypothesis};
pub use investigation::{project_id, InvestigationRequest, SessionScope};
pub use metrics::{
    clamp_unit, AdaptationMetrics, AnalysisMetrics, PreviousApproach, ProgressMetrics,
    TestingMetrics,
};
pub use observation::{Observation, BROADCAST_CHANNEL, SUPERVISOR_CHANNEL};
pub use scenario::{
    branch_name, BranchNamer, ScenarioConfig, ScenarioResult, Termination, WorkerExit,
};
pub use session::{
    AgentKind, AgentState, AgentStatus, FailureKind, LogEntry, MacroPhase, Session,
    SessionFailure, SessionStatus,
};
