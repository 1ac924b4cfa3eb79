//! Scenario configs handed to trial workers and the reports they write back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use super::hypothesis::Hypothesis;
use super::investigation::{InvestigationRequest, SessionScope};
use super::metrics::{clamp_unit, deserialize_unit, AnalysisMetrics};

/// Everything one trial worker needs to test one hypothesis.
///
/// Created by the supervisor at decide time; consumed by exactly one worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ScenarioConfig {
    pub id: String,
    pub session_id: String,
    pub iteration: u32,
    pub hypothesis: Hypothesis,
    /// Branch checked out in the workspace; provisioned by the supervisor
    pub branch_name: String,
    pub workspace_path: PathBuf,
    pub request: InvestigationRequest,
    /// Root of the memory bank the report is written under
    pub data_root: PathBuf,
    pub timeout_ms: u64,
    pub started_at: DateTime<Utc>,
}

impl ScenarioConfig {
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn scope(&self) -> SessionScope {
        SessionScope::new(&self.session_id, &self.request.repo_path)
    }
}

/// Hands out collision-free branch names for one session.
///
/// Names combine the session id, a session-wide ordinal and the spawn
/// timestamp. The ordinal alone keeps names distinct within a millisecond.
#[derive(Debug)]
pub struct BranchNamer {
    session_id: String,
    next_ordinal: AtomicU32,
}

impl BranchNamer {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            next_ordinal: AtomicU32::new(1),
        }
    }

    /// Reserve the next ordinal and return it with its branch name.
    pub fn next(&self, spawned_at: DateTime<Utc>) -> (u32, String) {
        let ordinal = self.next_ordinal.fetch_add(1, Ordering::Relaxed);
        let name = branch_name(&self.session_id, ordinal, spawned_at.timestamp_millis());
        (ordinal, name)
    }
}

pub fn branch_name(session_id: &str, ordinal: u32, spawned_at_ms: i64) -> String {
    format!("debug-{session_id}-{ordinal}-{spawned_at_ms}")
}

/// How a trial ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// The model emitted a report block
    Reported,
    EmptyCompletion,
    CompletionFailed,
    TimedOut,
    Cancelled,
    /// The worker died without writing a report
    Crashed,
    /// The workspace or capability connection could not be set up
    SetupFailed,
}

impl Termination {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Reported => "reported",
            Self::EmptyCompletion => "empty_completion",
            Self::CompletionFailed => "completion_failed",
            Self::TimedOut => "timed_out",
            Self::Cancelled => "cancelled",
            Self::Crashed => "crashed",
            Self::SetupFailed => "setup_failed",
        }
    }

    /// Process exit code of a worker that ended this way.
    pub const fn exit_code(self) -> i32 {
        match self {
            Self::Reported => 0,
            _ => 1,
        }
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The report a trial worker writes exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ScenarioResult {
    /// Matches the `ScenarioConfig` id
    pub id: String,
    pub hypothesis_type: String,
    pub hypothesis: String,
    #[serde(default)]
    pub fix_attempted: String,
    #[serde(default)]
    pub findings: String,
    pub success: bool,
    #[serde(deserialize_with = "deserialize_unit")]
    pub confidence: f64,
    #[serde(default)]
    pub explanation: String,
    /// Diff of the changes the trial made against its base revision
    #[serde(default)]
    pub changes: Option<String>,
    #[serde(default)]
    pub metrics: AnalysisMetrics,
    pub termination: Termination,
    pub completed_at: DateTime<Utc>,
}

impl ScenarioResult {
    /// An unsuccessful report for `hypothesis` with zero confidence.
    pub fn new(id: impl Into<String>, hypothesis: &Hypothesis) -> Self {
        Self {
            id: id.into(),
            hypothesis_type: hypothesis.kind.clone(),
            hypothesis: hypothesis.description.clone(),
            fix_attempted: String::new(),
            findings: String::new(),
            success: false,
            confidence: 0.0,
            explanation: String::new(),
            changes: None,
            metrics: AnalysisMetrics::default(),
            termination: Termination::Reported,
            completed_at: Utc::now(),
        }
    }

    /// A failure report for a trial that never produced one of its own.
    pub fn failed(
        config: &ScenarioConfig,
        termination: Termination,
        explanation: impl Into<String>,
    ) -> Self {
        let explanation = explanation.into();
        let mut result = Self::new(&config.id, &config.hypothesis);
        result.findings.clone_from(&explanation);
        result.explanation = explanation;
        result.termination = termination;
        result.metrics.adaptation.attempt_number = config.iteration;
        result
    }

    #[must_use]
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = clamp_unit(confidence);
        self
    }

    #[must_use]
    pub fn succeeded(mut self) -> Self {
        self.success = true;
        self
    }

    #[must_use]
    pub fn with_explanation(mut self, explanation: impl Into<String>) -> Self {
        self.explanation = explanation.into();
        self
    }

    #[must_use]
    pub fn with_resources<I, S>(mut self, resources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.metrics
            .progress
            .resources_used
            .extend(resources.into_iter().map(Into::into));
        self
    }

    /// First extracted insight: the explanation, else the attempted fix.
    pub fn insight(&self) -> &str {
        [self.explanation.trim(), self.fix_attempted.trim()]
            .into_iter()
            .find(|s| !s.is_empty())
            .unwrap_or("unknown fix")
    }
}

/// How a launched worker ended, as seen by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    Exited { code: i32 },
    TimedOut,
    Cancelled,
    Crashed(String),
}

impl WorkerExit {
    /// Termination recorded when the worker left no report behind.
    pub const fn missing_report_termination(&self) -> Termination {
        match self {
            Self::TimedOut => Termination::TimedOut,
            Self::Cancelled => Termination::Cancelled,
            Self::Exited { .. } | Self::Crashed(_) => Termination::Crashed,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Exited { code } => format!("worker exited with code {code}"),
            Self::TimedOut => "worker exceeded its wall-clock budget and was reaped".to_string(),
            Self::Cancelled => "worker was terminated by session cancellation".to_string(),
            Self::Crashed(reason) => format!("worker crashed: {reason}"),
        }
    }
}
