//! Scientific observations: caller-supplied notes surfaced to running agents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Channel every agent of a session reads.
pub const BROADCAST_CHANNEL: &str = "session";

/// Channel the supervisor reads during observe.
pub const SUPERVISOR_CHANNEL: &str = "supervisor";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub timestamp: DateTime<Utc>,
    pub observation: String,
}

impl Observation {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            observation: text.into(),
        }
    }
}
