//! Output of the aggregator.

use serde::{Deserialize, Serialize};

use super::metrics::AnalysisMetrics;

/// Two successful trials mutated overlapping resources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    pub scenarios: Vec<String>,
    pub reason: String,
}

/// One ranked, conflict-aware decision over a batch of reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AggregatedResult {
    pub success: bool,
    pub confidence: f64,
    pub primary_fix: String,
    /// Scenario the primary fix came from
    #[serde(default)]
    pub primary_scenario: Option<String>,
    #[serde(default)]
    pub supporting_fixes: Vec<String>,
    #[serde(default)]
    pub conflicts: Vec<Conflict>,
    pub metrics: AnalysisMetrics,
}

impl AggregatedResult {
    /// Result for a batch without a single successful trial.
    pub fn no_solution() -> Self {
        Self {
            success: false,
            confidence: 0.0,
            primary_fix: "no successful fixes found".to_string(),
            primary_scenario: None,
            supporting_fixes: Vec::new(),
            conflicts: Vec::new(),
            metrics: AnalysisMetrics::unresolved(),
        }
    }
}
