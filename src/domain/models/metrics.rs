//! Analysis metrics reported by trial workers and folded by the aggregator.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;

/// Clamp a probability-like value into `[0, 1]`. NaN becomes `0`.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Clamp a 1-5 rating.
pub fn clamp_scale(value: u8) -> u8 {
    value.clamp(1, 5)
}

/// Deserialize a float and clamp it into `[0, 1]`.
pub fn deserialize_unit<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    f64::deserialize(deserializer).map(clamp_unit)
}

fn deserialize_scale<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    u8::deserialize(deserializer).map(clamp_scale)
}

fn deserialize_coverage<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    f64::deserialize(deserializer).map(|v| if v.is_nan() { 0.0 } else { v.clamp(0.0, 100.0) })
}

/// How far a trial progressed and what it touched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ProgressMetrics {
    #[serde(default)]
    pub steps_completed: u32,
    #[serde(default)]
    pub total_steps: u32,
    #[serde(default)]
    pub time_spent_ms: u64,
    /// Identifiers of resources (files, caches, tables) the trial mutated
    #[serde(default)]
    pub resources_used: BTreeSet<String>,
}

/// Validation performed by a trial.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TestingMetrics {
    #[serde(default)]
    pub cases_run: u32,
    #[serde(default)]
    pub cases_passed: u32,
    #[serde(default, deserialize_with = "deserialize_coverage")]
    pub coverage_percent: f64,
    #[serde(default)]
    pub validation_steps: Vec<String>,
}

/// One approach tried before the current one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviousApproach {
    pub approach: String,
    pub success: bool,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AdaptationMetrics {
    #[serde(default)]
    pub attempt_number: u32,
    #[serde(default)]
    pub previous_approaches: Vec<PreviousApproach>,
    #[serde(default)]
    pub adjustments: Vec<String>,
}

/// Quantitative view of a trial outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AnalysisMetrics {
    #[serde(default, deserialize_with = "deserialize_unit")]
    pub success_probability: f64,

    /// 1 (trivial) to 5 (invasive)
    #[serde(default = "default_rating", deserialize_with = "deserialize_scale")]
    pub fix_complexity: u8,

    /// 1 (isolated) to 5 (wide blast radius)
    #[serde(default = "default_rating", deserialize_with = "deserialize_scale")]
    pub side_effect_risk: u8,

    #[serde(default)]
    pub progress: ProgressMetrics,

    #[serde(default)]
    pub testing: TestingMetrics,

    #[serde(default)]
    pub adaptation: AdaptationMetrics,
}

const fn default_rating() -> u8 {
    1
}

impl Default for AnalysisMetrics {
    fn default() -> Self {
        Self {
            success_probability: 0.0,
            fix_complexity: default_rating(),
            side_effect_risk: default_rating(),
            progress: ProgressMetrics::default(),
            testing: TestingMetrics::default(),
            adaptation: AdaptationMetrics::default(),
        }
    }
}

impl AnalysisMetrics {
    /// Metrics attached to an aggregate that found no working fix.
    pub fn unresolved() -> Self {
        Self {
            fix_complexity: 5,
            side_effect_risk: 5,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_unit() {
        assert!((clamp_unit(1.7) - 1.0).abs() < f64::EPSILON);
        assert!(clamp_unit(-0.2).abs() < f64::EPSILON);
        assert!(clamp_unit(f64::NAN).abs() < f64::EPSILON);
        assert!((clamp_unit(0.42) - 0.42).abs() < f64::EPSILON);
    }

    #[test]
    fn test_deserialize_clamps_out_of_range_values() {
        let json = r#"{"success_probability": 3.5, "fix_complexity": 9, "side_effect_risk": 0}"#;
        let metrics: AnalysisMetrics = serde_json::from_str(json).expect("metrics should parse");
        assert!((metrics.success_probability - 1.0).abs() < f64::EPSILON);
        assert_eq!(metrics.fix_complexity, 5);
        assert_eq!(metrics.side_effect_risk, 1);
    }

    #[test]
    fn test_partial_metrics_use_defaults() {
        let json = r#"{"progress": {"resources_used": ["taskCache"]}}"#;
        let metrics: AnalysisMetrics = serde_json::from_str(json).expect("metrics should parse");
        assert_eq!(metrics.fix_complexity, 1);
        assert!(metrics.progress.resources_used.contains("taskCache"));
        assert_eq!(metrics.testing.cases_run, 0);
    }

    #[test]
    fn test_unresolved_metrics() {
        let metrics = AnalysisMetrics::unresolved();
        assert_eq!(metrics.fix_complexity, 5);
        assert_eq!(metrics.side_effect_risk, 5);
        assert!(metrics.success_probability.abs() < f64::EPSILON);
    }
}
