//! Combines trial reports into one ranked, conflict-aware decision.

use std::collections::HashMap;

use crate::domain::models::{
    clamp_unit, AggregatedResult, AnalysisMetrics, Conflict, ScenarioResult,
};

/// Weight of each supporting result relative to the primary one.
const SUPPORT_WEIGHT: f64 = 0.1;
/// Multiplier applied once per conflict.
const CONFLICT_PENALTY: f64 = 0.8;
/// Boost per earlier success of the primary hypothesis type.
const HISTORY_BOOST: f64 = 0.05;

/// Aggregator with a session-lived memory of which hypothesis types succeeded.
#[derive(Debug, Clone, Default)]
pub struct Aggregator {
    success_history: HashMap<String, u32>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Earlier successes recorded for a hypothesis type.
    pub fn history(&self, hypothesis_type: &str) -> u32 {
        self.success_history.get(hypothesis_type).copied().unwrap_or(0)
    }

    /// Combine one batch of reports.
    ///
    /// The history boost only reflects batches aggregated before this one;
    /// this batch's successes are recorded after the result is computed.
    pub fn aggregate(&mut self, results: &[ScenarioResult]) -> AggregatedResult {
        let mut successes: Vec<&ScenarioResult> = results.iter().filter(|r| r.success).collect();
        if successes.is_empty() {
            return AggregatedResult::no_solution();
        }
        successes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

        let primary = successes[0];
        let supporting = &successes[1..];
        let conflicts = find_conflicts(&successes);

        let base = primary.confidence
            + supporting.iter().map(|r| r.confidence).sum::<f64>() * SUPPORT_WEIGHT;
        let penalty = CONFLICT_PENALTY.powi(i32::try_from(conflicts.len()).unwrap_or(i32::MAX));
        let boost = 1.0 + HISTORY_BOOST * f64::from(self.history(&primary.hypothesis_type));
        let confidence = clamp_unit(base * penalty * boost);

        let result = AggregatedResult {
            success: true,
            confidence,
            primary_fix: primary.insight().to_string(),
            primary_scenario: Some(primary.id.clone()),
            supporting_fixes: supporting.iter().map(|r| r.insight().to_string()).collect(),
            conflicts,
            metrics: combine_metrics(&successes),
        };

        for success in &successes {
            let count = self
                .success_history
                .entry(success.hypothesis_type.clone())
                .or_insert(0);
            *count = count.saturating_add(1);
        }
        result
    }
}

/// One conflict per unordered pair of successes with overlapping resources.
fn find_conflicts(successes: &[&ScenarioResult]) -> Vec<Conflict> {
    let mut conflicts = Vec::new();
    for (i, a) in successes.iter().enumerate() {
        for b in &successes[i + 1..] {
            let shared: Vec<&str> = a
                .metrics
                .progress
                .resources_used
                .intersection(&b.metrics.progress.resources_used)
                .map(String::as_str)
                .collect();
            if !shared.is_empty() {
                conflicts.push(Conflict {
                    scenarios: vec![a.id.clone(), b.id.clone()],
                    reason: format!("both modified {}", shared.join(", ")),
                });
            }
        }
    }
    conflicts
}

fn combine_metrics(successes: &[&ScenarioResult]) -> AnalysisMetrics {
    let mut combined = AnalysisMetrics::default();
    let mut coverage: Option<f64> = None;

    for result in successes {
        let m = &result.metrics;
        combined.progress.steps_completed = combined
            .progress
            .steps_completed
            .saturating_add(m.progress.steps_completed);
        combined.progress.total_steps =
            combined.progress.total_steps.saturating_add(m.progress.total_steps);
        combined.progress.time_spent_ms =
            combined.progress.time_spent_ms.saturating_add(m.progress.time_spent_ms);
        combined
            .progress
            .resources_used
            .extend(m.progress.resources_used.iter().cloned());

        combined.testing.cases_run = combined.testing.cases_run.saturating_add(m.testing.cases_run);
        combined.testing.cases_passed =
            combined.testing.cases_passed.saturating_add(m.testing.cases_passed);
        if m.testing.coverage_percent > 0.0 {
            coverage = Some(match coverage {
                Some(acc) => (acc + m.testing.coverage_percent) / 2.0,
                None => m.testing.coverage_percent,
            });
        }
        for step in &m.testing.validation_steps {
            if !combined.testing.validation_steps.contains(step) {
                combined.testing.validation_steps.push(step.clone());
            }
        }

        combined.adaptation.attempt_number =
            combined.adaptation.attempt_number.max(m.adaptation.attempt_number);
        combined
            .adaptation
            .previous_approaches
            .extend(m.adaptation.previous_approaches.iter().cloned());
        combined
            .adaptation
            .adjustments
            .extend(m.adaptation.adjustments.iter().cloned());

        combined.fix_complexity = combined.fix_complexity.max(m.fix_complexity);
        combined.side_effect_risk = combined.side_effect_risk.max(m.side_effect_risk);
    }

    combined.testing.coverage_percent = coverage.unwrap_or(0.0);
    let probability_sum: f64 = successes.iter().map(|r| r.metrics.success_probability).sum();
    combined.success_probability = clamp_unit(probability_sum / successes.len() as f64);
    combined
}
