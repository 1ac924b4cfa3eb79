//! Table output for scenario results, rendered with comfy-table.

use comfy_table::{presets, Attribute, Cell, Color, ContentArrangement, Table};
use serde::Serialize;
use std::env;

use super::truncate;
use crate::domain::models::{ScenarioResult, Termination};

/// One trial as the CLI shows it.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioSummary {
    pub id: String,
    pub hypothesis_type: String,
    pub success: bool,
    pub confidence: f64,
    pub termination: String,
    pub insight: String,
}

impl From<&ScenarioResult> for ScenarioSummary {
    fn from(result: &ScenarioResult) -> Self {
        Self {
            id: result.id.clone(),
            hypothesis_type: result.hypothesis_type.clone(),
            success: result.success,
            confidence: result.confidence,
            termination: result.termination.to_string(),
            insight: result.insight().to_string(),
        }
    }
}

pub struct TableFormatter {
    use_colors: bool,
    /// None sizes the table to the terminal
    max_width: Option<u16>,
}

impl TableFormatter {
    pub fn new() -> Self {
        Self {
            use_colors: supports_color(),
            max_width: None,
        }
    }

    pub fn with_config(use_colors: bool, max_width: Option<u16>) -> Self {
        Self {
            use_colors,
            max_width,
        }
    }

    /// Scenarios of a finished session, with the insight each one produced.
    pub fn format_scenarios(&self, scenarios: &[ScenarioSummary]) -> String {
        self.format(scenarios, true)
    }

    /// Persisted reports, without the insight column.
    pub fn format_reports(&self, reports: &[ScenarioSummary]) -> String {
        self.format(reports, false)
    }

    fn format(&self, rows: &[ScenarioSummary], with_insight: bool) -> String {
        let mut table = self.create_base_table();

        let mut header = vec![
            Cell::new("Scenario").add_attribute(Attribute::Bold),
            Cell::new("Type").add_attribute(Attribute::Bold),
            Cell::new("Success").add_attribute(Attribute::Bold),
            Cell::new("Confidence").add_attribute(Attribute::Bold),
            Cell::new("Termination").add_attribute(Attribute::Bold),
        ];
        if with_insight {
            header.push(Cell::new("Insight").add_attribute(Attribute::Bold));
        }
        table.set_header(header);

        for row in rows {
            let success = if row.success { "yes" } else { "no" };
            let success_cell = if self.use_colors {
                Cell::new(success).fg(if row.success { Color::Green } else { Color::Red })
            } else {
                Cell::new(success)
            };
            let termination_cell = if self.use_colors {
                Cell::new(&row.termination).fg(termination_color(&row.termination))
            } else {
                Cell::new(&row.termination)
            };

            let mut cells = vec![
                Cell::new(&row.id),
                Cell::new(truncate(&row.hypothesis_type, 20)),
                success_cell,
                Cell::new(format!("{:.2}", row.confidence)),
                termination_cell,
            ];
            if with_insight {
                cells.push(Cell::new(truncate(&row.insight, 60)));
            }
            table.add_row(cells);
        }

        table.to_string()
    }

    fn create_base_table(&self) -> Table {
        let mut table = Table::new();
        table
            .load_preset(presets::UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic);
        if let Some(width) = self.max_width {
            table.set_width(width);
        }
        table
    }
}

impl Default for TableFormatter {
    fn default() -> Self {
        Self::new()
    }
}

fn supports_color() -> bool {
    if env::var("NO_COLOR").is_ok() {
        return false;
    }
    !matches!(env::var("TERM"), Ok(term) if term == "dumb")
}

fn termination_color(termination: &str) -> Color {
    if termination == Termination::Reported.as_str() {
        Color::Green
    } else if termination == Termination::Cancelled.as_str() {
        Color::DarkGrey
    } else {
        Color::Red
    }
}
