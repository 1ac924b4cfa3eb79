//! Reply parsing for trial workers.
//!
//! A model reply is narrative text that may contain two kinds of blocks:
//!
//! ```text
//! <report> ... </report>
//!
//! <use_mcp_tool>
//!   <server_name>git-mcp</server_name>
//!   <tool_name>git_diff</tool_name>
//!   <arguments>{"target": "HEAD~1"}</arguments>
//! </use_mcp_tool>
//! ```
//!
//! Tags are matched case-insensitively. A complete report block wins over
//! everything else in the reply. Tool-call blocks are validated as a batch:
//! one malformed block rejects all of them.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::domain::errors::DirectiveParseError;
use crate::domain::models::{clamp_unit, AnalysisMetrics, CapabilityKind, CapabilityRequest, ScenarioResult};

const REPORT_OPEN: &str = "<report>";
const REPORT_CLOSE: &str = "</report>";
const TOOL_OPEN: &str = "<use_mcp_tool>";
const TOOL_CLOSE: &str = "</use_mcp_tool>";

/// One validated tool call, in reply order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    /// 1-based position among the reply's tool-call blocks
    pub index: usize,
    pub server: String,
    pub request: CapabilityRequest,
}

/// What a reply asks the worker to do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Body of the terminal report block
    Report(String),
    Directives(Vec<Directive>),
    /// At least one tool-call block failed to parse; none may run
    Malformed(Vec<DirectiveParseError>),
    /// Nothing actionable
    Narrative,
}

/// Classify a model reply.
pub fn parse_reply(text: &str) -> Reply {
    let scanner = Scanner::new(text);

    if let Some(body) = scanner.report_body() {
        return Reply::Report(body.trim().to_string());
    }

    let mut directives = Vec::new();
    let mut errors = Vec::new();
    let mut cursor = 0;
    let mut index = 0;

    while let Some(open) = scanner.find(TOOL_OPEN, cursor) {
        index += 1;
        let body_start = open + TOOL_OPEN.len();
        let Some(close) = scanner.find(TOOL_CLOSE, body_start) else {
            errors.push(DirectiveParseError::Unterminated { index });
            break;
        };
        match parse_directive(&scanner.sub(body_start, close), index) {
            Ok(directive) => directives.push(directive),
            Err(e) => errors.push(e),
        }
        cursor = close + TOOL_CLOSE.len();
    }

    if !errors.is_empty() {
        Reply::Malformed(errors)
    } else if directives.is_empty() {
        Reply::Narrative
    } else {
        Reply::Directives(directives)
    }
}

/// Case-insensitive tag search over a reply.
///
/// ASCII lowercasing keeps byte offsets identical between the original and
/// the folded copy, so offsets found in one slice the other.
struct Scanner<'a> {
    original: &'a str,
    folded: String,
}

impl<'a> Scanner<'a> {
    fn new(original: &'a str) -> Self {
        Self {
            original,
            folded: original.to_ascii_lowercase(),
        }
    }

    fn find(&self, tag: &str, from: usize) -> Option<usize> {
        self.folded.get(from..)?.find(tag).map(|pos| from + pos)
    }

    fn slice(&self, start: usize, end: usize) -> &'a str {
        &self.original[start..end]
    }

    fn sub(&self, start: usize, end: usize) -> Scanner<'a> {
        Scanner {
            original: self.slice(start, end),
            folded: self.folded[start..end].to_string(),
        }
    }

    fn report_body(&self) -> Option<&'a str> {
        let open = self.find(REPORT_OPEN, 0)?;
        let start = open + REPORT_OPEN.len();
        let close = self.find(REPORT_CLOSE, start)?;
        Some(self.slice(start, close))
    }

    /// Text of `<name>...</name>`, if both tags are present.
    fn element(&self, name: &str) -> Option<&'a str> {
        let open_tag = format!("<{name}>");
        let close_tag = format!("</{name}>");
        let open = self.find(&open_tag, 0)?;
        let start = open + open_tag.len();
        let close = self.find(&close_tag, start)?;
        Some(self.slice(start, close))
    }
}

fn parse_directive(block: &Scanner<'_>, index: usize) -> Result<Directive, DirectiveParseError> {
    let server = block
        .element("server_name")
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(DirectiveParseError::MissingElement {
            index,
            element: "server_name",
        })?;
    let tool = block
        .element("tool_name")
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(DirectiveParseError::MissingElement {
            index,
            element: "tool_name",
        })?;

    let arguments = match block.element("arguments").map(str::trim) {
        None | Some("") => Map::new(),
        Some(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => map,
            Ok(other) => {
                return Err(DirectiveParseError::InvalidJson {
                    index,
                    reason: format!("expected an object, found {}", json_kind(&other)),
                })
            }
            Err(e) => {
                return Err(DirectiveParseError::InvalidJson {
                    index,
                    reason: e.to_string(),
                })
            }
        },
    };

    let kind = CapabilityKind::from_server_name(server).ok_or_else(|| {
        DirectiveParseError::UnknownServer {
            index,
            server: server.to_string(),
        }
    })?;
    let request = CapabilityRequest::from_directive(kind, tool, arguments).map_err(|reason| {
        DirectiveParseError::InvalidCall {
            index,
            tool: tool.to_string(),
            reason,
        }
    })?;

    Ok(Directive {
        index,
        server: server.to_string(),
        request,
    })
}

const fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Report fields a model may supply as JSON.
#[derive(Debug, Default, Deserialize)]
struct ReportBody {
    #[serde(default, alias = "confirmed")]
    success: Option<bool>,
    #[serde(default)]
    confidence: Option<Value>,
    #[serde(default, alias = "fix")]
    fix_attempted: Option<String>,
    #[serde(default)]
    findings: Option<String>,
    #[serde(default)]
    explanation: Option<String>,
    #[serde(default)]
    metrics: Option<AnalysisMetrics>,
}

/// Fill `result` from a report body.
///
/// JSON bodies (bare or fenced) are read field by field. Anything else is
/// read as `KEY: value` lines: `CONFIRMED`, `CONFIDENCE`, `FIX` and
/// `EXPLANATION`. The findings default to the whole body.
pub fn apply_report(body: &str, mut result: ScenarioResult) -> ScenarioResult {
    let parsed = json_object(body)
        .and_then(|value| serde_json::from_value::<ReportBody>(value).ok())
        .unwrap_or_else(|| key_lines(body));

    if let Some(metrics) = parsed.metrics {
        let resources = std::mem::take(&mut result.metrics.progress.resources_used);
        let attempt = result.metrics.adaptation.attempt_number;
        result.metrics = metrics;
        result.metrics.progress.resources_used.extend(resources);
        if result.metrics.adaptation.attempt_number == 0 {
            result.metrics.adaptation.attempt_number = attempt;
        }
    }
    result.success = parsed.success.unwrap_or(false);
    result.confidence = parsed
        .confidence
        .as_ref()
        .and_then(confidence_value)
        .unwrap_or(0.0);
    result.fix_attempted = parsed.fix_attempted.unwrap_or_default();
    result.explanation = parsed.explanation.unwrap_or_default();
    result.findings = parsed
        .findings
        .filter(|f| !f.trim().is_empty())
        .unwrap_or_else(|| body.trim().to_string());
    result
}

fn json_object(body: &str) -> Option<Value> {
    let trimmed = body.trim();
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end < start {
        return None;
    }
    match serde_json::from_str(&trimmed[start..=end]) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => None,
    }
}

fn key_lines(body: &str) -> ReportBody {
    let mut report = ReportBody::default();
    for line in body.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim().trim_start_matches(['-', '*', ' ']).to_ascii_uppercase().as_str() {
            "CONFIRMED" | "SUCCESS" => report.success = Some(affirmative(value)),
            "CONFIDENCE" => report.confidence = Some(Value::String(value.to_string())),
            "FIX" | "FIX_ATTEMPTED" => report.fix_attempted = Some(value.to_string()),
            "EXPLANATION" => report.explanation = Some(value.to_string()),
            _ => {}
        }
    }
    report
}

fn affirmative(value: &str) -> bool {
    matches!(
        value.trim().trim_end_matches('.').to_ascii_lowercase().as_str(),
        "yes" | "true" | "y" | "confirmed"
    )
}

/// Numbers are taken as-is (percentages above 1 are scaled down), words map
/// to 0.9 / 0.6 / 0.3.
fn confidence_value(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => {
            let s = s.trim().trim_end_matches('%').trim();
            match s.to_ascii_lowercase().as_str() {
                "high" => 0.9,
                "medium" => 0.6,
                "low" => 0.3,
                other => other.parse::<f64>().ok()?,
            }
        }
        _ => return None,
    };
    let number = if number > 1.0 && number <= 100.0 {
        number / 100.0
    } else {
        number
    };
    Some(clamp_unit(number))
}
