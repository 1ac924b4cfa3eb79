//! Hypotheses produced during orientation.

use serde::{Deserialize, Serialize};

use crate::domain::errors::{DomainError, DomainResult};

/// A typed guess about the cause of the defect. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hypothesis {
    /// Classification label, e.g. `cache` or `race_condition`
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
}

impl Hypothesis {
    pub fn new(kind: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            description: description.into(),
        }
    }
}

/// Extract the hypothesis list from an orientation reply.
///
/// The reply must contain a JSON array of `{"type", "description"}` objects,
/// either bare or inside a fenced code block. Surrounding prose is ignored.
pub fn parse_hypotheses(reply: &str) -> DomainResult<Vec<Hypothesis>> {
    let candidate = fenced_block(reply).unwrap_or(reply);
    let start = candidate.find('[').ok_or_else(|| {
        DomainError::OrientationFailed("reply does not contain a JSON array".to_string())
    })?;
    let end = candidate.rfind(']').filter(|end| *end > start).ok_or_else(|| {
        DomainError::OrientationFailed("reply contains an unterminated JSON array".to_string())
    })?;

    let hypotheses: Vec<Hypothesis> = serde_json::from_str(&candidate[start..=end])
        .map_err(|e| DomainError::OrientationFailed(format!("invalid hypothesis list: {e}")))?;

    let hypotheses: Vec<Hypothesis> = hypotheses
        .into_iter()
        .filter(|h| !h.description.trim().is_empty())
        .map(|h| Hypothesis::new(h.kind.trim(), h.description.trim()))
        .collect();

    if hypotheses.is_empty() {
        return Err(DomainError::OrientationFailed(
            "reply contained no hypotheses".to_string(),
        ));
    }
    Ok(hypotheses)
}

fn fenced_block(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let body_start = open + text[open..].find('\n')? + 1;
    let close = body_start + text[body_start..].find("```")?;
    Some(&text[body_start..close])
}
