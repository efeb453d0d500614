//! Parsing of backend responses into [`AnalysisResult`]s.
//!
//! Models do not always return clean JSON. Parsing tries, in order: the
//! raw text, the body of a fenced code block, and the outermost `{...}`
//! span. The payload may be `{"results": [...]}` or a bare array.

use serde::Deserialize;
use throng_types::{AnalysisResult, ResponseCategory};

use crate::error::InferenceError;

#[derive(Debug, Deserialize)]
struct RawAnalysis {
    sentiment_shift: f32,
    #[serde(default)]
    engagement_change: f32,
    #[serde(default)]
    category: String,
    #[serde(default = "default_confidence")]
    confidence: f32,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawPayload {
    Wrapped { results: Vec<RawAnalysis> },
    Bare(Vec<RawAnalysis>),
}

const fn default_confidence() -> f32 {
    0.5
}

/// Parse a model response holding exactly `expected` results.
///
/// # Errors
///
/// Returns [`InferenceError::Parse`] when no strategy yields valid JSON or a
/// value is non-finite, and [`InferenceError::ResultCount`] when the count
/// does not match.
pub fn parse_analysis_response(
    raw: &str,
    expected: usize,
) -> Result<Vec<AnalysisResult>, InferenceError> {
    let trimmed = raw.trim();
    let payload = candidates(trimmed)
        .into_iter()
        .find_map(|text| serde_json::from_str::<RawPayload>(text).ok())
        .ok_or_else(|| InferenceError::Parse(format!("no JSON payload in response: {trimmed}")))?;

    let raw_results = match payload {
        RawPayload::Wrapped { results } | RawPayload::Bare(results) => results,
    };
    if raw_results.len() != expected {
        return Err(InferenceError::ResultCount {
            expected,
            actual: raw_results.len(),
        });
    }
    raw_results.into_iter().map(convert).collect()
}

fn candidates(text: &str) -> Vec<&str> {
    let mut out = vec![text];
    if let Some(block) = fenced_block(text) {
        out.push(block);
    }
    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}'))
        && start < end
        && let Some(span) = text.get(start..=end)
    {
        out.push(span);
    }
    out
}

/// Body of the first fenced code block, with an optional language tag.
fn fenced_block(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let after_fence = text.get(open.checked_add(3)?..)?;
    let body_start = after_fence.find('\n')?.checked_add(1)?;
    let body = after_fence.get(body_start..)?;
    let close = body.find("```")?;
    body.get(..close).map(str::trim)
}

fn convert(raw: RawAnalysis) -> Result<AnalysisResult, InferenceError> {
    if !(raw.sentiment_shift.is_finite()
        && raw.engagement_change.is_finite()
        && raw.confidence.is_finite())
    {
        return Err(InferenceError::Parse("non-finite value in analysis".to_owned()));
    }
    Ok(AnalysisResult {
        sentiment_shift: raw.sentiment_shift.clamp(-1.0, 1.0),
        engagement_change: raw.engagement_change.clamp(-1.0, 1.0),
        category: ResponseCategory::from_label(&raw.category),
        confidence: raw.confidence.clamp(0.0, 1.0),
    })
}
