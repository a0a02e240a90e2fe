//! Recovers `TicketAnalytics` from free-form model replies.
//!
//! Models routinely wrap the requested JSON in prose or markdown fences, and
//! prose may contain braces of its own. Extraction scans for
//! balanced `{...}` spans, skipping braces inside JSON string literals, and
//! takes the first span that parses as a JSON object.

use serde_json::Value;

use crate::error::ParseError;
use crate::pipeline::types::{TicketAnalytics, Urgency};

/// Response used when the model's JSON omits `response` or leaves it empty.
pub const PLACEHOLDER_RESPONSE: &str = "Thank you for contacting support.";

/// Parse a model reply into analytics.
///
/// Missing or invalid fields in a found object are defaulted here; a reply
/// with no usable object is an error for the caller to handle.
pub fn parse_analytics_reply(raw: &str) -> Result<TicketAnalytics, ParseError> {
    let object = extract_first_json_object(raw)?;

    let urgency = object
        .get("urgency")
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<Urgency>().ok())
        .unwrap_or(Urgency::Medium);

    let response = object
        .get("response")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(PLACEHOLDER_RESPONSE)
        .to_string();

    Ok(TicketAnalytics { urgency, response })
}

/// Return the first balanced span that parses as a JSON object.
///
/// Every `{` is a candidate start. A candidate that never closes or does not
/// parse is dropped and scanning resumes one byte later, so objects after a
/// stray brace or inside a non-JSON wrapper are still found.
pub fn extract_first_json_object(text: &str) -> Result<serde_json::Map<String, Value>, ParseError> {
    let mut last_error = None;

    for (start, _) in text.match_indices('{') {
        let Some(end) = balanced_span_end(text, start) else {
            continue;
        };
        match serde_json::from_str::<Value>(&text[start..end]) {
            Ok(Value::Object(map)) => return Ok(map),
            Ok(_) => {}
            Err(e) => {
                last_error.get_or_insert(e.to_string());
            }
        }
    }

    match last_error {
        Some(e) => Err(ParseError::InvalidJson(e)),
        None => Err(ParseError::NoJsonObject),
    }
}

/// End offset (exclusive) of the balanced `{...}` span opening at `start`.
///
/// Braces inside double-quoted strings (with backslash escapes) do not count.
fn balanced_span_end(text: &str, start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in text.as_bytes()[start..].iter().enumerate() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(start + offset + 1);
                }
            }
            _ => {}
        }
    }
    None
}
