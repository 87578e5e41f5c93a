//! Extraction of the JSON object from a free-form model completion.

use serde_json::Value;
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Response does not contain JSON")]
    NoJson,
    #[error("Invalid JSON: {0}")]
    Invalid(String),
}

/// Parse `text` as JSON; failing that, the span from the first `{` to the last `}`; failing
/// that, the first balanced `{...}` object. Prose, markdown fences and trailing chatter around
/// the object are tolerated.
pub fn parse_response_json(text: &str) -> Result<Value, ParseError> {
    if let Ok(value) = serde_json::from_str::<Value>(text) {
        return Ok(value);
    }

    let (start, end) = match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if end > start => (start, end),
        _ => return Err(ParseError::NoJson),
    };

    match serde_json::from_str::<Value>(&text[start..=end]) {
        Ok(value) => Ok(value),
        Err(err) => first_balanced_object(&text[start..])
            .and_then(|candidate| serde_json::from_str::<Value>(candidate).ok())
            .ok_or_else(|| ParseError::Invalid(err.to_string())),
    }
}

/// Slice of the first brace-balanced object at the start of `text`, skipping braces inside
/// string literals.
fn first_balanced_object(text: &str) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (index, ch) in text.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(&text[..=index]);
                }
            }
            _ => {}
        }
    }
    None
}
