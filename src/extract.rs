//! Turns raw backend output into the string handed back to the caller.

use serde_json::Value;

use crate::backend::{GenerationResult, RawOutput};
use crate::errors::{ProcessorError, Result};

/// Returned by the local backend when the model added nothing after the
/// prompt.
pub const NO_OUTPUT: &str = "";

pub const RESPONSE_KEY: &str = "response";

pub fn extract(result: &GenerationResult) -> Result<String> {
    match &result.output {
        RawOutput::Envelope(envelope) => extract_envelope(envelope),
        RawOutput::Decoded(decoded) => Ok(strip_prompt(decoded, &result.full_prompt)),
    }
}

/// The server's `response` field, untouched.
pub fn extract_envelope(envelope: &Value) -> Result<String> {
    match envelope.get(RESPONSE_KEY) {
        Some(Value::String(text)) => Ok(text.clone()),
        Some(other) => Err(ProcessorError::ResponseFormat(format!(
            "'{}' is not a string: {}",
            RESPONSE_KEY, other
        ))),
        None => {
            let server_error = envelope.get("error").and_then(Value::as_str);
            Err(ProcessorError::ResponseFormat(match server_error {
                Some(err) => format!("no '{}' field, server said: {}", RESPONSE_KEY, err),
                None => format!("no '{}' field in envelope", RESPONSE_KEY),
            }))
        }
    }
}

/// Remove the echoed prompt from decoded text and trim.
///
/// Detokenisation does not always reproduce the prompt byte for byte, so
/// when the prefix differs the prompt's character count is skipped
/// instead. Text no longer than the prompt yields [`NO_OUTPUT`].
pub fn strip_prompt(decoded: &str, full_prompt: &str) -> String {
    let rest = match decoded.strip_prefix(full_prompt) {
        Some(rest) => rest,
        None => {
            let prompt_chars = full_prompt.chars().count();
            match decoded.char_indices().nth(prompt_chars) {
                Some((idx, _)) => &decoded[idx..],
                None => return NO_OUTPUT.to_string(),
            }
        }
    };

    let trimmed = rest.trim();
    if trimmed.is_empty() {
        NO_OUTPUT.to_string()
    } else {
        trimmed.to_string()
    }
}
