//! Logging utilities
//!
//! Helpers that keep request payloads readable in debug logs

use crate::models::gemini::{GeminiContent, GeminiRequest};
use serde_json::Value;

/// Set to true to include full request payloads in debug logs
/// Default is false to reduce log verbosity
pub const VERBOSE_REQUEST_LOGGING: bool = false;

/// Truncate a string with a note about original length
pub fn truncate_content(s: &str, max_chars: usize) -> String {
    let total = s.chars().count();
    if total > max_chars {
        let kept: String = s.chars().take(max_chars).collect();
        format!("{}... ({} chars truncated)", kept, total - max_chars)
    } else {
        s.to_string()
    }
}

fn filter_content(content: &GeminiContent) -> Value {
    let texts: Vec<Value> = content
        .parts
        .iter()
        .filter_map(|part| part.text.as_deref())
        .map(|text| Value::String(truncate_content(text, 200)))
        .collect();

    serde_json::json!({
        "role": content.role,
        "parts": texts,
    })
}

/// Create a filtered summary of a generation request for logging
/// Keeps the turn structure but truncates message text
pub fn create_request_log_summary(request: &GeminiRequest) -> Value {
    if VERBOSE_REQUEST_LOGGING {
        serde_json::to_value(request).unwrap_or(serde_json::json!({"error": "serialize failed"}))
    } else {
        let contents: Vec<Value> = request.contents.iter().map(filter_content).collect();
        serde_json::json!({
            "turns": contents.len(),
            "contents": contents,
        })
    }
}

/// Summary of an opaque provider-native payload
///
/// Falls back to a size note when the payload is not a generation request.
pub fn create_payload_log_summary(payload: &Value) -> Value {
    if VERBOSE_REQUEST_LOGGING {
        return payload.clone();
    }
    match serde_json::from_value::<GeminiRequest>(payload.clone()) {
        Ok(request) if !request.contents.is_empty() => create_request_log_summary(&request),
        _ => serde_json::json!({
            "payload": format!("[{} bytes]", payload.to_string().len()),
        }),
    }
}
