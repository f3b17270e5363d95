//! LLM upstream data models
//!
//! Defines the provider-native request, response and stream envelope structures

use serde::{Deserialize, Serialize};

/// Role used for user turns
pub const ROLE_USER: &str = "user";

/// Role used for assistant turns
pub const ROLE_MODEL: &str = "model";

/// Content generation request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeminiRequest {
    /// Conversation contents, oldest first
    pub contents: Vec<GeminiContent>,
}

/// One turn of content
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeminiContent {
    /// Turn role ("user" or "model")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Content parts
    #[serde(default)]
    pub parts: Vec<GeminiPart>,
}

/// A single content part
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeminiPart {
    /// Text payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// Generation response, also used as the envelope of each stream event
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeminiResponse {
    /// Response candidates
    #[serde(default)]
    pub candidates: Vec<GeminiCandidate>,
}

/// Response candidate
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeminiCandidate {
    /// Candidate content
    #[serde(default)]
    pub content: Option<GeminiContent>,
    /// Finish reason reported by the upstream
    #[serde(rename = "finishReason", default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

impl GeminiRequest {
    /// Single-turn request carrying one user prompt
    pub fn from_prompt(prompt: impl Into<String>) -> Self {
        Self {
            contents: vec![GeminiContent::text(ROLE_USER, prompt)],
        }
    }
}

impl GeminiContent {
    /// Text-only content for the given role
    pub fn text(role: &str, text: impl Into<String>) -> Self {
        Self {
            role: Some(role.to_string()),
            parts: vec![GeminiPart {
                text: Some(text.into()),
            }],
        }
    }
}

impl GeminiResponse {
    /// Text of the first candidate, all parts concatenated
    ///
    /// Returns an empty string when the envelope has no candidate or no text
    pub fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|candidate| candidate.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|part| part.text.as_deref())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }
}
