//! Streaming decoder
//!
//! Consumes event-stream lines one at a time, accumulates the emitted text and
//! re-attempts a structured decode of the whole accumulation after each
//! fragment. Partial output is invalid JSON for most of a stream, so a failed
//! decode simply keeps the previous snapshot.

use crate::models::gemini::GeminiResponse;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::borrow::Cow;
use tracing::debug;

/// Prefix of every event line
pub const EVENT_PREFIX: &str = "data:";

/// Payload marking the end of the stream
pub const DONE_SENTINEL: &str = "[DONE]";

static CODE_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)```(json)?").expect("valid regex"));

/// A progressively refined decode result
pub trait Snapshot: Clone + Default + Send + 'static {
    /// Best-effort decode of the accumulated text; `None` when not decodable yet
    fn decode(text: &str) -> Option<Self>;

    /// Fold a newer decode into `self`
    ///
    /// Fields present in `newer` overwrite; fields it omits are kept. Returns
    /// whether anything changed.
    fn merge(&mut self, newer: Self) -> bool;
}

/// Substring most likely to hold the JSON payload
///
/// From the first `{` to the last `}` when both exist in that order; otherwise
/// the text with code fences stripped.
pub fn json_candidate(text: &str) -> Cow<'_, str> {
    match (text.find('{'), text.rfind('}')) {
        (Some(first), Some(last)) if first < last => Cow::Borrowed(&text[first..=last]),
        _ => Cow::Owned(CODE_FENCE.replace_all(text, "").trim().to_string()),
    }
}

/// Decode the JSON candidate of `text` as `T`
pub fn decode_json<T: DeserializeOwned>(text: &str) -> Option<T> {
    serde_json::from_str(&json_candidate(text)).ok()
}

/// Schema-free snapshot: any JSON object
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JsonObject(pub Map<String, Value>);

impl JsonObject {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }
}

impl Snapshot for JsonObject {
    fn decode(text: &str) -> Option<Self> {
        decode_json(text).map(JsonObject)
    }

    fn merge(&mut self, newer: Self) -> bool {
        let mut changed = false;
        for (key, value) in newer.0 {
            if value.is_null() || self.0.get(&key) == Some(&value) {
                continue;
            }
            self.0.insert(key, value);
            changed = true;
        }
        changed
    }
}

/// Free-text snapshot: the accumulated text itself
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlainText(pub String);

impl Snapshot for PlainText {
    fn decode(text: &str) -> Option<Self> {
        Some(PlainText(text.to_string()))
    }

    fn merge(&mut self, newer: Self) -> bool {
        if self.0 == newer.0 {
            return false;
        }
        self.0 = newer.0;
        true
    }
}

/// Text carried by one event payload; empty when the envelope is malformed
pub fn event_fragment(payload: &str) -> String {
    match serde_json::from_str::<GeminiResponse>(payload) {
        Ok(envelope) => envelope.text(),
        Err(e) => {
            debug!("Skipping malformed stream event: {}", e);
            String::new()
        }
    }
}

/// Per-stream decoder state
#[derive(Debug, Clone)]
pub struct StreamDecoder<T: Snapshot> {
    accumulated: String,
    snapshot: Option<T>,
    finished: bool,
}

impl<T: Snapshot> Default for StreamDecoder<T> {
    fn default() -> Self {
        Self {
            accumulated: String::new(),
            snapshot: None,
            finished: false,
        }
    }
}

impl<T: Snapshot> StreamDecoder<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one line; returns the updated snapshot when it changed
    pub fn feed_line(&mut self, line: &str) -> Option<T> {
        if self.finished {
            return None;
        }

        let payload = line.strip_prefix(EVENT_PREFIX)?.trim();
        if payload == DONE_SENTINEL {
            debug!("Received end-of-stream sentinel");
            self.finished = true;
            return None;
        }

        let fragment = event_fragment(payload);
        if fragment.is_empty() {
            return None;
        }

        self.accumulated.push_str(&fragment);
        self.refresh()
    }

    /// Final decode attempt over the full text, sentinel or not
    ///
    /// Returns the resulting snapshot, if anything was ever decodable.
    pub fn finish(&mut self) -> Option<T> {
        self.finished = true;
        if !self.accumulated.is_empty() {
            self.refresh();
        }
        self.snapshot.clone()
    }

    /// True once the sentinel was seen or `finish` was called
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn accumulated_text(&self) -> &str {
        &self.accumulated
    }

    pub fn snapshot(&self) -> Option<&T> {
        self.snapshot.as_ref()
    }

    fn refresh(&mut self) -> Option<T> {
        let decoded = T::decode(&self.accumulated)?;
        let snapshot = self.snapshot.get_or_insert_with(T::default);
        if snapshot.merge(decoded) {
            Some(snapshot.clone())
        } else {
            None
        }
    }
}
