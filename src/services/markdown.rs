//! Display formatting of model output
//!
//! Turns the lightweight markup the prompts ask for into the HTML subset the
//! clients render.

use crate::services::prompts::Language;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static BOLD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*(.+?)\*\*").expect("valid regex"));
static HIGHLIGHT: Lazy<Regex> = Lazy::new(|| Regex::new(r"##(.+?)##").expect("valid regex"));
static ITALIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"~~(.+?)~~").expect("valid regex"));

static STATUS_VI: Lazy<Regex> = Lazy::new(|| status_pattern(Language::Vietnamese));
static STATUS_EN: Lazy<Regex> = Lazy::new(|| status_pattern(Language::English));

const HIGHLIGHT_COLOR: &str = "#00796B";

/// Format free text for display; blank input yields an empty string
pub fn format_text(text: &str) -> String {
    if text.trim().is_empty() {
        return String::new();
    }

    let text = BOLD.replace_all(text, "<b>$1</b>");
    let text = HIGHLIGHT.replace_all(&text, format!("<font color='{}'><b>$1</b></font>", HIGHLIGHT_COLOR));
    let text = ITALIC.replace_all(&text, "<i>$1</i>");
    text.replace('\n', "<br>")
}

/// Format conservation status text, colorizing known status labels
pub fn format_conservation(text: &str, language: Language) -> String {
    let formatted = format_text(text);
    let pattern = match language {
        Language::Vietnamese => &*STATUS_VI,
        Language::English => &*STATUS_EN,
    };
    let statuses = language.conservation_statuses();

    pattern
        .replace_all(&formatted, |caps: &Captures| {
            let matched = &caps[0];
            match statuses
                .iter()
                .find(|(label, _)| label.to_lowercase() == matched.to_lowercase())
            {
                Some((label, color)) => format!("<font color='{}'><b>{}</b></font>", color, label),
                None => matched.to_string(),
            }
        })
        .into_owned()
}

/// Strip a leading rank label (`Kingdom: Plantae` -> `Plantae`) and capitalize
pub fn remove_rank_prefix(text: &str, label: &str) -> String {
    let trimmed = text.trim();
    let rest = strip_prefix_ignore_case(trimmed, label)
        .and_then(|rest| {
            let stripped = rest.trim_start_matches(|c: char| c == ':' || c == '-' || c.is_whitespace());
            (stripped.len() < rest.len()).then_some(stripped)
        })
        .unwrap_or(trimmed);

    let mut chars = rest.chars();
    let capitalized: String = match chars.next() {
        Some(first) if first.is_lowercase() => first.to_uppercase().chain(chars).collect(),
        _ => rest.to_string(),
    };
    capitalized.trim().to_string()
}

fn strip_prefix_ignore_case<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let mut chars = text.char_indices();
    for expected in prefix.chars() {
        let (_, actual) = chars.next()?;
        if !actual.to_lowercase().eq(expected.to_lowercase()) {
            return None;
        }
    }
    Some(chars.as_str())
}

/// One alternation over every label, longest first, so a label is never
/// matched inside an already colorized longer one
fn status_pattern(language: Language) -> Regex {
    let mut labels: Vec<&str> = language
        .conservation_statuses()
        .iter()
        .map(|(label, _)| *label)
        .collect();
    labels.sort_by_key(|label| std::cmp::Reverse(label.chars().count()));

    let alternation = labels
        .iter()
        .map(|label| regex::escape(label))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!("(?i){}", alternation)).expect("escaped labels form a valid regex")
}
