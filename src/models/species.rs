//! Species identification and enrichment models

use crate::services::decoder::{decode_json, Snapshot};
use serde::{Deserialize, Deserializer, Serialize};

/// Top result of the vision classification service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identification {
    /// Scientific name of the identified taxon
    pub scientific_name: String,
    /// Combined confidence score
    pub confidence: f64,
}

impl Identification {
    /// Take the top result out of a vision classification response
    ///
    /// The response is otherwise opaque; only `results[0].taxon.name` and
    /// `results[0].combined_score` are read.
    pub fn from_vision_response(response: &serde_json::Value) -> Option<Self> {
        let top = response.get("results")?.as_array()?.first()?;
        let scientific_name = top.get("taxon")?.get("name")?.as_str()?.trim();
        if scientific_name.is_empty() {
            return None;
        }

        Some(Self {
            scientific_name: scientific_name.to_string(),
            confidence: top
                .get("combined_score")
                .and_then(|score| score.as_f64())
                .unwrap_or(0.0),
        })
    }
}

/// Taxonomy classification decoded from the LLM stream
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxonomyInfo {
    #[serde(default)]
    pub common_name: Option<String>,
    #[serde(default)]
    pub kingdom: Option<String>,
    #[serde(default)]
    pub phylum: Option<String>,
    #[serde(default)]
    pub class_name: Option<String>,
    #[serde(default)]
    pub taxorder: Option<String>,
    #[serde(default)]
    pub family: Option<String>,
    #[serde(default)]
    pub genus: Option<String>,
    #[serde(default)]
    pub species: Option<String>,
}

/// Descriptive details decoded from the LLM stream
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeciesDetails {
    #[serde(default)]
    pub description: Option<String>,
    /// Either a string or a list of lines upstream; lists are joined with newlines
    #[serde(default, deserialize_with = "string_or_lines")]
    pub characteristics: Option<String>,
    #[serde(default)]
    pub distribution: Option<String>,
    #[serde(default)]
    pub habitat: Option<String>,
    #[serde(default)]
    pub conservation_status: Option<String>,
}

/// Aggregated, display-ready species information
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeciesInfo {
    pub common_name: String,
    pub scientific_name: String,
    pub kingdom: String,
    pub phylum: String,
    pub class_name: String,
    pub taxorder: String,
    pub family: String,
    pub genus: String,
    pub species: String,
    pub description: String,
    pub characteristics: String,
    pub distribution: String,
    pub habitat: String,
    pub conservation_status: String,
    pub confidence: f64,
}

/// Progress marker published with each enrichment update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadingStage {
    ScientificName,
    CommonName,
    Taxonomy,
    Description,
    Characteristics,
    Distribution,
    Habitat,
    Conservation,
    Complete,
}

/// Overwrite `slot` when `newer` carries a non-blank value; returns true on change
fn merge_field(slot: &mut Option<String>, newer: Option<String>) -> bool {
    match newer {
        Some(value) if !value.trim().is_empty() && slot.as_deref() != Some(value.as_str()) => {
            *slot = Some(value);
            true
        }
        _ => false,
    }
}

impl Snapshot for TaxonomyInfo {
    fn decode(text: &str) -> Option<Self> {
        decode_json(text)
    }

    fn merge(&mut self, newer: Self) -> bool {
        let mut changed = merge_field(&mut self.common_name, newer.common_name);
        changed |= merge_field(&mut self.kingdom, newer.kingdom);
        changed |= merge_field(&mut self.phylum, newer.phylum);
        changed |= merge_field(&mut self.class_name, newer.class_name);
        changed |= merge_field(&mut self.taxorder, newer.taxorder);
        changed |= merge_field(&mut self.family, newer.family);
        changed |= merge_field(&mut self.genus, newer.genus);
        changed |= merge_field(&mut self.species, newer.species);
        changed
    }
}

impl Snapshot for SpeciesDetails {
    fn decode(text: &str) -> Option<Self> {
        decode_json(text)
    }

    fn merge(&mut self, newer: Self) -> bool {
        let mut changed = merge_field(&mut self.description, newer.description);
        changed |= merge_field(&mut self.characteristics, newer.characteristics);
        changed |= merge_field(&mut self.distribution, newer.distribution);
        changed |= merge_field(&mut self.habitat, newer.habitat);
        changed |= merge_field(&mut self.conservation_status, newer.conservation_status);
        changed
    }
}

fn string_or_lines<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrLines {
        Text(String),
        Lines(Vec<serde_json::Value>),
        Other(serde_json::Value),
    }

    Ok(match Option::<StringOrLines>::deserialize(deserializer)? {
        Some(StringOrLines::Text(text)) => Some(text),
        Some(StringOrLines::Lines(lines)) => Some(
            lines
                .iter()
                .map(|line| match line {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join("\n"),
        ),
        Some(StringOrLines::Other(_)) | None => None,
    })
}
