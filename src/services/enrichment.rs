//! Classify-then-enrich flow
//!
//! Starting from a vision identification, streams a taxonomy prompt and then a
//! details prompt, folding every decoded snapshot into one [`SpeciesInfo`]
//! that is published to the caller as it fills in.

use crate::models::gemini::GeminiRequest;
use crate::models::species::{Identification, LoadingStage, SpeciesDetails, SpeciesInfo, TaxonomyInfo};
use crate::services::decoder::{Snapshot, StreamDecoder};
use crate::services::gateway::{GatewayError, LlmStream};
use crate::services::guard::{GenerationGuard, SessionGuards};
use crate::services::markdown::{format_conservation, format_text, remove_rank_prefix};
use crate::services::prompts::{details_prompt, taxonomy_prompt, Language, Rank};
use crate::utils::logging::truncate_content;
use futures::StreamExt;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Placeholder shown until the common name arrives
const PENDING: &str = "...";

/// Enrichment error types
#[derive(Error, Debug)]
pub enum EnrichmentError {
    #[error("An enrichment is already running for session {0}")]
    Busy(String),

    #[error("Enrichment cancelled")]
    Cancelled,

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

/// Progress published after every change
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichmentUpdate {
    pub info: SpeciesInfo,
    pub stage: LoadingStage,
}

/// Drives enrichment streams, one per session key at a time
pub struct SpeciesEnricher {
    llm: Arc<dyn LlmStream>,
    guards: SessionGuards<String>,
}

impl SpeciesEnricher {
    pub fn new(llm: Arc<dyn LlmStream>) -> Self {
        Self {
            llm,
            guards: SessionGuards::new(),
        }
    }

    pub fn cancel(&self, session: &str) -> bool {
        self.guards.cancel(&session.to_string())
    }

    pub fn is_running(&self, session: &str) -> bool {
        self.guards.is_generating(&session.to_string())
    }

    /// Enrich `identification`, publishing each update on `updates` in order
    ///
    /// Returns the final aggregated info. A dropped receiver does not stop the
    /// enrichment.
    pub async fn enrich(
        &self,
        session: &str,
        identification: &Identification,
        language: Language,
        updates: mpsc::Sender<EnrichmentUpdate>,
    ) -> Result<SpeciesInfo, EnrichmentError> {
        let guard = self
            .guards
            .try_acquire(session.to_string())
            .ok_or_else(|| EnrichmentError::Busy(session.to_string()))?;

        info!(
            "Enriching {} (confidence {:.1})",
            identification.scientific_name, identification.confidence
        );

        let mut info = SpeciesInfo {
            scientific_name: identification.scientific_name.clone(),
            confidence: identification.confidence,
            common_name: PENDING.to_string(),
            ..Default::default()
        };
        publish(&updates, &info, LoadingStage::ScientificName).await;

        let prompt = taxonomy_prompt(&identification.scientific_name, language);
        self.stream_snapshots(&guard, prompt, &updates, &mut info, |info, taxonomy: TaxonomyInfo| {
            apply_taxonomy(info, &taxonomy, language)
        })
        .await?;

        let prompt = details_prompt(&identification.scientific_name, language);
        self.stream_snapshots(&guard, prompt, &updates, &mut info, |info, details: SpeciesDetails| {
            apply_details(info, &details, language)
        })
        .await?;

        publish(&updates, &info, LoadingStage::Complete).await;
        info!("Enrichment of {} complete", identification.scientific_name);
        Ok(info)
    }

    async fn stream_snapshots<T, F>(
        &self,
        guard: &GenerationGuard<String>,
        prompt: String,
        updates: &mpsc::Sender<EnrichmentUpdate>,
        info: &mut SpeciesInfo,
        mut apply: F,
    ) -> Result<(), EnrichmentError>
    where
        T: Snapshot,
        F: FnMut(&mut SpeciesInfo, T) -> Option<LoadingStage> + Send,
    {
        let handle = self.llm.open_stream(&GeminiRequest::from_prompt(prompt)).await?;
        if !handle.is_success() {
            let status = handle.status;
            let body = handle.text().await;
            return Err(GatewayError::Stream(format!(
                "upstream returned {}: {}",
                status,
                truncate_content(&body, 200)
            ))
            .into());
        }

        let mut lines = handle.lines();
        let mut decoder = StreamDecoder::<T>::new();

        loop {
            let line = tokio::select! {
                biased;
                _ = guard.cancelled() => return Err(EnrichmentError::Cancelled),
                line = lines.next() => line,
            };
            let Some(line) = line else { break };

            if let Some(snapshot) = decoder.feed_line(&line?) {
                if let Some(stage) = apply(info, snapshot) {
                    publish(updates, info, stage).await;
                }
            }
            if decoder.is_finished() {
                break;
            }
        }

        match decoder.finish() {
            Some(snapshot) => {
                if let Some(stage) = apply(info, snapshot) {
                    publish(updates, info, stage).await;
                }
            }
            None => warn!(
                "Stream ended without a decodable result: {}",
                truncate_content(decoder.accumulated_text(), 200)
            ),
        }
        Ok(())
    }
}

async fn publish(updates: &mpsc::Sender<EnrichmentUpdate>, info: &SpeciesInfo, stage: LoadingStage) {
    let update = EnrichmentUpdate {
        info: info.clone(),
        stage,
    };
    if updates.send(update).await.is_err() {
        debug!("Enrichment receiver dropped; update discarded");
    }
}

fn set_if_changed(slot: &mut String, value: String) -> bool {
    if *slot == value {
        return false;
    }
    *slot = value;
    true
}

fn set_rank(slot: &mut String, value: Option<&str>, rank: Rank, language: Language) -> bool {
    match value.filter(|v| !v.trim().is_empty()) {
        Some(value) => set_if_changed(
            slot,
            format!("<b>{}</b>", remove_rank_prefix(value, rank.label(language))),
        ),
        None => false,
    }
}

/// Fold a taxonomy snapshot into `info`; returns the stage reached if anything changed
pub fn apply_taxonomy(info: &mut SpeciesInfo, taxonomy: &TaxonomyInfo, language: Language) -> Option<LoadingStage> {
    let common_name = taxonomy
        .common_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty() && *name != PENDING)
        .map_or(false, |name| set_if_changed(&mut info.common_name, name.to_string()));

    let mut ranks = set_rank(&mut info.kingdom, taxonomy.kingdom.as_deref(), Rank::Kingdom, language);
    ranks |= set_rank(&mut info.phylum, taxonomy.phylum.as_deref(), Rank::Phylum, language);
    ranks |= set_rank(&mut info.class_name, taxonomy.class_name.as_deref(), Rank::Class, language);
    ranks |= set_rank(&mut info.taxorder, taxonomy.taxorder.as_deref(), Rank::Order, language);
    ranks |= set_rank(&mut info.family, taxonomy.family.as_deref(), Rank::Family, language);
    ranks |= set_rank(&mut info.genus, taxonomy.genus.as_deref(), Rank::Genus, language);
    ranks |= set_rank(&mut info.species, taxonomy.species.as_deref(), Rank::Species, language);

    if ranks {
        Some(LoadingStage::Taxonomy)
    } else if common_name {
        Some(LoadingStage::CommonName)
    } else {
        None
    }
}

/// Fold a details snapshot into `info`; returns the furthest stage that changed
pub fn apply_details(info: &mut SpeciesInfo, details: &SpeciesDetails, language: Language) -> Option<LoadingStage> {
    let mut stage = None;

    let fields = [
        (&mut info.description, details.description.as_deref(), LoadingStage::Description),
        (&mut info.characteristics, details.characteristics.as_deref(), LoadingStage::Characteristics),
        (&mut info.distribution, details.distribution.as_deref(), LoadingStage::Distribution),
        (&mut info.habitat, details.habitat.as_deref(), LoadingStage::Habitat),
    ];
    for (slot, value, field_stage) in fields {
        if let Some(value) = value.filter(|v| !v.trim().is_empty()) {
            if set_if_changed(slot, format_text(value)) {
                stage = Some(field_stage);
            }
        }
    }

    if let Some(status) = details.conservation_status.as_deref().filter(|v| !v.trim().is_empty()) {
        if set_if_changed(&mut info.conservation_status, format_conservation(status, language)) {
            stage = Some(LoadingStage::Conservation);
        }
    }

    stage
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_taxonomy_stages() {
        let mut info = SpeciesInfo {
            common_name: PENDING.to_string(),
            ..Default::default()
        };

        let stage = apply_taxonomy(
            &mut info,
            &TaxonomyInfo {
                common_name: Some("Sacred fig".to_string()),
                ..Default::default()
            },
            Language::English,
        );
        assert_eq!(stage, Some(LoadingStage::CommonName));
        assert_eq!(info.common_name, "Sacred fig");

        let stage = apply_taxonomy(
            &mut info,
            &TaxonomyInfo {
                common_name: Some("Sacred fig".to_string()),
                kingdom: Some("Kingdom: plantae".to_string()),
                ..Default::default()
            },
            Language::English,
        );
        assert_eq!(stage, Some(LoadingStage::Taxonomy));
        assert_eq!(info.kingdom, "<b>Plantae</b>");

        assert_eq!(apply_taxonomy(&mut info, &TaxonomyInfo::default(), Language::English), None);
    }

    #[test]
    fn test_pending_common_name_ignored() {
        let mut info = SpeciesInfo::default();
        let stage = apply_taxonomy(
            &mut info,
            &TaxonomyInfo {
                common_name: Some(PENDING.to_string()),
                ..Default::default()
            },
            Language::English,
        );
        assert_eq!(stage, None);
    }

    #[test]
    fn test_apply_details_formats_fields() {
        let mut info = SpeciesInfo::default();
        let details = SpeciesDetails {
            description: Some("**Tall** tree".to_string()),
            conservation_status: Some("Least Concern".to_string()),
            ..Default::default()
        };

        assert_eq!(
            apply_details(&mut info, &details, Language::English),
            Some(LoadingStage::Conservation)
        );
        assert_eq!(info.description, "<b>Tall</b> tree");
        assert_eq!(
            info.conservation_status,
            "<font color='#55f200'><b>Least Concern</b></font>"
        );
        assert_eq!(apply_details(&mut info, &details, Language::English), None);
    }
}
