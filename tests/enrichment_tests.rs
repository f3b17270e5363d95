//! Classify-then-enrich tests

mod common;

use common::{wait_until, ChannelStream, Reply, ScriptedStream};
use speciesproxy::models::species::{Identification, LoadingStage};
use speciesproxy::services::enrichment::{EnrichmentError, EnrichmentUpdate, SpeciesEnricher};
use speciesproxy::services::gateway::GatewayError;
use speciesproxy::services::prompts::Language;
use std::sync::Arc;
use tokio::sync::mpsc;

fn fig() -> Identification {
    Identification {
        scientific_name: "Ficus religiosa".to_string(),
        confidence: 92.5,
    }
}

async fn drain(mut receiver: mpsc::Receiver<EnrichmentUpdate>) -> Vec<EnrichmentUpdate> {
    let mut updates = Vec::new();
    while let Some(update) = receiver.recv().await {
        updates.push(update);
    }
    updates
}

#[tokio::test]
async fn test_updates_arrive_in_stage_order() {
    let llm = Arc::new(ScriptedStream::new(vec![
        Reply::text(&[
            "```json\n{\"commonName\": \"Sacred fig\",",
            " \"kingdom\": \"Kingdom: Plantae\", \"family\": \"Moraceae\"}\n```",
        ]),
        Reply::text(&[
            "{\"description\": \"**Heart-shaped** leaves\",",
            " \"habitat\": \"Temple grounds\", \"conservationStatus\": \"Least Concern\"}",
        ]),
    ]));
    let enricher = SpeciesEnricher::new(llm.clone());
    let (sender, receiver) = mpsc::channel(32);

    let info = enricher
        .enrich("camera", &fig(), Language::English, sender)
        .await
        .unwrap();
    let updates = drain(receiver).await;

    let stages: Vec<_> = updates.iter().map(|u| u.stage).collect();
    assert_eq!(
        stages,
        vec![
            LoadingStage::ScientificName,
            LoadingStage::Taxonomy,
            LoadingStage::Conservation,
            LoadingStage::Complete,
        ]
    );

    assert_eq!(updates[0].info.scientific_name, "Ficus religiosa");
    assert_eq!(updates[0].info.common_name, "...");
    assert_eq!(updates[1].info.common_name, "Sacred fig");
    assert_eq!(updates[1].info.kingdom, "<b>Plantae</b>");
    assert!(updates[1].info.description.is_empty());

    assert_eq!(info, updates[3].info);
    assert_eq!(info.family, "<b>Moraceae</b>");
    assert_eq!(info.description, "<b>Heart-shaped</b> leaves");
    assert_eq!(info.habitat, "Temple grounds");
    assert_eq!(
        info.conservation_status,
        "<font color='#55f200'><b>Least Concern</b></font>"
    );
    assert_eq!(info.confidence, 92.5);

    let requests = llm.requests();
    assert_eq!(requests.len(), 2);
    for request in requests {
        let prompt = request.contents[0].parts[0].text.clone().unwrap();
        assert!(prompt.contains("Ficus religiosa"));
    }
    assert!(!enricher.is_running("camera"));
}

#[tokio::test]
async fn test_stream_failure_stops_enrichment() {
    let llm = Arc::new(ScriptedStream::new(vec![Reply::Status(500, "boom".to_string())]));
    let enricher = SpeciesEnricher::new(llm.clone());
    let (sender, receiver) = mpsc::channel(32);

    let error = enricher
        .enrich("camera", &fig(), Language::English, sender)
        .await
        .unwrap_err();

    assert!(matches!(error, EnrichmentError::Gateway(GatewayError::Stream(_))));
    let stages: Vec<_> = drain(receiver).await.into_iter().map(|u| u.stage).collect();
    assert_eq!(stages, vec![LoadingStage::ScientificName]);
    assert_eq!(llm.requests().len(), 1);
    assert!(!enricher.is_running("camera"));
}

#[tokio::test]
async fn test_second_enrichment_rejected_then_cancelled() {
    let (llm, _chunks) = ChannelStream::new();
    let enricher = Arc::new(SpeciesEnricher::new(Arc::new(llm)));

    let running = {
        let enricher = enricher.clone();
        tokio::spawn(async move {
            let (sender, _receiver) = mpsc::channel(32);
            enricher.enrich("camera", &fig(), Language::English, sender).await
        })
    };
    wait_until(|| {
        let enricher = enricher.clone();
        async move { enricher.is_running("camera") }
    })
    .await;

    let (sender, _receiver) = mpsc::channel(32);
    let second = enricher.enrich("camera", &fig(), Language::English, sender).await;
    assert!(matches!(second, Err(EnrichmentError::Busy(session)) if session == "camera"));

    // Other sessions are independent
    assert!(!enricher.is_running("gallery"));

    assert!(enricher.cancel("camera"));
    assert!(matches!(running.await.unwrap(), Err(EnrichmentError::Cancelled)));
    assert!(!enricher.is_running("camera"));
}

#[tokio::test]
async fn test_dropped_receiver_does_not_stop_enrichment() {
    let llm = Arc::new(ScriptedStream::new(vec![
        Reply::text(&["{\"commonName\": \"Sacred fig\"}"]),
        Reply::text(&["{\"description\": \"Large tree\"}"]),
    ]));
    let enricher = SpeciesEnricher::new(llm);
    let (sender, receiver) = mpsc::channel(1);
    drop(receiver);

    let info = enricher
        .enrich("camera", &fig(), Language::English, sender)
        .await
        .unwrap();

    assert_eq!(info.common_name, "Sacred fig");
    assert_eq!(info.description, "Large tree");
}
