//! Generation session coordinator tests
//!
//! Turn lifecycle, single-generation guard, cancellation and error finalization

mod common;

use axum::body::Bytes;
use common::{event, wait_until, ChannelStream, Reply, ScriptedStream};
use httpmock::prelude::*;
use speciesproxy::config::AppConfig;
use speciesproxy::models::gemini::{ROLE_MODEL, ROLE_USER};
use speciesproxy::services::gateway::{Gateway, GatewayError, RetryDiagnostics};
use speciesproxy::services::prompts::Language;
use speciesproxy::services::session::{GenerationCoordinator, SessionError, TurnStatus};
use speciesproxy::services::store::{ChatStore, MemoryChatStore};
use std::sync::Arc;
use std::time::Duration;

const TITLE: &str = "New chat";
const WELCOME: &str = "Hi! Ask me about any species.";

fn coordinator(llm: Arc<ScriptedStream>) -> (GenerationCoordinator, Arc<MemoryChatStore>) {
    let store = Arc::new(MemoryChatStore::new());
    (
        GenerationCoordinator::new(store.clone(), llm, Language::English),
        store,
    )
}

async fn provisional_count(store: &MemoryChatStore, conversation_id: i64) -> usize {
    store
        .messages(conversation_id)
        .await
        .unwrap()
        .iter()
        .filter(|m| m.is_provisional)
        .count()
}

#[tokio::test]
async fn test_turn_streams_into_finalized_reply() {
    let llm = Arc::new(ScriptedStream::new(vec![Reply::text(&["**Quercus** is", " a genus\nof oaks"])]));
    let (coordinator, store) = coordinator(llm.clone());

    let conversation = coordinator.start_conversation(WELCOME, TITLE).await.unwrap();
    let outcome = coordinator
        .send_turn(conversation.id, "What is Quercus?", TITLE)
        .await
        .unwrap();

    assert_eq!(outcome.status, TurnStatus::Completed);
    assert_eq!(outcome.content, "<b>Quercus</b> is a genus<br>of oaks");

    let messages = store.messages(conversation.id).await.unwrap();
    assert_eq!(messages.len(), 3);
    assert!(messages[1].is_user);
    assert_eq!(messages[1].content, "What is Quercus?");
    assert_eq!(messages[2].id, outcome.message_id);
    assert!(!messages[2].is_provisional);
    assert_eq!(messages[2].content, outcome.content);

    // History excludes the provisional record and maps roles
    let request = &llm.requests()[0];
    assert_eq!(request.contents.len(), 2);
    assert_eq!(request.contents[0].role.as_deref(), Some(ROLE_MODEL));
    assert_eq!(request.contents[0].parts[0].text.as_deref(), Some(WELCOME));
    assert_eq!(request.contents[1].role.as_deref(), Some(ROLE_USER));

    let conversation = store.conversation(conversation.id).await.unwrap().unwrap();
    assert_eq!(conversation.last_message_preview, "**Quercus** is a genus\nof oaks");
    assert!(!coordinator.is_generating(conversation.id));
}

#[tokio::test]
async fn test_first_message_renames_placeholder_title() {
    let llm = Arc::new(ScriptedStream::new(vec![Reply::text(&["ok"]), Reply::text(&["ok"])]));
    let (coordinator, store) = coordinator(llm);

    let conversation = coordinator.start_conversation(WELCOME, TITLE).await.unwrap();
    let input = "Tell me everything about the monarch butterfly migration";
    coordinator.send_turn(conversation.id, input, TITLE).await.unwrap();

    let renamed = store.conversation(conversation.id).await.unwrap().unwrap();
    assert_eq!(renamed.title, "Tell me everything about the m...");

    coordinator.send_turn(conversation.id, "And its diet?", TITLE).await.unwrap();
    let again = store.conversation(conversation.id).await.unwrap().unwrap();
    assert_eq!(again.title, renamed.title);
}

#[tokio::test]
async fn test_second_turn_rejected_while_generating() {
    let (llm, sender) = ChannelStream::new();
    let store = Arc::new(MemoryChatStore::new());
    let coordinator = Arc::new(GenerationCoordinator::new(store.clone(), Arc::new(llm), Language::English));

    let conversation = coordinator.start_conversation(WELCOME, TITLE).await.unwrap();
    let id = conversation.id;

    let running = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.send_turn(id, "first", TITLE).await })
    };
    wait_until(|| {
        let store = store.clone();
        async move { provisional_count(&store, id).await == 1 }
    })
    .await;
    assert!(coordinator.is_generating(id));

    let second = coordinator.send_turn(id, "second", TITLE).await;
    assert!(matches!(second, Err(SessionError::Busy(busy)) if busy == id));
    assert_eq!(provisional_count(&store, id).await, 1);

    sender.send(Ok(Bytes::from(event("done")))).await.unwrap();
    drop(sender);

    let outcome = running.await.unwrap().unwrap();
    assert_eq!(outcome.status, TurnStatus::Completed);
    assert_eq!(outcome.content, "done");
    assert_eq!(provisional_count(&store, id).await, 0);

    // Only the accepted user message was stored
    let users: Vec<_> = store
        .messages(id)
        .await
        .unwrap()
        .into_iter()
        .filter(|m| m.is_user)
        .map(|m| m.content)
        .collect();
    assert_eq!(users, vec!["first"]);
    assert!(!coordinator.is_generating(id));
}

#[tokio::test]
async fn test_cancel_keeps_last_persisted_snapshot() {
    let (llm, sender) = ChannelStream::new();
    let store = Arc::new(MemoryChatStore::new());
    let coordinator = Arc::new(GenerationCoordinator::new(store.clone(), Arc::new(llm), Language::English));

    let conversation = coordinator.start_conversation(WELCOME, TITLE).await.unwrap();
    let id = conversation.id;

    let running = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.send_turn(id, "hello", TITLE).await })
    };

    sender.send(Ok(Bytes::from(event("Partial **answer**")))).await.unwrap();
    wait_until(|| {
        let store = store.clone();
        async move {
            store
                .messages(id)
                .await
                .unwrap()
                .iter()
                .any(|m| m.is_provisional && m.content == "Partial <b>answer</b>")
        }
    })
    .await;

    assert!(coordinator.cancel(id));
    assert!(!coordinator.is_generating(id));

    let outcome = running.await.unwrap().unwrap();
    assert_eq!(outcome.status, TurnStatus::Cancelled);
    assert_eq!(outcome.content, "Partial <b>answer</b>");

    // Later bytes have no effect
    let _ = sender.send(Ok(Bytes::from(event(" more")))).await;
    let message = store.message(outcome.message_id).await.unwrap().unwrap();
    assert!(!message.is_provisional);
    assert_eq!(message.content, "Partial <b>answer</b>");
}

#[tokio::test]
async fn test_cancel_before_first_snapshot_uses_stopped_message() {
    let (llm, _sender) = ChannelStream::new();
    let store = Arc::new(MemoryChatStore::new());
    let coordinator = Arc::new(GenerationCoordinator::new(store.clone(), Arc::new(llm), Language::English));

    let conversation = coordinator.start_conversation(WELCOME, TITLE).await.unwrap();
    let id = conversation.id;

    let running = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.send_turn(id, "hello", TITLE).await })
    };
    wait_until(|| {
        let store = store.clone();
        async move { provisional_count(&store, id).await == 1 }
    })
    .await;
    assert!(coordinator.cancel(id));

    let outcome = running.await.unwrap().unwrap();
    assert_eq!(outcome.status, TurnStatus::Cancelled);
    assert_eq!(outcome.content, Language::English.stopped_message());
    assert_eq!(provisional_count(&store, id).await, 0);
}

#[tokio::test]
async fn test_abandoned_turn_is_finalized() {
    let (llm, sender) = ChannelStream::new();
    let store = Arc::new(MemoryChatStore::new());
    let coordinator = GenerationCoordinator::new(store.clone(), Arc::new(llm), Language::English);

    let conversation = coordinator.start_conversation(WELCOME, TITLE).await.unwrap();
    let id = conversation.id;

    sender.send(Ok(Bytes::from(event("Oaks are **trees**")))).await.unwrap();
    let result = tokio::time::timeout(
        Duration::from_millis(200),
        coordinator.send_turn(id, "Tell me about oaks", TITLE),
    )
    .await;
    assert!(result.is_err());
    assert!(!coordinator.is_generating(id));

    wait_until(|| {
        let store = store.clone();
        async move { provisional_count(&store, id).await == 0 }
    })
    .await;

    let messages = store.messages(id).await.unwrap();
    let reply = messages.last().unwrap();
    assert!(!reply.is_user);
    assert!(!reply.is_provisional);
    assert_eq!(reply.content, "Oaks are <b>trees</b>");
}

#[tokio::test]
async fn test_abandoned_turn_without_snapshot_uses_stopped_message() {
    let (llm, _sender) = ChannelStream::new();
    let store = Arc::new(MemoryChatStore::new());
    let coordinator = GenerationCoordinator::new(store.clone(), Arc::new(llm), Language::English);

    let conversation = coordinator.start_conversation(WELCOME, TITLE).await.unwrap();
    let id = conversation.id;

    let result = tokio::time::timeout(Duration::from_millis(200), coordinator.send_turn(id, "hello", TITLE)).await;
    assert!(result.is_err());

    wait_until(|| {
        let store = store.clone();
        async move { provisional_count(&store, id).await == 0 }
    })
    .await;

    let messages = store.messages(id).await.unwrap();
    assert_eq!(messages.last().unwrap().content, Language::English.stopped_message());
}

#[tokio::test]
async fn test_cancel_without_running_turn() {
    let (coordinator, _) = coordinator(Arc::new(ScriptedStream::default()));
    assert!(!coordinator.cancel(1));
}

#[tokio::test]
async fn test_stream_error_finalizes_with_message() {
    let llm = Arc::new(ScriptedStream::new(vec![Reply::Chunks(vec![
        Ok(Bytes::from(event("Half an ans"))),
        Err(GatewayError::Stream("connection reset".to_string())),
    ])]));
    let (coordinator, store) = coordinator(llm);

    let conversation = coordinator.start_conversation(WELCOME, TITLE).await.unwrap();
    let outcome = coordinator.send_turn(conversation.id, "hello", TITLE).await.unwrap();

    assert_eq!(outcome.status, TurnStatus::Failed);
    assert_eq!(outcome.content, "Connection error: Stream error: connection reset");

    let message = store.message(outcome.message_id).await.unwrap().unwrap();
    assert!(!message.is_provisional);
    assert_eq!(message.content, outcome.content);
    assert!(!coordinator.is_generating(conversation.id));
}

#[tokio::test]
async fn test_non_success_stream_is_a_failed_turn() {
    let llm = Arc::new(ScriptedStream::new(vec![Reply::Status(503, "overloaded".to_string())]));
    let (coordinator, store) = coordinator(llm);

    let conversation = coordinator.start_conversation(WELCOME, TITLE).await.unwrap();
    let outcome = coordinator.send_turn(conversation.id, "hello", TITLE).await.unwrap();

    assert_eq!(outcome.status, TurnStatus::Failed);
    assert!(outcome.content.contains("upstream returned 503: overloaded"));
    assert_eq!(provisional_count(&store, conversation.id).await, 0);
}

#[tokio::test]
async fn test_exhausted_gateway_is_a_failed_turn() {
    let diagnostics = RetryDiagnostics {
        attempts: 2,
        failed_credentials: vec![0, 1],
        success_credential: None,
        last_error: Some("quota".to_string()),
    };
    let llm = Arc::new(ScriptedStream::new(vec![Reply::Fail(GatewayError::Exhausted(diagnostics))]));
    let (coordinator, _) = coordinator(llm);

    let conversation = coordinator.start_conversation(WELCOME, TITLE).await.unwrap();
    let outcome = coordinator.send_turn(conversation.id, "hello", TITLE).await.unwrap();

    assert_eq!(outcome.status, TurnStatus::Failed);
    assert_eq!(
        outcome.content,
        "Connection error: All credentials failed after 2 attempts: quota"
    );
}

#[tokio::test]
async fn test_renew_replaces_assistant_reply() {
    let llm = Arc::new(ScriptedStream::new(vec![Reply::text(&["first answer"]), Reply::text(&["second answer"])]));
    let (coordinator, store) = coordinator(llm.clone());

    let conversation = coordinator.start_conversation(WELCOME, TITLE).await.unwrap();
    let first = coordinator.send_turn(conversation.id, "hello", TITLE).await.unwrap();
    let second = coordinator.renew(first.message_id).await.unwrap();

    assert_ne!(first.message_id, second.message_id);
    assert_eq!(second.content, "second answer");
    assert!(store.message(first.message_id).await.unwrap().is_none());

    let contents: Vec<_> = store
        .messages(conversation.id)
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.content)
        .collect();
    assert_eq!(contents, vec![WELCOME, "hello", "second answer"]);

    // The renewed turn saw the same history, without the deleted reply
    let requests = llm.requests();
    assert_eq!(requests[0].contents, requests[1].contents);
}

#[tokio::test]
async fn test_renew_rejects_user_and_unknown_messages() {
    let llm = Arc::new(ScriptedStream::new(vec![Reply::text(&["answer"])]));
    let (coordinator, store) = coordinator(llm);

    let conversation = coordinator.start_conversation(WELCOME, TITLE).await.unwrap();
    coordinator.send_turn(conversation.id, "hello", TITLE).await.unwrap();
    let user_message = store
        .messages(conversation.id)
        .await
        .unwrap()
        .into_iter()
        .find(|m| m.is_user)
        .unwrap();

    assert!(matches!(
        coordinator.renew(user_message.id).await,
        Err(SessionError::NotAssistantMessage(_))
    ));
    assert!(matches!(
        coordinator.renew(9999).await,
        Err(SessionError::MessageNotFound(9999))
    ));
}

#[tokio::test]
async fn test_conversation_listing_and_deletion() {
    let llm = Arc::new(ScriptedStream::new(vec![Reply::text(&["answer"])]));
    let (coordinator, _) = coordinator(llm);

    let first = coordinator.start_conversation(WELCOME, TITLE).await.unwrap();
    coordinator.send_turn(first.id, "hello", TITLE).await.unwrap();
    let second = coordinator.start_conversation(WELCOME, TITLE).await.unwrap();
    assert_ne!(first.id, second.id);

    let listed: Vec<_> = coordinator.conversations().await.unwrap().into_iter().map(|c| c.id).collect();
    assert_eq!(listed, vec![second.id, first.id]);

    coordinator.delete_conversation(first.id).await.unwrap();
    assert!(coordinator.messages(first.id).await.unwrap().is_empty());
    assert_eq!(coordinator.conversations().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_turn_through_gateway_rotation() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/stream").header("x-goog-api-key", "k1");
            then.status(429);
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/stream").header("x-goog-api-key", "k2");
            then.status(200)
                .header("content-type", "text/event-stream")
                .body(format!("{}{}data: [DONE]\n\n", event("Ficus "), event("religiosa")));
        })
        .await;

    let mut config = AppConfig::default();
    config.llm.base_url = server.base_url();
    config.llm.stream_path = "stream".to_string();
    config.llm.api_keys = vec!["k1".to_string(), "k2".to_string()];
    let gateway = Arc::new(Gateway::new(&config).unwrap());

    let store = Arc::new(MemoryChatStore::new());
    let coordinator = GenerationCoordinator::new(store.clone(), gateway, Language::English);

    let conversation = coordinator.start_conversation(WELCOME, TITLE).await.unwrap();
    let outcome = coordinator.send_turn(conversation.id, "Name a fig", TITLE).await.unwrap();

    assert_eq!(outcome.status, TurnStatus::Completed);
    assert_eq!(outcome.content, "Ficus religiosa");
}
