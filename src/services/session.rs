//! Generation session coordinator
//!
//! Owns the lifecycle of one assistant turn in a chat conversation: persist
//! the user input, allocate a provisional assistant record, stream the reply
//! into it snapshot by snapshot, and finalize it. At most one turn runs per
//! conversation.

use crate::models::chat::{Conversation, ConversationId, Message, MessageId, NewMessage};
use crate::models::gemini::{GeminiContent, GeminiRequest, ROLE_MODEL, ROLE_USER};
use crate::services::decoder::{PlainText, StreamDecoder};
use crate::services::gateway::{GatewayError, LlmStream};
use crate::services::guard::{GenerationGuard, SessionGuards};
use crate::services::markdown::format_text;
use crate::services::prompts::Language;
use crate::services::store::ChatStore;
use crate::utils::logging::truncate_content;
use chrono::Utc;
use futures::StreamExt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Title given to a conversation after its first user message
const TITLE_CHARS: usize = 30;

/// Length of the conversation preview taken from an assistant reply
const PREVIEW_CHARS: usize = 100;

/// Coordinator error types
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("A generation is already running for conversation {0}")]
    Busy(ConversationId),

    #[error("Message is empty")]
    EmptyInput,

    #[error("Conversation {0} not found")]
    ConversationNotFound(ConversationId),

    #[error("Message {0} not found")]
    MessageNotFound(MessageId),

    #[error("Message {0} is not an assistant message")]
    NotAssistantMessage(MessageId),

    #[error("Store error: {0}")]
    Store(#[from] anyhow::Error),
}

/// How a turn ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStatus {
    Completed,
    /// The stream failed; the record holds the error message
    Failed,
    Cancelled,
}

/// Final state of the assistant record written by a turn
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    pub message_id: MessageId,
    pub status: TurnStatus,
    pub content: String,
}

enum StreamEnd {
    Completed { text: String },
    Cancelled,
}

/// Provisional assistant record owned by a running turn
///
/// If the turn is dropped before settling, the record is finalized in the
/// background with the last persisted snapshot or the stopped message.
struct ProvisionalReply {
    store: Arc<dyn ChatStore>,
    id: MessageId,
    persisted: String,
    stopped_message: &'static str,
    settled: bool,
}

impl ProvisionalReply {
    /// Content for a turn that ended without completing
    fn interrupted_content(&self) -> String {
        if self.persisted.is_empty() {
            self.stopped_message.to_string()
        } else {
            self.persisted.clone()
        }
    }

    async fn finalize(&mut self, content: &str) -> anyhow::Result<()> {
        self.store.finalize_message(self.id, content).await?;
        self.settled = true;
        Ok(())
    }
}

impl Drop for ProvisionalReply {
    fn drop(&mut self) {
        if self.settled {
            return;
        }

        let store = Arc::clone(&self.store);
        let id = self.id;
        let content = self.interrupted_content();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                warn!("Turn for message {} dropped before finishing; finalizing it", id);
                runtime.spawn(async move {
                    if let Err(e) = store.finalize_message(id, &content).await {
                        error!("Failed to finalize abandoned message {}: {}", id, e);
                    }
                });
            }
            Err(_) => error!("Message {} left provisional: no runtime to finalize it", id),
        }
    }
}

/// Chat turn coordinator
pub struct GenerationCoordinator {
    store: Arc<dyn ChatStore>,
    llm: Arc<dyn LlmStream>,
    guards: SessionGuards<ConversationId>,
    language: Language,
}

impl GenerationCoordinator {
    pub fn new(store: Arc<dyn ChatStore>, llm: Arc<dyn LlmStream>, language: Language) -> Self {
        Self {
            store,
            llm,
            guards: SessionGuards::new(),
            language,
        }
    }

    /// Reuse the latest conversation if the user never wrote in it, otherwise
    /// open a new one greeted by `welcome`
    pub async fn start_conversation(&self, welcome: &str, default_title: &str) -> Result<Conversation, SessionError> {
        if let Some(mut latest) = self.store.latest_conversation().await? {
            if self.store.user_message_count(latest.id).await? == 0 {
                debug!("Reusing empty conversation {}", latest.id);
                latest.updated_at = Utc::now();
                self.store.update_conversation(&latest).await?;
                return Ok(latest);
            }
        }

        let mut conversation = self.store.create_conversation(default_title).await?;
        conversation.last_message_preview = welcome.to_string();
        self.store.update_conversation(&conversation).await?;
        self.store
            .insert_message(NewMessage::assistant(conversation.id, welcome))
            .await?;

        info!("Started conversation {}", conversation.id);
        Ok(conversation)
    }

    /// Submit a user message and generate the assistant reply
    pub async fn send_turn(
        &self,
        conversation_id: ConversationId,
        input: &str,
        default_title: &str,
    ) -> Result<TurnOutcome, SessionError> {
        if input.trim().is_empty() {
            return Err(SessionError::EmptyInput);
        }

        let guard = self
            .guards
            .try_acquire(conversation_id)
            .ok_or(SessionError::Busy(conversation_id))?;

        let mut conversation = self
            .store
            .conversation(conversation_id)
            .await?
            .ok_or(SessionError::ConversationNotFound(conversation_id))?;

        self.store
            .insert_message(NewMessage::user(conversation_id, input))
            .await?;

        if conversation.title == default_title {
            conversation.title = format!("{}...", input.chars().take(TITLE_CHARS).collect::<String>());
        }
        conversation.last_message_preview = input.to_string();
        conversation.updated_at = Utc::now();
        self.store.update_conversation(&conversation).await?;

        debug!("User turn in conversation {}: {}", conversation_id, truncate_content(input, 100));
        self.run_turn(&guard).await
    }

    /// Delete an assistant reply and generate it again from the same history
    pub async fn renew(&self, message_id: MessageId) -> Result<TurnOutcome, SessionError> {
        let message = self
            .store
            .message(message_id)
            .await?
            .ok_or(SessionError::MessageNotFound(message_id))?;
        if message.is_user {
            return Err(SessionError::NotAssistantMessage(message_id));
        }

        let guard = self
            .guards
            .try_acquire(message.conversation_id)
            .ok_or(SessionError::Busy(message.conversation_id))?;

        info!("Renewing message {} in conversation {}", message_id, message.conversation_id);
        self.store.delete_message(message_id).await?;
        self.run_turn(&guard).await
    }

    /// Stop the running turn of a conversation; returns whether one was running
    pub fn cancel(&self, conversation_id: ConversationId) -> bool {
        let cancelled = self.guards.cancel(&conversation_id);
        if cancelled {
            info!("Cancelled generation in conversation {}", conversation_id);
        }
        cancelled
    }

    pub fn is_generating(&self, conversation_id: ConversationId) -> bool {
        self.guards.is_generating(&conversation_id)
    }

    pub async fn delete_conversation(&self, conversation_id: ConversationId) -> Result<(), SessionError> {
        self.cancel(conversation_id);
        self.store.delete_conversation(conversation_id).await?;
        Ok(())
    }

    pub async fn conversations(&self) -> Result<Vec<Conversation>, SessionError> {
        Ok(self.store.conversations().await?)
    }

    pub async fn messages(&self, conversation_id: ConversationId) -> Result<Vec<Message>, SessionError> {
        Ok(self.store.messages(conversation_id).await?)
    }

    async fn run_turn(&self, guard: &GenerationGuard<ConversationId>) -> Result<TurnOutcome, SessionError> {
        let conversation_id = *guard.key();

        let history: Vec<GeminiContent> = self
            .store
            .messages(conversation_id)
            .await?
            .into_iter()
            .filter(|message| !message.is_provisional)
            .map(|message| {
                let role = if message.is_user { ROLE_USER } else { ROLE_MODEL };
                GeminiContent::text(role, message.content)
            })
            .collect();
        let request = GeminiRequest { contents: history };

        let provisional = self
            .store
            .insert_message(NewMessage::provisional(conversation_id))
            .await?;
        let mut reply = ProvisionalReply {
            store: Arc::clone(&self.store),
            id: provisional.id,
            persisted: String::new(),
            stopped_message: self.language.stopped_message(),
            settled: false,
        };

        let outcome = match self.stream_reply(guard, &request, &mut reply).await {
            Ok(StreamEnd::Completed { text }) => {
                let content = format_text(&text);
                reply.finalize(&content).await?;

                if let Some(mut conversation) = self.store.conversation(conversation_id).await? {
                    conversation.last_message_preview = text.chars().take(PREVIEW_CHARS).collect();
                    conversation.updated_at = Utc::now();
                    self.store.update_conversation(&conversation).await?;
                }

                info!("Turn completed in conversation {} ({} chars)", conversation_id, text.len());
                TurnOutcome {
                    message_id: reply.id,
                    status: TurnStatus::Completed,
                    content,
                }
            }
            Ok(StreamEnd::Cancelled) => {
                let content = reply.interrupted_content();
                reply.finalize(&content).await?;

                TurnOutcome {
                    message_id: reply.id,
                    status: TurnStatus::Cancelled,
                    content,
                }
            }
            Err(e) => {
                error!("Turn failed in conversation {}: {}", conversation_id, e);
                let content = format!("{}: {}", self.language.error_prefix(), e);
                reply.finalize(&content).await?;

                TurnOutcome {
                    message_id: reply.id,
                    status: TurnStatus::Failed,
                    content,
                }
            }
        };

        Ok(outcome)
    }

    /// Stream the reply into the provisional record until the stream ends or
    /// the turn is cancelled
    async fn stream_reply(
        &self,
        guard: &GenerationGuard<ConversationId>,
        request: &GeminiRequest,
        reply: &mut ProvisionalReply,
    ) -> Result<StreamEnd, GatewayError> {
        let handle = self.llm.open_stream(request).await?;
        if !handle.is_success() {
            let status = handle.status;
            let body = handle.text().await;
            return Err(GatewayError::Stream(format!(
                "upstream returned {}: {}",
                status,
                truncate_content(&body, 200)
            )));
        }

        let mut lines = handle.lines();
        let mut decoder = StreamDecoder::<PlainText>::new();

        loop {
            let line = tokio::select! {
                biased;
                _ = guard.cancelled() => return Ok(StreamEnd::Cancelled),
                line = lines.next() => line,
            };
            let Some(line) = line else { break };

            if let Some(PlainText(text)) = decoder.feed_line(&line?) {
                if !guard.is_current() {
                    return Ok(StreamEnd::Cancelled);
                }
                let formatted = format_text(&text);
                match self.store.update_message_content(reply.id, &formatted).await {
                    Ok(()) => reply.persisted = formatted,
                    Err(e) => warn!("Failed to persist snapshot of message {}: {}", reply.id, e),
                }
            }

            if decoder.is_finished() {
                break;
            }
        }

        decoder.finish();
        Ok(StreamEnd::Completed {
            text: decoder.accumulated_text().to_string(),
        })
    }
}
