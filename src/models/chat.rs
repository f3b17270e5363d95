//! Chat persistence records
//!
//! Conversation and message shapes read and written by the generation coordinator

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Conversation identifier
pub type ConversationId = i64;

/// Message identifier
pub type MessageId = i64;

/// Persisted conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub title: String,
    /// Preview of the latest message
    pub last_message_preview: String,
    pub updated_at: DateTime<Utc>,
}

/// Persisted chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub content: String,
    pub is_user: bool,
    /// True while an assistant turn is still writing to this record
    pub is_provisional: bool,
    pub created_at: DateTime<Utc>,
}

/// Message to be inserted; the store assigns the id
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub conversation_id: ConversationId,
    pub content: String,
    pub is_user: bool,
    pub is_provisional: bool,
}

impl NewMessage {
    /// Finalized user message
    pub fn user(conversation_id: ConversationId, content: impl Into<String>) -> Self {
        Self {
            conversation_id,
            content: content.into(),
            is_user: true,
            is_provisional: false,
        }
    }

    /// Finalized assistant message
    pub fn assistant(conversation_id: ConversationId, content: impl Into<String>) -> Self {
        Self {
            conversation_id,
            content: content.into(),
            is_user: false,
            is_provisional: false,
        }
    }

    /// Empty provisional assistant message
    pub fn provisional(conversation_id: ConversationId) -> Self {
        Self {
            conversation_id,
            content: String::new(),
            is_user: false,
            is_provisional: true,
        }
    }
}
