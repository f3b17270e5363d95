//! Chat persistence boundary
//!
//! The coordinator reads and writes conversations and messages through
//! [`ChatStore`]. [`MemoryChatStore`] keeps everything in process.

use crate::models::chat::{Conversation, ConversationId, Message, MessageId, NewMessage};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// CRUD operations over conversations and messages
#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn create_conversation(&self, title: &str) -> Result<Conversation>;

    async fn conversation(&self, id: ConversationId) -> Result<Option<Conversation>>;

    async fn update_conversation(&self, conversation: &Conversation) -> Result<()>;

    /// Delete a conversation and all of its messages
    async fn delete_conversation(&self, id: ConversationId) -> Result<()>;

    /// Most recently updated conversation
    async fn latest_conversation(&self) -> Result<Option<Conversation>>;

    /// All conversations, most recently updated first
    async fn conversations(&self) -> Result<Vec<Conversation>>;

    async fn insert_message(&self, message: NewMessage) -> Result<Message>;

    async fn message(&self, id: MessageId) -> Result<Option<Message>>;

    /// Replace the content of a message, leaving its provisional flag alone
    async fn update_message_content(&self, id: MessageId, content: &str) -> Result<()>;

    /// Replace the content and clear the provisional flag
    async fn finalize_message(&self, id: MessageId, content: &str) -> Result<()>;

    async fn delete_message(&self, id: MessageId) -> Result<()>;

    /// Messages of a conversation, oldest first
    async fn messages(&self, conversation_id: ConversationId) -> Result<Vec<Message>>;

    async fn user_message_count(&self, conversation_id: ConversationId) -> Result<usize>;
}

#[derive(Default)]
struct Tables {
    conversations: BTreeMap<ConversationId, Conversation>,
    messages: BTreeMap<MessageId, Message>,
    next_conversation_id: ConversationId,
    next_message_id: MessageId,
}

/// In-process [`ChatStore`]
#[derive(Default)]
pub struct MemoryChatStore {
    tables: RwLock<Tables>,
}

impl MemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChatStore for MemoryChatStore {
    async fn create_conversation(&self, title: &str) -> Result<Conversation> {
        let mut tables = self.tables.write().await;
        tables.next_conversation_id += 1;

        let conversation = Conversation {
            id: tables.next_conversation_id,
            title: title.to_string(),
            last_message_preview: String::new(),
            updated_at: Utc::now(),
        };
        tables.conversations.insert(conversation.id, conversation.clone());
        Ok(conversation)
    }

    async fn conversation(&self, id: ConversationId) -> Result<Option<Conversation>> {
        Ok(self.tables.read().await.conversations.get(&id).cloned())
    }

    async fn update_conversation(&self, conversation: &Conversation) -> Result<()> {
        let mut tables = self.tables.write().await;
        let slot = tables
            .conversations
            .get_mut(&conversation.id)
            .ok_or_else(|| anyhow!("Conversation {} does not exist", conversation.id))?;
        *slot = conversation.clone();
        Ok(())
    }

    async fn delete_conversation(&self, id: ConversationId) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.conversations.remove(&id);
        tables.messages.retain(|_, message| message.conversation_id != id);
        Ok(())
    }

    async fn latest_conversation(&self) -> Result<Option<Conversation>> {
        Ok(self.conversations().await?.into_iter().next())
    }

    async fn conversations(&self) -> Result<Vec<Conversation>> {
        let tables = self.tables.read().await;
        let mut conversations: Vec<Conversation> = tables.conversations.values().cloned().collect();
        conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));
        Ok(conversations)
    }

    async fn insert_message(&self, message: NewMessage) -> Result<Message> {
        let mut tables = self.tables.write().await;
        if !tables.conversations.contains_key(&message.conversation_id) {
            return Err(anyhow!("Conversation {} does not exist", message.conversation_id));
        }
        tables.next_message_id += 1;

        let message = Message {
            id: tables.next_message_id,
            conversation_id: message.conversation_id,
            content: message.content,
            is_user: message.is_user,
            is_provisional: message.is_provisional,
            created_at: Utc::now(),
        };
        tables.messages.insert(message.id, message.clone());
        Ok(message)
    }

    async fn message(&self, id: MessageId) -> Result<Option<Message>> {
        Ok(self.tables.read().await.messages.get(&id).cloned())
    }

    async fn update_message_content(&self, id: MessageId, content: &str) -> Result<()> {
        let mut tables = self.tables.write().await;
        let message = tables
            .messages
            .get_mut(&id)
            .ok_or_else(|| anyhow!("Message {} does not exist", id))?;
        message.content = content.to_string();
        Ok(())
    }

    async fn finalize_message(&self, id: MessageId, content: &str) -> Result<()> {
        let mut tables = self.tables.write().await;
        let message = tables
            .messages
            .get_mut(&id)
            .ok_or_else(|| anyhow!("Message {} does not exist", id))?;
        message.content = content.to_string();
        message.is_provisional = false;
        Ok(())
    }

    async fn delete_message(&self, id: MessageId) -> Result<()> {
        self.tables.write().await.messages.remove(&id);
        Ok(())
    }

    async fn messages(&self, conversation_id: ConversationId) -> Result<Vec<Message>> {
        // Ids are assigned in insertion order, so map order is creation order
        Ok(self
            .tables
            .read()
            .await
            .messages
            .values()
            .filter(|message| message.conversation_id == conversation_id)
            .cloned()
            .collect())
    }

    async fn user_message_count(&self, conversation_id: ConversationId) -> Result<usize> {
        Ok(self
            .tables
            .read()
            .await
            .messages
            .values()
            .filter(|message| message.conversation_id == conversation_id && message.is_user)
            .count())
    }
}
