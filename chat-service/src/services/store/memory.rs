//! In-process store for tests and local experiments.

use super::ChatStore;
use crate::models::{Chat, Message, ModelEntry, NewMessage};
use async_trait::async_trait;
use chrono::Utc;
use service_core::error::AppError;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    chats: HashMap<Uuid, Chat>,
    models: Vec<ModelEntry>,
    messages: Vec<Message>,
    content_writes: Vec<(Uuid, String)>,
    failing_writes: usize,
    failing_lists: usize,
}

/// `ChatStore` over plain collections.
///
/// Every content update is recorded so callers can assert on the exact
/// sequence of writes a message received.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a chat as-is.
    pub async fn insert_chat(&self, chat: Chat) {
        self.tables.lock().await.chats.insert(chat.id, chat);
    }

    pub async fn insert_model(&self, entry: ModelEntry) {
        self.tables.lock().await.models.push(entry);
    }

    /// Make the next `count` content updates fail.
    pub async fn fail_next_content_writes(&self, count: usize) {
        self.tables.lock().await.failing_writes = count;
    }

    /// Make the next `count` message listings fail.
    pub async fn fail_next_list_messages(&self, count: usize) {
        self.tables.lock().await.failing_lists = count;
    }

    /// Successful content updates of `message_id`, oldest first.
    pub async fn content_writes(&self, message_id: Uuid) -> Vec<String> {
        self.tables
            .lock()
            .await
            .content_writes
            .iter()
            .filter(|(id, _)| *id == message_id)
            .map(|(_, content)| content.clone())
            .collect()
    }

    pub async fn message(&self, message_id: Uuid) -> Option<Message> {
        self.tables
            .lock()
            .await
            .messages
            .iter()
            .find(|m| m.id == message_id)
            .cloned()
    }
}

#[async_trait]
impl ChatStore for MemoryStore {
    async fn create_chat(&self, user_id: Uuid) -> Result<Chat, AppError> {
        let chat = Chat::new(user_id);
        self.tables.lock().await.chats.insert(chat.id, chat.clone());
        Ok(chat)
    }

    async fn list_chats(&self, user_id: Uuid) -> Result<Vec<Chat>, AppError> {
        let tables = self.tables.lock().await;
        let mut chats: Vec<Chat> = tables
            .chats
            .values()
            .filter(|c| c.user_id == user_id && !c.is_deleted)
            .cloned()
            .collect();
        chats.sort_by(|a, b| b.last_updated.cmp(&a.last_updated));
        Ok(chats)
    }

    async fn find_chat(&self, chat_id: Uuid) -> Result<Option<Chat>, AppError> {
        Ok(self.tables.lock().await.chats.get(&chat_id).cloned())
    }

    async fn rename_chat(&self, chat_id: Uuid, name: &str) -> Result<(), AppError> {
        let mut tables = self.tables.lock().await;
        let chat = tables
            .chats
            .get_mut(&chat_id)
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Chat not found")))?;
        chat.name = Some(name.to_string());
        Ok(())
    }

    async fn soft_delete_chat(&self, chat_id: Uuid) -> Result<(), AppError> {
        let mut tables = self.tables.lock().await;
        let chat = tables
            .chats
            .get_mut(&chat_id)
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Chat not found")))?;
        chat.is_deleted = true;
        Ok(())
    }

    async fn touch_chat(&self, chat_id: Uuid) -> Result<(), AppError> {
        if let Some(chat) = self.tables.lock().await.chats.get_mut(&chat_id) {
            chat.last_updated = Utc::now();
        }
        Ok(())
    }

    async fn list_models(&self) -> Result<Vec<ModelEntry>, AppError> {
        Ok(self.tables.lock().await.models.clone())
    }

    async fn create_model(&self, name: &str, value: &str) -> Result<ModelEntry, AppError> {
        let mut tables = self.tables.lock().await;
        if tables.models.iter().any(|m| m.value == value) {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Model '{}' already exists",
                value
            )));
        }
        let entry = ModelEntry::new(name, value);
        tables.models.push(entry.clone());
        Ok(entry)
    }

    async fn find_model(&self, value: &str) -> Result<Option<ModelEntry>, AppError> {
        Ok(self
            .tables
            .lock()
            .await
            .models
            .iter()
            .find(|m| m.value == value)
            .cloned())
    }

    async fn create_message(&self, message: &NewMessage) -> Result<Message, AppError> {
        let mut tables = self.tables.lock().await;
        if !tables.models.iter().any(|m| m.id == message.model_id) {
            return Err(AppError::NotFound(anyhow::anyhow!("Model not found")));
        }
        let message = message.clone().into_message();
        tables.messages.push(message.clone());
        Ok(message)
    }

    async fn update_message_content(
        &self,
        message_id: Uuid,
        content: &str,
    ) -> Result<(), AppError> {
        let mut tables = self.tables.lock().await;
        if tables.failing_writes > 0 {
            tables.failing_writes -= 1;
            return Err(AppError::DatabaseError(anyhow::anyhow!(
                "injected write failure"
            )));
        }

        let message = tables
            .messages
            .iter_mut()
            .find(|m| m.id == message_id)
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Message not found")))?;
        message.content = content.to_string();
        tables
            .content_writes
            .push((message_id, content.to_string()));
        Ok(())
    }

    async fn list_messages(&self, chat_id: Uuid) -> Result<Vec<Message>, AppError> {
        let mut tables = self.tables.lock().await;
        if tables.failing_lists > 0 {
            tables.failing_lists -= 1;
            return Err(AppError::DatabaseError(anyhow::anyhow!(
                "injected list failure"
            )));
        }

        Ok(tables
            .messages
            .iter()
            .filter(|m| m.chat_id == chat_id)
            .cloned()
            .collect())
    }

    async fn health_check(&self) -> Result<(), AppError> {
        Ok(())
    }
}
