//! Persistence collaborator.
//!
//! The relay and the HTTP handlers only see [`ChatStore`]; the PostgreSQL
//! implementation backs production and the in-memory one backs tests.

pub mod memory;
pub mod postgres;

use crate::models::{Chat, Message, ModelEntry, NewMessage};
use async_trait::async_trait;
use service_core::error::AppError;
use uuid::Uuid;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn create_chat(&self, user_id: Uuid) -> Result<Chat, AppError>;

    /// Non-deleted chats of `user_id`, most recently updated first.
    async fn list_chats(&self, user_id: Uuid) -> Result<Vec<Chat>, AppError>;

    async fn find_chat(&self, chat_id: Uuid) -> Result<Option<Chat>, AppError>;

    async fn rename_chat(&self, chat_id: Uuid, name: &str) -> Result<(), AppError>;

    async fn soft_delete_chat(&self, chat_id: Uuid) -> Result<(), AppError>;

    /// Bump `last_updated` to now.
    async fn touch_chat(&self, chat_id: Uuid) -> Result<(), AppError>;

    async fn list_models(&self) -> Result<Vec<ModelEntry>, AppError>;

    async fn create_model(&self, name: &str, value: &str) -> Result<ModelEntry, AppError>;

    /// Look up a catalog entry by its `value`.
    async fn find_model(&self, value: &str) -> Result<Option<ModelEntry>, AppError>;

    async fn create_message(&self, message: &NewMessage) -> Result<Message, AppError>;

    async fn update_message_content(&self, message_id: Uuid, content: &str)
        -> Result<(), AppError>;

    /// Messages of a chat ordered by creation time.
    async fn list_messages(&self, chat_id: Uuid) -> Result<Vec<Message>, AppError>;

    async fn health_check(&self) -> Result<(), AppError>;
}

/// Load a chat and check that `user_id` may use it.
pub async fn load_accessible_chat(
    store: &dyn ChatStore,
    chat_id: Uuid,
    user_id: Uuid,
) -> Result<Chat, AppError> {
    let chat = store
        .find_chat(chat_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Chat not found")))?;
    chat.ensure_accessible_by(user_id)?;
    Ok(chat)
}

/// Resolve a requested model against the catalog.
pub async fn resolve_model(store: &dyn ChatStore, value: &str) -> Result<ModelEntry, AppError> {
    store
        .find_model(value)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Model '{}' not found", value)))
}
