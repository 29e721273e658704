//! Message model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "message_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One turn of a conversation.
///
/// Assistant messages that receive a streamed reply are created empty and
/// grow while the relay runs, so readers must accept partial content.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub role: Role,
    pub content: String,
    pub model_id: Uuid,
    pub temperature: Option<f32>,
    pub created_at: DateTime<Utc>,
}

/// Input for creating a message.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub chat_id: Uuid,
    pub role: Role,
    pub content: String,
    pub model_id: Uuid,
    pub temperature: Option<f32>,
}

impl NewMessage {
    pub fn user(chat_id: Uuid, model_id: Uuid, content: impl Into<String>) -> Self {
        Self {
            chat_id,
            role: Role::User,
            content: content.into(),
            model_id,
            temperature: None,
        }
    }

    pub fn assistant(
        chat_id: Uuid,
        model_id: Uuid,
        content: impl Into<String>,
        temperature: Option<f32>,
    ) -> Self {
        Self {
            chat_id,
            role: Role::Assistant,
            content: content.into(),
            model_id,
            temperature,
        }
    }

    /// Empty assistant message that a relay will fill in.
    pub fn assistant_placeholder(chat_id: Uuid, model_id: Uuid, temperature: Option<f32>) -> Self {
        Self::assistant(chat_id, model_id, String::new(), temperature)
    }

    pub fn into_message(self) -> Message {
        Message {
            id: Uuid::new_v4(),
            chat_id: self.chat_id,
            role: self.role,
            content: self.content,
            model_id: self.model_id,
            temperature: self.temperature,
            created_at: Utc::now(),
        }
    }
}
