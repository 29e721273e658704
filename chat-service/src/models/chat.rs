//! Conversation model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use sqlx::FromRow;
use uuid::Uuid;

/// A conversation owned by one user. Never hard-deleted.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: Option<String>,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl Chat {
    pub fn new(user_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            name: None,
            is_deleted: false,
            created_at: now,
            last_updated: now,
        }
    }

    /// Check that `user_id` may read or write this conversation.
    pub fn ensure_accessible_by(&self, user_id: Uuid) -> Result<(), AppError> {
        if self.user_id != user_id {
            return Err(AppError::Forbidden(anyhow::anyhow!("Unauthorized")));
        }
        if self.is_deleted {
            return Err(AppError::Conflict(anyhow::anyhow!("Chat is deleted")));
        }
        Ok(())
    }
}
