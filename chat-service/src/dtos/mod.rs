pub mod chats;
pub mod messages;
pub mod models;

use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use uuid::Uuid;
use validator::ValidationError;

/// `?chatId=` query parameter shared by chat and message routes.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatIdQuery {
    pub chat_id: Option<String>,
}

impl ChatIdQuery {
    pub fn parse(&self) -> Result<Uuid, AppError> {
        self.chat_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .and_then(|s| Uuid::parse_str(s).ok())
            .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("Invalid chat id")))
    }
}

/// `{"data": ...}` envelope used by list and read endpoints.
#[derive(Debug, Serialize)]
pub struct DataResponse<T> {
    pub data: T,
}

impl<T> DataResponse<T> {
    pub fn new(data: T) -> Self {
        Self { data }
    }
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

pub(crate) fn non_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut err = ValidationError::new("blank");
        err.message = Some("must be a non-empty string".into());
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_id_must_be_a_uuid() {
        let id = Uuid::new_v4();
        let query = ChatIdQuery {
            chat_id: Some(id.to_string()),
        };
        assert_eq!(query.parse().unwrap(), id);

        for raw in [None, Some(""), Some("not-a-uuid")] {
            let query = ChatIdQuery {
                chat_id: raw.map(String::from),
            };
            assert!(matches!(query.parse(), Err(AppError::BadRequest(_))));
        }
    }
}
