use crate::models::Chat;
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct RenameChatRequest {
    #[validate(
        length(min = 1, max = 50, message = "Name must be 1 to 50 characters"),
        custom(function = "super::non_blank")
    )]
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct ChatCreatedResponse {
    pub message: String,
    pub chat: Chat,
}

#[derive(Debug, Serialize)]
pub struct ChatList {
    pub chats: Vec<Chat>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rename_rejects_long_or_blank_names() {
        let ok = RenameChatRequest {
            name: "Trip planning".into(),
        };
        assert!(ok.validate().is_ok());

        let long = RenameChatRequest {
            name: "x".repeat(51),
        };
        assert!(long.validate().is_err());

        let blank = RenameChatRequest { name: "   ".into() };
        assert!(blank.validate().is_err());
    }
}
