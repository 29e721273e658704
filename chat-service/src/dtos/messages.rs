use crate::models::Role;
use crate::services::providers::TokenUsage;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Body of `POST /api/messages/user`.
#[derive(Debug, Deserialize, Validate)]
pub struct UserMessageRequest {
    #[validate(
        length(min = 1, max = 10000, message = "Prompt must be 1 to 10000 characters"),
        custom(function = "super::non_blank")
    )]
    pub prompt: String,

    #[validate(length(max = 100), custom(function = "super::non_blank"))]
    pub model: String,
}

/// Body of both assistant endpoints.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AssistantRequest {
    #[validate(length(max = 100), custom(function = "super::non_blank"))]
    pub model: String,

    #[serde(default, alias = "max_tokens")]
    #[validate(range(min = 1, max = 4000, message = "maxTokens must be between 1 and 4000"))]
    pub max_tokens: Option<u32>,

    #[serde(default)]
    #[validate(range(min = 0.0, max = 1.0, message = "temperature must be between 0 and 1"))]
    pub temperature: Option<f32>,
}

/// A message as shown in a transcript.
#[derive(Debug, Serialize)]
pub struct TranscriptEntry {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct Transcript {
    pub messages: Vec<TranscriptEntry>,
}

#[derive(Debug, Serialize)]
pub struct UserMessageCreated {
    pub prompt: String,
    pub model: String,
}

#[derive(Debug, Serialize)]
pub struct AssistantReply {
    pub response: String,
    pub model: String,
    pub usage: Option<TokenUsage>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assistant(json: &str) -> AssistantRequest {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn assistant_params_are_range_checked() {
        assert!(assistant(r#"{"model":"m1","maxTokens":500,"temperature":0.2}"#)
            .validate()
            .is_ok());
        assert!(assistant(r#"{"model":"m1"}"#).validate().is_ok());
        assert!(assistant(r#"{"model":"m1","maxTokens":0}"#)
            .validate()
            .is_err());
        assert!(assistant(r#"{"model":"m1","maxTokens":4001}"#)
            .validate()
            .is_err());
        assert!(assistant(r#"{"model":"m1","temperature":1.5}"#)
            .validate()
            .is_err());
        assert!(assistant(r#"{"model":"  "}"#).validate().is_err());
    }

    #[test]
    fn snake_case_max_tokens_is_accepted() {
        assert_eq!(assistant(r#"{"model":"m1","max_tokens":42}"#).max_tokens, Some(42));
    }

    #[test]
    fn prompt_length_counts_characters() {
        let at_limit = UserMessageRequest {
            prompt: "é".repeat(10_000),
            model: "m1".into(),
        };
        assert!(at_limit.validate().is_ok());

        let over = UserMessageRequest {
            prompt: "a".repeat(10_001),
            model: "m1".into(),
        };
        assert!(over.validate().is_err());
    }
}
