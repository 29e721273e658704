use crate::models::ModelEntry;
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateModelRequest {
    #[validate(
        length(min = 1, max = 100, message = "Name must be 1 to 100 characters"),
        custom(function = "super::non_blank")
    )]
    pub name: String,

    #[validate(
        length(min = 1, max = 100, message = "Value must be 1 to 100 characters"),
        custom(function = "super::non_blank")
    )]
    pub value: String,
}

#[derive(Debug, Serialize)]
pub struct ModelList {
    pub models: Vec<ModelEntry>,
}
