//! Model catalog entries.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A selectable model. `value` is both what clients send and what the
/// provider receives; `name` is the display label.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct ModelEntry {
    pub id: Uuid,
    pub name: String,
    pub value: String,
}

impl ModelEntry {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            value: value.into(),
        }
    }
}
