//! Domain models for the chat service.

mod catalog;
mod chat;
mod message;

pub use catalog::ModelEntry;
pub use chat::Chat;
pub use message::{Message, NewMessage, Role};
