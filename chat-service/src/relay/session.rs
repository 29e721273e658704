//! In-memory state of one streaming relay.

use crate::services::metrics;
use crate::services::store::ChatStore;
use service_core::error::AppError;
use uuid::Uuid;

/// Buffer and bookkeeping for a single in-flight reply.
///
/// The buffer is append-only, so the length of the last successful write is
/// enough to tell whether anything new needs persisting.
#[derive(Debug)]
pub struct RelaySession {
    chat_id: Uuid,
    message_id: Uuid,
    buffer: String,
    persisted_len: usize,
    fragments: usize,
    cancelled: bool,
    closed: bool,
}

impl RelaySession {
    pub fn new(chat_id: Uuid, message_id: Uuid) -> Self {
        Self {
            chat_id,
            message_id,
            buffer: String::new(),
            persisted_len: 0,
            fragments: 0,
            cancelled: false,
            closed: false,
        }
    }

    pub fn chat_id(&self) -> Uuid {
        self.chat_id
    }

    pub fn message_id(&self) -> Uuid {
        self.message_id
    }

    /// Append a fragment. Ignored once the session is cancelled or closed.
    pub fn append(&mut self, fragment: &str) -> bool {
        if self.cancelled || self.closed {
            return false;
        }
        self.buffer.push_str(fragment);
        self.fragments += 1;
        true
    }

    pub fn content(&self) -> &str {
        &self.buffer
    }

    pub fn fragments(&self) -> usize {
        self.fragments
    }

    /// Whether the buffer holds text that has not been written yet.
    pub fn is_dirty(&self) -> bool {
        self.buffer.len() != self.persisted_len
    }

    /// Set the cancellation flag. Returns `true` the first time.
    pub fn cancel(&mut self) -> bool {
        !std::mem::replace(&mut self.cancelled, true)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Mark the session final. Later flushes do nothing.
    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Write the whole buffer onto the target message if it changed since the
    /// last successful write. Returns whether a write happened.
    ///
    /// On failure the snapshot is left untouched so the next flush retries
    /// with the then-current buffer.
    pub async fn flush(&mut self, store: &dyn ChatStore, kind: &str) -> Result<bool, AppError> {
        if self.closed || !self.is_dirty() {
            return Ok(false);
        }

        let result = store
            .update_message_content(self.message_id, &self.buffer)
            .await;
        metrics::record_checkpoint_write(kind, result.is_ok());
        result?;

        self.persisted_len = self.buffer.len();
        tracing::debug!(
            message_id = %self.message_id,
            persisted_len = self.persisted_len,
            kind,
            "Relay buffer persisted"
        );
        Ok(true)
    }

    pub fn into_content(self) -> String {
        self.buffer
    }
}
