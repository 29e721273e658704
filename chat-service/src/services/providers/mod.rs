//! Text provider abstractions and implementations.
//!
//! A provider offers a blocking chat completion and a streaming variant. The
//! streaming variant returns a [`CompletionStream`]: a lazy, single-pass
//! sequence of text fragments paired with a [`CancelHandle`] that stops it and
//! releases the upstream connection.

pub mod mock;
pub mod openrouter;

use crate::models::Role;
use async_trait::async_trait;
use futures::Stream;
use serde::Serialize;
use service_core::error::AppError;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Error type for provider operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("Provider rejected the API key")]
    Unauthorized,

    #[error("Rate limited by provider")]
    RateLimited { retry_after: Option<u64> },

    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("Provider API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Malformed provider response: {0}")]
    Decode(String),
}

impl ProviderError {
    /// Classify a non-success HTTP status from the provider.
    pub fn from_status(status: u16, message: String, retry_after: Option<u64>) -> Self {
        match status {
            401 | 403 => ProviderError::Unauthorized,
            429 => ProviderError::RateLimited { retry_after },
            500 | 502 | 503 | 504 => ProviderError::Unavailable(message),
            _ => ProviderError::Api { status, message },
        }
    }

    /// Stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::Unauthorized => "unauthorized",
            ProviderError::RateLimited { .. } => "rate_limited",
            ProviderError::Unavailable(_) => "unavailable",
            ProviderError::Api { .. } => "api",
            ProviderError::Network(_) => "network",
            ProviderError::Decode(_) => "decode",
        }
    }
}

impl From<ProviderError> for AppError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Unauthorized => {
                AppError::BadGateway("Provider rejected the configured API key".to_string())
            }
            ProviderError::RateLimited { retry_after } => AppError::TooManyRequests(
                "Rate limit exceeded. Please try again later.".to_string(),
                retry_after,
            ),
            ProviderError::Unavailable(msg) | ProviderError::Network(msg) => {
                AppError::ServiceUnavailable(format!("AI service temporarily unavailable: {}", msg))
            }
            ProviderError::Api { status, message } => {
                AppError::BadGateway(format!("AI service error {}: {}", status, message))
            }
            ProviderError::Decode(msg) => AppError::BadGateway(msg),
        }
    }
}

/// One entry of the conversation history sent to the provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Generation parameters. `None` means the provider default.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationParams {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

/// Token accounting reported by the provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, serde::Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Result of a non-streaming completion.
#[derive(Debug, Clone)]
pub struct Completion {
    pub content: String,
    pub model: String,
    pub finish_reason: Option<String>,
    pub usage: Option<TokenUsage>,
}

/// Idempotent cancellation for an open completion stream.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    token: CancellationToken,
    requests: Arc<AtomicUsize>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Returns `true` only for the call that actually
    /// cancelled; later calls and calls after natural completion are no-ops.
    pub fn cancel(&self) -> bool {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if self.token.is_cancelled() {
            return false;
        }
        self.token.cancel();
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Number of times [`cancel`](Self::cancel) was called.
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Token adapters watch to tear down their upstream connection.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// Boxed fragment sequence produced by an adapter.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;

/// A cancellable stream of text fragments.
///
/// Once cancelled it yields `None` regardless of what the adapter still has
/// buffered.
pub struct CompletionStream {
    fragments: FragmentStream,
    cancel: CancelHandle,
}

impl CompletionStream {
    pub fn new(fragments: FragmentStream, cancel: CancelHandle) -> Self {
        Self { fragments, cancel }
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Release the upstream connection unless it is already cancelled.
    /// Not counted as a cancellation request.
    pub fn release(&self) {
        if !self.cancel.is_cancelled() {
            self.cancel.token().cancel();
        }
    }
}

impl Stream for CompletionStream {
    type Item = Result<String, ProviderError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.cancel.is_cancelled() {
            return Poll::Ready(None);
        }
        self.fragments.as_mut().poll_next(cx)
    }
}

/// Trait for chat completion providers (e.g., OpenRouter).
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Run a completion and return the full reply.
    async fn complete(
        &self,
        model: &str,
        history: &[ChatMessage],
        params: &GenerationParams,
    ) -> Result<Completion, ProviderError>;

    /// Open a streaming completion.
    async fn stream(
        &self,
        model: &str,
        history: &[ChatMessage],
        params: &GenerationParams,
    ) -> Result<CompletionStream, ProviderError>;

    /// Health check.
    async fn health_check(&self) -> Result<(), ProviderError>;
}
