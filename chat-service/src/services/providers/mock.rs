//! Scripted provider for tests.

use super::{
    CancelHandle, ChatMessage, ChatProvider, Completion, CompletionStream, GenerationParams,
    ProviderError, TokenUsage,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;

/// One step of a scripted stream.
#[derive(Debug, Clone)]
pub enum MockStep {
    /// Yield a fragment.
    Fragment(String),
    /// Sleep before the next step (follows the paused test clock).
    Delay(Duration),
    /// Yield an error and end the stream.
    Fail(ProviderError),
    /// Never yield again.
    Hang,
}

/// A request the mock received.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub model: String,
    pub history: Vec<ChatMessage>,
    pub params: GenerationParams,
}

/// Text provider that replays a fixed script.
pub struct MockProvider {
    script: Vec<MockStep>,
    open_error: Option<ProviderError>,
    reply: String,
    requests: Mutex<Vec<RecordedRequest>>,
    handles: Mutex<Vec<CancelHandle>>,
}

impl MockProvider {
    /// Streams the given fragments back to back.
    pub fn with_fragments<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_script(
            fragments
                .into_iter()
                .map(|f| MockStep::Fragment(f.into()))
                .collect(),
        )
    }

    pub fn with_script(script: Vec<MockStep>) -> Self {
        Self {
            script,
            open_error: None,
            reply: "Mock reply".to_string(),
            requests: Mutex::new(Vec::new()),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Fail every call before any fragment is produced.
    pub fn failing(error: ProviderError) -> Self {
        let mut provider = Self::with_script(Vec::new());
        provider.open_error = Some(error);
        provider
    }

    /// Reply returned by `complete`.
    pub fn with_reply(mut self, reply: impl Into<String>) -> Self {
        self.reply = reply.into();
        self
    }

    pub async fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().await.clone()
    }

    /// Cancel handles of every stream opened so far.
    pub async fn cancel_handles(&self) -> Vec<CancelHandle> {
        self.handles.lock().await.clone()
    }

    async fn record(&self, model: &str, history: &[ChatMessage], params: &GenerationParams) {
        self.requests.lock().await.push(RecordedRequest {
            model: model.to_string(),
            history: history.to_vec(),
            params: params.clone(),
        });
    }
}

#[async_trait]
impl ChatProvider for MockProvider {
    async fn complete(
        &self,
        model: &str,
        history: &[ChatMessage],
        params: &GenerationParams,
    ) -> Result<Completion, ProviderError> {
        self.record(model, history, params).await;
        if let Some(err) = &self.open_error {
            return Err(err.clone());
        }

        Ok(Completion {
            content: self.reply.clone(),
            model: model.to_string(),
            finish_reason: Some("stop".to_string()),
            usage: Some(TokenUsage {
                prompt_tokens: history.len() as u32,
                completion_tokens: 2,
                total_tokens: history.len() as u32 + 2,
            }),
        })
    }

    async fn stream(
        &self,
        model: &str,
        history: &[ChatMessage],
        params: &GenerationParams,
    ) -> Result<CompletionStream, ProviderError> {
        self.record(model, history, params).await;
        if let Some(err) = &self.open_error {
            return Err(err.clone());
        }

        let steps: VecDeque<MockStep> = self.script.iter().cloned().collect();
        let fragments = futures::stream::unfold(steps, |mut steps| async move {
            loop {
                match steps.pop_front()? {
                    MockStep::Fragment(text) => return Some((Ok(text), steps)),
                    MockStep::Delay(duration) => tokio::time::sleep(duration).await,
                    MockStep::Fail(err) => return Some((Err(err), VecDeque::new())),
                    MockStep::Hang => std::future::pending::<()>().await,
                }
            }
        });

        let cancel = CancelHandle::new();
        self.handles.lock().await.push(cancel.clone());
        Ok(CompletionStream::new(Box::pin(fragments), cancel))
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        match &self.open_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}
