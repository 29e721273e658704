//! OpenRouter provider implementation.
//!
//! Speaks the OpenAI-compatible chat completions API. Streaming responses are
//! server-sent events whose `data:` lines carry JSON deltas and end with
//! `data: [DONE]`.

use super::{
    CancelHandle, ChatMessage, ChatProvider, Completion, CompletionStream, GenerationParams,
    ProviderError, TokenUsage,
};
use crate::config::ProviderConfig;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{header, Client, Response};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// OpenRouter text provider.
pub struct OpenRouterProvider {
    config: ProviderConfig,
    client: Client,
}

impl OpenRouterProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        // Only `complete` sets a request timeout; streams are bounded by the relay.
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    fn completions_url(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }

    async fn send(
        &self,
        request: &CompletionRequest<'_>,
        timeout: Option<Duration>,
    ) -> Result<Response, ProviderError> {
        let mut builder = self
            .client
            .post(self.completions_url())
            .bearer_auth(&self.config.api_key)
            .json(request);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorEnvelope>(&body)
            .map(|e| e.error.message)
            .unwrap_or(body);

        Err(ProviderError::from_status(status, message, retry_after))
    }
}

#[async_trait]
impl ChatProvider for OpenRouterProvider {
    async fn complete(
        &self,
        model: &str,
        history: &[ChatMessage],
        params: &GenerationParams,
    ) -> Result<Completion, ProviderError> {
        let request = CompletionRequest {
            model,
            messages: history,
            max_tokens: Some(params.max_tokens.unwrap_or(self.config.default_max_tokens)),
            temperature: params.temperature.unwrap_or(self.config.default_temperature),
            stream: false,
        };

        tracing::debug!(model, messages = history.len(), "Sending completion request");

        let response = self
            .send(
                &request,
                Some(Duration::from_secs(self.config.request_timeout_secs)),
            )
            .await?;

        let body: CompletionResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(format!("Failed to parse response: {}", e)))?;

        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Decode("No response choices received".to_string()))?;

        Ok(Completion {
            content: choice.message.content.unwrap_or_default(),
            model: body.model.unwrap_or_else(|| model.to_string()),
            finish_reason: choice.finish_reason,
            usage: body.usage,
        })
    }

    async fn stream(
        &self,
        model: &str,
        history: &[ChatMessage],
        params: &GenerationParams,
    ) -> Result<CompletionStream, ProviderError> {
        let request = CompletionRequest {
            model,
            messages: history,
            max_tokens: params.max_tokens,
            temperature: params.temperature.unwrap_or(self.config.default_temperature),
            stream: true,
        };

        tracing::debug!(model, messages = history.len(), "Opening completion stream");

        let response = self.send(&request, None).await?;

        let cancel = CancelHandle::new();
        let token = cancel.token().clone();
        let (tx, rx) = mpsc::channel(32);

        tokio::spawn(async move {
            let mut bytes = response.bytes_stream();
            let mut decoder = SseDecoder::default();

            loop {
                let chunk = tokio::select! {
                    _ = token.cancelled() => {
                        tracing::debug!("Completion stream cancelled, closing upstream");
                        return;
                    }
                    chunk = bytes.next() => chunk,
                };

                let chunk = match chunk {
                    Some(Ok(chunk)) => chunk,
                    Some(Err(e)) => {
                        let _ = tx.send(Err(ProviderError::Network(e.to_string()))).await;
                        return;
                    }
                    None => return,
                };

                for event in decoder.push(&chunk) {
                    let item = match event {
                        SseEvent::Fragment(text) => Ok(text),
                        SseEvent::Failed(err) => Err(err),
                        SseEvent::Done => return,
                    };
                    let failed = item.is_err();
                    if tx.send(item).await.is_err() || failed {
                        return;
                    }
                }
            }
        });

        Ok(CompletionStream::new(
            Box::pin(ReceiverStream::new(rx)),
            cancel,
        ))
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        if self.config.api_key.is_empty() {
            return Err(ProviderError::Unauthorized);
        }
        Ok(())
    }
}

// OpenAI-compatible wire types

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    temperature: f32,
    stream: bool,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
    model: Option<String>,
    usage: Option<TokenUsage>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: ResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    error: Option<ErrorBody>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Deserialize, Default)]
struct Delta {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    code: Option<serde_json::Value>,
}

impl ErrorBody {
    fn into_provider_error(self) -> ProviderError {
        let status = self
            .code
            .as_ref()
            .and_then(|c| c.as_u64())
            .and_then(|c| u16::try_from(c).ok());
        match status {
            Some(status) => ProviderError::from_status(status, self.message, None),
            None => ProviderError::Api {
                status: 200,
                message: self.message,
            },
        }
    }
}

#[derive(Debug, PartialEq)]
enum SseEvent {
    Fragment(String),
    Failed(ProviderError),
    Done,
}

/// Incremental line decoder for the provider's event stream.
///
/// Network chunks may split lines (and multi-byte characters) anywhere, so
/// bytes are buffered until a full line is available.
#[derive(Default)]
struct SseDecoder {
    pending: Vec<u8>,
}

impl SseDecoder {
    fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.pending.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);

            if let Some(event) = Self::decode_line(line) {
                events.push(event);
            }
        }
        events
    }

    fn decode_line(line: &str) -> Option<SseEvent> {
        // Blank lines separate events; lines starting with ':' are keep-alives.
        if line.is_empty() || line.starts_with(':') {
            return None;
        }
        let data = line.strip_prefix("data:")?.trim_start();
        if data == "[DONE]" {
            return Some(SseEvent::Done);
        }

        match serde_json::from_str::<StreamChunk>(data) {
            Ok(chunk) => {
                if let Some(error) = chunk.error {
                    return Some(SseEvent::Failed(error.into_provider_error()));
                }
                chunk
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.delta.content)
                    .filter(|text| !text.is_empty())
                    .map(SseEvent::Fragment)
            }
            Err(e) => Some(SseEvent::Failed(ProviderError::Decode(format!(
                "Invalid stream chunk: {}",
                e
            )))),
        }
    }
}
