//! Common test utilities for chat-service integration tests.
#![allow(dead_code)]

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use chat_service::models::{Chat, ModelEntry};
use chat_service::relay::{Frame, RelaySettings};
use chat_service::services::providers::mock::MockProvider;
use chat_service::services::providers::ChatProvider;
use chat_service::services::store::{ChatStore, MemoryStore};
use chat_service::startup::{build_router, AppState};
use http_body_util::BodyExt;
use serde_json::Value;
use service_core::auth::TokenVerifier;
use std::sync::{Arc, Once};
use tower::ServiceExt;
use uuid::Uuid;

static INIT: Once = Once::new();

pub const JWT_SECRET: &str = "test-secret";

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,chat_service=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Router wired to in-memory collaborators.
pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemoryStore>,
    pub provider: Arc<MockProvider>,
    pub verifier: TokenVerifier,
}

impl TestApp {
    pub fn new(provider: MockProvider) -> Self {
        init_tracing();

        let store = Arc::new(MemoryStore::new());
        let provider = Arc::new(provider);
        let verifier = TokenVerifier::new(JWT_SECRET);
        let state = AppState::new(
            "chat-service-test",
            store.clone() as Arc<dyn ChatStore>,
            provider.clone() as Arc<dyn ChatProvider>,
            verifier.clone(),
            RelaySettings::default(),
        );

        Self {
            router: build_router(state, Some("http://localhost:3000")),
            store,
            provider,
            verifier,
        }
    }

    pub fn token_for(&self, user_id: Uuid) -> String {
        self.verifier
            .issue(user_id, None, chrono::Duration::minutes(15))
            .expect("Failed to sign test token")
    }

    pub async fn seed_model(&self, name: &str, value: &str) -> ModelEntry {
        let entry = ModelEntry::new(name, value);
        self.store.insert_model(entry.clone()).await;
        entry
    }

    pub async fn seed_chat(&self, user_id: Uuid) -> Chat {
        self.store
            .create_chat(user_id)
            .await
            .expect("Failed to create chat")
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("Router is infallible")
    }

    /// Send a request and decode the JSON response body.
    pub async fn json(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let response = self.send(build_request(method, uri, token, body)).await;
        let status = response.status();
        let text = body_text(response).await;
        let value = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };
        (status, value)
    }
}

pub fn build_request(
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let body = match body {
        Some(value) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };
    builder.body(body).expect("Failed to build request")
}

pub async fn body_text(response: Response) -> String {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("Failed to read body")
        .to_bytes();
    String::from_utf8(bytes.to_vec()).expect("Body is not UTF-8")
}

/// Decode the `data:` payloads of an event-stream body.
pub fn sse_frames(body: &str) -> Vec<Frame> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| serde_json::from_str(data.trim()).expect("Frame is not valid JSON"))
        .collect()
}
