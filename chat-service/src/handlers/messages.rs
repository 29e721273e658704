use crate::dtos::messages::{
    AssistantReply, AssistantRequest, Transcript, TranscriptEntry, UserMessageCreated,
    UserMessageRequest,
};
use crate::dtos::{ChatIdQuery, DataResponse};
use crate::middleware::auth::AuthUser;
use crate::models::NewMessage;
use crate::relay::{provider_history, sse_events, ClientChannel, StreamRequest};
use crate::services::metrics;
use crate::services::providers::GenerationParams;
use crate::services::store::{load_accessible_chat, resolve_model};
use crate::startup::AppState;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    Json,
};
use futures::Stream;
use service_core::error::AppError;
use validator::Validate;

/// `GET /api/messages?chatId=`
///
/// Assistant messages that are still streaming show up with partial or empty
/// content.
pub async fn list_messages(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<ChatIdQuery>,
) -> Result<impl IntoResponse, AppError> {
    let chat_id = query.parse()?;
    let chat = load_accessible_chat(state.store.as_ref(), chat_id, user.user_id()).await?;

    let messages = state
        .store
        .list_messages(chat.id)
        .await?
        .into_iter()
        .map(|m| TranscriptEntry {
            role: m.role,
            content: m.content,
        })
        .collect();

    Ok(Json(DataResponse::new(Transcript { messages })))
}

/// `POST /api/messages/user?chatId=`
pub async fn create_user_message(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<ChatIdQuery>,
    Json(req): Json<UserMessageRequest>,
) -> Result<impl IntoResponse, AppError> {
    let chat_id = query.parse()?;
    req.validate()?;

    let store = state.store.as_ref();
    let chat = load_accessible_chat(store, chat_id, user.user_id()).await?;
    let model = resolve_model(store, req.model.trim()).await?;

    store
        .create_message(&NewMessage::user(chat.id, model.id, req.prompt.clone()))
        .await?;
    store.touch_chat(chat.id).await?;

    Ok((
        StatusCode::CREATED,
        Json(DataResponse::new(UserMessageCreated {
            prompt: req.prompt,
            model: model.value,
        })),
    ))
}

/// `POST /api/messages/assistant?chatId=`
///
/// One provider call, one message write.
pub async fn create_assistant_message(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<ChatIdQuery>,
    Json(req): Json<AssistantRequest>,
) -> Result<impl IntoResponse, AppError> {
    let chat_id = query.parse()?;
    req.validate()?;

    let store = state.store.as_ref();
    let chat = load_accessible_chat(store, chat_id, user.user_id()).await?;
    let model = resolve_model(store, req.model.trim()).await?;
    let history = provider_history(&store.list_messages(chat.id).await?, None);

    let params = GenerationParams {
        max_tokens: req.max_tokens,
        temperature: req.temperature,
    };
    let completion = state
        .provider
        .complete(&model.value, &history, &params)
        .await
        .map_err(|e| {
            metrics::record_provider_error(e.kind());
            tracing::warn!(error = %e, kind = e.kind(), "Completion failed");
            AppError::from(e)
        })?;

    store
        .create_message(&NewMessage::assistant(
            chat.id,
            model.id,
            completion.content.clone(),
            req.temperature,
        ))
        .await?;
    store.touch_chat(chat.id).await?;

    Ok((
        StatusCode::CREATED,
        Json(DataResponse::new(AssistantReply {
            response: completion.content,
            model: completion.model,
            usage: completion.usage,
        })),
    ))
}

/// `POST /api/messages/assistant/stream?chatId=`
///
/// Errors before the provider stream is open are plain HTTP errors. After
/// that the response is an event stream and the relay runs on its own task,
/// so it still finalizes when the client disconnects.
pub async fn stream_assistant_message(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<ChatIdQuery>,
    Json(req): Json<AssistantRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, AppError> {
    let chat_id = query.parse()?;
    req.validate()?;

    let request = StreamRequest {
        chat_id,
        model: req.model.trim().to_string(),
        max_tokens: req.max_tokens,
        temperature: req.temperature,
    };
    let relay = state.relay.start(user.user_id(), request).await?;

    let (channel, rx) = ClientChannel::pair(state.relay.settings().channel_capacity);
    tokio::spawn(async move {
        let report = relay.run(channel).await;
        tracing::debug!(
            message_id = %report.message_id,
            outcome = report.outcome.label(),
            "Relay task done"
        );
    });

    Ok(Sse::new(sse_events(rx)).keep_alive(KeepAlive::default()))
}
