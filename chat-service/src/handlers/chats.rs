use crate::dtos::chats::{ChatCreatedResponse, ChatList, RenameChatRequest};
use crate::dtos::{ChatIdQuery, DataResponse, MessageResponse};
use crate::middleware::auth::AuthUser;
use crate::services::store::load_accessible_chat;
use crate::startup::AppState;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use validator::Validate;

/// `POST /api/chats`
pub async fn create_chat(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let chat = state.store.create_chat(user.user_id()).await?;
    tracing::info!(chat_id = %chat.id, "Chat created");

    Ok((
        StatusCode::CREATED,
        Json(ChatCreatedResponse {
            message: "Chat created successfully".to_string(),
            chat,
        }),
    ))
}

/// `GET /api/chats`
pub async fn list_chats(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let chats = state.store.list_chats(user.user_id()).await?;
    Ok(Json(DataResponse::new(ChatList { chats })))
}

/// `PUT /api/chats?chatId=`
pub async fn rename_chat(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<ChatIdQuery>,
    Json(req): Json<RenameChatRequest>,
) -> Result<impl IntoResponse, AppError> {
    let chat_id = query.parse()?;
    req.validate()?;

    let chat = load_accessible_chat(state.store.as_ref(), chat_id, user.user_id()).await?;
    state.store.rename_chat(chat.id, req.name.trim()).await?;

    Ok(Json(MessageResponse::new("Chat name updated successfully")))
}

/// `DELETE /api/chats?chatId=`
pub async fn delete_chat(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<ChatIdQuery>,
) -> Result<impl IntoResponse, AppError> {
    let chat_id = query.parse()?;

    let chat = state
        .store
        .find_chat(chat_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Chat not found")))?;
    if chat.user_id != user.user_id() {
        return Err(AppError::Forbidden(anyhow::anyhow!("Unauthorized")));
    }
    if chat.is_deleted {
        return Err(AppError::Conflict(anyhow::anyhow!("Chat already deleted")));
    }

    state.store.soft_delete_chat(chat.id).await?;
    tracing::info!(chat_id = %chat.id, "Chat soft-deleted");

    Ok(Json(MessageResponse::new("Chat deleted successfully")))
}
