use crate::dtos::models::{CreateModelRequest, ModelList};
use crate::dtos::DataResponse;
use crate::startup::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use service_core::error::AppError;
use validator::Validate;

/// `GET /api/models`
pub async fn list_models(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let models = state.store.list_models().await?;
    Ok(Json(DataResponse::new(ModelList { models })))
}

/// `POST /api/models`
pub async fn create_model(
    State(state): State<AppState>,
    Json(req): Json<CreateModelRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;

    let model = state
        .store
        .create_model(req.name.trim(), req.value.trim())
        .await?;
    tracing::info!(model_id = %model.id, value = %model.value, "Model added to catalog");

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Model added successfully",
            "model": model
        })),
    ))
}
