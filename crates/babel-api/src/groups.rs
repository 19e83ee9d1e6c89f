use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::error;
use uuid::Uuid;

use crate::AppState;

/// Full history of a group, oldest first.
pub async fn get_messages(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
) -> Result<impl IntoResponse, StatusCode> {
    let messages = state.store.list_messages(group_id).await.map_err(|e| {
        error!("Failed to load messages for {}: {}", group_id, e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(Json(messages))
}

/// Online users in a group, sorted by username.
pub async fn get_presence(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
) -> Result<impl IntoResponse, StatusCode> {
    let online = state.store.online_presence(group_id).await.map_err(|e| {
        error!("Failed to load presence for {}: {}", group_id, e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(Json(online))
}
