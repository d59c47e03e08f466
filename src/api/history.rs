use super::state::ApiState;
use crate::history::Turn;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::Serialize;

use std::sync::Arc;

#[derive(Serialize)]
pub(super) struct HistoryResponse {
    user_id: String,
    turns: Vec<Turn>,
}

pub(super) async fn list_history(
    State(state): State<Arc<ApiState>>,
    Path(user_id): Path<String>,
) -> Json<HistoryResponse> {
    let turns = state.service.history(&user_id).await;
    Json(HistoryResponse { user_id, turns })
}

pub(super) async fn clear_history(
    State(state): State<Arc<ApiState>>,
    Path(user_id): Path<String>,
) -> Result<StatusCode, StatusCode> {
    state.service.clear_history(&user_id).await.map_err(|error| {
        tracing::warn!(%error, user = %user_id, "failed to clear history");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    Ok(StatusCode::NO_CONTENT)
}
