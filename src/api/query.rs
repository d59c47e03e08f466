use super::state::ApiState;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use std::sync::Arc;

#[derive(Deserialize)]
pub(super) struct QueryRequest {
    query: String,
    user_id: String,
    #[serde(default)]
    clear_history: bool,
}

#[derive(Serialize)]
pub(super) struct QueryResponse {
    answer: String,
}

/// Ask the copilot a question on behalf of a user.
pub(super) async fn query(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, StatusCode> {
    let question = request.query.trim();
    if question.is_empty() || request.user_id.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let answer = state
        .service
        .query(question, &request.user_id, request.clear_history)
        .await;

    Ok(Json(QueryResponse { answer }))
}
