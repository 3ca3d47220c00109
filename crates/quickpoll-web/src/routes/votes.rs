//! Vote route handlers.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};

use super::{acting_user, error_response};
use crate::state::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteRequest {
    pub poll_id: String,
    pub option_id: String,
}

#[derive(Serialize)]
pub struct UserVoteResponse {
    pub voted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub option_id: Option<String>,
}

pub async fn cast_vote(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<VoteRequest>,
) -> Result<(StatusCode, Json<VoteRequest>), (StatusCode, String)> {
    let user = acting_user(&headers)?;
    state
        .store
        .cast_vote(&req.poll_id, &req.option_id, &user)
        .await
        .map_err(error_response)?;

    state.broadcaster.emit_vote_update(&req.poll_id).await;

    Ok((StatusCode::CREATED, Json(req)))
}

pub async fn get_user_vote(
    State(state): State<AppState>,
    Path(poll_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<UserVoteResponse>, (StatusCode, String)> {
    let user = acting_user(&headers)?;
    let option_id = state.store.user_vote(&poll_id, &user).await.map_err(error_response)?;

    Ok(Json(UserVoteResponse {
        voted: option_id.is_some(),
        option_id,
    }))
}
