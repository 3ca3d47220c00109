//! Poll route handlers.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use quickpoll_core::poll::model::{NewPoll, Poll};
use quickpoll_core::PollStore;
use serde::Serialize;
use tracing::{debug, warn};

use super::{acting_user, error_response};
use crate::state::AppState;

#[derive(Serialize)]
pub struct DeletePollResponse {
    pub message: String,
    pub poll_id: String,
}

#[derive(Serialize)]
pub struct LikeResponse {
    pub poll_id: String,
    pub liked: bool,
    pub likes: i64,
}

pub async fn create_poll(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<NewPoll>,
) -> Result<(StatusCode, Json<Poll>), (StatusCode, String)> {
    let user = acting_user(&headers)?;
    let poll = state.store.create_poll(req, &user).await.map_err(error_response)?;

    // The announcement is a fresh read of committed state.
    match state.store.poll_snapshot(&poll.id).await {
        Ok(Some(snapshot)) => {
            state.broadcaster.emit_poll_created(&snapshot).await;
        }
        Ok(None) => debug!(poll_id = %poll.id, "Poll gone before announcement, skipped"),
        Err(e) => warn!(poll_id = %poll.id, error = %e, "Cannot read new poll, announcement skipped"),
    }

    Ok((StatusCode::CREATED, Json(poll)))
}

pub async fn list_polls(State(state): State<AppState>) -> Json<Vec<Poll>> {
    Json(state.store.list_polls().await)
}

pub async fn get_poll(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Poll>, (StatusCode, String)> {
    let poll = state.store.get_poll(&id).await.map_err(error_response)?;
    Ok(Json(poll))
}

pub async fn delete_poll(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<DeletePollResponse>, (StatusCode, String)> {
    let user = acting_user(&headers)?;
    state.store.delete_poll(&id, &user).await.map_err(error_response)?;

    state.broadcaster.emit_poll_deleted(&id).await;

    Ok(Json(DeletePollResponse {
        message: "Poll deleted successfully".to_string(),
        poll_id: id,
    }))
}

pub async fn toggle_like(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<LikeResponse>, (StatusCode, String)> {
    let user = acting_user(&headers)?;
    let toggle = state.store.toggle_like(&id, &user).await.map_err(error_response)?;

    state.broadcaster.emit_like_update(&id).await;

    Ok(Json(LikeResponse {
        poll_id: id,
        liked: toggle.liked,
        likes: toggle.likes,
    }))
}
