//! Route handlers.

pub mod polls;
pub mod votes;

use axum::http::{HeaderMap, StatusCode};
use quickpoll_core::QuickPollError;

/// Header naming the acting user. Authentication happens upstream.
pub const USER_HEADER: &str = "x-user";

pub(crate) fn acting_user(headers: &HeaderMap) -> Result<String, (StatusCode, String)> {
    headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|user| !user.is_empty())
        .map(str::to_string)
        .ok_or_else(|| (StatusCode::UNAUTHORIZED, format!("Missing {} header", USER_HEADER)))
}

pub(crate) fn error_response(e: QuickPollError) -> (StatusCode, String) {
    let status = match &e {
        QuickPollError::PollNotFound(_) => StatusCode::NOT_FOUND,
        QuickPollError::OptionNotFound { .. }
        | QuickPollError::AlreadyVoted
        | QuickPollError::ValidationError(_) => StatusCode::BAD_REQUEST,
        QuickPollError::Forbidden(_) => StatusCode::FORBIDDEN,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string())
}
