//! Centralized error types for QuickPoll.

use thiserror::Error;

/// Main error type for QuickPoll operations.
#[derive(Error, Debug)]
pub enum QuickPollError {
    #[error("Poll not found: {0}")]
    PollNotFound(String),

    #[error("Option {option_id} does not belong to poll {poll_id}")]
    OptionNotFound { poll_id: String, option_id: String },

    #[error("You have already voted in this poll")]
    AlreadyVoted,

    #[error("Not authorized: {0}")]
    Forbidden(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Message bus error: {0}")]
    Bus(#[from] quickpoll_bus::BusError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for QuickPoll operations.
pub type QuickPollResult<T> = Result<T, QuickPollError>;

impl QuickPollError {
    /// Create a validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationError(msg.into())
    }
}
