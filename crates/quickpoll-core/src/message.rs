//! Broadcast message payloads.
//!
//! Lifecycle and like messages carry a `type` tag; the vote tally does not,
//! matching what clients already parse.

use chrono::{DateTime, Utc};
use quickpoll_bus::{poll_channel, GLOBAL_CHANNEL};
use serde::{Deserialize, Serialize};

use crate::error::QuickPollResult;
use crate::poll::model::{OptionTally, Poll};

/// A message sent to subscribers. Built fresh per event, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BroadcastMessage {
    Event(PollEvent),
    Tally(VoteTally),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PollEvent {
    NewPoll(NewPollPayload),
    DeletePoll { poll_id: String },
    LikeUpdate { poll_id: String, likes: i64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPollPayload {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub likes_count: i64,
    pub options: Vec<NewPollOption>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPollOption {
    pub id: String,
    pub text: String,
    pub votes: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteTally {
    pub poll_id: String,
    pub options: Vec<OptionTally>,
}

impl BroadcastMessage {
    pub fn new_poll(poll: &Poll) -> Self {
        Self::Event(PollEvent::NewPoll(NewPollPayload {
            id: poll.id.clone(),
            title: poll.title.clone(),
            description: poll.description.clone(),
            created_at: poll.created_at,
            created_by: poll.created_by.clone(),
            likes_count: poll.likes_count,
            options: poll
                .options
                .iter()
                .map(|o| NewPollOption {
                    id: o.id.clone(),
                    text: o.text.clone(),
                    votes: o.votes,
                })
                .collect(),
        }))
    }

    pub fn delete_poll(poll_id: &str) -> Self {
        Self::Event(PollEvent::DeletePoll {
            poll_id: poll_id.to_string(),
        })
    }

    pub fn like_update(poll_id: &str, likes: i64) -> Self {
        Self::Event(PollEvent::LikeUpdate {
            poll_id: poll_id.to_string(),
            likes,
        })
    }

    pub fn vote_tally(poll_id: &str, options: Vec<OptionTally>) -> Self {
        Self::Tally(VoteTally {
            poll_id: poll_id.to_string(),
            options,
        })
    }

    /// Channel the message is published on.
    pub fn channel(&self) -> String {
        match self {
            Self::Event(PollEvent::NewPoll(_)) | Self::Event(PollEvent::DeletePoll { .. }) => {
                GLOBAL_CHANNEL.to_string()
            }
            Self::Event(PollEvent::LikeUpdate { poll_id, .. }) => poll_channel(poll_id),
            Self::Tally(tally) => poll_channel(&tally.poll_id),
        }
    }

    /// Poll the message is scoped to, for per-poll messages.
    pub fn poll_id(&self) -> Option<&str> {
        match self {
            Self::Event(PollEvent::LikeUpdate { poll_id, .. }) => Some(poll_id.as_str()),
            Self::Tally(tally) => Some(tally.poll_id.as_str()),
            Self::Event(_) => None,
        }
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Event(PollEvent::NewPoll(_)) => "new_poll",
            Self::Event(PollEvent::DeletePoll { .. }) => "delete_poll",
            Self::Event(PollEvent::LikeUpdate { .. }) => "like_update",
            Self::Tally(_) => "vote_update",
        }
    }

    pub fn to_json(&self) -> QuickPollResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}
