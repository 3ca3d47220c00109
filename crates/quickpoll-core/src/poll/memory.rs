//! In-memory poll store.
//!
//! Holds polls, options, votes and likes behind a single lock, so every
//! read sees the result of every write that returned before it.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use super::model::{LikeToggle, NewPoll, OptionTally, Poll, PollOption};
use super::PollStore;
use crate::error::{QuickPollError, QuickPollResult};

#[derive(Debug, Clone)]
struct PollRow {
    id: String,
    title: String,
    description: Option<String>,
    created_at: DateTime<Utc>,
    created_by: String,
    options: Vec<OptionRow>,
}

#[derive(Debug, Clone)]
struct OptionRow {
    id: String,
    text: String,
}

#[derive(Default)]
struct Tables {
    polls: HashMap<String, PollRow>,
    /// poll_id -> user -> option_id
    votes: HashMap<String, HashMap<String, String>>,
    /// poll_id -> users who liked it
    likes: HashMap<String, HashSet<String>>,
}

impl Tables {
    fn row(&self, poll_id: &str) -> QuickPollResult<&PollRow> {
        self.polls
            .get(poll_id)
            .ok_or_else(|| QuickPollError::PollNotFound(poll_id.to_string()))
    }

    fn tally(&self, row: &PollRow) -> Vec<OptionTally> {
        let votes = self.votes.get(&row.id);
        row.options
            .iter()
            .map(|opt| OptionTally {
                option_id: opt.id.clone(),
                text: opt.text.clone(),
                votes: votes
                    .map(|by_user| by_user.values().filter(|id| **id == opt.id).count() as i64)
                    .unwrap_or(0),
            })
            .collect()
    }

    fn like_count(&self, poll_id: &str) -> i64 {
        self.likes.get(poll_id).map(|users| users.len() as i64).unwrap_or(0)
    }

    fn snapshot(&self, row: &PollRow) -> Poll {
        let options = self
            .tally(row)
            .into_iter()
            .map(|t| PollOption {
                id: t.option_id,
                poll_id: row.id.clone(),
                text: t.text,
                votes: t.votes,
            })
            .collect();

        Poll {
            id: row.id.clone(),
            title: row.title.clone(),
            description: row.description.clone(),
            created_at: row.created_at,
            created_by: row.created_by.clone(),
            likes_count: self.like_count(&row.id),
            options,
        }
    }
}

/// Process-local [`PollStore`] with the write operations the HTTP layer needs.
#[derive(Default)]
pub struct MemoryPollStore {
    tables: RwLock<Tables>,
}

impl MemoryPollStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a poll owned by `created_by`.
    pub async fn create_poll(&self, new_poll: NewPoll, created_by: &str) -> QuickPollResult<Poll> {
        let title = new_poll.title.trim();
        if title.is_empty() {
            return Err(QuickPollError::validation("title must not be empty"));
        }
        if new_poll.options.iter().any(|o| o.text.trim().is_empty()) {
            return Err(QuickPollError::validation("option text must not be empty"));
        }

        let row = PollRow {
            id: Uuid::new_v4().to_string(),
            title: title.to_string(),
            description: new_poll.description,
            created_at: Utc::now(),
            created_by: created_by.to_string(),
            options: new_poll
                .options
                .into_iter()
                .map(|o| OptionRow {
                    id: Uuid::new_v4().to_string(),
                    text: o.text,
                })
                .collect(),
        };

        let mut tables = self.tables.write().await;
        let poll = tables.snapshot(&row);
        tables.polls.insert(row.id.clone(), row);
        info!(poll_id = %poll.id, created_by = %created_by, "Poll created");
        Ok(poll)
    }

    /// Delete a poll with its options, votes and likes. Only the creator may delete.
    pub async fn delete_poll(&self, poll_id: &str, user: &str) -> QuickPollResult<()> {
        let mut tables = self.tables.write().await;
        let row = tables.row(poll_id)?;
        if row.created_by != user {
            return Err(QuickPollError::Forbidden(
                "only the creator can delete this poll".into(),
            ));
        }

        tables.polls.remove(poll_id);
        tables.votes.remove(poll_id);
        tables.likes.remove(poll_id);
        info!(poll_id = %poll_id, "Poll deleted");
        Ok(())
    }

    /// Record `user`'s vote for `option_id`. Each user votes once per poll.
    pub async fn cast_vote(&self, poll_id: &str, option_id: &str, user: &str) -> QuickPollResult<()> {
        let mut tables = self.tables.write().await;
        let row = tables.row(poll_id)?;
        if !row.options.iter().any(|o| o.id == option_id) {
            return Err(QuickPollError::OptionNotFound {
                poll_id: poll_id.to_string(),
                option_id: option_id.to_string(),
            });
        }

        let by_user = tables.votes.entry(poll_id.to_string()).or_default();
        if by_user.contains_key(user) {
            return Err(QuickPollError::AlreadyVoted);
        }
        by_user.insert(user.to_string(), option_id.to_string());
        debug!(poll_id = %poll_id, option_id = %option_id, "Vote recorded");
        Ok(())
    }

    /// Like the poll, or remove the like if `user` already liked it.
    /// Returns whether the poll is liked by `user` afterwards and the new count.
    pub async fn toggle_like(&self, poll_id: &str, user: &str) -> QuickPollResult<LikeToggle> {
        let mut tables = self.tables.write().await;
        tables.row(poll_id)?;

        let users = tables.likes.entry(poll_id.to_string()).or_default();
        let liked = if users.remove(user) {
            false
        } else {
            users.insert(user.to_string());
            true
        };
        if users.is_empty() {
            tables.likes.remove(poll_id);
        }
        let likes = tables.like_count(poll_id);
        debug!(poll_id = %poll_id, liked, likes, "Like toggled");
        Ok(LikeToggle { liked, likes })
    }

    /// The option `user` voted for, if any.
    pub async fn user_vote(&self, poll_id: &str, user: &str) -> QuickPollResult<Option<String>> {
        let tables = self.tables.read().await;
        tables.row(poll_id)?;
        Ok(tables
            .votes
            .get(poll_id)
            .and_then(|by_user| by_user.get(user))
            .cloned())
    }

    /// All polls, newest first.
    pub async fn list_polls(&self) -> Vec<Poll> {
        let tables = self.tables.read().await;
        let mut polls: Vec<Poll> = tables.polls.values().map(|row| tables.snapshot(row)).collect();
        polls.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        polls
    }

    pub async fn get_poll(&self, poll_id: &str) -> QuickPollResult<Poll> {
        let tables = self.tables.read().await;
        let row = tables.row(poll_id)?;
        Ok(tables.snapshot(row))
    }
}

#[async_trait]
impl PollStore for MemoryPollStore {
    async fn options_with_vote_counts(&self, poll_id: &str) -> QuickPollResult<Vec<OptionTally>> {
        let tables = self.tables.read().await;
        let row = tables.row(poll_id)?;
        Ok(tables.tally(row))
    }

    async fn like_count(&self, poll_id: &str) -> QuickPollResult<i64> {
        let tables = self.tables.read().await;
        tables.row(poll_id)?;
        Ok(tables.like_count(poll_id))
    }

    async fn poll_snapshot(&self, poll_id: &str) -> QuickPollResult<Option<Poll>> {
        let tables = self.tables.read().await;
        Ok(tables.polls.get(poll_id).map(|row| tables.snapshot(row)))
    }
}
