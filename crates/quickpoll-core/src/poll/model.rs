//! Poll domain models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A poll with live counts, as returned to readers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Poll {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub likes_count: i64,
    pub options: Vec<PollOption>,
}

/// One answer of a poll with its vote count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollOption {
    pub id: String,
    pub poll_id: String,
    pub text: String,
    pub votes: i64,
}

/// Per-option vote count at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionTally {
    pub option_id: String,
    pub text: String,
    pub votes: i64,
}

/// Outcome of toggling a like, read under the same lock as the write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LikeToggle {
    pub liked: bool,
    pub likes: i64,
}

/// Input for creating a poll.
#[derive(Debug, Clone, Deserialize)]
pub struct NewPoll {
    pub title: String,
    pub description: Option<String>,
    #[serde(default)]
    pub options: Vec<NewOption>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewOption {
    pub text: String,
}

impl NewPoll {
    /// Convenience constructor, mostly for tests.
    pub fn new(title: &str, options: &[&str]) -> Self {
        Self {
            title: title.to_string(),
            description: None,
            options: options
                .iter()
                .map(|text| NewOption { text: text.to_string() })
                .collect(),
        }
    }
}
