//! Polls, votes and likes.

pub mod memory;
pub mod model;

use async_trait::async_trait;

use crate::error::QuickPollResult;
pub use memory::MemoryPollStore;
use model::{OptionTally, Poll};

/// Read side of poll persistence used by the broadcast emitters.
///
/// Every call must reflect committed state at the moment it is made; the
/// emitters never cache what they read.
#[async_trait]
pub trait PollStore: Send + Sync {
    /// Options of the poll in creation order, each with its current vote count.
    async fn options_with_vote_counts(&self, poll_id: &str) -> QuickPollResult<Vec<OptionTally>>;

    /// Current number of likes on the poll.
    async fn like_count(&self, poll_id: &str) -> QuickPollResult<i64>;

    /// The poll with live counts, or `None` if it does not exist.
    async fn poll_snapshot(&self, poll_id: &str) -> QuickPollResult<Option<Poll>>;
}
