//! Channel naming.

/// Channel carrying poll lifecycle events (`new_poll`, `delete_poll`).
pub const GLOBAL_CHANNEL: &str = "polls:global";

/// Channel carrying vote and like updates for one poll.
pub fn poll_channel(poll_id: &str) -> String {
    format!("poll:{}", poll_id)
}
