//! ErrorTracker port - メッセージ ID ごとの失敗履歴
//!
//! Entries live only as long as the message: cleared on success, cleared
//! after dead-lettering, and otherwise swept by age.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One recorded failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub description: String,
    pub at: DateTime<Utc>,
}

/// Snapshot of the failures recorded for one message id.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TrackedErrors {
    pub entries: Vec<ErrorEntry>,
    /// Bumped on every registration; lets callers detect concurrent resets.
    pub generation: u64,
    /// Set when a failure must not be retried any further.
    pub is_final: bool,
}

impl TrackedErrors {
    pub fn attempts(&self) -> u32 {
        u32::try_from(self.entries.len()).unwrap_or(u32::MAX)
    }
}

/// Shared across all workers. Implementations must be safe for concurrent
/// access to distinct ids.
pub trait ErrorTracker: Send + Sync {
    /// Append a failure and return the number of failures recorded so far.
    fn register_error(&self, message_id: &str, description: String) -> u32;

    /// Exhaust the retry budget of `message_id` regardless of its count.
    fn mark_as_final(&self, message_id: &str);

    /// Whether `message_id` has used up `max_attempts` (or is final).
    fn has_failed_too_many_times(&self, message_id: &str, max_attempts: u32) -> bool;

    fn errors(&self, message_id: &str) -> Option<TrackedErrors>;

    fn clean_up(&self, message_id: &str);

    /// Drop entries whose latest failure is older than `cutoff`.
    /// Returns the number of removed entries.
    fn remove_older_than(&self, cutoff: DateTime<Utc>) -> usize;
}
