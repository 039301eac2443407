//! InMemoryErrorTracker - DashMap ベースの ErrorTracker 実装
//!
//! Counts are process-local: a restart forgets them and the message gets a
//! fresh budget.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::ports::{Clock, ErrorEntry, ErrorTracker, TrackedErrors};

pub struct InMemoryErrorTracker {
    entries: DashMap<String, TrackedErrors>,
    clock: Arc<dyn Clock>,
}

impl InMemoryErrorTracker {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    /// Number of message ids currently tracked.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ErrorTracker for InMemoryErrorTracker {
    fn register_error(&self, message_id: &str, description: String) -> u32 {
        let at = self.clock.now();
        let mut tracked = self.entries.entry(message_id.to_string()).or_default();
        tracked.entries.push(ErrorEntry { description, at });
        tracked.generation += 1;
        tracked.attempts()
    }

    fn mark_as_final(&self, message_id: &str) {
        self.entries
            .entry(message_id.to_string())
            .or_default()
            .is_final = true;
    }

    fn has_failed_too_many_times(&self, message_id: &str, max_attempts: u32) -> bool {
        self.entries
            .get(message_id)
            .is_some_and(|tracked| tracked.is_final || tracked.attempts() >= max_attempts)
    }

    fn errors(&self, message_id: &str) -> Option<TrackedErrors> {
        self.entries.get(message_id).map(|tracked| tracked.clone())
    }

    fn clean_up(&self, message_id: &str) {
        self.entries.remove(message_id);
    }

    fn remove_older_than(&self, cutoff: DateTime<Utc>) -> usize {
        let mut removed = 0;
        self.entries.retain(|_, tracked| {
            let keep = tracked.entries.last().is_some_and(|last| last.at >= cutoff);
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }
}
