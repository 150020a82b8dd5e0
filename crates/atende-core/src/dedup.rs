//! Short-window duplicate suppression per chat.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::{Duration, Instant};

pub struct DedupGuard {
    first_seen: DashMap<(String, String), Instant>,
    window: Duration,
    retention: Duration,
}

impl DedupGuard {
    /// A repeat inside `window` is a duplicate; every pair is forgotten
    /// `retention` after it was first seen, repeats do not extend it.
    pub fn new(window: Duration, retention: Duration) -> Self {
        Self {
            first_seen: DashMap::new(),
            window,
            retention,
        }
    }

    pub fn is_duplicate(&self, chat_id: &str, text: &str) -> bool {
        self.is_duplicate_at(chat_id, text, Instant::now())
    }

    pub fn is_duplicate_at(&self, chat_id: &str, text: &str, now: Instant) -> bool {
        let key = (chat_id.to_string(), text.to_string());
        match self.first_seen.entry(key) {
            Entry::Occupied(mut entry) => {
                let age = now.saturating_duration_since(*entry.get());
                if age >= self.retention {
                    entry.insert(now);
                    false
                } else {
                    age < self.window
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(now);
                false
            }
        }
    }

    pub fn sweep(&self, now: Instant) -> usize {
        let before = self.first_seen.len();
        self.first_seen
            .retain(|_, seen| now.saturating_duration_since(*seen) < self.retention);
        before.saturating_sub(self.first_seen.len())
    }

    pub fn len(&self) -> usize {
        self.first_seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.first_seen.is_empty()
    }
}
