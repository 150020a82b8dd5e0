//! Minimum spacing between bot responses per chat.

use dashmap::DashMap;
use std::time::{Duration, Instant};

use crate::normalize::is_menu_digit;

pub struct RateLimiter {
    last_response: DashMap<String, Instant>,
    min_interval: Duration,
    idle_ttl: Duration,
}

impl RateLimiter {
    pub fn new(min_interval: Duration, idle_ttl: Duration) -> Self {
        Self {
            last_response: DashMap::new(),
            min_interval,
            idle_ttl,
        }
    }

    pub fn can_respond(&self, chat_id: &str) -> bool {
        self.can_respond_at(chat_id, Instant::now())
    }

    pub fn can_respond_at(&self, chat_id: &str, now: Instant) -> bool {
        self.last_response
            .get(chat_id)
            .map_or(true, |last| {
                now.saturating_duration_since(*last) >= self.min_interval
            })
    }

    /// Menu digits always pass; everything else is subject to the interval.
    pub fn admits(&self, chat_id: &str, normalized: &str, now: Instant) -> bool {
        is_menu_digit(normalized) || self.can_respond_at(chat_id, now)
    }

    pub fn record_response(&self, chat_id: &str) {
        self.record_response_at(chat_id, Instant::now());
    }

    pub fn record_response_at(&self, chat_id: &str, now: Instant) {
        self.last_response.insert(chat_id.to_string(), now);
    }

    pub fn sweep(&self, now: Instant) -> usize {
        let before = self.last_response.len();
        self.last_response
            .retain(|_, last| now.saturating_duration_since(*last) <= self.idle_ttl);
        before.saturating_sub(self.last_response.len())
    }

    pub fn len(&self) -> usize {
        self.last_response.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_response.is_empty()
    }
}
