//! Keyed state stores with idle expiry.
//!
//! Stores are consulted through [`StateStore`] so the dispatcher does not
//! depend on where state lives. [`MemoryStore`] is the in-process
//! implementation: expiry is checked on read and by periodic sweeps; there is
//! no per-entry timer.

use dashmap::DashMap;
use std::time::{Duration, Instant};

pub trait StateStore<V>: Send + Sync {
    /// Current value, or `None` if absent or idle past the store's TTL.
    fn get(&self, key: &str) -> Option<V>;

    /// Inserts or replaces the value and refreshes its activity time.
    fn set(&self, key: &str, value: V);

    fn delete(&self, key: &str) -> Option<V>;

    /// Removes every entry idle for longer than the TTL as of `now`.
    /// Returns how many were removed.
    fn sweep(&self, now: Instant) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
struct Slot<V> {
    value: V,
    touched_at: Instant,
}

pub struct MemoryStore<V> {
    entries: DashMap<String, Slot<V>>,
    ttl: Duration,
}

impl<V: Clone> MemoryStore<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn get_at(&self, key: &str, now: Instant) -> Option<V> {
        {
            let slot = self.entries.get(key)?;
            if now.saturating_duration_since(slot.touched_at) <= self.ttl {
                return Some(slot.value.clone());
            }
        }
        self.entries
            .remove_if(key, |_, slot| now.saturating_duration_since(slot.touched_at) > self.ttl);
        None
    }

    pub fn set_at(&self, key: &str, value: V, now: Instant) {
        self.entries.insert(
            key.to_string(),
            Slot {
                value,
                touched_at: now,
            },
        );
    }
}

impl<V: Clone + Send + Sync> StateStore<V> for MemoryStore<V> {
    fn get(&self, key: &str) -> Option<V> {
        self.get_at(key, Instant::now())
    }

    fn set(&self, key: &str, value: V) {
        self.set_at(key, value, Instant::now());
    }

    fn delete(&self, key: &str) -> Option<V> {
        self.entries.remove(key).map(|(_, slot)| slot.value)
    }

    fn sweep(&self, now: Instant) -> usize {
        let before = self.entries.len();
        // retain locks one shard at a time, never the whole map
        self.entries
            .retain(|_, slot| now.saturating_duration_since(slot.touched_at) <= self.ttl);
        before.saturating_sub(self.entries.len())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::{MemoryStore, StateStore};
    use std::time::{Duration, Instant};

    #[test]
    fn get_returns_fresh_values() {
        let store = MemoryStore::new(Duration::from_secs(60));
        store.set("chat", 1u32);
        assert_eq!(store.get("chat"), Some(1));
        assert_eq!(store.get("other"), None);
    }

    #[test]
    fn expired_entries_are_dropped_on_read() {
        let store = MemoryStore::new(Duration::from_secs(60));
        let t0 = Instant::now();
        store.set_at("chat", "v", t0);

        assert_eq!(store.get_at("chat", t0 + Duration::from_secs(59)), Some("v"));
        assert_eq!(store.get_at("chat", t0 + Duration::from_secs(61)), None);
        assert!(store.is_empty());
    }

    #[test]
    fn set_refreshes_activity_time() {
        let store = MemoryStore::new(Duration::from_secs(60));
        let t0 = Instant::now();
        store.set_at("chat", 1, t0);
        store.set_at("chat", 2, t0 + Duration::from_secs(50));
        assert_eq!(store.get_at("chat", t0 + Duration::from_secs(100)), Some(2));
    }

    #[test]
    fn sweep_removes_only_idle_entries() {
        let store = MemoryStore::new(Duration::from_secs(60));
        let t0 = Instant::now();
        store.set_at("old", 1, t0);
        store.set_at("new", 2, t0 + Duration::from_secs(30));

        let removed = store.sweep(t0 + Duration::from_secs(75));
        assert_eq!(removed, 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get_at("new", t0 + Duration::from_secs(75)), Some(2));
    }

    #[test]
    fn delete_returns_previous_value() {
        let store = MemoryStore::new(Duration::from_secs(60));
        store.set("chat", 7);
        assert_eq!(store.delete("chat"), Some(7));
        assert_eq!(store.delete("chat"), None);
    }
}
