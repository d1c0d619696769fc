//! Process-wide replay detection for Shadowsocks IVs/salts. An IV seen
//! twice within the cache's lifetime almost always means a passive
//! observer is replaying a captured handshake at the server to see how it
//! reacts; the session orchestrator routes those connections to the
//! reject egress instead of completing them.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

const TTL: Duration = Duration::from_secs(60 * 60);

pub struct ReplayCache {
    seen: Mutex<HashMap<Vec<u8>, Instant>>,
}

impl ReplayCache {
    pub fn new() -> Self {
        Self {
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Returns `true` if `iv` had not been seen before (and records it),
    /// `false` if it's a replay. An empty IV is never considered novel —
    /// some ciphers have a zero-length leading field, and treating that
    /// as "never seen" would make replay detection a no-op for them.
    pub fn check_and_insert(&self, iv: &[u8]) -> bool {
        if iv.is_empty() {
            return false;
        }
        let now = Instant::now();
        let mut seen = self.seen.lock();
        seen.retain(|_, inserted| now.duration_since(*inserted) < TTL);
        if seen.contains_key(iv) {
            false
        } else {
            seen.insert(iv.to_vec(), now);
            true
        }
    }

    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ReplayCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_insert_is_novel() {
        let cache = ReplayCache::new();
        assert!(cache.check_and_insert(b"abc123"));
    }

    #[test]
    fn duplicate_is_rejected() {
        let cache = ReplayCache::new();
        assert!(cache.check_and_insert(b"abc123"));
        assert!(!cache.check_and_insert(b"abc123"));
    }

    #[test]
    fn empty_iv_is_always_a_replay() {
        let cache = ReplayCache::new();
        assert!(!cache.check_and_insert(b""));
        assert!(!cache.check_and_insert(b""));
    }

    #[test]
    fn distinct_ivs_are_independent() {
        let cache = ReplayCache::new();
        assert!(cache.check_and_insert(b"one"));
        assert!(cache.check_and_insert(b"two"));
        assert_eq!(cache.len(), 2);
    }
}
