//! LRU-keyed ban list, consulted before admitting a contact anywhere in the
//! discovery or peer-pool paths. Capacity and TTL per the routing-table spec;
//! grounded on the `lru` crate the way the broader example pack uses it for
//! bounded caches.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;

const DEFAULT_CAPACITY: usize = 10_000;

pub struct BanList {
    entries: LruCache<String, Instant>,
    ttl: Option<Duration>,
}

impl BanList {
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            entries: LruCache::new(NonZeroUsize::new(DEFAULT_CAPACITY).expect("capacity is non-zero")),
            ttl,
        }
    }

    pub fn add(&mut self, key: impl Into<String>) {
        self.entries.put(key.into(), Instant::now());
    }

    pub fn has(&mut self, key: &str) -> bool {
        let Some(banned_at) = self.entries.get(key) else {
            return false;
        };
        match self.ttl {
            Some(ttl) if banned_at.elapsed() > ttl => {
                self.entries.pop(key);
                false
            }
            _ => true,
        }
    }
}

impl Default for BanList {
    fn default() -> Self {
        Self::new(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_then_has_is_idempotent() {
        let mut bans = BanList::default();
        bans.add("deadbeef");
        assert!(bans.has("deadbeef"));
        assert!(bans.has("deadbeef"));
        assert!(!bans.has("someone-else"));
    }

    #[test]
    fn ttl_expires_bans() {
        let mut bans = BanList::new(Some(Duration::from_millis(1)));
        bans.add("192.168.0.1:30303");
        std::thread::sleep(Duration::from_millis(5));
        assert!(!bans.has("192.168.0.1:30303"));
    }
}
