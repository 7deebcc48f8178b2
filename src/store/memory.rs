//! In-Process Store Module
//!
//! HashMap-backed upstream that follows Redis semantics for the six gateway
//! commands. Selected with a `memory://` address; used for local development
//! and tests where no Redis server is available.

use std::collections::HashMap;

use crate::store::entry::StoredEntry;

/// `TTL` reply for a key that does not exist.
pub const TTL_KEY_ABSENT: i64 = -2;
/// `TTL` reply for a key without an expiry.
pub const TTL_NO_EXPIRY: i64 = -1;

// == Memory Store ==
/// Key-value storage with lazy and swept expiry.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: HashMap<String, StoredEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // == Set ==
    /// Stores a value, discarding any previous TTL like `SET` does.
    pub fn set(&mut self, key: &str, value: &str) {
        self.entries
            .insert(key.to_string(), StoredEntry::new(value.to_string(), None));
    }

    /// Stores a value and its expiry in one step (`SET key value EX ttl`).
    pub fn set_with_ttl(&mut self, key: &str, value: &str, ttl: u64) {
        self.entries.insert(
            key.to_string(),
            StoredEntry::new(value.to_string(), Some(ttl)),
        );
    }

    // == Get ==
    /// Returns the live value, evicting the entry if it has expired.
    pub fn get(&mut self, key: &str) -> Option<String> {
        self.live(key).map(|entry| entry.value.clone())
    }

    // == Delete ==
    /// Removes a key. Returns whether a live entry was removed.
    pub fn del(&mut self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some(entry) => !entry.is_expired(),
            None => false,
        }
    }

    // == Exists ==
    pub fn exists(&mut self, key: &str) -> bool {
        self.live(key).is_some()
    }

    // == Expire ==
    /// Sets a deadline on a live key. A zero TTL deletes the key, matching
    /// `EXPIRE key 0`. Returns whether the key existed.
    pub fn expire(&mut self, key: &str, ttl: u64) -> bool {
        if self.live(key).is_none() {
            return false;
        }
        if ttl == 0 {
            self.entries.remove(key);
        } else if let Some(entry) = self.entries.get_mut(key) {
            entry.expire_in(ttl);
        }
        true
    }

    // == TTL ==
    /// Remaining seconds, [`TTL_NO_EXPIRY`] or [`TTL_KEY_ABSENT`].
    pub fn ttl(&mut self, key: &str) -> i64 {
        match self.live(key) {
            None => TTL_KEY_ABSENT,
            Some(entry) => entry
                .ttl_remaining()
                .map(|secs| secs as i64)
                .unwrap_or(TTL_NO_EXPIRY),
        }
    }

    // == Cleanup Expired ==
    /// Removes all expired entries. Returns the number removed.
    pub fn cleanup_expired(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired());
        before - self.entries.len()
    }

    /// Number of stored entries, expired ones included until swept.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn live(&mut self, key: &str) -> Option<&StoredEntry> {
        if self.entries.get(key).is_some_and(StoredEntry::is_expired) {
            self.entries.remove(key);
        }
        self.entries.get(key)
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn test_set_and_get() {
        let mut store = MemoryStore::new();

        store.set("key1", "value1");
        assert_eq!(store.get("key1").as_deref(), Some("value1"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_get_missing() {
        let mut store = MemoryStore::new();
        assert!(store.get("nope").is_none());
    }

    #[test]
    fn test_set_clears_previous_ttl() {
        let mut store = MemoryStore::new();

        store.set_with_ttl("k", "v1", 60);
        assert!(store.ttl("k") > 0);

        store.set("k", "v2");
        assert_eq!(store.ttl("k"), TTL_NO_EXPIRY);
        assert_eq!(store.get("k").as_deref(), Some("v2"));
    }

    #[test]
    fn test_del_is_idempotent() {
        let mut store = MemoryStore::new();

        store.set("k", "v");
        assert!(store.del("k"));
        assert!(!store.del("k"));
        assert!(store.get("k").is_none());
    }

    #[test]
    fn test_expire_missing_key_is_noop() {
        let mut store = MemoryStore::new();

        assert!(!store.expire("ghost", 10));
        assert!(store.is_empty());
        assert_eq!(store.ttl("ghost"), TTL_KEY_ABSENT);
    }

    #[test]
    fn test_expire_zero_deletes() {
        let mut store = MemoryStore::new();

        store.set("k", "v");
        assert!(store.expire("k", 0));
        assert!(!store.exists("k"));
    }

    #[test]
    fn test_ttl_expiration() {
        let mut store = MemoryStore::new();

        store.set_with_ttl("k", "v", 1);
        assert!(store.exists("k"));

        sleep(Duration::from_millis(1100));

        assert!(!store.exists("k"));
        assert!(store.get("k").is_none());
        assert_eq!(store.ttl("k"), TTL_KEY_ABSENT);
    }

    #[test]
    fn test_cleanup_expired() {
        let mut store = MemoryStore::new();

        store.set_with_ttl("short", "v", 1);
        store.set_with_ttl("long", "v", 10);
        store.set("forever", "v");

        sleep(Duration::from_millis(1100));

        assert_eq!(store.cleanup_expired(), 1);
        assert_eq!(store.len(), 2);
        assert!(store.exists("long"));
    }
}
