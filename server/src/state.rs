//! Interaction state store for checklist completion.
//!
//! Completion is tracked per `(message, section)` pair as a set of task
//! indices. Entries are created by the first toggle of a section and live in
//! memory only.
//!
//! # Eviction
//!
//! - **TTL**: an entry untouched for longer than the TTL (24 hours by default)
//!   is treated as absent. Expiry is lazy: a read that finds an expired entry
//!   deletes it.
//! - **Capacity**: at most `capacity` entries (1000 by default). Inserting a
//!   new key at capacity evicts the least-recently-touched entry. Reads count
//!   as touches.
//!
//! Because every touch also moves the entry to the front of the LRU order,
//! expired entries always sit at the tail; they are purged before any insert
//! so they never count toward capacity.
//!
//! # Thread Safety
//!
//! All read-modify-write sequences run under a single [`Mutex`] scoped to the
//! map. Callers never hold it across network I/O.
//!
//! # Example
//!
//! ```rust
//! use daytrack_server::state::{ChecklistStore, StateKey};
//! use daytrack_server::types::Section;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let store = ChecklistStore::default();
//! let key = StateKey::new(42, Section::Day);
//!
//! let done = store.toggle(key, 0).await;
//! assert!(done.contains(&0));
//!
//! let done = store.toggle(key, 0).await;
//! assert!(done.is_empty());
//! # }
//! ```

use std::collections::BTreeSet;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use lru::LruCache;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::types::{Completion, Section};

/// Default time-to-live of an untouched entry (24 hours).
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Default maximum number of entries.
pub const DEFAULT_CAPACITY: usize = 1000;

/// Identity of a stored completion set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StateKey {
    pub message_id: i64,
    pub section: Section,
}

impl StateKey {
    pub fn new(message_id: i64, section: Section) -> Self {
        Self {
            message_id,
            section,
        }
    }
}

/// Configuration for the checklist store.
#[derive(Debug, Clone, Copy)]
pub struct StoreConfig {
    /// Maximum number of entries.
    pub capacity: usize,

    /// Time after the last touch at which an entry expires.
    pub ttl: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            ttl: DEFAULT_TTL,
        }
    }
}

#[derive(Debug)]
struct Entry {
    done: BTreeSet<usize>,
    touched: Instant,
}

impl Entry {
    fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        now.duration_since(self.touched) > ttl
    }
}

/// In-memory completion store with TTL and LRU capacity limits.
///
/// Cloning is cheap and yields a handle to the same map.
#[derive(Debug, Clone)]
pub struct ChecklistStore {
    entries: Arc<Mutex<LruCache<StateKey, Entry>>>,
    ttl: Duration,
}

impl Default for ChecklistStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

impl ChecklistStore {
    /// Creates an empty store.
    ///
    /// A capacity of zero is treated as one.
    pub fn new(config: StoreConfig) -> Self {
        let capacity = NonZeroUsize::new(config.capacity).unwrap_or(NonZeroUsize::MIN);
        debug!(
            capacity = capacity.get(),
            ttl_secs = config.ttl.as_secs(),
            "Creating checklist store"
        );
        Self {
            entries: Arc::new(Mutex::new(LruCache::new(capacity))),
            ttl: config.ttl,
        }
    }

    /// Returns the completed indices stored for `key`.
    ///
    /// A live entry is touched (TTL restarted, moved to the front of the LRU
    /// order). An expired entry is deleted and reported as absent.
    pub async fn get(&self, key: StateKey) -> Option<BTreeSet<usize>> {
        let mut entries = self.entries.lock().await;
        Self::get_live(&mut entries, key, self.ttl).map(|entry| entry.done.clone())
    }

    /// Replaces the completed indices stored for `key`.
    pub async fn set(&self, key: StateKey, done: BTreeSet<usize>) {
        let mut entries = self.entries.lock().await;
        self.insert(&mut entries, key, done);
    }

    /// Flips completion of task `index` and returns the resulting set.
    ///
    /// The read and the write happen under one lock acquisition, so two
    /// concurrent toggles of the same key never lose an update.
    pub async fn toggle(&self, key: StateKey, index: usize) -> BTreeSet<usize> {
        let mut entries = self.entries.lock().await;

        let mut done = Self::get_live(&mut entries, key, self.ttl)
            .map(|entry| std::mem::take(&mut entry.done))
            .unwrap_or_default();

        if !done.remove(&index) {
            done.insert(index);
        }

        debug!(
            message_id = key.message_id,
            section = key.section.prefix(),
            index,
            completed = done.len(),
            "Toggled task"
        );

        self.insert(&mut entries, key, done.clone());
        done
    }

    /// Reads the completion view of all three sections of a message.
    pub async fn completion(&self, message_id: i64) -> Completion {
        let mut entries = self.entries.lock().await;
        let mut completion = Completion::new();
        for section in Section::ALL {
            let key = StateKey::new(message_id, section);
            if let Some(entry) = Self::get_live(&mut entries, key, self.ttl) {
                completion.set(section, entry.done.clone());
            }
        }
        completion
    }

    /// Drops every entry of a message.
    pub async fn forget(&self, message_id: i64) {
        let mut entries = self.entries.lock().await;
        for section in Section::ALL {
            entries.pop(&StateKey::new(message_id, section));
        }
        trace!(message_id, "Forgot checklist state");
    }

    /// Number of live entries.
    pub async fn len(&self) -> usize {
        let mut entries = self.entries.lock().await;
        self.purge_expired(&mut entries);
        entries.len()
    }

    /// Returns true if no live entries are stored.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn get_live(
        entries: &mut LruCache<StateKey, Entry>,
        key: StateKey,
        ttl: Duration,
    ) -> Option<&mut Entry> {
        let now = Instant::now();
        let expired = entries.get_mut(&key)?.is_expired(now, ttl);
        if expired {
            entries.pop(&key);
            trace!(message_id = key.message_id, "Dropped expired checklist state");
            return None;
        }
        let entry = entries.get_mut(&key)?;
        entry.touched = now;
        Some(entry)
    }

    fn insert(&self, entries: &mut LruCache<StateKey, Entry>, key: StateKey, done: BTreeSet<usize>) {
        self.purge_expired(entries);
        let entry = Entry {
            done,
            touched: Instant::now(),
        };
        if let Some((evicted, _)) = entries.push(key, entry) {
            if evicted != key {
                debug!(
                    message_id = evicted.message_id,
                    section = evicted.section.prefix(),
                    "Evicted least recently used checklist state"
                );
            }
        }
    }

    /// Removes expired entries from the LRU tail.
    fn purge_expired(&self, entries: &mut LruCache<StateKey, Entry>) {
        let now = Instant::now();
        while entries
            .peek_lru()
            .is_some_and(|(_, entry)| entry.is_expired(now, self.ttl))
        {
            entries.pop_lru();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_store(capacity: usize) -> ChecklistStore {
        ChecklistStore::new(StoreConfig {
            capacity,
            ttl: Duration::from_secs(60),
        })
    }

    fn set_of(indices: &[usize]) -> BTreeSet<usize> {
        indices.iter().copied().collect()
    }

    #[tokio::test]
    async fn missing_key_is_absent() {
        let store = ChecklistStore::default();
        assert_eq!(store.get(StateKey::new(1, Section::Day)).await, None);
    }

    #[tokio::test]
    async fn set_then_get() {
        let store = ChecklistStore::default();
        let key = StateKey::new(1, Section::Evening);
        store.set(key, set_of(&[0, 2])).await;
        assert_eq!(store.get(key).await, Some(set_of(&[0, 2])));
    }

    #[tokio::test]
    async fn toggle_is_an_involution() {
        let store = ChecklistStore::default();
        let key = StateKey::new(7, Section::Day);

        assert_eq!(store.toggle(key, 3).await, set_of(&[3]));
        assert_eq!(store.toggle(key, 3).await, set_of(&[]));
        assert_eq!(store.get(key).await, Some(set_of(&[])));
    }

    #[tokio::test]
    async fn sections_are_independent() {
        let store = ChecklistStore::default();
        store.toggle(StateKey::new(7, Section::Day), 0).await;
        store.toggle(StateKey::new(7, Section::CantDo), 1).await;
        store.toggle(StateKey::new(8, Section::Day), 2).await;

        let completion = store.completion(7).await;
        assert!(completion.is_done(Section::Day, 0));
        assert!(completion.is_done(Section::CantDo, 1));
        assert!(!completion.is_done(Section::Day, 2));
        assert!(completion.get(Section::Evening).is_empty());
    }

    #[tokio::test]
    async fn never_exceeds_capacity() {
        let store = small_store(3);
        for id in 0..10 {
            store.toggle(StateKey::new(id, Section::Day), 0).await;
            assert!(store.len().await <= 3);
        }
        assert_eq!(store.len().await, 3);
    }

    #[tokio::test]
    async fn evicts_least_recently_touched_not_oldest_inserted() {
        let store = small_store(2);
        let first = StateKey::new(1, Section::Day);
        let second = StateKey::new(2, Section::Day);
        let third = StateKey::new(3, Section::Day);

        store.toggle(first, 0).await;
        store.toggle(second, 0).await;
        // Reading `first` makes `second` the least recently touched.
        assert!(store.get(first).await.is_some());

        store.toggle(third, 0).await;

        assert!(store.get(first).await.is_some());
        assert_eq!(store.get(second).await, None);
        assert!(store.get(third).await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entry_is_absent() {
        let store = small_store(10);
        let key = StateKey::new(1, Section::Day);
        store.toggle(key, 0).await;

        tokio::time::advance(Duration::from_secs(61)).await;

        assert_eq!(store.get(key).await, None);
        assert_eq!(store.toggle(key, 1).await, set_of(&[1]));
    }

    #[tokio::test(start_paused = true)]
    async fn reads_restart_the_ttl() {
        let store = small_store(10);
        let key = StateKey::new(1, Section::Day);
        store.toggle(key, 0).await;

        tokio::time::advance(Duration::from_secs(40)).await;
        assert!(store.get(key).await.is_some());
        tokio::time::advance(Duration::from_secs(40)).await;

        assert_eq!(store.get(key).await, Some(set_of(&[0])));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_do_not_count_toward_capacity() {
        let store = small_store(2);
        let stale = StateKey::new(1, Section::Day);
        let live = StateKey::new(2, Section::Day);
        store.toggle(stale, 0).await;

        tokio::time::advance(Duration::from_secs(50)).await;
        store.toggle(live, 0).await;
        tokio::time::advance(Duration::from_secs(20)).await;

        assert_eq!(store.len().await, 1);

        let fresh = StateKey::new(3, Section::Day);
        store.toggle(fresh, 0).await;
        assert!(store.get(live).await.is_some());
        assert!(store.get(fresh).await.is_some());
    }

    #[tokio::test]
    async fn forget_drops_all_sections() {
        let store = ChecklistStore::default();
        for section in Section::ALL {
            store.toggle(StateKey::new(5, section), 0).await;
        }
        store.toggle(StateKey::new(6, Section::Day), 0).await;

        store.forget(5).await;

        assert_eq!(store.completion(5).await, Completion::new());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn concurrent_toggles_do_not_lose_updates() {
        let store = ChecklistStore::default();
        let key = StateKey::new(9, Section::Day);

        let handles: Vec<_> = (0..50)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move { store.toggle(key, i).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.get(key).await.map(|s| s.len()), Some(50));
    }
}
