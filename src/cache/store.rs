//! Response cache with staleness flags
//!
//! [`ResponseCache`] maps [`ResourceKey`]s to cached values. Entries are
//! created on the first successful fetch, overwritten on refetch or direct
//! write, and only ever *marked* stale by invalidation; nothing is evicted.
//! Subscribers observe every write and every stale transition through a
//! [`tokio::sync::broadcast`] channel.
//!
//! Each namespace carries an invalidation epoch. A fetch records the epoch
//! when it starts ([`ResponseCache::begin_fetch`]) and hands it back when it
//! stores its result ([`ResponseCache::complete_fetch`]). If the namespace
//! was invalidated or patched in between, the result predates that write
//! and is stored stale.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Duration, Utc};
use tokio::sync::broadcast;

use crate::cache::keys::{KeyPattern, ResourceKey, ResourceKind};

const EVENT_CAPACITY: usize = 64;

/// A cached value and its bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<V> {
    /// Key the entry is stored under
    pub key: ResourceKey,
    /// Last value fetched or written
    pub value: V,
    /// When the value was last fetched or written
    pub fetched_at: DateTime<Utc>,
    /// Whether the value must be refetched before it is trusted
    pub stale: bool,
}

/// Change notification published to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// The entry's value was written
    Updated(ResourceKey),
    /// The entry transitioned from fresh to stale
    Stale(ResourceKey),
}

/// Snapshot of the cache's write history taken when a fetch starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchEpoch {
    generation: u64,
    namespace: u64,
}

/// What [`ResponseCache::complete_fetch`] did with a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Stored as a fresh entry
    Fresh,
    /// The namespace changed while the fetch was in flight; stored stale
    Stale,
    /// The cache was cleared while the fetch was in flight; not stored
    Discarded,
}

#[derive(Debug)]
struct Slots<V> {
    entries: HashMap<ResourceKey, CacheEntry<V>>,
    epochs: HashMap<ResourceKind, u64>,
    generation: u64,
}

impl<V> Slots<V> {
    fn epoch_of(&self, kind: &ResourceKind) -> u64 {
        self.epochs.get(kind).copied().unwrap_or(0)
    }

    fn bump(&mut self, kind: &ResourceKind) {
        *self.epochs.entry(kind.clone()).or_insert(0) += 1;
    }

    fn store(&mut self, key: ResourceKey, value: V, stale: bool) {
        let entry = CacheEntry {
            key: key.clone(),
            value,
            fetched_at: Utc::now(),
            stale,
        };
        self.entries.insert(key, entry);
    }
}

/// Generic key/value cache with staleness tracking.
///
/// Readers and invalidators may run concurrently; direct writes to the same
/// entry are last-write-wins.
#[derive(Debug)]
pub struct ResponseCache<V> {
    slots: RwLock<Slots<V>>,
    max_age: Option<Duration>,
    events: broadcast::Sender<CacheEvent>,
}

impl<V: Clone> Default for ResponseCache<V> {
    fn default() -> Self {
        Self::new(None)
    }
}

impl<V: Clone> ResponseCache<V> {
    /// Creates an empty cache.
    ///
    /// When `max_age` is set, [`ResponseCache::get_fresh`] treats entries
    /// older than it as stale.
    pub fn new(max_age: Option<Duration>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            slots: RwLock::new(Slots {
                entries: HashMap::new(),
                epochs: HashMap::new(),
                generation: 0,
            }),
            max_age,
            events,
        }
    }

    fn read_slots(&self) -> RwLockReadGuard<'_, Slots<V>> {
        self.slots.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_slots(&self) -> RwLockWriteGuard<'_, Slots<V>> {
        self.slots.write().unwrap_or_else(|e| e.into_inner())
    }

    fn publish(&self, event: CacheEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Returns the entry stored under `key`, stale or not.
    pub fn get(&self, key: &ResourceKey) -> Option<CacheEntry<V>> {
        self.read_slots().entries.get(key).cloned()
    }

    /// Returns the value under `key` only when it can be trusted: present,
    /// not flagged stale, and younger than the configured maximum age.
    pub fn get_fresh(&self, key: &ResourceKey) -> Option<V> {
        let slots = self.read_slots();
        let entry = slots.entries.get(key)?;
        if entry.stale {
            return None;
        }
        if let Some(max_age) = self.max_age {
            if Utc::now() - entry.fetched_at > max_age {
                return None;
            }
        }
        Some(entry.value.clone())
    }

    /// Stores `value` under `key` as a fresh entry.
    pub fn insert(&self, key: ResourceKey, value: V) {
        self.write_slots().store(key.clone(), value, false);
        self.publish(CacheEvent::Updated(key));
    }

    /// Records the write history a fetch for `key` starts from.
    pub fn begin_fetch(&self, key: &ResourceKey) -> FetchEpoch {
        let slots = self.read_slots();
        FetchEpoch {
            generation: slots.generation,
            namespace: slots.epoch_of(&key.namespace),
        }
    }

    /// Stores the result of a fetch started at `epoch`.
    ///
    /// The result is fresh only if nothing in its namespace was invalidated
    /// or patched since [`ResponseCache::begin_fetch`]. Results that outlive
    /// a [`ResponseCache::clear`] are dropped.
    pub fn complete_fetch(&self, key: ResourceKey, value: V, epoch: FetchEpoch) -> FetchOutcome {
        let outcome = {
            let mut slots = self.write_slots();
            if slots.generation != epoch.generation {
                FetchOutcome::Discarded
            } else {
                let stale = slots.epoch_of(&key.namespace) != epoch.namespace;
                slots.store(key.clone(), value, stale);
                if stale {
                    FetchOutcome::Stale
                } else {
                    FetchOutcome::Fresh
                }
            }
        };
        if outcome != FetchOutcome::Discarded {
            self.publish(CacheEvent::Updated(key));
        }
        outcome
    }

    /// Rewrites the value under `key` in place.
    ///
    /// `f` receives the current value and returns `true` if it changed
    /// anything. Absent entries are skipped. The stale flag and fetch time
    /// are left alone: a patch is not a refetch.
    ///
    /// Returns `true` if an entry was changed.
    pub fn update<F>(&self, key: &ResourceKey, f: F) -> bool
    where
        F: FnOnce(&mut V) -> bool,
    {
        let changed = {
            let mut slots = self.write_slots();
            // A fetch in flight for this key must not overwrite the patch.
            slots.bump(&key.namespace);
            match slots.entries.get_mut(key) {
                Some(entry) => f(&mut entry.value),
                None => false,
            }
        };
        if changed {
            self.publish(CacheEvent::Updated(key.clone()));
        }
        changed
    }

    /// Flags every entry matching `pattern` as stale.
    ///
    /// Entries that are already stale are left untouched and produce no
    /// event. Returns the number of entries that transitioned.
    pub fn mark_stale(&self, pattern: &KeyPattern) -> usize {
        let transitioned: Vec<ResourceKey> = {
            let mut slots = self.write_slots();
            slots.bump(pattern.namespace());
            slots
                .entries
                .values_mut()
                .filter(|entry| !entry.stale && pattern.matches(&entry.key))
                .map(|entry| {
                    entry.stale = true;
                    entry.key.clone()
                })
                .collect()
        };
        let count = transitioned.len();
        for key in transitioned {
            self.publish(CacheEvent::Stale(key));
        }
        count
    }

    /// Subscribes to change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.read_slots().entries.len()
    }

    /// Returns `true` if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.read_slots().entries.is_empty()
    }

    /// Drops every entry. Used when the session ends.
    pub fn clear(&self) {
        let mut slots = self.write_slots();
        slots.entries.clear();
        slots.generation += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::keys::{Filters, QueryKeys, ResourceKind};

    fn tasks() -> QueryKeys {
        QueryKeys::new(ResourceKind::TASKS)
    }

    #[test]
    fn test_insert_and_get_fresh() {
        let cache = ResponseCache::new(None);
        cache.insert(tasks().detail(1), "one".to_string());

        assert_eq!(cache.get_fresh(&tasks().detail(1)), Some("one".to_string()));
        assert_eq!(cache.get_fresh(&tasks().detail(2)), None);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_mark_stale_is_idempotent() {
        let cache = ResponseCache::new(None);
        cache.insert(tasks().all(), 1);
        cache.insert(tasks().list(Filters::new()), 2);

        assert_eq!(cache.mark_stale(&tasks().collections()), 2);
        assert_eq!(cache.mark_stale(&tasks().collections()), 0);

        let entry = cache.get(&tasks().all()).expect("entry kept");
        assert!(entry.stale);
        assert_eq!(entry.value, 1);
        assert_eq!(cache.get_fresh(&tasks().all()), None);
    }

    #[test]
    fn test_insert_clears_stale_flag() {
        let cache = ResponseCache::new(None);
        cache.insert(tasks().all(), 1);
        cache.mark_stale(&KeyPattern::Exact(tasks().all()));
        cache.insert(tasks().all(), 2);
        assert_eq!(cache.get_fresh(&tasks().all()), Some(2));
    }

    #[test]
    fn test_update_skips_absent_entries() {
        let cache: ResponseCache<i32> = ResponseCache::new(None);
        assert!(!cache.update(&tasks().detail(1), |v| {
            *v += 1;
            true
        }));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_update_keeps_stale_flag() {
        let cache = ResponseCache::new(None);
        cache.insert(tasks().detail(1), 10);
        cache.mark_stale(&KeyPattern::Exact(tasks().detail(1)));

        assert!(cache.update(&tasks().detail(1), |v| {
            *v = 11;
            true
        }));
        let entry = cache.get(&tasks().detail(1)).expect("entry");
        assert_eq!(entry.value, 11);
        assert!(entry.stale);
    }

    #[test]
    fn test_expired_entries_are_not_fresh() {
        let cache = ResponseCache::new(Some(Duration::zero()));
        cache.insert(tasks().all(), 1);
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert_eq!(cache.get_fresh(&tasks().all()), None);
        assert!(cache.get(&tasks().all()).is_some());
    }

    #[tokio::test]
    async fn test_subscribers_see_writes_and_transitions() {
        let cache = ResponseCache::new(None);
        let mut events = cache.subscribe();

        cache.insert(tasks().all(), 1);
        cache.mark_stale(&tasks().collections());
        cache.mark_stale(&tasks().collections());

        assert_eq!(events.recv().await.unwrap(), CacheEvent::Updated(tasks().all()));
        assert_eq!(events.recv().await.unwrap(), CacheEvent::Stale(tasks().all()));
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_fetch_outliving_invalidation_is_stored_stale() {
        let cache = ResponseCache::new(None);
        cache.insert(tasks().list(Filters::new()), 0);

        let epoch = cache.begin_fetch(&tasks().list(Filters::new()));
        cache.mark_stale(&tasks().collections());
        let outcome = cache.complete_fetch(tasks().list(Filters::new()), 0, epoch);

        assert_eq!(outcome, FetchOutcome::Stale);
        assert!(cache.get(&tasks().list(Filters::new())).unwrap().stale);
        assert_eq!(cache.get_fresh(&tasks().list(Filters::new())), None);
    }

    #[test]
    fn test_fetch_outliving_invalidation_of_absent_key_is_stored_stale() {
        let cache = ResponseCache::new(None);

        let epoch = cache.begin_fetch(&tasks().all());
        assert_eq!(cache.mark_stale(&tasks().collections()), 0);

        assert_eq!(cache.complete_fetch(tasks().all(), 1, epoch), FetchOutcome::Stale);
        assert_eq!(cache.get_fresh(&tasks().all()), None);
    }

    #[test]
    fn test_fetch_outliving_patch_is_stored_stale() {
        let cache = ResponseCache::new(None);
        let epoch = cache.begin_fetch(&tasks().detail(1));
        cache.update(&tasks().detail(1), |v: &mut i32| {
            *v = 2;
            true
        });

        assert_eq!(cache.complete_fetch(tasks().detail(1), 1, epoch), FetchOutcome::Stale);
    }

    #[test]
    fn test_fetch_unaffected_by_other_namespaces() {
        let cache = ResponseCache::new(None);
        let epoch = cache.begin_fetch(&tasks().all());
        cache.mark_stale(&QueryKeys::new(ResourceKind::LEAVES).collections());

        assert_eq!(cache.complete_fetch(tasks().all(), 1, epoch), FetchOutcome::Fresh);
        assert_eq!(cache.get_fresh(&tasks().all()), Some(1));
    }

    #[test]
    fn test_fetch_outliving_clear_is_discarded() {
        let cache = ResponseCache::new(None);
        let epoch = cache.begin_fetch(&tasks().all());
        cache.clear();

        assert_eq!(cache.complete_fetch(tasks().all(), 1, epoch), FetchOutcome::Discarded);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_clear_drops_everything() {
        let cache = ResponseCache::new(None);
        cache.insert(tasks().all(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }
}
