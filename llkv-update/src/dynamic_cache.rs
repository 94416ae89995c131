//! Reference-counted LRU cache with per-entry sizes and expiry.
//!
//! Entries live in an arena (`Vec<Option<Slot>>` plus a free list) and are
//! threaded on an intrusive doubly linked LRU list by slot index, so moving an
//! entry to the front or unlinking it never allocates. The key index is an
//! `FxHashMap<K, usize>` into the arena.
//!
//! Every lookup hands out a [`CacheHandle`] that pins the entry. A pinned
//! entry is never evicted, expired or cleared; it can only be removed through
//! its own handle. The handle ends its reference exactly once: explicitly via
//! [`CacheHandle::release`] / [`CacheHandle::remove`], or implicitly on drop.
//!
//! Entry sizes are set by the owner through
//! [`DynamicCache::update_object_size`] and, when the cache has a
//! [`MemTracker`], are charged to it through a per-entry reservation.

use crate::mem_tracker::{MemReservation, MemTracker};
use rustc_hash::FxHashMap;
use std::fmt;
use std::hash::Hash;
use std::ops::Deref;
use std::sync::{Arc, Mutex};
use std::time::Instant;

struct Slot<K, V> {
    key: K,
    value: Arc<V>,
    /// Distinguishes this entry from a later one reusing the key.
    serial: u64,
    refs: u32,
    size: usize,
    charge: Option<MemReservation>,
    expire_at: Instant,
    prev: Option<usize>,
    next: Option<usize>,
}

struct Inner<K, V> {
    slots: Vec<Option<Slot<K, V>>>,
    free: Vec<usize>,
    index: FxHashMap<K, usize>,
    /// Most recently used.
    head: Option<usize>,
    /// Least recently used.
    tail: Option<usize>,
    size: usize,
    capacity: usize,
    next_serial: u64,
}

impl<K, V> Inner<K, V>
where
    K: Eq + Hash + Clone,
{
    fn slot(&self, idx: usize) -> &Slot<K, V> {
        self.slots[idx].as_ref().expect("linked slot is occupied")
    }

    fn slot_mut(&mut self, idx: usize) -> &mut Slot<K, V> {
        self.slots[idx].as_mut().expect("linked slot is occupied")
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = {
            let s = self.slot(idx);
            (s.prev, s.next)
        };
        match prev {
            Some(p) => self.slot_mut(p).next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.slot_mut(n).prev = prev,
            None => self.tail = prev,
        }
        let s = self.slot_mut(idx);
        s.prev = None;
        s.next = None;
    }

    fn push_front(&mut self, idx: usize) {
        let old_head = self.head;
        {
            let s = self.slot_mut(idx);
            s.prev = None;
            s.next = old_head;
        }
        if let Some(h) = old_head {
            self.slot_mut(h).prev = Some(idx);
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }

    fn touch(&mut self, idx: usize) {
        if self.head != Some(idx) {
            self.unlink(idx);
            self.push_front(idx);
        }
    }

    fn insert(&mut self, key: K, value: Arc<V>, charge: Option<MemReservation>) -> usize {
        let serial = self.next_serial;
        self.next_serial += 1;
        let slot = Slot {
            key: key.clone(),
            value,
            serial,
            refs: 0,
            size: 0,
            charge,
            expire_at: Instant::now(),
            prev: None,
            next: None,
        };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(slot);
                idx
            }
            None => {
                self.slots.push(Some(slot));
                self.slots.len() - 1
            }
        };
        self.index.insert(key, idx);
        self.push_front(idx);
        idx
    }

    /// Unlink and take the slot out of the arena.
    fn take(&mut self, idx: usize) -> Slot<K, V> {
        self.unlink(idx);
        let slot = self.slots[idx].take().expect("linked slot is occupied");
        self.free.push(idx);
        self.index.remove(&slot.key);
        self.size -= slot.size;
        slot
    }

    /// Arena index of the live entry for `key` if its serial still matches.
    fn find(&self, key: &K, serial: u64) -> Option<usize> {
        let idx = *self.index.get(key)?;
        (self.slot(idx).serial == serial).then_some(idx)
    }

    /// Evict unpinned entries from the LRU end until `size <= target`.
    fn evict_to(&mut self, target: usize, evicted: &mut Vec<Slot<K, V>>) {
        let mut cursor = self.tail;
        while self.size > target {
            let Some(idx) = cursor else { break };
            let (refs, prev) = {
                let s = self.slot(idx);
                (s.refs, s.prev)
            };
            cursor = prev;
            if refs == 0 {
                evicted.push(self.take(idx));
            }
        }
    }

    fn remove_unpinned_where<F>(&mut self, mut pred: F, removed: &mut Vec<Slot<K, V>>)
    where
        F: FnMut(&Slot<K, V>) -> bool,
    {
        let mut cursor = self.tail;
        while let Some(idx) = cursor {
            let s = self.slot(idx);
            cursor = s.prev;
            if s.refs == 0 && pred(s) {
                removed.push(self.take(idx));
            }
        }
    }
}

pub struct DynamicCache<K, V> {
    name: String,
    inner: Mutex<Inner<K, V>>,
    tracker: Option<Arc<MemTracker>>,
}

impl<K, V> DynamicCache<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new(name: impl Into<String>, capacity: usize, tracker: Option<Arc<MemTracker>>) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(Inner {
                slots: Vec::new(),
                free: Vec::new(),
                index: FxHashMap::default(),
                head: None,
                tail: None,
                size: 0,
                capacity,
                next_serial: 0,
            }),
            tracker,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner<K, V>> {
        self.inner.lock().expect("dynamic cache lock poisoned")
    }

    fn pin<'a>(&'a self, inner: &mut Inner<K, V>, idx: usize) -> CacheHandle<'a, K, V> {
        inner.touch(idx);
        let slot = inner.slot_mut(idx);
        slot.refs += 1;
        CacheHandle {
            cache: self,
            key: slot.key.clone(),
            serial: slot.serial,
            value: Arc::clone(&slot.value),
            done: false,
        }
    }

    /// Pinned handle to `key`, if cached.
    pub fn get(&self, key: &K) -> Option<CacheHandle<'_, K, V>> {
        let mut inner = self.lock();
        let idx = *inner.index.get(key)?;
        Some(self.pin(&mut inner, idx))
    }

    /// Pinned handle to `key`, inserting `V::default()` first if absent.
    ///
    /// A new entry starts with size 0 and is already expired; callers set both
    /// once they have filled it.
    pub fn get_or_create(&self, key: K) -> CacheHandle<'_, K, V>
    where
        V: Default,
    {
        let mut inner = self.lock();
        let existing = inner.index.get(&key).copied();
        let idx = match existing {
            Some(idx) => idx,
            None => {
                let charge = self.tracker.as_ref().map(MemReservation::empty);
                inner.insert(key, Arc::new(V::default()), charge)
            }
        };
        self.pin(&mut inner, idx)
    }

    fn release_ref(&self, key: &K, serial: u64) {
        let mut evicted = Vec::new();
        {
            let mut inner = self.lock();
            let Some(idx) = inner.find(key, serial) else {
                return;
            };
            let slot = inner.slot_mut(idx);
            debug_assert!(slot.refs > 0, "cache {} released an unpinned entry", self.name);
            slot.refs = slot.refs.saturating_sub(1);
            if inner.size > inner.capacity {
                let capacity = inner.capacity;
                inner.evict_to(capacity, &mut evicted);
            }
        }
        drop(evicted);
    }

    fn remove_entry(&self, key: &K, serial: u64) {
        let removed = {
            let mut inner = self.lock();
            inner.find(key, serial).map(|idx| inner.take(idx))
        };
        drop(removed);
    }

    /// Set the size charged for the entry behind `handle`.
    pub fn update_object_size(&self, handle: &CacheHandle<'_, K, V>, bytes: usize) {
        let mut inner = self.lock();
        let Some(idx) = inner.find(&handle.key, handle.serial) else {
            return;
        };
        let old = inner.slot(idx).size;
        inner.size = inner.size - old + bytes;
        let slot = inner.slot_mut(idx);
        slot.size = bytes;
        if let Some(charge) = slot.charge.as_mut() {
            charge.resize(bytes);
        }
    }

    /// Set when the entry behind `handle` becomes eligible for
    /// [`Self::clear_expired`].
    pub fn update_expire_time(&self, handle: &CacheHandle<'_, K, V>, deadline: Instant) {
        let mut inner = self.lock();
        if let Some(idx) = inner.find(&handle.key, handle.serial) {
            inner.slot_mut(idx).expire_at = deadline;
        }
    }

    /// Evict unpinned entries, least recently used first, until the total size
    /// is `<= target`. Returns whether the target was reached.
    pub fn try_evict(&self, target: usize) -> bool {
        let mut evicted = Vec::new();
        let reached = {
            let mut inner = self.lock();
            inner.evict_to(target, &mut evicted);
            inner.size <= target
        };
        drop(evicted);
        reached
    }

    /// Remove unpinned entries whose expiry has passed. Returns how many.
    pub fn clear_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = Vec::new();
        self.lock()
            .remove_unpinned_where(|s| s.expire_at <= now, &mut removed);
        removed.len()
    }

    /// Remove every unpinned entry.
    pub fn clear(&self) -> usize {
        let mut removed = Vec::new();
        self.lock().remove_unpinned_where(|_| true, &mut removed);
        removed.len()
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity
    }

    /// Change the capacity, evicting down to it if needed.
    pub fn set_capacity(&self, capacity: usize) {
        let mut evicted = Vec::new();
        {
            let mut inner = self.lock();
            inner.capacity = capacity;
            inner.evict_to(capacity, &mut evicted);
        }
        drop(evicted);
    }

    /// Sum of entry sizes.
    pub fn size(&self) -> usize {
        self.lock().size
    }

    pub fn len(&self) -> usize {
        self.lock().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn object_size(&self, key: &K) -> Option<usize> {
        let inner = self.lock();
        let idx = *inner.index.get(key)?;
        Some(inner.slot(idx).size)
    }

    /// Number of live handles pinning `key`.
    pub fn refcount(&self, key: &K) -> Option<u32> {
        let inner = self.lock();
        let idx = *inner.index.get(key)?;
        Some(inner.slot(idx).refs)
    }

    /// `(key, size)` of every entry, most recently used first.
    pub fn entry_sizes(&self) -> Vec<(K, usize)> {
        let inner = self.lock();
        let mut out = Vec::with_capacity(inner.index.len());
        let mut cursor = inner.head;
        while let Some(idx) = cursor {
            let s = inner.slot(idx);
            out.push((s.key.clone(), s.size));
            cursor = s.next;
        }
        out
    }
}

/// A pinned cache entry.
pub struct CacheHandle<'a, K, V>
where
    K: Eq + Hash + Clone,
{
    cache: &'a DynamicCache<K, V>,
    key: K,
    serial: u64,
    value: Arc<V>,
    done: bool,
}

impl<K, V> CacheHandle<'_, K, V>
where
    K: Eq + Hash + Clone,
{
    #[inline]
    pub fn key(&self) -> &K {
        &self.key
    }

    #[inline]
    pub fn value(&self) -> &Arc<V> {
        &self.value
    }

    /// Unpin the entry, leaving it cached.
    pub fn release(mut self) {
        self.done = true;
        self.cache.release_ref(&self.key, self.serial);
    }

    /// Drop the entry from the cache. Other handles keep their value alive.
    pub fn remove(mut self) {
        self.done = true;
        self.cache.remove_entry(&self.key, self.serial);
    }
}

impl<K, V> Deref for CacheHandle<'_, K, V>
where
    K: Eq + Hash + Clone,
{
    type Target = V;

    fn deref(&self) -> &V {
        &self.value
    }
}

impl<K, V> Drop for CacheHandle<'_, K, V>
where
    K: Eq + Hash + Clone,
{
    fn drop(&mut self) {
        if !self.done {
            self.cache.release_ref(&self.key, self.serial);
        }
    }
}

impl<K, V> fmt::Debug for CacheHandle<'_, K, V>
where
    K: Eq + Hash + Clone + fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheHandle")
            .field("cache", &self.cache.name)
            .field("key", &self.key)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    type Cache = DynamicCache<u64, Mutex<Vec<u8>>>;

    fn fill(cache: &Cache, key: u64, bytes: usize) {
        let h = cache.get_or_create(key);
        cache.update_object_size(&h, bytes);
        h.release();
    }

    #[test]
    fn get_or_create_returns_same_value() {
        let cache = Cache::new("t", 1000, None);
        {
            let h = cache.get_or_create(1);
            h.lock().unwrap().push(7);
        }
        let h = cache.get(&1).unwrap();
        assert_eq!(*h.lock().unwrap(), vec![7]);
        assert_eq!(cache.refcount(&1), Some(1));
        drop(h);
        assert_eq!(cache.refcount(&1), Some(0));
        assert!(cache.get(&2).is_none());
    }

    #[test]
    fn evicts_lru_unpinned_first() {
        let cache = Cache::new("t", 1000, None);
        fill(&cache, 1, 100);
        fill(&cache, 2, 100);
        fill(&cache, 3, 100);
        // touch 1 so 2 becomes the coldest
        cache.get(&1).unwrap().release();

        assert!(cache.try_evict(200));
        assert_eq!(cache.size(), 200);
        assert!(cache.get(&2).is_none());
        let keys: Vec<_> = cache.entry_sizes().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![1, 3]);
    }

    #[test]
    fn pinned_entries_survive_eviction_and_clear() {
        let cache = Cache::new("t", 1000, None);
        fill(&cache, 1, 100);
        let pinned = cache.get_or_create(2);
        cache.update_object_size(&pinned, 500);

        assert!(!cache.try_evict(0));
        assert_eq!(cache.size(), 500);
        assert_eq!(cache.clear(), 0);
        assert_eq!(cache.clear_expired(), 0);

        pinned.release();
        assert!(cache.try_evict(0));
        assert!(cache.is_empty());
    }

    #[test]
    fn remove_drops_entry_and_stale_handles_are_harmless() {
        let tracker = MemTracker::root("t", None);
        let cache = Cache::new("t", 1000, Some(Arc::clone(&tracker)));
        let a = cache.get_or_create(9);
        let b = cache.get(&9).unwrap();
        cache.update_object_size(&a, 64);
        assert_eq!(tracker.consumption(), 64);

        a.remove();
        assert!(cache.get(&9).is_none());
        assert_eq!(tracker.consumption(), 0);

        // a new entry under the same key is not affected by the old handle
        let c = cache.get_or_create(9);
        drop(b);
        assert_eq!(cache.refcount(&9), Some(1));
        c.release();
    }

    #[test]
    fn expiry_only_clears_due_entries() {
        let cache = Cache::new("t", 1000, None);
        let h = cache.get_or_create(1);
        cache.update_expire_time(&h, Instant::now() + Duration::from_secs(3600));
        h.release();
        fill(&cache, 2, 10);

        assert_eq!(cache.clear_expired(), 1);
        assert!(cache.get(&1).is_some());
        assert!(cache.get(&2).is_none());
    }

    #[test]
    fn shrinking_capacity_evicts() {
        let tracker = MemTracker::root("t", None);
        let cache = Cache::new("t", 1000, Some(Arc::clone(&tracker)));
        for k in 0..10 {
            fill(&cache, k, 50);
        }
        assert_eq!(tracker.consumption(), 500);
        cache.set_capacity(120);
        assert!(cache.size() <= 120);
        assert_eq!(tracker.consumption() as usize, cache.size());
        assert_eq!(cache.capacity(), 120);
    }

    #[test]
    fn release_over_capacity_evicts() {
        let cache = Cache::new("t", 150, None);
        fill(&cache, 1, 100);
        fill(&cache, 2, 100);
        assert!(cache.size() <= 150);
        assert_eq!(cache.object_size(&2), Some(100));
    }
}
