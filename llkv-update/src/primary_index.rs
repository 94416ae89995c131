//! Per-tablet primary key index: key -> current row location.
//!
//! An index starts empty and unloaded. The first user loads it from
//! [`Tablet::scan_primary_keys`]; afterwards the apply step keeps it current.
//! Indexes live in the [`IndexCache`] keyed by tablet id, so a loaded index is
//! shared by every reader until memory pressure or expiry evicts it.

use crate::dynamic_cache::{CacheHandle, DynamicCache};
use crate::tablet::{PrimaryKey, RowLocation, Tablet};
use llkv_result::{Error, Result};
use llkv_storage::TabletId;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, TryLockError};
use std::time::{Duration, Instant};

pub type IndexCache = DynamicCache<TabletId, PrimaryIndex>;

/// Bytes charged per index entry on top of the key bytes.
const ENTRY_OVERHEAD: usize = std::mem::size_of::<RowLocation>() + 32;

#[derive(Default)]
pub struct IndexState {
    loaded: bool,
    map: FxHashMap<PrimaryKey, RowLocation>,
    key_bytes: usize,
}

impl IndexState {
    #[inline]
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Build from the tablet if not already loaded.
    pub fn load(&mut self, tablet: &dyn Tablet) -> Result<()> {
        if self.loaded {
            return Ok(());
        }
        let rows = tablet.scan_primary_keys()?;
        self.map.clear();
        self.key_bytes = 0;
        self.map.reserve(rows.len());
        for (key, loc) in rows {
            self.upsert(key, loc);
        }
        self.loaded = true;
        tracing::debug!(
            "loaded primary index tablet:{} keys:{} bytes:{}",
            tablet.tablet_id(),
            self.map.len(),
            self.memory_usage()
        );
        Ok(())
    }

    pub fn get(&self, key: &[u8]) -> Option<RowLocation> {
        self.map.get(key).copied()
    }

    /// Point `key` at `loc`, returning the location it replaced.
    pub fn upsert(&mut self, key: PrimaryKey, loc: RowLocation) -> Option<RowLocation> {
        let len = key.len();
        let old = self.map.insert(key, loc);
        if old.is_none() {
            self.key_bytes += len;
        }
        old
    }

    /// Remove `key`, returning its last location.
    pub fn erase(&mut self, key: &[u8]) -> Option<RowLocation> {
        let old = self.map.remove(key);
        if old.is_some() {
            self.key_bytes -= key.len();
        }
        old
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn memory_usage(&self) -> usize {
        self.key_bytes + self.map.len() * ENTRY_OVERHEAD
    }
}

#[derive(Default)]
pub struct PrimaryIndex {
    state: Mutex<IndexState>,
    /// Mirrors `IndexState::is_loaded` so it can be read without the lock.
    loaded: AtomicBool,
}

impl PrimaryIndex {
    /// Block until the index lock is held.
    pub fn lock(&self) -> MutexGuard<'_, IndexState> {
        self.state.lock().expect("primary index lock poisoned")
    }

    /// Take the index lock, giving up with `Timeout` after `timeout`.
    pub fn lock_timeout(&self, timeout: Duration) -> Result<MutexGuard<'_, IndexState>> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.state.try_lock() {
                Ok(guard) => return Ok(guard),
                Err(TryLockError::Poisoned(e)) => {
                    return Err(Error::Internal(format!("primary index lock poisoned: {e}")));
                }
                Err(TryLockError::WouldBlock) => {
                    if Instant::now() >= deadline {
                        return Err(Error::Timeout(format!(
                            "primary index lock not acquired within {timeout:?}"
                        )));
                    }
                    std::thread::sleep(Duration::from_millis(1));
                }
            }
        }
    }

    /// Whether the index has been built. Never waits for the index lock.
    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    pub fn load(&self, tablet: &dyn Tablet) -> Result<()> {
        let mut state = self.lock();
        self.load_locked(&mut state, tablet)
    }

    fn load_locked(&self, state: &mut IndexState, tablet: &dyn Tablet) -> Result<()> {
        state.load(tablet)?;
        self.loaded.store(true, Ordering::Release);
        Ok(())
    }

    pub fn memory_usage(&self) -> usize {
        self.lock().memory_usage()
    }
}

/// Idle lifetime of `tablet`'s index: the tablet's own setting if it has
/// one, otherwise `default`.
pub fn index_expire(tablet: &dyn Tablet, default: Duration) -> Duration {
    match tablet.index_cache_expire_sec() {
        0 => default,
        secs => Duration::from_secs(secs as u64),
    }
}

/// Pinned, loaded index of `tablet`.
///
/// Creates the cache entry if needed, loads it on first use, and refreshes
/// its size and expiry. With a `lock_timeout` the index lock is waited for at
/// most that long and `Timeout` is returned instead. A failed load removes
/// the entry.
pub fn get_loaded_index<'a>(
    cache: &'a IndexCache,
    tablet: &dyn Tablet,
    expire: Duration,
    lock_timeout: Option<Duration>,
) -> Result<CacheHandle<'a, TabletId, PrimaryIndex>> {
    let handle = cache.get_or_create(tablet.tablet_id());
    let size = {
        let mut index = match lock_timeout {
            Some(timeout) => handle.lock_timeout(timeout)?,
            None => handle.lock(),
        };
        if let Err(e) = handle.load_locked(&mut index, tablet) {
            drop(index);
            tracing::warn!("load primary index failed tablet:{} {e}", tablet.tablet_id());
            handle.remove();
            return Err(e);
        }
        index.memory_usage()
    };
    cache.update_object_size(&handle, size);
    cache.update_expire_time(&handle, Instant::now() + expire);
    Ok(handle)
}
