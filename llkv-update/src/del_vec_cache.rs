//! Versioned delete-vector cache in front of the metadata store.
//!
//! One entry per `(tablet, segment)`. The cached vector only ever moves
//! forward in version, and it is only populated from a store read that
//! returned the store's latest version or from the apply path right after a
//! commit, so a cached version never exceeds what is durable.
//!
//! Store reads happen outside the cache lock. Two threads that miss on the
//! same key both load; whichever installs second only wins if it is strictly
//! newer.

use crate::mem_tracker::{MemReservation, MemTracker};
use llkv_result::{Error, Result};
use llkv_storage::kv::KvStore;
use llkv_storage::tablet_meta;
use llkv_storage::{DelVectorPtr, TabletId, TabletSegmentId, Version};
use rustc_hash::FxHashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, Mutex};

struct CachedDelVec {
    delvec: DelVectorPtr,
    charge: MemReservation,
}

pub struct DelVecCache {
    entries: Mutex<FxHashMap<TabletSegmentId, CachedDelVec>>,
    tracker: Arc<MemTracker>,
}

impl DelVecCache {
    pub fn new(tracker: Arc<MemTracker>) -> Self {
        Self {
            entries: Mutex::new(FxHashMap::default()),
            tracker,
        }
    }

    fn entry_for(&self, delvec: DelVectorPtr) -> CachedDelVec {
        let charge = self.tracker.reserve(delvec.memory_usage());
        CachedDelVec {
            delvec,
            charge,
        }
    }

    /// Delete vector to apply when reading `tsid` at `version`.
    ///
    /// A cached vector whose own version is `<= version` is returned without
    /// consulting the store. This is a bounded-staleness read: deletes
    /// committed between the cached version and `version` are only visible
    /// once the apply path installs them through [`Self::set_cached_del_vec`],
    /// which happens before the commit becomes readable.
    pub fn get_del_vec<S>(&self, meta: &S, tsid: TabletSegmentId, version: Version) -> Result<DelVectorPtr>
    where
        S: KvStore + ?Sized,
    {
        {
            let map = self.entries.lock().expect("del vec cache lock poisoned");
            if let Some(cached) = map.get(&tsid)
                && version >= cached.delvec.version()
            {
                tracing::trace!(
                    "get_del_vec cached tablet_segment={} version={} actual_version={}",
                    tsid,
                    version,
                    cached.delvec.version()
                );
                return Ok(Arc::clone(&cached.delvec));
            }
        }

        let (delvec, latest_version) =
            tablet_meta::get_del_vector(meta, tsid.tablet_id, tsid.segment_id, version)?;
        let delvec = Arc::new(delvec);
        if delvec.version() == latest_version {
            self.install_if_newer(tsid, Arc::clone(&delvec));
        }
        Ok(delvec)
    }

    /// Latest delete vector of `tsid`: the cached one, or a store load of the
    /// newest persisted version.
    pub fn get_latest_del_vec<S>(&self, meta: &S, tsid: TabletSegmentId) -> Result<DelVectorPtr>
    where
        S: KvStore + ?Sized,
    {
        if let Some(cached) = self.get_cached(tsid) {
            return Ok(cached);
        }
        let (delvec, _) =
            tablet_meta::get_del_vector(meta, tsid.tablet_id, tsid.segment_id, Version::MAX)?;
        Ok(self.install_if_newer(tsid, Arc::new(delvec)))
    }

    /// Install `delvec` unless an equal or newer version is already cached.
    /// Returns whichever vector is cached afterwards.
    fn install_if_newer(&self, tsid: TabletSegmentId, delvec: DelVectorPtr) -> DelVectorPtr {
        let mut map = self.entries.lock().expect("del vec cache lock poisoned");
        match map.entry(tsid) {
            Entry::Vacant(slot) => {
                slot.insert(self.entry_for(Arc::clone(&delvec)));
                delvec
            }
            Entry::Occupied(mut slot) => {
                if delvec.version() > slot.get().delvec.version() {
                    // should happen rarely: a concurrent apply raced this load
                    slot.insert(self.entry_for(Arc::clone(&delvec)));
                    delvec
                } else {
                    Arc::clone(&slot.get().delvec)
                }
            }
        }
    }

    /// Write-through after apply. Fails if `delvec` is not strictly newer than
    /// the cached vector.
    pub fn set_cached_del_vec(&self, tsid: TabletSegmentId, delvec: DelVectorPtr) -> Result<()> {
        tracing::debug!(
            "set_cached_del_vec tablet:{} rss:{} version:{} #del:{}",
            tsid.tablet_id,
            tsid.segment_id,
            delvec.version(),
            delvec.cardinality()
        );
        let mut map = self.entries.lock().expect("del vec cache lock poisoned");
        if let Some(cached) = map.get(&tsid)
            && delvec.version() <= cached.delvec.version()
        {
            let msg = format!(
                "set_cached_del_vec {tsid}: new version({}) <= old version({})",
                delvec.version(),
                cached.delvec.version()
            );
            tracing::error!("{msg}");
            return Err(Error::Internal(msg));
        }
        let entry = self.entry_for(delvec);
        map.insert(tsid, entry);
        Ok(())
    }

    pub fn get_cached(&self, tsid: TabletSegmentId) -> Option<DelVectorPtr> {
        let map = self.entries.lock().expect("del vec cache lock poisoned");
        map.get(&tsid).map(|cached| Arc::clone(&cached.delvec))
    }

    pub fn clear_by_tablet_id(&self, tablet_id: TabletId) {
        let mut map = self.entries.lock().expect("del vec cache lock poisoned");
        map.retain(|tsid, _| tsid.tablet_id != tablet_id);
    }

    pub fn clear(&self, tsids: &[TabletSegmentId]) {
        let mut map = self.entries.lock().expect("del vec cache lock poisoned");
        for tsid in tsids {
            map.remove(tsid);
        }
    }

    pub fn clear_all(&self) {
        self.entries
            .lock()
            .expect("del vec cache lock poisoned")
            .clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("del vec cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes currently charged for cached vectors.
    pub fn memory_usage(&self) -> usize {
        let map = self.entries.lock().expect("del vec cache lock poisoned");
        map.values().map(|cached| cached.charge.bytes()).sum()
    }
}
