//! Delta column group cache.
//!
//! Maps each `(tablet, segment)` to its full list of delta column groups,
//! newest first, as persisted in the metadata store. Reads filter the cached
//! list by version. An empty list is a valid entry and means "known to have
//! no groups".
//!
//! Entries are kept in a `BTreeMap` so that a tablet's segments form one
//! contiguous range, which the GC sweep walks under a time budget.

use crate::mem_tracker::{MemReservation, MemTracker};
use crate::metrics::UpdateMetrics;
use llkv_result::{Error, Result};
use llkv_storage::delta_column_group::{self, garbage_collection, search_by_version};
use llkv_storage::fs::FileSystem;
use llkv_storage::kv::{KvStore, WriteBatch};
use llkv_storage::tablet_meta;
use llkv_storage::{DeltaColumnGroupList, DeltaColumnGroupPtr, TabletId, TabletSegmentId, Version};
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

struct CachedDcgs {
    list: DeltaColumnGroupList,
    charge: MemReservation,
}

impl CachedDcgs {
    fn refresh_charge(&mut self) {
        self.charge
            .resize(delta_column_group::list_memory_usage(&self.list));
    }
}

#[derive(Default)]
struct DcgState {
    entries: BTreeMap<TabletSegmentId, CachedDcgs>,
    /// Where each tablet's interrupted GC sweep resumes.
    gc_cursors: FxHashMap<TabletId, TabletSegmentId>,
}

/// Outcome of one [`DeltaColumnGroupCache::clear_delta_column_group_before_version`] call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DcgGcStats {
    /// Groups removed from the cache and the metadata store.
    pub cleared: usize,
    /// Files that could not be deleted.
    pub file_delete_failures: usize,
    /// False when the sweep ran out of budget before visiting every cached
    /// segment of the tablet; the next call resumes where it stopped.
    pub finished: bool,
}

pub struct DeltaColumnGroupCache {
    state: Mutex<DcgState>,
    tracker: Arc<MemTracker>,
    gc_budget: Duration,
    metrics: Arc<UpdateMetrics>,
}

impl DeltaColumnGroupCache {
    pub fn new(tracker: Arc<MemTracker>, gc_budget: Duration, metrics: Arc<UpdateMetrics>) -> Self {
        Self {
            state: Mutex::new(DcgState::default()),
            tracker,
            gc_budget,
            metrics,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DcgState> {
        self.state.lock().expect("delta column group cache lock poisoned")
    }

    fn cached(&self, list: DeltaColumnGroupList) -> CachedDcgs {
        let charge = self
            .tracker
            .reserve(delta_column_group::list_memory_usage(&list));
        CachedDcgs { list, charge }
    }

    /// Groups of `tsid` visible at `version`, newest first.
    pub fn get_delta_column_group<S>(
        &self,
        meta: &S,
        tsid: TabletSegmentId,
        version: Version,
    ) -> Result<DeltaColumnGroupList>
    where
        S: KvStore + ?Sized,
    {
        if let Some(dcgs) = self.get_cached_delta_column_group(tsid, version) {
            self.metrics.record_dcg_get(true);
            return Ok(dcgs);
        }
        self.metrics.record_dcg_get(false);
        let all = tablet_meta::get_delta_column_group(
            meta,
            tsid.tablet_id,
            tsid.segment_id,
            Version::MAX,
        )?;
        let visible = search_by_version(&all, version);
        let mut state = self.lock();
        if let Entry::Vacant(slot) = state.entries.entry(tsid) {
            slot.insert(self.cached(all));
        }
        Ok(visible)
    }

    /// Cache-only lookup.
    pub fn get_cached_delta_column_group(
        &self,
        tsid: TabletSegmentId,
        version: Version,
    ) -> Option<DeltaColumnGroupList> {
        let state = self.lock();
        let cached = state.entries.get(&tsid)?;
        tracing::trace!(
            "get_cached_delta_column_group hit tablet_segment={} version={}",
            tsid,
            version
        );
        Some(search_by_version(&cached.list, version))
    }

    /// Write-through after `dcg` has been persisted.
    ///
    /// On a hit the group is prepended; it must be newer than the cached head.
    /// On a miss the segment's full list is reloaded from the store.
    pub fn set_cached_delta_column_group<S>(
        &self,
        meta: &S,
        tsid: TabletSegmentId,
        dcg: DeltaColumnGroupPtr,
    ) -> Result<()>
    where
        S: KvStore + ?Sized,
    {
        {
            let mut state = self.lock();
            if let Some(cached) = state.entries.get_mut(&tsid) {
                if let Some(head) = cached.list.first()
                    && head.version() >= dcg.version()
                {
                    let msg = format!(
                        "set_cached_delta_column_group {tsid}: new version({}) <= cached version({})",
                        dcg.version(),
                        head.version()
                    );
                    tracing::error!("{msg}");
                    return Err(Error::Internal(msg));
                }
                cached.list.insert(0, dcg);
                cached.refresh_charge();
                return Ok(());
            }
        }

        let all = tablet_meta::get_delta_column_group(
            meta,
            tsid.tablet_id,
            tsid.segment_id,
            Version::MAX,
        )?;
        let entry = self.cached(all);
        self.lock().entries.insert(tsid, entry);
        Ok(())
    }

    /// Remember that `tsid` has no groups, if the store agrees.
    pub fn set_cached_empty_delta_column_group<S>(&self, meta: &S, tsid: TabletSegmentId) -> Result<()>
    where
        S: KvStore + ?Sized,
    {
        if self.lock().entries.contains_key(&tsid) {
            return Ok(());
        }
        let all = tablet_meta::get_delta_column_group(
            meta,
            tsid.tablet_id,
            tsid.segment_id,
            Version::MAX,
        )?;
        if !all.is_empty() {
            return Ok(());
        }
        let mut state = self.lock();
        if let Entry::Vacant(slot) = state.entries.entry(tsid) {
            slot.insert(self.cached(all));
        }
        Ok(())
    }

    /// Drop every cached group of `tablet_id` older than `min_readable_version`,
    /// delete their metadata in one batch, then delete their files.
    ///
    /// The cache lock is held for roughly the configured budget, and at least
    /// one segment is visited per call. A sweep that runs out of budget records
    /// where it stopped and reports `finished == false`; calling again for the
    /// same tablet resumes there.
    pub fn clear_delta_column_group_before_version<S, F>(
        &self,
        meta: &S,
        fs: &F,
        tablet_path: &Path,
        tablet_id: TabletId,
        min_readable_version: Version,
    ) -> Result<DcgGcStats>
    where
        S: KvStore + ?Sized,
        F: FileSystem + ?Sized,
    {
        let mut clear_dcgs: Vec<(TabletSegmentId, Version)> = Vec::new();
        let mut clear_files: Vec<PathBuf> = Vec::new();
        let started = Instant::now();
        let finished;
        {
            let mut state = self.lock();
            let start = state
                .gc_cursors
                .get(&tablet_id)
                .copied()
                .unwrap_or_else(|| TabletSegmentId::tablet_start(tablet_id));
            let range_end = Bound::Included(TabletSegmentId::new(tablet_id, u32::MAX));
            let mut next_cursor = None;
            let mut visited = 0usize;
            for (tsid, cached) in state
                .entries
                .range_mut((Bound::Included(start), range_end))
            {
                // always make progress, even on a zero budget
                if visited > 0 && started.elapsed() >= self.gc_budget {
                    next_cursor = Some(*tsid);
                    break;
                }
                visited += 1;
                let removed = garbage_collection(
                    &mut cached.list,
                    *tsid,
                    min_readable_version,
                    tablet_path,
                    &mut clear_dcgs,
                    &mut clear_files,
                );
                if removed > 0 {
                    cached.refresh_charge();
                }
            }
            finished = next_cursor.is_none();
            match next_cursor {
                Some(cursor) => {
                    state.gc_cursors.insert(tablet_id, cursor);
                }
                None => {
                    state.gc_cursors.remove(&tablet_id);
                }
            }
        }

        if !clear_dcgs.is_empty() {
            let mut batch = WriteBatch::new();
            for (tsid, version) in &clear_dcgs {
                tablet_meta::delete_delta_column_group(&mut batch, *tsid, *version);
            }
            if let Err(e) = meta.write_batch(&batch) {
                // the store still has these groups; make the next read reload them
                let mut state = self.lock();
                for (tsid, _) in &clear_dcgs {
                    state.entries.remove(tsid);
                }
                return Err(e);
            }
        }

        let mut file_delete_failures = 0;
        for path in &clear_files {
            if let Err(e) = fs.delete_file(path) {
                file_delete_failures += 1;
                tracing::warn!("delete file fail, filename: {}: {e}", path.display());
            }
        }

        if !clear_dcgs.is_empty() {
            tracing::debug!(
                "cleared {} delta column groups of tablet {} before version {} finished={}",
                clear_dcgs.len(),
                tablet_id,
                min_readable_version,
                finished
            );
        }
        Ok(DcgGcStats {
            cleared: clear_dcgs.len(),
            file_delete_failures,
            finished,
        })
    }

    pub fn clear_by_tablet_id(&self, tablet_id: TabletId) {
        let mut state = self.lock();
        state.entries.retain(|tsid, _| tsid.tablet_id != tablet_id);
        state.gc_cursors.remove(&tablet_id);
    }

    pub fn clear(&self, tsids: &[TabletSegmentId]) {
        let mut state = self.lock();
        for tsid in tsids {
            state.entries.remove(tsid);
        }
    }

    pub fn clear_all(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.gc_cursors.clear();
    }

    /// Number of cached segments.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn memory_usage(&self) -> usize {
        self.lock()
            .entries
            .values()
            .map(|cached| cached.charge.bytes())
            .sum()
    }
}
