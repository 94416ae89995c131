//! Apply state prepared for a rowset between ingestion and apply.
//!
//! Preparing a rowset for apply means reading its keys out of its segments
//! and, for partial updates, resolving where each key currently lives. That
//! work is done once when ingestion finishes and cached here, keyed by
//! [`ApplyStateKey`], so the apply step only has to mutate the index and write
//! metadata. If the state is evicted before apply, apply rebuilds it.
//!
//! Row-mode and column-mode partial updates need different artifacts and live
//! in separate caches.

use crate::mem_tracker::MemTracker;
use crate::primary_index::{IndexState, PrimaryIndex};
use crate::tablet::{PartialUpdateMode, PrimaryKey, RowLocation, Rowset, Tablet, row_ordinal};
use llkv_result::{Error, Result};
use llkv_storage::{RowsetId, SegmentId, TabletId};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Bytes charged per gathered key on top of the key bytes.
const KEY_OVERHEAD: usize = std::mem::size_of::<PrimaryKey>();

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ApplyStateKey {
    pub tablet_id: TabletId,
    pub rowset_id: RowsetId,
}

impl ApplyStateKey {
    pub fn new(tablet_id: TabletId, rowset_id: RowsetId) -> Self {
        Self {
            tablet_id,
            rowset_id,
        }
    }
}

impl fmt::Display for ApplyStateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.tablet_id, self.rowset_id)
    }
}

/// Keys written by one segment of a rowset.
#[derive(Clone, Debug, Default)]
pub struct SegmentUpserts {
    pub rssid: SegmentId,
    pub keys: Vec<PrimaryKey>,
}

fn keys_footprint(keys: &[PrimaryKey]) -> usize {
    keys.iter().map(|k| k.len() + KEY_OVERHEAD).sum()
}

fn gather_upserts(rowset: &dyn Rowset) -> Result<Vec<SegmentUpserts>> {
    let mut upserts = Vec::with_capacity(rowset.num_segments());
    for seg in 0..rowset.num_segments() {
        let rssid = rowset
            .rowset_seg_id()
            .checked_add(seg as SegmentId)
            .ok_or_else(|| Error::InvalidArgumentError(format!("rssid overflow at segment {seg}")))?;
        upserts.push(SegmentUpserts {
            rssid,
            keys: rowset.segment_upsert_keys(seg)?,
        });
    }
    Ok(upserts)
}

fn loaded_index<'a>(
    index: Option<&'a PrimaryIndex>,
    tablet: &dyn Tablet,
    lock_timeout: Duration,
) -> Result<MutexGuard<'a, IndexState>> {
    let index = index.ok_or_else(|| {
        Error::Uninitialized(format!("primary index of tablet {} not available", tablet.tablet_id()))
    })?;
    let guard = index.lock_timeout(lock_timeout)?;
    if !guard.is_loaded() {
        return Err(Error::Uninitialized(format!(
            "primary index of tablet {} not loaded",
            tablet.tablet_id()
        )));
    }
    Ok(guard)
}

#[derive(Debug, Default)]
pub struct RowUpdateData {
    pub tablet_id: TabletId,
    pub rowset_id: RowsetId,
    pub upserts: Vec<SegmentUpserts>,
    pub deletes: Vec<PrimaryKey>,
    /// Row-mode partial updates only: the current location of every upserted
    /// key, per segment, in key order. `None` for keys that are new.
    pub partial_old_locations: Vec<Vec<Option<RowLocation>>>,
    memory_usage: usize,
}

/// Row-mode apply state.
#[derive(Default)]
pub struct RowsetUpdateState {
    data: Mutex<Option<RowUpdateData>>,
}

impl RowsetUpdateState {
    fn lock(&self) -> MutexGuard<'_, Option<RowUpdateData>> {
        self.data.lock().expect("rowset update state lock poisoned")
    }

    /// Gather the rowset's keys. Idempotent once it has succeeded.
    pub fn load(
        &self,
        tablet: &dyn Tablet,
        rowset: &dyn Rowset,
        index: Option<&PrimaryIndex>,
        tracker: &MemTracker,
        lock_timeout: Duration,
    ) -> Result<()> {
        let mut data = self.lock();
        if data.is_some() {
            return Ok(());
        }

        let upserts = gather_upserts(rowset)?;
        let deletes = rowset.delete_keys()?;
        let mut memory_usage = keys_footprint(&deletes)
            + upserts.iter().map(|s| keys_footprint(&s.keys)).sum::<usize>();
        tracker.check_limit(memory_usage as i64)?;

        let mut partial_old_locations = Vec::new();
        if rowset.partial_update() == PartialUpdateMode::Row {
            let index = loaded_index(index, tablet, lock_timeout)?;
            for seg in &upserts {
                partial_old_locations.push(seg.keys.iter().map(|k| index.get(k)).collect::<Vec<_>>());
            }
            drop(index);
            memory_usage += partial_old_locations
                .iter()
                .map(|locs| locs.len() * std::mem::size_of::<Option<RowLocation>>())
                .sum::<usize>();
            tracker.check_limit(memory_usage as i64)?;
        }

        *data = Some(RowUpdateData {
            tablet_id: tablet.tablet_id(),
            rowset_id: rowset.rowset_id(),
            upserts,
            deletes,
            partial_old_locations,
            memory_usage,
        });
        Ok(())
    }

    pub fn is_loaded(&self) -> bool {
        self.lock().is_some()
    }

    pub fn memory_usage(&self) -> usize {
        self.lock().as_ref().map_or(0, |d| d.memory_usage)
    }

    /// Run `f` over the loaded data. `InvalidArgumentError` if not loaded.
    pub fn with_data<R>(&self, f: impl FnOnce(&RowUpdateData) -> R) -> Result<R> {
        let data = self.lock();
        let data = data
            .as_ref()
            .ok_or_else(|| Error::InvalidArgumentError("rowset update state not loaded".into()))?;
        Ok(f(data))
    }
}

/// One partial-column write into an existing row.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ColumnRowUpdate {
    /// Row being updated, in the target segment.
    pub ordinal: u32,
    /// Segment index inside the rowset that carries the new values.
    pub source_segment: u32,
    /// Row inside the source segment.
    pub source_row: u32,
}

/// Resolution of a column-mode rowset against an index.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ColumnTargets {
    /// Existing rows to update, grouped by the segment holding them.
    pub updates: BTreeMap<SegmentId, Vec<ColumnRowUpdate>>,
    /// Keys not present in the index; they become new rows.
    pub inserts: Vec<(PrimaryKey, RowLocation)>,
}

impl ColumnTargets {
    pub fn resolve(upserts: &[SegmentUpserts], index: &IndexState) -> Result<Self> {
        let mut targets = ColumnTargets::default();
        for (seg_idx, seg) in upserts.iter().enumerate() {
            let source_segment = row_ordinal(seg_idx)?;
            for (row, key) in seg.keys.iter().enumerate() {
                match index.get(key) {
                    Some(loc) => targets.updates.entry(loc.rssid).or_default().push(ColumnRowUpdate {
                        ordinal: loc.ordinal,
                        source_segment,
                        source_row: row_ordinal(row)?,
                    }),
                    None => targets
                        .inserts
                        .push((key.clone(), RowLocation::from_row(seg.rssid, row)?)),
                }
            }
        }
        Ok(targets)
    }

    pub fn update_count(&self) -> usize {
        self.updates.values().map(Vec::len).sum()
    }

    fn memory_usage(&self) -> usize {
        self.update_count() * std::mem::size_of::<ColumnRowUpdate>()
            + self
                .inserts
                .iter()
                .map(|(k, _)| k.len() + KEY_OVERHEAD + std::mem::size_of::<RowLocation>())
                .sum::<usize>()
    }
}

#[derive(Debug, Default)]
pub struct ColumnUpdateData {
    pub tablet_id: TabletId,
    pub rowset_id: RowsetId,
    pub column_ids: Vec<u32>,
    pub upserts: Vec<SegmentUpserts>,
    /// Resolution at load time. Apply resolves again under the index lock.
    pub targets: ColumnTargets,
    memory_usage: usize,
}

/// Column-mode apply state.
#[derive(Default)]
pub struct RowsetColumnUpdateState {
    data: Mutex<Option<ColumnUpdateData>>,
}

impl RowsetColumnUpdateState {
    fn lock(&self) -> MutexGuard<'_, Option<ColumnUpdateData>> {
        self.data.lock().expect("rowset column update state lock poisoned")
    }

    pub fn load(
        &self,
        tablet: &dyn Tablet,
        rowset: &dyn Rowset,
        index: Option<&PrimaryIndex>,
        tracker: &MemTracker,
        lock_timeout: Duration,
    ) -> Result<()> {
        let mut data = self.lock();
        if data.is_some() {
            return Ok(());
        }

        let upserts = gather_upserts(rowset)?;
        let key_bytes = upserts.iter().map(|s| keys_footprint(&s.keys)).sum::<usize>();
        tracker.check_limit(key_bytes as i64)?;

        let targets = {
            let index = loaded_index(index, tablet, lock_timeout)?;
            ColumnTargets::resolve(&upserts, &index)?
        };
        let memory_usage = key_bytes + targets.memory_usage();
        tracker.check_limit(memory_usage as i64)?;

        *data = Some(ColumnUpdateData {
            tablet_id: tablet.tablet_id(),
            rowset_id: rowset.rowset_id(),
            column_ids: rowset.partial_update_columns().to_vec(),
            upserts,
            targets,
            memory_usage,
        });
        Ok(())
    }

    pub fn is_loaded(&self) -> bool {
        self.lock().is_some()
    }

    pub fn memory_usage(&self) -> usize {
        self.lock().as_ref().map_or(0, |d| d.memory_usage)
    }

    pub fn with_data<R>(&self, f: impl FnOnce(&ColumnUpdateData) -> R) -> Result<R> {
        let data = self.lock();
        let data = data.as_ref().ok_or_else(|| {
            Error::InvalidArgumentError("rowset column update state not loaded".into())
        })?;
        Ok(f(data))
    }
}
