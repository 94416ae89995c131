//! Apply: turn a committed rowset into index, delete vector and delta column
//! group changes at its commit version.
//!
//! The apply state prepared by [`UpdateManager::on_rowset_finished`] is used
//! when it is still cached; otherwise it is rebuilt here. Metadata for every
//! affected segment is written in one batch, and the caches are only updated
//! after that batch is durable. Applies on one tablet run one at a time, and
//! the tablet's index lock is held from the first index mutation until the
//! caches are updated.

use crate::manager::UpdateManager;
use crate::primary_index::IndexState;
use crate::tablet::{PartialUpdateMode, RowLocation, Rowset, Tablet, row_ordinal};
use crate::update_state::{ApplyStateKey, ColumnTargets, RowsetColumnUpdateState, RowsetUpdateState};
use crossbeam_channel as xchan;
use llkv_result::{Error, Result};
use llkv_storage::kv::{KvStore, WriteBatch};
use llkv_storage::tablet_meta;
use llkv_storage::{DeltaColumnGroup, SegmentId, TabletSegmentId, Version};
use std::collections::BTreeMap;
use std::sync::Arc;

/// What one apply changed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ApplyStats {
    pub upserts: usize,
    pub deletes: usize,
    /// Rows newly marked deleted across all segments.
    pub new_deletes: usize,
    /// Segments that got a new delete vector.
    pub delvec_segments: usize,
    /// Delta column groups written.
    pub delta_column_groups: usize,
    /// Whether the apply state had to be rebuilt.
    pub recomputed_state: bool,
}

impl UpdateManager {
    /// Apply `rowset` to `tablet` at `version`.
    pub fn apply_rowset<S>(
        &self,
        meta: &S,
        tablet: &dyn Tablet,
        rowset: &dyn Rowset,
        version: Version,
    ) -> Result<ApplyStats>
    where
        S: KvStore + ?Sized,
    {
        let key = ApplyStateKey::new(tablet.tablet_id(), rowset.rowset_id());
        tracing::debug!("apply rowset tablet:{} rowset:{} version:{}", key.tablet_id, key.rowset_id, version);
        let apply_lock = self.tablet_apply_lock(key.tablet_id);
        let _serial = apply_lock.lock().expect("tablet apply lock poisoned");
        let res = match rowset.partial_update() {
            PartialUpdateMode::Column => self.apply_column_mode(meta, key, tablet, rowset, version),
            _ => self.apply_row_mode(meta, key, tablet, rowset, version),
        };
        if let Err(e) = &res {
            tracing::warn!(
                "apply rowset failed tablet:{} rowset:{} version:{}: {e}",
                key.tablet_id,
                key.rowset_id,
                version
            );
        }
        res
    }

    /// Run [`Self::apply_rowset`] on the apply pool.
    pub fn submit_apply(
        self: &Arc<Self>,
        meta: Arc<dyn KvStore>,
        tablet: Arc<dyn Tablet>,
        rowset: Arc<dyn Rowset>,
        version: Version,
    ) -> Result<xchan::Receiver<Result<ApplyStats>>> {
        let pool = self
            .apply_pool
            .get()
            .ok_or_else(|| Error::ServiceUnavailable("update manager not started".into()))?;
        let (tx, rx) = xchan::bounded(1);
        let this = Arc::clone(self);
        pool.submit(move || {
            let res = this.apply_rowset(&*meta, &*tablet, &*rowset, version);
            let _ = tx.send(res);
        })?;
        Ok(rx)
    }

    fn apply_row_mode<S>(
        &self,
        meta: &S,
        key: ApplyStateKey,
        tablet: &dyn Tablet,
        rowset: &dyn Rowset,
        version: Version,
    ) -> Result<ApplyStats>
    where
        S: KvStore + ?Sized,
    {
        let index_entry = self.get_index(tablet)?;
        let state = self.update_state_cache.get_or_create(key);
        let mut stats = ApplyStats::default();
        if !state.is_loaded() {
            tracing::debug!("apply state of {} missing, recomputing", key);
            stats.recomputed_state = true;
            if let Err(e) = state.load(
                tablet,
                rowset,
                Some(&*index_entry),
                self.update_state_mem_tracker(),
                self.config.index_lock_timeout,
            ) {
                state.remove();
                return Err(e);
            }
        }

        // held until the new delete vectors are durable and cached
        let mut index = index_entry.lock_timeout(self.config.index_lock_timeout)?;
        if let Err(e) = self.write_row_changes(meta, key, &mut index, &state, version, &mut stats) {
            // the in-memory index may be ahead of durable state; rebuild it next time
            drop(index);
            index_entry.remove();
            state.remove();
            return Err(e);
        }
        let index_size = index.memory_usage();
        drop(index);

        self.index_cache.update_object_size(&index_entry, index_size);
        state.remove();
        Ok(stats)
    }

    /// Mutate the locked index, persist the resulting delete vectors in one
    /// batch, then install them in the cache.
    fn write_row_changes<S>(
        &self,
        meta: &S,
        key: ApplyStateKey,
        index: &mut IndexState,
        state: &RowsetUpdateState,
        version: Version,
        stats: &mut ApplyStats,
    ) -> Result<()>
    where
        S: KvStore + ?Sized,
    {
        let mut new_dels: BTreeMap<SegmentId, Vec<u32>> = BTreeMap::new();
        state.with_data(|data| -> Result<()> {
            for seg in &data.upserts {
                for (row, pk) in seg.keys.iter().enumerate() {
                    let loc = RowLocation::from_row(seg.rssid, row)?;
                    if let Some(old) = index.upsert(pk.clone(), loc) {
                        new_dels.entry(old.rssid).or_default().push(old.ordinal);
                    }
                    stats.upserts += 1;
                }
            }
            for pk in &data.deletes {
                if let Some(old) = index.erase(pk) {
                    new_dels.entry(old.rssid).or_default().push(old.ordinal);
                }
                stats.deletes += 1;
            }
            Ok(())
        })??;

        let mut batch = WriteBatch::new();
        let mut delvecs = Vec::with_capacity(new_dels.len());
        for (rssid, dels) in &new_dels {
            let tsid = TabletSegmentId::new(key.tablet_id, *rssid);
            let latest = self.get_latest_del_vec(meta, tsid)?;
            if latest.version() >= version {
                let msg = format!(
                    "apply {key}: delete vector {tsid} already at version {} >= {version}",
                    latest.version()
                );
                tracing::error!("{msg}");
                return Err(Error::Internal(msg));
            }
            let delvec = latest.add_dels_as_new_version(dels, version);
            stats.new_deletes += usize::try_from(delvec.cardinality() - latest.cardinality())
                .unwrap_or(usize::MAX);
            tablet_meta::put_del_vector(&mut batch, tsid.tablet_id, tsid.segment_id, &delvec)?;
            delvecs.push((tsid, Arc::new(delvec)));
        }

        if !batch.is_empty() {
            meta.write_batch(&batch)?;
        }
        for (tsid, delvec) in delvecs {
            self.set_cached_del_vec(tsid, delvec)?;
        }
        stats.delvec_segments = new_dels.len();
        Ok(())
    }

    fn apply_column_mode<S>(
        &self,
        meta: &S,
        key: ApplyStateKey,
        tablet: &dyn Tablet,
        rowset: &dyn Rowset,
        version: Version,
    ) -> Result<ApplyStats>
    where
        S: KvStore + ?Sized,
    {
        let index_entry = self.get_index(tablet)?;
        let state = self.update_column_state_cache.get_or_create(key);
        let mut stats = ApplyStats::default();
        if !state.is_loaded() {
            tracing::debug!("column apply state of {} missing, recomputing", key);
            stats.recomputed_state = true;
            if let Err(e) = state.load(
                tablet,
                rowset,
                Some(&*index_entry),
                self.update_state_mem_tracker(),
                self.config.index_lock_timeout,
            ) {
                state.remove();
                return Err(e);
            }
        }

        let mut index = index_entry.lock_timeout(self.config.index_lock_timeout)?;
        if let Err(e) = self.write_column_changes(meta, key, &mut index, &state, version, &mut stats) {
            drop(index);
            index_entry.remove();
            state.remove();
            return Err(e);
        }
        let index_size = index.memory_usage();
        drop(index);

        self.index_cache.update_object_size(&index_entry, index_size);
        state.remove();
        Ok(stats)
    }

    /// Resolve targets under the index lock, persist one delta column group
    /// per target segment, then install them in the cache.
    fn write_column_changes<S>(
        &self,
        meta: &S,
        key: ApplyStateKey,
        index: &mut IndexState,
        state: &RowsetColumnUpdateState,
        version: Version,
        stats: &mut ApplyStats,
    ) -> Result<()>
    where
        S: KvStore + ?Sized,
    {
        let (targets, column_ids, rowset_id) = state.with_data(|data| {
            ColumnTargets::resolve(&data.upserts, index)
                .map(|targets| (targets, data.column_ids.clone(), data.rowset_id))
        })??;

        let mut batch = WriteBatch::new();
        let mut dcgs = Vec::with_capacity(targets.updates.len());
        for (rssid, updates) in &targets.updates {
            let tsid = TabletSegmentId::new(key.tablet_id, *rssid);
            let dcg = DeltaColumnGroup::new(
                version,
                column_ids.clone(),
                format!("{rowset_id}_{rssid}_{version}.cols"),
                row_ordinal(updates.len())?,
            );
            tablet_meta::put_delta_column_group(&mut batch, tsid, &dcg);
            dcgs.push((tsid, Arc::new(dcg)));
            stats.upserts += updates.len();
        }
        for (pk, loc) in &targets.inserts {
            index.upsert(pk.clone(), *loc);
            stats.upserts += 1;
        }

        if !batch.is_empty() {
            meta.write_batch(&batch)?;
        }
        stats.delta_column_groups = dcgs.len();
        for (tsid, dcg) in dcgs {
            self.set_cached_delta_column_group(meta, tsid, dcg)?;
        }
        Ok(())
    }
}
