//! The update manager: owner of every primary-key update cache.
//!
//! One manager serves all primary-key tablets of a process. It owns
//!
//! - the memory tracker subtree `update` with one child per cache, plus one
//!   for compaction state charged by the compaction layer,
//! - the delete vector and delta column group caches (read path),
//! - the apply-state caches filled by ingestion hooks,
//! - the primary index cache and its watermark eviction,
//! - the apply, index-read and index-load pools,
//! - the gauges and counters in [`UpdateMetrics`].
//!
//! Durable metadata is passed in per call rather than owned, so one manager
//! can front several metadata stores.

use crate::config::UpdateConfig;
use crate::dcg_cache::{DcgGcStats, DeltaColumnGroupCache};
use crate::del_vec_cache::DelVecCache;
use crate::dynamic_cache::{CacheHandle, DynamicCache};
use crate::index_load_executor::IndexLoadExecutor;
use crate::mem_tracker::MemTracker;
use crate::metrics::{UpdateMetrics, UpdateMetricsSnapshot};
use crate::pools::WorkerPool;
use crate::primary_index::{IndexCache, PrimaryIndex, get_loaded_index, index_expire};
use crate::tablet::{PartialUpdateMode, PrimaryKey, RowLocation, Rowset, Tablet, TabletState};
use crate::update_state::{ApplyStateKey, RowsetColumnUpdateState, RowsetUpdateState};
use crossbeam_channel as xchan;
use llkv_result::{Error, Result};
use llkv_storage::fs::FileSystem;
use llkv_storage::kv::KvStore;
use llkv_storage::tablet_meta;
use llkv_storage::{DelVectorPtr, DeltaColumnGroupList, DeltaColumnGroupPtr, TabletId, TabletSegmentId, Version};
use rustc_hash::FxHashMap;
use std::fmt::Write as _;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

/// Rows listed by [`UpdateManager::detail_memory_stats`].
const DETAIL_STATS_LIMIT: usize = 200;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Running,
    Stopped,
}

pub struct UpdateManager {
    pub(crate) config: UpdateConfig,

    update_mem_tracker: Arc<MemTracker>,
    update_state_mem_tracker: Arc<MemTracker>,
    index_cache_mem_tracker: Arc<MemTracker>,
    del_vec_cache_mem_tracker: Arc<MemTracker>,
    compaction_state_mem_tracker: Arc<MemTracker>,
    delta_column_group_cache_mem_tracker: Arc<MemTracker>,

    pub(crate) index_cache: Arc<IndexCache>,
    pub(crate) update_state_cache: DynamicCache<ApplyStateKey, RowsetUpdateState>,
    pub(crate) update_column_state_cache: DynamicCache<ApplyStateKey, RowsetColumnUpdateState>,
    pub(crate) del_vec_cache: DelVecCache,
    pub(crate) delta_column_group_cache: DeltaColumnGroupCache,

    /// One mutex per tablet; applies on a tablet run one at a time.
    apply_locks: Mutex<FxHashMap<TabletId, Arc<Mutex<()>>>>,
    pub(crate) apply_pool: OnceLock<WorkerPool>,
    index_read_pool: OnceLock<WorkerPool>,
    index_load_executor: IndexLoadExecutor,

    lifecycle: Mutex<Lifecycle>,
    keep_pindex_bf: AtomicBool,
    last_clear_expired: Mutex<Instant>,
    metrics: Arc<UpdateMetrics>,
}

impl UpdateManager {
    /// Build the tracker subtree under `process_tracker` and every cache.
    /// Pools are started by [`Self::init`].
    pub fn new(config: UpdateConfig, process_tracker: &Arc<MemTracker>) -> Self {
        let update_mem_tracker =
            MemTracker::child("update", Some(config.update_mem_limit()), process_tracker);
        let update_state_mem_tracker = MemTracker::child(
            "rowset_update_state",
            Some(config.preload_mem_limit()),
            &update_mem_tracker,
        );
        let index_cache_mem_tracker = MemTracker::child("index_cache", None, &update_mem_tracker);
        let del_vec_cache_mem_tracker = MemTracker::child("del_vec_cache", None, &update_mem_tracker);
        let compaction_state_mem_tracker = MemTracker::child("compaction_state", None, &update_mem_tracker);
        let delta_column_group_cache_mem_tracker =
            MemTracker::child("delta_column_group_cache", None, &update_mem_tracker);

        let index_cache = Arc::new(IndexCache::new(
            "primary_index",
            config.index_cache_capacity(),
            Some(Arc::clone(&index_cache_mem_tracker)),
        ));
        let index_load_executor = IndexLoadExecutor::new(
            Arc::clone(&index_cache),
            config.index_cache_expire(),
            config.index_load_worker_count,
        );
        let metrics = Arc::new(UpdateMetrics::default());

        Self {
            update_state_cache: DynamicCache::new(
                "rowset_update_state",
                usize::MAX,
                Some(Arc::clone(&update_state_mem_tracker)),
            ),
            update_column_state_cache: DynamicCache::new(
                "rowset_column_update_state",
                usize::MAX,
                Some(Arc::clone(&update_state_mem_tracker)),
            ),
            del_vec_cache: DelVecCache::new(Arc::clone(&del_vec_cache_mem_tracker)),
            delta_column_group_cache: DeltaColumnGroupCache::new(
                Arc::clone(&delta_column_group_cache_mem_tracker),
                config.dcg_gc_lock_budget,
                Arc::clone(&metrics),
            ),
            index_cache,
            index_load_executor,
            apply_locks: Mutex::new(FxHashMap::default()),
            apply_pool: OnceLock::new(),
            index_read_pool: OnceLock::new(),
            lifecycle: Mutex::new(Lifecycle::Created),
            keep_pindex_bf: AtomicBool::new(true),
            last_clear_expired: Mutex::new(Instant::now()),
            metrics,
            update_mem_tracker,
            update_state_mem_tracker,
            index_cache_mem_tracker,
            del_vec_cache_mem_tracker,
            compaction_state_mem_tracker,
            delta_column_group_cache_mem_tracker,
            config,
        }
    }

    /// Start the apply pool, the index-read pool and the index load executor.
    ///
    /// A second call while running is a no-op. A stopped manager cannot be
    /// restarted: `init` after [`Self::stop`] returns `ServiceUnavailable`.
    pub fn init(&self) -> Result<()> {
        self.config.validate()?;
        let mut lifecycle = self.lifecycle.lock().expect("update manager lifecycle lock poisoned");
        match *lifecycle {
            Lifecycle::Running => return Ok(()),
            Lifecycle::Stopped => {
                return Err(Error::ServiceUnavailable(
                    "update manager was stopped and cannot be restarted".into(),
                ));
            }
            Lifecycle::Created => {}
        }

        let apply_threads = self.config.apply_threads();
        let index_read_threads = self.config.index_read_threads();
        self.apply_pool
            .set(WorkerPool::new("update_apply", apply_threads)?)
            .map_err(|_| Error::Internal("apply pool started twice".into()))?;
        self.index_read_pool
            .set(WorkerPool::new("get_pindex", index_read_threads)?)
            .map_err(|_| Error::Internal("index-read pool started twice".into()))?;
        self.index_load_executor.init()?;
        *lifecycle = Lifecycle::Running;
        tracing::info!(
            "update manager started apply_threads:{} index_read_threads:{} index_cache_capacity:{}",
            apply_threads,
            index_read_threads,
            format_bytes(self.config.index_cache_capacity() as i64)
        );
        Ok(())
    }

    /// Shut down the index-read pool, then the apply pool, then the index load
    /// executor, waiting for the jobs each one is running. Safe to call more
    /// than once.
    pub fn stop(&self) {
        *self.lifecycle.lock().expect("update manager lifecycle lock poisoned") = Lifecycle::Stopped;
        if let Some(pool) = self.index_read_pool.get() {
            pool.shutdown();
        }
        if let Some(pool) = self.apply_pool.get() {
            pool.shutdown();
        }
        self.index_load_executor.shutdown();
    }

    #[inline]
    pub fn config(&self) -> &UpdateConfig {
        &self.config
    }

    #[inline]
    pub fn mem_tracker(&self) -> &Arc<MemTracker> {
        &self.update_mem_tracker
    }

    #[inline]
    pub fn update_state_mem_tracker(&self) -> &Arc<MemTracker> {
        &self.update_state_mem_tracker
    }

    #[inline]
    pub fn index_cache_mem_tracker(&self) -> &Arc<MemTracker> {
        &self.index_cache_mem_tracker
    }

    #[inline]
    pub fn del_vec_cache_mem_tracker(&self) -> &Arc<MemTracker> {
        &self.del_vec_cache_mem_tracker
    }

    /// Tracker the compaction layer charges its per-rowset state to.
    #[inline]
    pub fn compaction_state_mem_tracker(&self) -> &Arc<MemTracker> {
        &self.compaction_state_mem_tracker
    }

    #[inline]
    pub fn delta_column_group_cache_mem_tracker(&self) -> &Arc<MemTracker> {
        &self.delta_column_group_cache_mem_tracker
    }

    #[inline]
    pub fn index_cache(&self) -> &IndexCache {
        &self.index_cache
    }

    // ---- primary index ----

    /// Idle lifetime of `tablet`'s index entry.
    pub fn index_cache_expire(&self, tablet: &dyn Tablet) -> Duration {
        index_expire(tablet, self.config.index_cache_expire())
    }

    /// Pinned, loaded primary index of `tablet`. Gives up with `Timeout` when
    /// the index lock stays busy for longer than the configured wait.
    pub fn get_index(&self, tablet: &dyn Tablet) -> Result<CacheHandle<'_, TabletId, PrimaryIndex>> {
        get_loaded_index(
            &self.index_cache,
            tablet,
            self.index_cache_expire(tablet),
            Some(self.config.index_lock_timeout),
        )
    }

    /// Handles currently pinning `tablet_id`'s index; 0 if it is not cached.
    pub fn primary_index_refcnt(&self, tablet_id: TabletId) -> u32 {
        self.index_cache.refcount(&tablet_id).unwrap_or(0)
    }

    /// Look up `keys` in `tablet`'s index on the index-read pool.
    pub fn submit_index_lookup(
        self: &Arc<Self>,
        tablet: Arc<dyn Tablet>,
        keys: Vec<PrimaryKey>,
    ) -> Result<xchan::Receiver<Result<Vec<Option<RowLocation>>>>> {
        let pool = self
            .index_read_pool
            .get()
            .ok_or_else(|| Error::ServiceUnavailable("update manager not started".into()))?;
        let (tx, rx) = xchan::bounded(1);
        let this = Arc::clone(self);
        pool.submit(move || {
            let res: Result<Vec<Option<RowLocation>>> = this.get_index(tablet.as_ref()).and_then(|handle| {
                let index = handle.lock_timeout(this.config.index_lock_timeout)?;
                Ok(keys.iter().map(|k| index.get(k)).collect())
            });
            let _ = tx.send(res);
        })?;
        Ok(rx)
    }

    pub fn keep_pindex_bf(&self) -> bool {
        self.keep_pindex_bf.load(Ordering::Relaxed)
    }

    // ---- ingestion hooks ----

    /// Prepare apply state for a rowset whose ingestion just finished.
    ///
    /// Failing to prepare is not fatal for ingestion when the cause is memory
    /// pressure or a lock timeout: the apply step rebuilds the state.
    pub fn on_rowset_finished(&self, tablet: &Arc<dyn Tablet>, rowset: &dyn Rowset) -> Result<()> {
        if !rowset.has_data_files() || tablet.state() == TabletState::NotReady {
            return Ok(());
        }
        let key = ApplyStateKey::new(tablet.tablet_id(), rowset.rowset_id());
        tracing::debug!("on_rowset_finished start tablet:{} rowset:{}", key.tablet_id, key.rowset_id);

        let mode = rowset.partial_update();
        if mode.is_partial()
            && let Err(e) = self
                .index_load_executor
                .submit_task_and_wait_for(Arc::clone(tablet), self.config.pindex_load_wait)
        {
            return Err(Error::Uninitialized(e.to_string()));
        }

        let st = match mode {
            PartialUpdateMode::Column => self.prepare_column_state(key, tablet.as_ref(), rowset),
            _ => self.prepare_row_state(key, tablet.as_ref(), rowset),
        };

        if st.is_err() && tablet.state() == TabletState::Shutdown {
            tracing::warn!(
                "tablet {} in shutdown state, maybe deleted by other thread",
                key.tablet_id
            );
        }
        tracing::debug!("on_rowset_finished finish tablet:{} rowset:{}", key.tablet_id, key.rowset_id);

        match st {
            Err(e) if e.is_deferrable() => Ok(()),
            other => other,
        }
    }

    fn log_state_error(kind: &str, key: ApplyStateKey, e: &Error) {
        if e.is_deferrable() {
            tracing::debug!("load {kind} error: {e} tablet: {}", key.tablet_id);
        } else {
            tracing::warn!("load {kind} error: {e} tablet: {}", key.tablet_id);
        }
    }

    fn prepare_row_state(&self, key: ApplyStateKey, tablet: &dyn Tablet, rowset: &dyn Rowset) -> Result<()> {
        let index = match rowset.partial_update() {
            PartialUpdateMode::Row => Some(self.get_index(tablet)?),
            _ => None,
        };
        let entry = self.update_state_cache.get_or_create(key);
        let st = entry.load(
            tablet,
            rowset,
            index.as_deref(),
            &self.update_state_mem_tracker,
            self.config.index_lock_timeout,
        );
        self.update_state_cache
            .update_expire_time(&entry, Instant::now() + self.config.update_state_expire());
        self.update_state_cache
            .update_object_size(&entry, entry.memory_usage());
        match st {
            Ok(()) => {
                entry.release();
                Ok(())
            }
            Err(e) => {
                Self::log_state_error("RowsetUpdateState", key, &e);
                entry.remove();
                Err(e)
            }
        }
    }

    fn prepare_column_state(&self, key: ApplyStateKey, tablet: &dyn Tablet, rowset: &dyn Rowset) -> Result<()> {
        let index = self.get_index(tablet)?;
        let entry = self.update_column_state_cache.get_or_create(key);
        let st = entry.load(
            tablet,
            rowset,
            Some(&*index),
            &self.update_state_mem_tracker,
            self.config.index_lock_timeout,
        );
        self.update_column_state_cache
            .update_expire_time(&entry, Instant::now() + self.config.update_state_expire());
        self.update_column_state_cache
            .update_object_size(&entry, entry.memory_usage());
        match st {
            Ok(()) => {
                entry.release();
                Ok(())
            }
            Err(e) => {
                Self::log_state_error("RowsetColumnUpdateState", key, &e);
                entry.remove();
                Err(e)
            }
        }
    }

    /// Drop any apply state prepared for `rowset`.
    pub fn on_rowset_cancel(&self, tablet: &dyn Tablet, rowset: &dyn Rowset) {
        let key = ApplyStateKey::new(tablet.tablet_id(), rowset.rowset_id());
        tracing::debug!("on_rowset_cancel remove state tablet:{} rowset:{}", key.tablet_id, key.rowset_id);
        match rowset.partial_update() {
            PartialUpdateMode::Column => {
                if let Some(entry) = self.update_column_state_cache.get(&key) {
                    entry.remove();
                }
            }
            _ => {
                if let Some(entry) = self.update_state_cache.get(&key) {
                    entry.remove();
                }
            }
        }
    }

    /// Whether apply state for `rowset` is cached.
    pub fn update_state_exists(&self, tablet_id: TabletId, rowset: &dyn Rowset) -> bool {
        let key = ApplyStateKey::new(tablet_id, rowset.rowset_id());
        match rowset.partial_update() {
            PartialUpdateMode::Column => self.update_column_state_cache.get(&key).is_some(),
            _ => self.update_state_cache.get(&key).is_some(),
        }
    }

    /// Mutex serializing applies on `tablet_id`.
    pub(crate) fn tablet_apply_lock(&self, tablet_id: TabletId) -> Arc<Mutex<()>> {
        let mut locks = self.apply_locks.lock().expect("apply lock table poisoned");
        Arc::clone(locks.entry(tablet_id).or_default())
    }

    // ---- delete vectors ----

    pub fn get_del_vec<S>(&self, meta: &S, tsid: TabletSegmentId, version: Version) -> Result<DelVectorPtr>
    where
        S: KvStore + ?Sized,
    {
        self.del_vec_cache.get_del_vec(meta, tsid, version)
    }

    pub fn get_latest_del_vec<S>(&self, meta: &S, tsid: TabletSegmentId) -> Result<DelVectorPtr>
    where
        S: KvStore + ?Sized,
    {
        self.del_vec_cache.get_latest_del_vec(meta, tsid)
    }

    pub fn set_cached_del_vec(&self, tsid: TabletSegmentId, delvec: DelVectorPtr) -> Result<()> {
        self.del_vec_cache.set_cached_del_vec(tsid, delvec)
    }

    pub fn clear_cached_del_vec_by_tablet_id(&self, tablet_id: TabletId) {
        self.del_vec_cache.clear_by_tablet_id(tablet_id);
    }

    pub fn clear_cached_del_vec(&self, tsids: &[TabletSegmentId]) {
        self.del_vec_cache.clear(tsids);
    }

    // ---- delta column groups ----

    pub fn get_delta_column_group<S>(
        &self,
        meta: &S,
        tsid: TabletSegmentId,
        version: Version,
    ) -> Result<DeltaColumnGroupList>
    where
        S: KvStore + ?Sized,
    {
        self.delta_column_group_cache
            .get_delta_column_group(meta, tsid, version)
    }

    pub fn get_cached_delta_column_group(
        &self,
        tsid: TabletSegmentId,
        version: Version,
    ) -> Option<DeltaColumnGroupList> {
        self.delta_column_group_cache
            .get_cached_delta_column_group(tsid, version)
    }

    pub fn set_cached_delta_column_group<S>(
        &self,
        meta: &S,
        tsid: TabletSegmentId,
        dcg: DeltaColumnGroupPtr,
    ) -> Result<()>
    where
        S: KvStore + ?Sized,
    {
        self.delta_column_group_cache
            .set_cached_delta_column_group(meta, tsid, dcg)
    }

    pub fn set_cached_empty_delta_column_group<S>(&self, meta: &S, tsid: TabletSegmentId) -> Result<()>
    where
        S: KvStore + ?Sized,
    {
        self.delta_column_group_cache
            .set_cached_empty_delta_column_group(meta, tsid)
    }

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
        self.delta_column_group_cache
            .clear_delta_column_group_before_version(meta, fs, tablet_path, tablet_id, min_readable_version)
    }

    pub fn clear_cached_delta_column_group_by_tablet_id(&self, tablet_id: TabletId) {
        self.delta_column_group_cache.clear_by_tablet_id(tablet_id);
    }

    pub fn clear_cached_delta_column_group(&self, tsids: &[TabletSegmentId]) {
        self.delta_column_group_cache.clear(tsids);
    }

    // ---- lifecycle of cached state ----

    /// Forget a dropped tablet: delete its persisted delete vectors and delta
    /// column groups, then drop every cache entry for it.
    pub fn drop_tablet_state<S>(&self, meta: &S, tablet_id: TabletId) -> Result<usize>
    where
        S: KvStore + ?Sized,
    {
        let removed = tablet_meta::delete_tablet_meta(meta, tablet_id)?;
        self.clear_cached_del_vec_by_tablet_id(tablet_id);
        self.clear_cached_delta_column_group_by_tablet_id(tablet_id);
        if let Some(index) = self.index_cache.get(&tablet_id) {
            index.remove();
        }
        self.apply_locks
            .lock()
            .expect("apply lock table poisoned")
            .remove(&tablet_id);
        tracing::info!("dropped update state of tablet {} ({} metadata keys)", tablet_id, removed);
        Ok(removed)
    }

    /// Drop every unpinned cache entry.
    pub fn clear_cache(&self) {
        self.update_state_cache.clear();
        self.update_column_state_cache.clear();
        self.index_cache.clear();
        self.del_vec_cache.clear_all();
        self.delta_column_group_cache.clear_all();
        self.refresh_gauges();
    }

    /// Shrink the index cache under memory pressure.
    ///
    /// Levels are percentages of the cache capacity. Above the urgent level the
    /// cache is evicted down to it; if it is then still above the high level it
    /// is trimmed by a tenth, but not below the high level.
    pub fn evict_cache(&self, memory_urgent_level: i64, memory_high_level: i64) {
        let capacity = self.index_cache.capacity() as i128;
        let memory_urgent = (capacity * memory_urgent_level as i128 / 100).max(0) as usize;
        let memory_high = (capacity * memory_high_level as i128 / 100).max(0) as usize;

        if self.index_cache.size() > memory_urgent {
            self.index_cache.try_evict(memory_urgent);
        }

        let size = self.index_cache.size();
        if size > memory_high {
            let target = ((size as u128 * 9 / 10) as usize).max(memory_high);
            self.index_cache.try_evict(target);
        }
        let keep = self.index_cache.size() <= memory_high;
        self.keep_pindex_bf.store(keep, Ordering::Relaxed);
    }

    fn refresh_gauges(&self) {
        self.metrics
            .set_index_gauges(self.index_cache.len(), self.index_cache.size());
        self.metrics
            .set_del_vector_gauges(self.del_vec_cache.len(), self.del_vec_cache.memory_usage());
    }

    /// Refresh the cache gauges, then clear expired apply states and indexes
    /// at most once per index expiry interval. Returns whether a sweep ran.
    pub fn expire_cache(&self) -> bool {
        self.refresh_gauges();
        let interval = self.config.index_cache_expire();
        {
            let mut last = self
                .last_clear_expired
                .lock()
                .expect("expire clock lock poisoned");
            if last.elapsed() <= interval {
                return false;
            }
            *last = Instant::now();
        }

        self.update_state_cache.clear_expired();
        self.update_column_state_cache.clear_expired();

        let orig_size = self.index_cache.size();
        let orig_obj_size = self.index_cache.len();
        self.index_cache.clear_expired();
        let size = self.index_cache.size();
        let obj_size = self.index_cache.len();
        tracing::info!(
            "index cache expire: before:({} {}) after:({} {}) expire: ({} {})",
            orig_obj_size,
            format_bytes(orig_size as i64),
            obj_size,
            format_bytes(size as i64),
            orig_obj_size.saturating_sub(obj_size),
            format_bytes(orig_size.saturating_sub(size) as i64)
        );
        true
    }

    // ---- telemetry ----

    pub fn metrics(&self) -> UpdateMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn memory_stats(&self) -> String {
        format!(
            "index:{} rowset:{} compaction:{} delvec:{} dcg:{} total:{}/{}",
            format_bytes(self.index_cache_mem_tracker.consumption()),
            format_bytes(self.update_state_mem_tracker.consumption()),
            format_bytes(self.compaction_state_mem_tracker.consumption()),
            format_bytes(self.del_vec_cache_mem_tracker.consumption()),
            format_bytes(self.delta_column_group_cache_mem_tracker.consumption()),
            format_bytes(self.update_mem_tracker.consumption()),
            format_bytes(self.update_mem_tracker.limit().unwrap_or(-1)),
        )
    }

    fn sorted_index_sizes(&self) -> Vec<(TabletId, usize)> {
        let mut stats = self.index_cache.entry_sizes();
        stats.sort_by(|a, b| b.1.cmp(&a.1));
        stats
    }

    /// Per-tablet index sizes, largest first.
    pub fn detail_memory_stats(&self) -> String {
        let stats = self.sorted_index_sizes();
        let total: usize = stats.iter().map(|(_, size)| size).sum();
        let mut ret = String::new();
        let _ = writeln!(
            ret,
            "primary index stats: total:{} memory:{}\n  tabletid       memory",
            stats.len(),
            total
        );
        for (tablet_id, size) in stats.iter().take(DETAIL_STATS_LIMIT) {
            let _ = writeln!(ret, "{tablet_id:>10} {size:>12}");
        }
        ret
    }

    /// The `topn` largest indexes as `tablet(sizeM)`.
    pub fn topn_memory_stats(&self, topn: usize) -> String {
        let mut ret = String::new();
        for (tablet_id, size) in self.sorted_index_sizes().iter().take(topn) {
            let _ = write!(ret, "{}({}M)", tablet_id, size / (1024 * 1024));
        }
        ret
    }

    pub fn cache_stats(&self) -> String {
        format!(
            "index:{}/{} rowset_state:{} column_state:{} delvec:{} dcg:{} keep_pindex_bf:{}",
            self.index_cache.len(),
            format_bytes(self.index_cache.size() as i64),
            self.update_state_cache.len(),
            self.update_column_state_cache.len(),
            self.del_vec_cache.len(),
            self.delta_column_group_cache.len(),
            self.keep_pindex_bf()
        )
    }
}

/// Human-readable byte count, e.g. `512B`, `1.50KB`, `3.00GB`.
pub fn format_bytes(bytes: i64) -> String {
    const UNITS: [&str; 5] = ["KB", "MB", "GB", "TB", "PB"];
    if bytes.abs() < 1024 {
        return format!("{bytes}B");
    }
    let mut value = bytes as f64;
    let mut unit = "B";
    for u in UNITS {
        if value.abs() < 1024.0 {
            break;
        }
        value /= 1024.0;
        unit = u;
    }
    format!("{value:.2}{unit}")
}
