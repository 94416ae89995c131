//! The ingestion pipeline's view of tablets and rowsets.
//!
//! The update manager never reads segment files itself. Everything it needs
//! from a tablet (identity, lifecycle state, where its files live, the keys to
//! rebuild a primary index from) and from a rowset (the keys it upserts and
//! deletes, its partial-update mode) comes through these traits.
//!
//! [`MemTablet`] and [`MemRowset`] are in-memory reference implementations,
//! in the same spirit as `MemKvStore`.

use llkv_result::{Error, Result};
use llkv_storage::{RowsetId, SegmentId, TabletId};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::Duration;

/// Encoded primary key.
pub type PrimaryKey = Vec<u8>;

/// Physical location of a row: the rowset segment holding it and its ordinal
/// inside that segment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RowLocation {
    pub rssid: SegmentId,
    pub ordinal: u32,
}

impl RowLocation {
    #[inline]
    pub const fn new(rssid: SegmentId, ordinal: u32) -> Self {
        Self { rssid, ordinal }
    }

    /// Location of the `row`-th row of segment `rssid`.
    pub fn from_row(rssid: SegmentId, row: usize) -> Result<Self> {
        Ok(Self::new(rssid, row_ordinal(row)?))
    }
}

/// Segment row position as an ordinal. Segments never hold more than
/// `u32::MAX` rows, so anything larger is corrupt input.
pub fn row_ordinal(row: usize) -> Result<u32> {
    u32::try_from(row).map_err(|_| Error::corruption(format!("row {row} exceeds segment ordinal range")))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TabletState {
    /// Mid schema change; ingestion hooks skip it.
    NotReady,
    Running,
    Shutdown,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PartialUpdateMode {
    #[default]
    None,
    /// Missing columns are filled by reading the old row.
    Row,
    /// Updated columns are written as delta column groups.
    Column,
}

impl PartialUpdateMode {
    #[inline]
    pub fn is_partial(self) -> bool {
        !matches!(self, PartialUpdateMode::None)
    }
}

pub trait Tablet: Send + Sync {
    fn tablet_id(&self) -> TabletId;

    fn state(&self) -> TabletState;

    /// Primary index expiry override in seconds; 0 defers to the global setting.
    fn index_cache_expire_sec(&self) -> u32 {
        0
    }

    /// Root directory of the tablet's files.
    fn tablet_path(&self) -> &Path;

    /// Every live primary key with its current location. Used to build the
    /// primary index.
    fn scan_primary_keys(&self) -> Result<Vec<(PrimaryKey, RowLocation)>>;
}

pub trait Rowset: Send + Sync {
    fn rowset_id(&self) -> RowsetId;

    /// Rowset segment id of the first segment; segment `i` is `rowset_seg_id + i`.
    fn rowset_seg_id(&self) -> SegmentId;

    fn num_segments(&self) -> usize;

    /// False for rowsets that carry neither segments nor delete files.
    fn has_data_files(&self) -> bool;

    fn partial_update(&self) -> PartialUpdateMode {
        PartialUpdateMode::None
    }

    /// Column ids written by a partial update.
    fn partial_update_columns(&self) -> &[u32] {
        &[]
    }

    /// Keys written by segment `segment`, in row order.
    fn segment_upsert_keys(&self, segment: usize) -> Result<Vec<PrimaryKey>>;

    /// Keys deleted by the rowset.
    fn delete_keys(&self) -> Result<Vec<PrimaryKey>>;
}

/// In-memory tablet backed by a list of `(key, location)` pairs.
pub struct MemTablet {
    tablet_id: TabletId,
    path: PathBuf,
    state: RwLock<TabletState>,
    index_expire_sec: AtomicU32,
    rows: RwLock<Vec<(PrimaryKey, RowLocation)>>,
    scan_delay: Mutex<Option<Duration>>,
    fail_scans: AtomicBool,
    scans: AtomicUsize,
}

impl MemTablet {
    pub fn new(tablet_id: TabletId, path: impl Into<PathBuf>) -> Self {
        Self {
            tablet_id,
            path: path.into(),
            state: RwLock::new(TabletState::Running),
            index_expire_sec: AtomicU32::new(0),
            rows: RwLock::new(Vec::new()),
            scan_delay: Mutex::new(None),
            fail_scans: AtomicBool::new(false),
            scans: AtomicUsize::new(0),
        }
    }

    pub fn with_rows<I>(self, rows: I) -> Self
    where
        I: IntoIterator<Item = (PrimaryKey, RowLocation)>,
    {
        self.rows.write().expect("tablet rows lock poisoned").extend(rows);
        self
    }

    pub fn set_state(&self, state: TabletState) {
        *self.state.write().expect("tablet state lock poisoned") = state;
    }

    pub fn set_index_cache_expire_sec(&self, secs: u32) {
        self.index_expire_sec.store(secs, Ordering::Relaxed);
    }

    /// Make every primary key scan sleep for `delay` first.
    pub fn set_scan_delay(&self, delay: Option<Duration>) {
        *self.scan_delay.lock().expect("tablet scan delay lock poisoned") = delay;
    }

    pub fn inject_scan_failure(&self, fail: bool) {
        self.fail_scans.store(fail, Ordering::Relaxed);
    }

    /// Number of primary key scans served so far.
    pub fn scan_count(&self) -> usize {
        self.scans.load(Ordering::Relaxed)
    }
}

impl Tablet for MemTablet {
    fn tablet_id(&self) -> TabletId {
        self.tablet_id
    }

    fn state(&self) -> TabletState {
        *self.state.read().expect("tablet state lock poisoned")
    }

    fn index_cache_expire_sec(&self) -> u32 {
        self.index_expire_sec.load(Ordering::Relaxed)
    }

    fn tablet_path(&self) -> &Path {
        &self.path
    }

    fn scan_primary_keys(&self) -> Result<Vec<(PrimaryKey, RowLocation)>> {
        self.scans.fetch_add(1, Ordering::Relaxed);
        let delay = *self.scan_delay.lock().expect("tablet scan delay lock poisoned");
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        if self.fail_scans.load(Ordering::Relaxed) {
            return Err(Error::Io(std::io::Error::other("injected scan failure")));
        }
        Ok(self.rows.read().expect("tablet rows lock poisoned").clone())
    }
}

/// In-memory rowset: one key list per segment plus a delete list.
#[derive(Clone, Debug, Default)]
pub struct MemRowset {
    rowset_id: RowsetId,
    rowset_seg_id: SegmentId,
    segments: Vec<Vec<PrimaryKey>>,
    deletes: Vec<PrimaryKey>,
    mode: PartialUpdateMode,
    columns: Vec<u32>,
}

impl MemRowset {
    pub fn new(rowset_id: RowsetId, rowset_seg_id: SegmentId) -> Self {
        Self {
            rowset_id,
            rowset_seg_id,
            ..Default::default()
        }
    }

    pub fn with_segment(mut self, keys: Vec<PrimaryKey>) -> Self {
        self.segments.push(keys);
        self
    }

    pub fn with_deletes(mut self, keys: Vec<PrimaryKey>) -> Self {
        self.deletes = keys;
        self
    }

    pub fn with_partial_update(mut self, mode: PartialUpdateMode, columns: Vec<u32>) -> Self {
        self.mode = mode;
        self.columns = columns;
        self
    }
}

impl Rowset for MemRowset {
    fn rowset_id(&self) -> RowsetId {
        self.rowset_id
    }

    fn rowset_seg_id(&self) -> SegmentId {
        self.rowset_seg_id
    }

    fn num_segments(&self) -> usize {
        self.segments.len()
    }

    fn has_data_files(&self) -> bool {
        !self.segments.is_empty() || !self.deletes.is_empty()
    }

    fn partial_update(&self) -> PartialUpdateMode {
        self.mode
    }

    fn partial_update_columns(&self) -> &[u32] {
        &self.columns
    }

    fn segment_upsert_keys(&self, segment: usize) -> Result<Vec<PrimaryKey>> {
        self.segments.get(segment).cloned().ok_or_else(|| {
            Error::InvalidArgumentError(format!(
                "rowset {} has {} segments, asked for {segment}",
                self.rowset_id,
                self.segments.len()
            ))
        })
    }

    fn delete_keys(&self) -> Result<Vec<PrimaryKey>> {
        Ok(self.deletes.clone())
    }
}
