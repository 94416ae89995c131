#![allow(dead_code)]

use llkv_storage::kv::{InstrumentedKvStore, IoStats, MemKvStore};
use llkv_update::{MemRowset, MemTablet, MemTracker, RowLocation, Tablet, UpdateConfig, UpdateManager};
use std::path::Path;
use std::sync::Arc;

pub type CountedStore = InstrumentedKvStore<Arc<MemKvStore>>;

/// Manager with a generous memory budget and small pools.
pub fn manager() -> Arc<UpdateManager> {
    manager_with(UpdateConfig::default())
}

pub fn manager_with(config: UpdateConfig) -> Arc<UpdateManager> {
    let process = MemTracker::root("process", None);
    let config = UpdateConfig {
        apply_worker_count: 2,
        index_load_worker_count: 2,
        ..config
    };
    Arc::new(UpdateManager::new(config, &process))
}

/// A metadata store plus a counting view over it. The raw store stays
/// reachable for fault injection.
pub fn counted_store() -> (Arc<MemKvStore>, CountedStore, Arc<IoStats>) {
    let raw = Arc::new(MemKvStore::new());
    let (counted, stats) = InstrumentedKvStore::new(Arc::clone(&raw));
    (raw, counted, stats)
}

pub fn key(i: usize) -> Vec<u8> {
    format!("k{i:05}").into_bytes()
}

pub fn keys(range: std::ops::Range<usize>) -> Vec<Vec<u8>> {
    range.map(key).collect()
}

/// Tablet whose segment 0 holds `rows` keys at ordinals `0..rows`.
pub fn tablet_with_rows(tablet_id: u64, path: impl AsRef<Path>, rows: usize) -> Arc<MemTablet> {
    Arc::new(
        MemTablet::new(tablet_id, path.as_ref())
            .with_rows((0..rows).map(|i| (key(i), RowLocation::new(0, i as u32)))),
    )
}

pub fn as_dyn(tablet: &Arc<MemTablet>) -> Arc<dyn Tablet> {
    Arc::clone(tablet) as Arc<dyn Tablet>
}

/// Single-segment rowset upserting `keys`.
pub fn upsert_rowset(rowset_id: u64, seg_id: u32, keys: Vec<Vec<u8>>) -> MemRowset {
    MemRowset::new(rowset_id, seg_id).with_segment(keys)
}
