//! Primary-key update state for LLKV tablets.
//!
//! Segments of a primary-key tablet are immutable. Upserts and deletes are
//! expressed on top of them by three pieces of versioned state:
//!
//! - a per-tablet **primary index** mapping each key to its current row,
//! - per-segment **delete vectors** marking superseded rows as deleted,
//! - per-segment **delta column groups** overlaying partially updated columns.
//!
//! The [`UpdateManager`] caches all of it in front of the durable metadata
//! store (`llkv_storage::KvStore`), bounded by a [`MemTracker`] hierarchy, and
//! runs the ingestion hooks and the apply step that keep it current.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use llkv_storage::kv::MemKvStore;
//! use llkv_update::{MemRowset, MemTablet, MemTracker, Tablet, UpdateConfig, UpdateManager};
//!
//! let process = MemTracker::root("process", None);
//! let mgr = UpdateManager::new(UpdateConfig::default(), &process);
//! let meta = MemKvStore::new();
//!
//! let tablet: Arc<dyn Tablet> = Arc::new(MemTablet::new(1, "/data/1"));
//! let v1 = MemRowset::new(1, 0).with_segment(vec![b"a".to_vec(), b"b".to_vec()]);
//! mgr.on_rowset_finished(&tablet, &v1).unwrap();
//! mgr.apply_rowset(&meta, tablet.as_ref(), &v1, 1).unwrap();
//!
//! // rewriting "a" deletes its old row in segment 0
//! let v2 = MemRowset::new(2, 1).with_segment(vec![b"a".to_vec()]);
//! mgr.apply_rowset(&meta, tablet.as_ref(), &v2, 2).unwrap();
//!
//! let dv = mgr.get_del_vec(&meta, llkv_storage::TabletSegmentId::new(1, 0), 2).unwrap();
//! assert!(dv.contains(0));
//! ```

pub mod apply;
pub mod config;
pub mod dcg_cache;
pub mod del_vec_cache;
pub mod dynamic_cache;
pub mod index_load_executor;
pub mod manager;
pub mod mem_tracker;
pub mod metrics;
pub mod pools;
pub mod primary_index;
pub mod tablet;
pub mod update_state;

pub use apply::ApplyStats;
pub use config::UpdateConfig;
pub use dcg_cache::{DcgGcStats, DeltaColumnGroupCache};
pub use del_vec_cache::DelVecCache;
pub use dynamic_cache::{CacheHandle, DynamicCache};
pub use index_load_executor::IndexLoadExecutor;
pub use manager::{UpdateManager, format_bytes};
pub use mem_tracker::{MemReservation, MemTracker};
pub use metrics::{UpdateMetrics, UpdateMetricsSnapshot};
pub use pools::WorkerPool;
pub use primary_index::{IndexCache, PrimaryIndex};
pub use tablet::{
    MemRowset, MemTablet, PartialUpdateMode, PrimaryKey, RowLocation, Rowset, Tablet, TabletState,
};
pub use update_state::{ApplyStateKey, RowsetColumnUpdateState, RowsetUpdateState};
