//! Durable metadata store abstractions for LLKV primary-key tablets.
//!
//! The update subsystem keeps its versioned per-segment state (delete vectors
//! and delta column groups) in an ordered key-value metadata store. This crate
//! defines that store ([`kv::KvStore`] with atomic [`kv::WriteBatch`] commits),
//! the persisted value types, the key layout used to address them, and a small
//! filesystem seam for best-effort file cleanup.

pub mod constants;
pub mod del_vector;
pub mod delta_column_group;
pub mod fs;
pub mod kv;
pub mod tablet_meta;
pub mod types;

pub use del_vector::{DelVector, DelVectorPtr};
pub use delta_column_group::{DeltaColumnGroup, DeltaColumnGroupList, DeltaColumnGroupPtr};
pub use fs::{FileSystem, LocalFileSystem};
pub use kv::{BatchOp, KvStore, WriteBatch};
pub use types::{RowsetId, SegmentId, TabletId, TabletSegmentId, Version};
