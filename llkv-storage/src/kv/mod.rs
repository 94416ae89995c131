//! Minimal ordered key-value store trait used for tablet metadata.
//!
//! Writes are grouped into a [`WriteBatch`] and committed atomically: either
//! every op in the batch becomes visible or none does. Readers get ordered
//! prefix scans, which is all the tablet metadata layout needs (one prefix per
//! tablet, one per segment).

use llkv_result::Result;
use std::sync::Arc;

pub mod instrumented_store;
pub use instrumented_store::*;

pub mod mem_store;
pub use mem_store::*;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BatchOp {
    Put { key: Vec<u8>, bytes: Vec<u8> },
    Delete { key: Vec<u8> },
}

impl BatchOp {
    #[inline]
    pub fn key(&self) -> &[u8] {
        match self {
            BatchOp::Put { key, .. } | BatchOp::Delete { key } => key,
        }
    }
}

/// Ordered list of puts/deletes committed as one unit.
#[derive(Clone, Debug, Default)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: Vec<u8>, bytes: Vec<u8>) {
        self.ops.push(BatchOp::Put { key, bytes });
    }

    pub fn delete(&mut self, key: Vec<u8>) {
        self.ops.push(BatchOp::Delete { key });
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    #[inline]
    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }
}

pub trait KvStore: Send + Sync {
    /// All entries whose key starts with `prefix`, in ascending key order.
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Atomically apply every op in `batch`, in order.
    fn write_batch(&self, batch: &WriteBatch) -> Result<()>;
}

impl<S> KvStore for Arc<S>
where
    S: KvStore + ?Sized,
{
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        (**self).scan_prefix(prefix)
    }

    fn write_batch(&self, batch: &WriteBatch) -> Result<()> {
        (**self).write_batch(batch)
    }
}
