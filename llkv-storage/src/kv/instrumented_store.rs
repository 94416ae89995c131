use crate::kv::{BatchOp, KvStore, WriteBatch};
use llkv_result::Result;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// A thread-safe container for metadata store I/O statistics.
#[derive(Debug, Default)]
pub struct IoStats {
    // --- Calls into the store ---
    pub scans: AtomicU64,
    pub write_batches: AtomicU64,

    // --- Individual items ---
    pub entries_scanned: AtomicU64,
    pub puts: AtomicU64,
    pub put_bytes: AtomicU64,
    pub deletes: AtomicU64,
}

impl IoStats {
    /// Capture a point-in-time snapshot of the accumulated metrics.
    pub fn snapshot(&self) -> IoStatsSnapshot {
        IoStatsSnapshot {
            scans: self.scans.load(Ordering::Relaxed),
            write_batches: self.write_batches.load(Ordering::Relaxed),
            entries_scanned: self.entries_scanned.load(Ordering::Relaxed),
            puts: self.puts.load(Ordering::Relaxed),
            put_bytes: self.put_bytes.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
        }
    }

    /// Reset all statistics to zero.
    pub fn reset(&self) {
        self.scans.store(0, Ordering::Relaxed);
        self.write_batches.store(0, Ordering::Relaxed);
        self.entries_scanned.store(0, Ordering::Relaxed);
        self.puts.store(0, Ordering::Relaxed);
        self.put_bytes.store(0, Ordering::Relaxed);
        self.deletes.store(0, Ordering::Relaxed);
    }
}

/// Immutable copy of [`IoStats`] counters captured at a specific moment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IoStatsSnapshot {
    pub scans: u64,
    pub write_batches: u64,
    pub entries_scanned: u64,
    pub puts: u64,
    pub put_bytes: u64,
    pub deletes: u64,
}

impl IoStatsSnapshot {
    /// Compute the delta between two snapshots (`newer - older`). Saturates at zero.
    pub fn delta_since(&self, older: &Self) -> Self {
        macro_rules! delta {
            ($field:ident) => {
                self.$field.saturating_sub(older.$field)
            };
        }

        Self {
            scans: delta!(scans),
            write_batches: delta!(write_batches),
            entries_scanned: delta!(entries_scanned),
            puts: delta!(puts),
            put_bytes: delta!(put_bytes),
            deletes: delta!(deletes),
        }
    }

    /// Total number of calls that reached the wrapped store.
    pub fn store_calls(&self) -> u64 {
        self.scans + self.write_batches
    }
}

/// A wrapper around any [`KvStore`] that counts the traffic reaching it.
#[derive(Debug)]
pub struct InstrumentedKvStore<S: KvStore> {
    inner: S,
    stats: Arc<IoStats>,
}

impl<S> InstrumentedKvStore<S>
where
    S: KvStore,
{
    /// Wraps a store and returns the instrumented version along with a handle
    /// to its statistics.
    pub fn new(inner: S) -> (Self, Arc<IoStats>) {
        let stats = Arc::new(IoStats::default());
        (
            Self {
                inner,
                stats: Arc::clone(&stats),
            },
            stats,
        )
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S> KvStore for InstrumentedKvStore<S>
where
    S: KvStore,
{
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.stats.scans.fetch_add(1, Ordering::Relaxed);
        let entries = self.inner.scan_prefix(prefix)?;
        self.stats
            .entries_scanned
            .fetch_add(entries.len() as u64, Ordering::Relaxed);
        Ok(entries)
    }

    fn write_batch(&self, batch: &WriteBatch) -> Result<()> {
        self.stats.write_batches.fetch_add(1, Ordering::Relaxed);
        for op in batch.ops() {
            match op {
                BatchOp::Put { bytes, .. } => {
                    self.stats.puts.fetch_add(1, Ordering::Relaxed);
                    self.stats
                        .put_bytes
                        .fetch_add(bytes.len() as u64, Ordering::Relaxed);
                }
                BatchOp::Delete { .. } => {
                    self.stats.deletes.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        self.inner.write_batch(batch)
    }
}
