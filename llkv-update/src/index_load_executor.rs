//! Background loading of primary indexes with a bounded wait.
//!
//! Building an index scans every key of a tablet, which can take far longer
//! than an ingestion hook is willing to block. The executor runs the load on
//! its own pool and lets the caller wait up to a deadline; a load that misses
//! the deadline keeps running and lands in the cache for the next caller.

use crate::pools::WorkerPool;
use crate::primary_index::{IndexCache, get_loaded_index, index_expire};
use crate::tablet::Tablet;
use crossbeam_channel as xchan;
use llkv_result::{Error, Result};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

pub struct IndexLoadExecutor {
    index_cache: Arc<IndexCache>,
    default_expire: Duration,
    num_threads: usize,
    pool: OnceLock<WorkerPool>,
}

impl IndexLoadExecutor {
    pub fn new(index_cache: Arc<IndexCache>, default_expire: Duration, num_threads: usize) -> Self {
        Self {
            index_cache,
            default_expire,
            num_threads,
            pool: OnceLock::new(),
        }
    }

    /// Start the load pool. Calling it again is a no-op.
    pub fn init(&self) -> Result<()> {
        if self.pool.get().is_some() {
            return Ok(());
        }
        let pool = WorkerPool::new("pindex_load", self.num_threads)?;
        // a concurrent init may have won; its pool is equivalent
        let _ = self.pool.set(pool);
        Ok(())
    }

    pub fn shutdown(&self) {
        if let Some(pool) = self.pool.get() {
            pool.shutdown();
        }
    }

    /// Load `tablet`'s index into the cache, waiting at most `timeout`.
    ///
    /// Returns immediately if the index is already loaded.
    pub fn submit_task_and_wait_for(&self, tablet: Arc<dyn Tablet>, timeout: Duration) -> Result<()> {
        let tablet_id = tablet.tablet_id();
        if let Some(handle) = self.index_cache.get(&tablet_id)
            && handle.is_loaded()
        {
            return Ok(());
        }

        let pool = self
            .pool
            .get()
            .ok_or_else(|| Error::ServiceUnavailable("index load executor not started".into()))?;
        let (tx, rx) = xchan::bounded(1);
        let cache = Arc::clone(&self.index_cache);
        let expire = index_expire(tablet.as_ref(), self.default_expire);
        pool.submit(move || {
            let res = get_loaded_index(&cache, tablet.as_ref(), expire, None).map(|handle| handle.release());
            // the waiter may have given up
            let _ = tx.send(res);
        })?;

        match rx.recv_timeout(timeout) {
            Ok(res) => res,
            Err(xchan::RecvTimeoutError::Timeout) => {
                tracing::warn!("load primary index of tablet {} timed out after {:?}", tablet_id, timeout);
                Err(Error::Timeout(format!(
                    "load primary index of tablet {tablet_id} timed out after {timeout:?}"
                )))
            }
            Err(xchan::RecvTimeoutError::Disconnected) => Err(Error::Internal(format!(
                "index load task for tablet {tablet_id} dropped its result"
            ))),
        }
    }
}
