//! Named worker pools for apply and index work.

use llkv_result::{Error, Result};
use std::sync::{Arc, Condvar, Mutex, RwLock};

/// Jobs submitted but not yet finished.
#[derive(Default)]
struct InFlight {
    count: Mutex<usize>,
    idle: Condvar,
}

impl InFlight {
    fn begin(&self) {
        *self.count.lock().expect("in-flight counter poisoned") += 1;
    }

    fn finish(&self) {
        let mut count = self.count.lock().expect("in-flight counter poisoned");
        *count -= 1;
        if *count == 0 {
            self.idle.notify_all();
        }
    }

    fn wait_idle(&self) {
        let mut count = self.count.lock().expect("in-flight counter poisoned");
        while *count > 0 {
            count = self.idle.wait(count).expect("in-flight counter poisoned");
        }
    }
}

/// Marks one job finished when dropped, even if the job panicked.
struct JobDone(Arc<InFlight>);

impl Drop for JobDone {
    fn drop(&mut self) {
        self.0.finish();
    }
}

/// A named `rayon` pool that refuses work once shut down.
pub struct WorkerPool {
    name: String,
    num_threads: usize,
    pool: RwLock<Option<Arc<rayon::ThreadPool>>>,
    in_flight: Arc<InFlight>,
}

impl WorkerPool {
    pub fn new(name: impl Into<String>, num_threads: usize) -> Result<Self> {
        let name = name.into();
        let thread_prefix = name.clone();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads.max(1))
            .thread_name(move |i| format!("{thread_prefix}-{i}"))
            .build()
            .map_err(|e| Error::Internal(format!("failed to build pool {name}: {e}")))?;
        tracing::debug!("started pool {} with {} threads", name, pool.current_num_threads());
        Ok(Self {
            num_threads: pool.current_num_threads(),
            name,
            pool: RwLock::new(Some(Arc::new(pool))),
            in_flight: Arc::new(InFlight::default()),
        })
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    /// Run `job` on the pool. `ServiceUnavailable` after [`Self::shutdown`].
    pub fn submit<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let pool = self.pool.read().expect("worker pool lock poisoned");
        match pool.as_ref() {
            Some(pool) => {
                // counted before the read lock is released, so shutdown sees it
                self.in_flight.begin();
                let done = JobDone(Arc::clone(&self.in_flight));
                pool.spawn(move || {
                    let _done = done;
                    job();
                });
                Ok(())
            }
            None => Err(Error::ServiceUnavailable(format!(
                "pool {} is shut down",
                self.name
            ))),
        }
    }

    /// Stop accepting work and block until every submitted job has finished.
    /// Calling it again is a no-op. Must not be called from a job of this pool.
    pub fn shutdown(&self) {
        let pool = self.pool.write().expect("worker pool lock poisoned").take();
        self.in_flight.wait_idle();
        if pool.is_some() {
            tracing::debug!("shut down pool {}", self.name);
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.pool.read().expect("worker pool lock poisoned").is_none()
    }

    /// Jobs submitted and not yet finished.
    pub fn in_flight(&self) -> usize {
        *self.in_flight.count.lock().expect("in-flight counter poisoned")
    }
}
