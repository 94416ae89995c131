use llkv_result::{Error, Result};
use std::time::Duration;

/// Run-time configuration for the update manager (no hidden constants).
#[derive(Debug, Clone)]
pub struct UpdateConfig {
    /// Process-wide memory limit in bytes. The index cache capacity and the
    /// update tracker limit are derived from it.
    pub process_mem_limit: i64,
    /// Share of `process_mem_limit` granted to primary-key update state, 0..=100.
    pub update_memory_limit_percent: i32,
    /// Share of the update limit that apply-state preloading may use, 0..=100.
    pub preload_memory_limit_percent: i32,
    /// Default lifetime of an idle primary index. Tablets may override it.
    pub index_cache_expire_sec: u32,
    /// Lifetime of an idle apply state after `on_rowset_finished`.
    pub update_state_expire_sec: u32,
    /// Upper bound of the apply pool; 0 means one thread per CPU.
    pub apply_worker_count: usize,
    /// Lower bound of the apply pool. Must not exceed a non-zero
    /// `apply_worker_count`.
    pub apply_min_worker_count: usize,
    /// Index-read pool size; 0 means twice the apply pool. Never smaller than
    /// the apply pool.
    pub index_read_worker_count: usize,
    /// Threads dedicated to loading primary indexes.
    pub index_load_worker_count: usize,
    /// How long `on_rowset_finished` waits for a partial-update preload.
    pub pindex_load_wait: Duration,
    /// How long apply-state loading waits for a tablet's index lock.
    pub index_lock_timeout: Duration,
    /// Lock-hold budget of one delta column group GC sweep.
    pub dcg_gc_lock_budget: Duration,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            process_mem_limit: 8 * 1024 * 1024 * 1024,
            update_memory_limit_percent: 60,
            preload_memory_limit_percent: 30,
            index_cache_expire_sec: 360,
            update_state_expire_sec: 360,
            apply_worker_count: 0,
            apply_min_worker_count: 0,
            index_read_worker_count: 0,
            index_load_worker_count: 4,
            pindex_load_wait: Duration::from_secs(30),
            index_lock_timeout: Duration::from_secs(1),
            dcg_gc_lock_budget: Duration::from_millis(10),
        }
    }
}

impl UpdateConfig {
    #[inline]
    fn clamp_percent(pct: i32) -> i64 {
        pct.clamp(0, 100) as i64
    }

    /// Byte limit of the `update` tracker. Saturates instead of overflowing
    /// for limits near `i64::MAX`.
    pub fn update_mem_limit(&self) -> i64 {
        self.process_mem_limit
            .saturating_mul(Self::clamp_percent(self.update_memory_limit_percent))
            / 100
    }

    /// Byte limit of the apply-state tracker.
    pub fn preload_mem_limit(&self) -> i64 {
        self.update_mem_limit()
            .saturating_mul(Self::clamp_percent(self.preload_memory_limit_percent))
            / 100
    }

    /// Reject settings the pools cannot be built from.
    pub fn validate(&self) -> Result<()> {
        if self.apply_worker_count > 0 && self.apply_min_worker_count > self.apply_worker_count {
            return Err(Error::InvalidArgumentError(format!(
                "apply_min_worker_count {} exceeds apply_worker_count {}",
                self.apply_min_worker_count, self.apply_worker_count
            )));
        }
        Ok(())
    }

    /// Capacity of the primary index cache in bytes.
    pub fn index_cache_capacity(&self) -> usize {
        self.update_mem_limit().max(0) as usize
    }

    pub fn index_cache_expire(&self) -> Duration {
        Duration::from_secs(self.index_cache_expire_sec as u64)
    }

    pub fn update_state_expire(&self) -> Duration {
        Duration::from_secs(self.update_state_expire_sec as u64)
    }

    /// Resolved apply pool size: the upper bound, raised to the lower bound
    /// when the CPU count falls below it. Pools are fixed-size, so they run at
    /// this size from start.
    pub fn apply_threads(&self) -> usize {
        let max = if self.apply_worker_count > 0 {
            self.apply_worker_count
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        };
        max.max(self.apply_min_worker_count)
    }

    /// Resolved index-read pool size.
    pub fn index_read_threads(&self) -> usize {
        let apply = self.apply_threads();
        if self.index_read_worker_count > apply {
            self.index_read_worker_count
        } else {
            apply * 2
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_derive_from_process_limit() {
        let cfg = UpdateConfig {
            process_mem_limit: 1000,
            update_memory_limit_percent: 50,
            preload_memory_limit_percent: 20,
            ..Default::default()
        };
        assert_eq!(cfg.update_mem_limit(), 500);
        assert_eq!(cfg.preload_mem_limit(), 100);
        assert_eq!(cfg.index_cache_capacity(), 500);
    }

    #[test]
    fn percentages_are_clamped() {
        let cfg = UpdateConfig {
            process_mem_limit: 1000,
            update_memory_limit_percent: 250,
            preload_memory_limit_percent: -5,
            ..Default::default()
        };
        assert_eq!(cfg.update_mem_limit(), 1000);
        assert_eq!(cfg.preload_mem_limit(), 0);
    }

    #[test]
    fn huge_process_limit_saturates() {
        let cfg = UpdateConfig {
            process_mem_limit: i64::MAX,
            update_memory_limit_percent: 60,
            preload_memory_limit_percent: 30,
            ..Default::default()
        };
        assert_eq!(cfg.update_mem_limit(), i64::MAX / 100);
        assert_eq!(cfg.preload_mem_limit(), i64::MAX / 100 * 30 / 100);
        assert!(cfg.index_cache_capacity() > 0);
    }

    #[test]
    fn min_apply_workers_must_not_exceed_max() {
        let cfg = UpdateConfig {
            apply_worker_count: 2,
            apply_min_worker_count: 3,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(Error::InvalidArgumentError(_))));

        let cfg = UpdateConfig {
            apply_worker_count: 4,
            apply_min_worker_count: 4,
            ..Default::default()
        };
        cfg.validate().unwrap();
        assert_eq!(cfg.apply_threads(), 4);
    }

    #[test]
    fn min_apply_workers_raise_cpu_default() {
        let cpus = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        let cfg = UpdateConfig {
            apply_min_worker_count: cpus + 3,
            ..Default::default()
        };
        cfg.validate().unwrap();
        assert_eq!(cfg.apply_threads(), cpus + 3);
    }

    #[test]
    fn index_read_pool_never_smaller_than_apply() {
        let cfg = UpdateConfig {
            apply_worker_count: 4,
            index_read_worker_count: 3,
            ..Default::default()
        };
        assert_eq!(cfg.index_read_threads(), 8);

        let cfg = UpdateConfig {
            apply_worker_count: 4,
            index_read_worker_count: 16,
            ..Default::default()
        };
        assert_eq!(cfg.index_read_threads(), 16);
    }
}
