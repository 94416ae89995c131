use std::sync::atomic::{AtomicU64, Ordering};

/// Gauges and counters published by the update manager.
///
/// Gauges are refreshed on every [`crate::UpdateManager::expire_cache`] call,
/// including the rate-limited ones. Counters only grow until [`Self::reset`].
#[derive(Debug, Default)]
pub struct UpdateMetrics {
    // --- Gauges ---
    pub primary_index_num: AtomicU64,
    pub primary_index_bytes_total: AtomicU64,
    pub del_vector_num: AtomicU64,
    pub del_vector_bytes_total: AtomicU64,

    // --- Counters ---
    pub delta_column_group_get_total: AtomicU64,
    pub delta_column_group_get_hit_cache: AtomicU64,
}

impl UpdateMetrics {
    /// Capture a point-in-time snapshot of every gauge and counter.
    pub fn snapshot(&self) -> UpdateMetricsSnapshot {
        UpdateMetricsSnapshot {
            primary_index_num: self.primary_index_num.load(Ordering::Relaxed),
            primary_index_bytes_total: self.primary_index_bytes_total.load(Ordering::Relaxed),
            del_vector_num: self.del_vector_num.load(Ordering::Relaxed),
            del_vector_bytes_total: self.del_vector_bytes_total.load(Ordering::Relaxed),
            delta_column_group_get_total: self.delta_column_group_get_total.load(Ordering::Relaxed),
            delta_column_group_get_hit_cache: self
                .delta_column_group_get_hit_cache
                .load(Ordering::Relaxed),
        }
    }

    pub(crate) fn set_index_gauges(&self, num: usize, bytes: usize) {
        self.primary_index_num.store(num as u64, Ordering::Relaxed);
        self.primary_index_bytes_total
            .store(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn set_del_vector_gauges(&self, num: usize, bytes: usize) {
        self.del_vector_num.store(num as u64, Ordering::Relaxed);
        self.del_vector_bytes_total
            .store(bytes as u64, Ordering::Relaxed);
    }

    /// Count one delta column group lookup.
    pub(crate) fn record_dcg_get(&self, hit: bool) {
        self.delta_column_group_get_total
            .fetch_add(1, Ordering::Relaxed);
        if hit {
            self.delta_column_group_get_hit_cache
                .fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Reset all gauges and counters to zero.
    pub fn reset(&self) {
        self.primary_index_num.store(0, Ordering::Relaxed);
        self.primary_index_bytes_total.store(0, Ordering::Relaxed);
        self.del_vector_num.store(0, Ordering::Relaxed);
        self.del_vector_bytes_total.store(0, Ordering::Relaxed);
        self.delta_column_group_get_total.store(0, Ordering::Relaxed);
        self.delta_column_group_get_hit_cache
            .store(0, Ordering::Relaxed);
    }
}

/// Immutable copy of [`UpdateMetrics`] captured at a specific moment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateMetricsSnapshot {
    pub primary_index_num: u64,
    pub primary_index_bytes_total: u64,
    pub del_vector_num: u64,
    pub del_vector_bytes_total: u64,
    pub delta_column_group_get_total: u64,
    pub delta_column_group_get_hit_cache: u64,
}

impl UpdateMetricsSnapshot {
    /// Counter growth between two snapshots (`newer - older`); gauges are
    /// taken from `self`.
    pub fn delta_since(&self, older: &Self) -> Self {
        Self {
            delta_column_group_get_total: self
                .delta_column_group_get_total
                .saturating_sub(older.delta_column_group_get_total),
            delta_column_group_get_hit_cache: self
                .delta_column_group_get_hit_cache
                .saturating_sub(older.delta_column_group_get_hit_cache),
            ..*self
        }
    }
}
