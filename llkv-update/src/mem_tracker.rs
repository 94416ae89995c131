//! Hierarchical memory accounting.
//!
//! A [`MemTracker`] is an atomic byte counter with an optional limit and an
//! optional parent. Consuming bytes on a child also charges every ancestor, so
//! the root always reflects the total of its subtree and eviction can be driven
//! by overall pressure rather than one cache's local view.
//!
//! Raw `consume`/`release` calls must be paired by the caller. Code that ties a
//! charge to the lifetime of a structure should hold a [`MemReservation`]
//! instead, which releases exactly what it holds when dropped.

use llkv_result::{Error, Result};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

pub struct MemTracker {
    label: String,
    limit: Option<i64>,
    consumption: AtomicI64,
    peak: AtomicI64,
    parent: Option<Arc<MemTracker>>,
}

impl MemTracker {
    /// Root tracker. `limit` of `None` means unlimited.
    pub fn root(label: impl Into<String>, limit: Option<i64>) -> Arc<Self> {
        Arc::new(Self {
            label: label.into(),
            limit,
            consumption: AtomicI64::new(0),
            peak: AtomicI64::new(0),
            parent: None,
        })
    }

    pub fn child(label: impl Into<String>, limit: Option<i64>, parent: &Arc<MemTracker>) -> Arc<Self> {
        Arc::new(Self {
            label: label.into(),
            limit,
            consumption: AtomicI64::new(0),
            peak: AtomicI64::new(0),
            parent: Some(Arc::clone(parent)),
        })
    }

    #[inline]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[inline]
    pub fn limit(&self) -> Option<i64> {
        self.limit
    }

    #[inline]
    pub fn parent(&self) -> Option<&Arc<MemTracker>> {
        self.parent.as_ref()
    }

    #[inline]
    pub fn consumption(&self) -> i64 {
        self.consumption.load(Ordering::Acquire)
    }

    #[inline]
    pub fn peak_consumption(&self) -> i64 {
        self.peak.load(Ordering::Acquire)
    }

    /// Charge `bytes` to this tracker and all ancestors, ignoring limits.
    pub fn consume(&self, bytes: i64) {
        if bytes == 0 {
            return;
        }
        let mut node = Some(self);
        while let Some(tracker) = node {
            let now = tracker.consumption.fetch_add(bytes, Ordering::AcqRel) + bytes;
            tracker.peak.fetch_max(now, Ordering::AcqRel);
            node = tracker.parent.as_deref();
        }
    }

    /// Return `bytes` to this tracker and all ancestors.
    pub fn release(&self, bytes: i64) {
        if bytes == 0 {
            return;
        }
        let mut node = Some(self);
        while let Some(tracker) = node {
            let now = tracker.consumption.fetch_sub(bytes, Ordering::AcqRel) - bytes;
            debug_assert!(now >= 0, "mem tracker {} released below zero", tracker.label);
            node = tracker.parent.as_deref();
        }
    }

    /// Fail if charging `bytes` would push any tracker in the chain past its limit.
    pub fn check_limit(&self, bytes: i64) -> Result<()> {
        let mut node = Some(self);
        while let Some(tracker) = node {
            if let Some(limit) = tracker.limit
                && tracker.consumption() + bytes > limit
            {
                return Err(Error::MemoryLimitExceeded(format!(
                    "{}: consumption {} + {} exceeds limit {}",
                    tracker.label,
                    tracker.consumption(),
                    bytes,
                    limit
                )));
            }
            node = tracker.parent.as_deref();
        }
        Ok(())
    }

    /// Charge `bytes` only if no tracker in the chain would exceed its limit.
    ///
    /// The charge is applied level by level; if a level refuses, the levels
    /// already charged are rolled back before returning the error.
    pub fn try_consume(&self, bytes: i64) -> Result<()> {
        let mut charged: Vec<&MemTracker> = Vec::new();
        let mut node = Some(self);
        while let Some(tracker) = node {
            let now = tracker.consumption.fetch_add(bytes, Ordering::AcqRel) + bytes;
            if let Some(limit) = tracker.limit
                && now > limit
            {
                tracker.consumption.fetch_sub(bytes, Ordering::AcqRel);
                for done in charged {
                    done.consumption.fetch_sub(bytes, Ordering::AcqRel);
                }
                return Err(Error::MemoryLimitExceeded(format!(
                    "{}: consumption {} + {} exceeds limit {}",
                    tracker.label,
                    now - bytes,
                    bytes,
                    limit
                )));
            }
            charged.push(tracker);
            node = tracker.parent.as_deref();
        }
        for done in charged {
            done.peak.fetch_max(done.consumption(), Ordering::AcqRel);
        }
        Ok(())
    }

    /// Charge `bytes` and return a guard that releases them on drop.
    pub fn reserve(self: &Arc<Self>, bytes: usize) -> MemReservation {
        self.consume(bytes as i64);
        MemReservation {
            tracker: Arc::clone(self),
            bytes,
        }
    }
}

impl fmt::Debug for MemTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemTracker")
            .field("label", &self.label)
            .field("limit", &self.limit)
            .field("consumption", &self.consumption())
            .field("parent", &self.parent.as_ref().map(|p| p.label.as_str()))
            .finish()
    }
}

/// Bytes charged to a tracker for as long as the guard lives.
#[must_use = "dropping a reservation releases its bytes immediately"]
pub struct MemReservation {
    tracker: Arc<MemTracker>,
    bytes: usize,
}

impl MemReservation {
    /// A zero-byte reservation that can be resized later.
    pub fn empty(tracker: &Arc<MemTracker>) -> Self {
        Self {
            tracker: Arc::clone(tracker),
            bytes: 0,
        }
    }

    #[inline]
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    #[inline]
    pub fn tracker(&self) -> &Arc<MemTracker> {
        &self.tracker
    }

    /// Adjust the charge to exactly `bytes`.
    pub fn resize(&mut self, bytes: usize) {
        if bytes > self.bytes {
            self.tracker.consume((bytes - self.bytes) as i64);
        } else if bytes < self.bytes {
            self.tracker.release((self.bytes - bytes) as i64);
        }
        self.bytes = bytes;
    }
}

impl Drop for MemReservation {
    fn drop(&mut self) {
        self.tracker.release(self.bytes as i64);
    }
}

impl fmt::Debug for MemReservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemReservation")
            .field("tracker", &self.tracker.label)
            .field("bytes", &self.bytes)
            .finish()
    }
}
