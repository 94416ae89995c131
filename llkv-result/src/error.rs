use std::{fmt, io};
use thiserror::Error;

/// Unified error type for the LLKV primary-key update stack.
///
/// Every crate in the workspace returns this enum so failures propagate with `?`
/// from the metadata store up through the caches and the update manager without
/// conversion layers.
///
/// # Error Handling Strategy
///
/// The variants fall into a few classes that callers treat differently:
///
/// - **Invariant violations** ([`Error::Internal`]) are always surfaced.
/// - **Resource errors** ([`Error::MemoryLimitExceeded`], [`Error::Timeout`]) are
///   surfaced on the read path but may be deferred by ingestion hooks, because the
///   apply step can rebuild whatever was being prepared.
/// - **Storage errors** ([`Error::Io`], [`Error::Corruption`]) propagate unchanged;
///   nothing in this stack retries them.
///
/// # Thread Safety
///
/// `Error` implements `Send` and `Sync`, so it can cross the worker pools used for
/// apply and index loading.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error from the metadata store or the filesystem.
    ///
    /// Wraps the standard library error so the original kind (permission denied,
    /// disk full, not found) is preserved for the caller.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Invalid argument passed to an LLKV API.
    #[error("Invalid argument: {0}")]
    InvalidArgumentError(String),

    /// Persisted metadata could not be decoded.
    ///
    /// Raised when a delete vector or delta column group blob read from the
    /// metadata store is truncated or was written by an incompatible encoder.
    #[error("Corrupted metadata: {0}")]
    Corruption(String),

    /// Internal error indicating a violated invariant.
    ///
    /// The most common source is a versioned cache write that would move a cached
    /// entry backwards (for example installing delete vector version 4 over
    /// version 6). These are never swallowed.
    #[error("An internal operation failed: {0}")]
    Internal(String),

    /// A memory tracker in the accounting hierarchy would exceed its limit.
    #[error("Memory limit exceeded: {0}")]
    MemoryLimitExceeded(String),

    /// Timed out waiting for a resource (an index lock, a background load).
    #[error("Timed out: {0}")]
    Timeout(String),

    /// A prerequisite structure (typically a tablet's primary index) is not
    /// loaded and could not be prepared in time.
    #[error("Uninitialized: {0}")]
    Uninitialized(String),

    /// Work was submitted to a worker pool that has already been shut down.
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl Error {
    /// Create a corruption error from any displayable decode failure.
    ///
    /// # Examples
    ///
    /// ```
    /// use llkv_result::Error;
    ///
    /// let err = Error::corruption("truncated header");
    /// assert!(matches!(err, Error::Corruption(msg) if msg == "truncated header"));
    /// ```
    #[inline]
    pub fn corruption<E: fmt::Display>(err: E) -> Self {
        Error::Corruption(err.to_string())
    }

    #[inline]
    pub fn is_mem_limit_exceeded(&self) -> bool {
        matches!(self, Error::MemoryLimitExceeded(_))
    }

    #[inline]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }

    /// True for the resource errors an ingestion hook may defer to the apply step.
    ///
    /// ```
    /// use llkv_result::Error;
    ///
    /// assert!(Error::MemoryLimitExceeded("update".into()).is_deferrable());
    /// assert!(Error::Timeout("index lock".into()).is_deferrable());
    /// assert!(!Error::Internal("bad version".into()).is_deferrable());
    /// ```
    #[inline]
    pub fn is_deferrable(&self) -> bool {
        self.is_mem_limit_exceeded() || self.is_timeout()
    }
}
