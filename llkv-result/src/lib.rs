//! Error types and result definitions shared by the LLKV primary-key update crates.
//!
//! The crates in this workspace (`llkv-storage`, `llkv-update`) return a single
//! error enum ([`Error`]) through the [`Result<T>`] alias, so a metadata-store
//! failure deep inside a cache load reaches the ingestion hook or the query with
//! nothing more than `?`.
//!
//! # Error Categories
//!
//! - **I/O errors** ([`Error::Io`]): metadata store and filesystem access
//! - **Decode errors** ([`Error::Corruption`]): unreadable persisted metadata
//! - **Invariant violations** ([`Error::Internal`]): e.g. out-of-order version writes
//! - **Resource errors** ([`Error::MemoryLimitExceeded`], [`Error::Timeout`])
//! - **Lifecycle errors** ([`Error::Uninitialized`], [`Error::ServiceUnavailable`])

pub mod error;
pub mod result;

pub use error::Error;
pub use result::Result;
