use crate::error::Error;

/// Result type alias used across the LLKV update stack.
pub type Result<T> = std::result::Result<T, Error>;
