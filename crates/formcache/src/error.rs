//! Error types for draft cache operations.
//!
//! These errors stay inside the crate's plumbing. Public operations on the
//! facade, session manager and cleanup engine log them and degrade to a
//! cache miss or a dropped save instead of returning them.

use crate::store::StoreError;

/// Error type for draft cache operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The key/value store rejected an operation.
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    /// A stored value could not be decoded.
    #[error("Failed to decode '{key}': {source}")]
    Decode {
        key: String,
        source: serde_json::Error,
    },

    /// A value could not be encoded for storage.
    #[error("Failed to encode '{key}': {source}")]
    Encode {
        key: String,
        source: serde_json::Error,
    },
}

/// Result type for draft cache operations.
pub type Result<T> = std::result::Result<T, Error>;
