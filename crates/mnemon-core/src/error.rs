//! Engine error type
//!
//! One discriminated enum at the library boundary; the store and the
//! embedding client have their own error enums that convert into it.

use crate::embed::EmbedError;
use crate::storage::StoreError;

/// Engine error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    /// The store could not be opened or a statement failed
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The embedding oracle failed
    #[error(transparent)]
    Embed(#[from] EmbedError),
    /// An id does not parse or reference an existing memory
    #[error("invalid memory id: {0}")]
    InvalidId(String),
    /// A configuration value is out of range or unreadable
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),
}

/// Engine result type
pub type Result<T> = std::result::Result<T, MemoryError>;
