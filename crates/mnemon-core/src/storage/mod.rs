//! Storage layer - embedded SQLite store
//!
//! Holds memories, tags, co-occurrence edges, and meta key/values.
//! Single writer, many readers, mediated by SQLite's write-ahead log.

pub mod migrations;
mod sqlite;

pub use sqlite::{Store, StoreError};

/// Storage result type
pub type Result<T> = std::result::Result<T, StoreError>;
