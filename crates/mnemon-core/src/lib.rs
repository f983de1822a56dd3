//! # Mnemon Core
//!
//! Persistent, self-organising associative memory for AI agents.
//!
//! The engine stores atomic textual patterns mined from transcripts,
//! reasoning blocks, and knowledge files, and answers free-text
//! queries with a token-bounded, diversity-balanced selection.
//! Relevance blends:
//!
//! - **Semantic similarity**: cosine over embeddings from an external
//!   HTTP oracle (callers always tolerate its absence)
//! - **Hebbian activation**: raised on every retrieval, decayed
//!   multiplicatively on a schedule, percentile-normalised for scoring
//! - **Co-occurrence**: a symmetric weighted graph wired from joint
//!   retrievals, powering a spreading-activation budget fill
//! - **Editorial signals**: type bonuses and penalties for low-signal
//!   patterns
//!
//! Entries are never deleted: supersession deprecates them out of
//! retrieval while preserving provenance.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use mnemon_core::{MemoryEngine, MnemonConfig, RetrievalRequest};
//!
//! let engine = MemoryEngine::new(MnemonConfig::default())?;
//! let results = engine.retrieve(&RetrievalRequest::new("checkbox id handling"))?;
//! for r in results {
//!     println!("{} {}", r.memory.domain, r.memory.title);
//! }
//! ```

// ============================================================================
// MODULES
// ============================================================================

pub mod activation;
pub mod config;
pub mod cooccurrence;
pub mod embed;
pub mod engine;
pub mod error;
pub mod hooks;
pub mod ingest;
pub mod memory;
pub mod retrieval;
pub mod storage;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

pub use config::{DecayConfig, MnemonConfig, ENV_DB_PATH, ENV_EMBED_URL};
pub use embed::{EmbedError, EmbeddingClient};
pub use engine::{BackfillReport, MemoryEngine};
pub use error::{MemoryError, Result};
pub use hooks::Hooks;
pub use ingest::{IngestReport, SourceStamp};
pub use memory::{
    CandidateEntry, MemoryRecord, MemoryStats, MemoryStatus, PatternType, RetrievedMemory,
    SupervisionOutcome,
};
pub use retrieval::{RetrievalRequest, ScoreWeights};
pub use storage::{Store, StoreError};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Convenient imports for common usage
pub mod prelude {
    pub use crate::{
        CandidateEntry, Hooks, MemoryEngine, MemoryRecord, MemoryStatus, MnemonConfig,
        PatternType, Result, RetrievalRequest, RetrievedMemory, Store,
    };
}
