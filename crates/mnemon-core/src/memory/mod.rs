//! Memory types - the units the engine stores and returns.

mod record;

pub use record::{
    CandidateEntry, MemoryRecord, MemoryStats, MemoryStatus, PatternType, RetrievedMemory,
    SupervisionOutcome,
};
