//! Ingestion Pipeline - helpers
//!
//! Deterministic ids, the two hash schemes, and semantic
//! deduplication. The orchestration (batching, embedding, upserting)
//! lives on the engine; everything here is pure and unit-tested.
//!
//! The two hash schemes are deliberately distinct and never
//! interchanged: SHA-256 prefixes fingerprint whole sources for change
//! detection, while `content_hash` is a 32-bit rolling hash of the
//! detail used only as a cheap duplicate hint.

use sha2::{Digest, Sha256};

use crate::embed::cosine;

/// Cosine similarity above which an ingest candidate is rejected as a
/// semantic duplicate
pub const DEDUP_THRESHOLD: f32 = 0.92;

/// Activation assigned to a freshly ingested memory
pub const INITIAL_ACTIVATION: f64 = 0.5;

// ============================================================================
// IDS AND HASHES
// ============================================================================

/// Deterministic memory id: `lower_snake(domain):channel:short_hash(title)`
pub fn memory_id(domain: &str, channel: &str, title: &str) -> String {
    format!("{}:{}:{}", lower_snake(domain), channel, short_hash(title))
}

/// Lower-case and collapse runs of non-alphanumerics to underscores
pub fn lower_snake(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut last_was_sep = false;
    for c in s.chars() {
        if c.is_alphanumeric() {
            out.extend(c.to_lowercase());
            last_was_sep = false;
        } else if !last_was_sep && !out.is_empty() {
            out.push('_');
            last_was_sep = true;
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}

/// First 8 hex chars of SHA-256, used for id suffixes
pub fn short_hash(s: &str) -> String {
    let digest = Sha256::digest(s.as_bytes());
    hex_prefix(&digest, 8)
}

/// First 16 hex chars of SHA-256, used for source fingerprints
pub fn fingerprint(content: &[u8]) -> String {
    let digest = Sha256::digest(content);
    hex_prefix(&digest, 16)
}

fn hex_prefix(digest: &[u8], chars: usize) -> String {
    let mut out = String::with_capacity(chars);
    for byte in digest {
        out.push_str(&format!("{:02x}", byte));
        if out.len() >= chars {
            break;
        }
    }
    out.truncate(chars);
    out
}

/// 32-bit FNV-1a rolling hash of the detail, rendered as 8 hex chars.
/// A cheap duplicate hint only; never a change-detection fingerprint.
pub fn content_hash(detail: &str) -> String {
    let mut hash: u32 = 0x811c9dc5;
    for byte in detail.as_bytes() {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(0x01000193);
    }
    format!("{:08x}", hash)
}

// ============================================================================
// SEMANTIC DEDUPLICATION
// ============================================================================

/// Check a candidate vector against stored embeddings and the vectors
/// of candidates already kept in this batch. Returns the id (or batch
/// index rendered as `batch[i]`) of the first conflicting entry whose
/// similarity exceeds [`DEDUP_THRESHOLD`].
pub fn semantic_duplicate_of(
    candidate: &[f32],
    stored: &[(String, Vec<f32>)],
    kept_in_batch: &[(usize, Vec<f32>)],
) -> Option<String> {
    for (id, vector) in stored {
        if cosine(candidate, vector) > DEDUP_THRESHOLD {
            return Some(id.clone());
        }
    }
    for (index, vector) in kept_in_batch {
        if cosine(candidate, vector) > DEDUP_THRESHOLD {
            return Some(format!("batch[{}]", index));
        }
    }
    None
}

// ============================================================================
// SOURCE STAMPS
// ============================================================================

/// Per-source fingerprint for change detection, persisted in the meta
/// table under `atomize_hash:<path>`.
#[derive(Debug, Clone)]
pub struct SourceStamp {
    /// Path-like identity of the source
    pub path: String,
    /// `sha256[:16]` of the source content
    pub fingerprint: String,
}

impl SourceStamp {
    /// Stamp a source from its raw content
    pub fn of(path: &str, content: &[u8]) -> Self {
        Self {
            path: path.to_string(),
            fingerprint: fingerprint(content),
        }
    }

    /// Meta key for this source
    pub fn meta_key(&self) -> String {
        format!("atomize_hash:{}", self.path)
    }
}

// ============================================================================
// REPORT
// ============================================================================

/// Counters returned by an ingestion run
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReport {
    /// Rows actually inserted
    pub added: usize,
    /// Candidates whose id already existed
    pub skipped_existing: usize,
    /// Candidates rejected by semantic deduplication
    pub skipped_duplicate: usize,
    /// Candidates inserted with an embedding blob
    pub embedded: usize,
    /// Embedding batches that failed and fell back to plain inserts
    pub embed_failures: usize,
    /// True when the whole source was skipped on an unchanged fingerprint
    pub source_unchanged: bool,
}

// ============================================================================
// TESTS
// ============================================================================
