//! Memory Record - the fundamental unit of storage
//!
//! Each record is an atomic pattern mined from a transcript, a reasoning
//! block, or a curated knowledge file:
//! - Title, detail, and provenance
//! - Hebbian activation raised on retrieval and decayed on schedule
//! - Optional embedding vector (stored separately as a blob)
//! - Deprecation / correction links

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// PATTERN TYPES
// ============================================================================

/// Editorial classification of an atomic pattern
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PatternType {
    /// A standing rule the agent should follow
    Rule,
    /// An instruction from the operator or user
    Directive,
    /// A shell command or invocation worth remembering
    Command,
    /// A discrete fact
    Fact,
    /// Something learned while exploring
    Discovery,
    /// A recorded failure and its circumstances
    Failure,
    /// A working fix for a known problem
    Solution,
    /// A configuration value or setting
    Config,
    /// A measured performance number
    Benchmark,
    /// Insight gained while debugging
    BugInsight,
    /// A decision and its context
    Decision,
    /// A specification detail
    Spec,
    /// A correction of an earlier memory
    Correction,
    /// A conclusion drawn from evidence
    Conclusion,
}

impl PatternType {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternType::Rule => "rule",
            PatternType::Directive => "directive",
            PatternType::Command => "command",
            PatternType::Fact => "fact",
            PatternType::Discovery => "discovery",
            PatternType::Failure => "failure",
            PatternType::Solution => "solution",
            PatternType::Config => "config",
            PatternType::Benchmark => "benchmark",
            PatternType::BugInsight => "bug-insight",
            PatternType::Decision => "decision",
            PatternType::Spec => "spec",
            PatternType::Correction => "correction",
            PatternType::Conclusion => "conclusion",
        }
    }

    /// Parse from string name. Unknown names map to `None`, matching the
    /// nullable column used for legacy file-level blobs.
    pub fn parse_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "rule" => Some(PatternType::Rule),
            "directive" => Some(PatternType::Directive),
            "command" => Some(PatternType::Command),
            "fact" => Some(PatternType::Fact),
            "discovery" => Some(PatternType::Discovery),
            "failure" => Some(PatternType::Failure),
            "solution" => Some(PatternType::Solution),
            "config" => Some(PatternType::Config),
            "benchmark" => Some(PatternType::Benchmark),
            "bug-insight" => Some(PatternType::BugInsight),
            "decision" => Some(PatternType::Decision),
            "spec" => Some(PatternType::Spec),
            "correction" => Some(PatternType::Correction),
            "conclusion" => Some(PatternType::Conclusion),
            _ => None,
        }
    }
}

impl std::fmt::Display for PatternType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// STATUS
// ============================================================================

/// Lifecycle status of a memory. The only transition is
/// active → deprecated, performed by the supervision path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryStatus {
    /// Eligible for retrieval
    #[default]
    Active,
    /// Superseded; retained but never returned
    Deprecated,
}

impl MemoryStatus {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryStatus::Active => "active",
            MemoryStatus::Deprecated => "deprecated",
        }
    }

    /// Parse from string name. NULL and unknown values read as active
    /// for backward compatibility with rows written before the status
    /// column existed.
    pub fn parse_name(s: &str) -> Self {
        match s {
            "deprecated" => MemoryStatus::Deprecated,
            _ => MemoryStatus::Active,
        }
    }
}

impl std::fmt::Display for MemoryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// MEMORY RECORD
// ============================================================================

/// A stored memory
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryRecord {
    /// Deterministic id: `lower_snake(domain):channel:short_hash(title)`
    pub id: String,
    /// Short human summary (<= 120 chars)
    pub title: String,
    /// Full textual payload
    pub detail: String,
    /// Coarse topical tag; `"general"` is the catch-all sentinel
    pub domain: String,
    /// Editorial classification, absent for legacy blobs
    pub pattern_type: Option<PatternType>,
    /// Origin channel
    pub source: Option<String>,
    /// Path-like locator within the source
    pub source_section: Option<String>,
    /// When the memory was created
    pub created: DateTime<Utc>,
    /// When the memory was last returned by a retrieval
    pub last_retrieved: Option<DateTime<Utc>>,
    /// Times the memory was returned; monotonically non-decreasing
    pub retrieval_count: i64,
    /// Hebbian activation; raised on retrieval, decayed multiplicatively
    pub activation: f64,
    /// Rolling 32-bit hash of `detail`, a cheap duplicate hint
    pub content_hash: String,
    /// Lifecycle status
    pub status: MemoryStatus,
    /// Replacement memory, required when deprecated
    pub superseded_by: Option<String>,
    /// The memory this one corrects
    pub corrects: Option<String>,
    /// Lower-cased tags
    #[serde(default)]
    pub tags: Vec<String>,
    /// Whether an embedding blob is stored for this record
    pub has_embedding: bool,
}

impl MemoryRecord {
    /// Whether the record was retrieved within the given window
    pub fn retrieved_within(&self, window: chrono::Duration, now: DateTime<Utc>) -> bool {
        self.last_retrieved
            .map(|t| now - t <= window)
            .unwrap_or(false)
    }
}

// ============================================================================
// INGESTION INPUT
// ============================================================================

/// A candidate entry handed to the ingestion pipeline by an extractor.
///
/// Channel-specific low-signal filtering happens before a candidate
/// reaches the engine; the pipeline does not re-filter.
///
/// Uses `deny_unknown_fields` to prevent field injection from
/// untrusted extractor output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CandidateEntry {
    /// Coarse topical tag
    pub domain: String,
    /// Editorial classification
    pub pattern_type: Option<PatternType>,
    /// Short human summary
    pub title: String,
    /// Full textual payload
    pub detail: String,
    /// Origin channel
    #[serde(default)]
    pub source: Option<String>,
    /// Path-like locator within the source
    #[serde(default)]
    pub source_section: Option<String>,
    /// Tags, lower-cased on write
    #[serde(default)]
    pub tags: Vec<String>,
}

// ============================================================================
// RETRIEVAL OUTPUT
// ============================================================================

/// A memory returned by the retrieval pipeline
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievedMemory {
    /// The stored record
    pub memory: MemoryRecord,
    /// Combined relevance score at selection time
    pub score: f64,
    /// True when the entry was injected by the spreading-activation fill
    pub via_spread: bool,
}

// ============================================================================
// SUPERVISION OUTCOME
// ============================================================================

/// Result of a supervision operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "status")]
pub enum SupervisionOutcome {
    /// The mutation was applied
    Applied,
    /// One of the referenced ids does not exist; nothing was mutated
    NotFound {
        /// The missing id
        id: String,
    },
}

// ============================================================================
// STATS
// ============================================================================

/// Aggregate statistics over the store
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    /// All rows, active and deprecated
    pub total: i64,
    /// Active rows
    pub active: i64,
    /// Deprecated rows
    pub deprecated: i64,
    /// Rows carrying an embedding blob
    pub with_embedding: i64,
    /// Active counts by domain, descending
    pub by_domain: Vec<(String, i64)>,
    /// Active counts by pattern type, descending
    pub by_pattern_type: Vec<(String, i64)>,
    /// Activation distribution buckets
    pub activation_buckets: Vec<(String, i64)>,
    /// Oldest creation timestamp
    pub oldest: Option<DateTime<Utc>>,
    /// Newest creation timestamp
    pub newest: Option<DateTime<Utc>>,
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_type_roundtrip() {
        for pt in [
            PatternType::Rule,
            PatternType::Command,
            PatternType::BugInsight,
            PatternType::Conclusion,
        ] {
            assert_eq!(PatternType::parse_name(pt.as_str()), Some(pt));
        }
    }

    #[test]
    fn pattern_type_unknown_is_none() {
        assert_eq!(PatternType::parse_name("daily-log"), None);
        assert_eq!(PatternType::parse_name(""), None);
    }

    #[test]
    fn status_defaults_to_active() {
        assert_eq!(MemoryStatus::parse_name("deprecated"), MemoryStatus::Deprecated);
        assert_eq!(MemoryStatus::parse_name("active"), MemoryStatus::Active);
        // Legacy rows without a status read as active
        assert_eq!(MemoryStatus::parse_name(""), MemoryStatus::Active);
    }

    #[test]
    fn candidate_entry_deny_unknown_fields() {
        let json = r#"{"domain": "tts", "patternType": "rule", "title": "t", "detail": "d"}"#;
        assert!(serde_json::from_str::<CandidateEntry>(json).is_ok());

        let json_with_unknown =
            r#"{"domain": "tts", "patternType": "rule", "title": "t", "detail": "d", "activation": 99}"#;
        assert!(serde_json::from_str::<CandidateEntry>(json_with_unknown).is_err());
    }

    #[test]
    fn retrieved_within_window() {
        let now = Utc::now();
        let mut rec = sample_record();
        assert!(!rec.retrieved_within(chrono::Duration::hours(24), now));

        rec.last_retrieved = Some(now - chrono::Duration::hours(2));
        assert!(rec.retrieved_within(chrono::Duration::hours(24), now));

        rec.last_retrieved = Some(now - chrono::Duration::hours(48));
        assert!(!rec.retrieved_within(chrono::Duration::hours(24), now));
    }

    fn sample_record() -> MemoryRecord {
        MemoryRecord {
            id: "tts:atomic:deadbeef".to_string(),
            title: "Use streaming synthesis".to_string(),
            detail: "Streaming synthesis halves latency for long prompts".to_string(),
            domain: "tts".to_string(),
            pattern_type: Some(PatternType::Rule),
            source: None,
            source_section: None,
            created: Utc::now(),
            last_retrieved: None,
            retrieval_count: 1,
            activation: 0.5,
            content_hash: "0".to_string(),
            status: MemoryStatus::Active,
            superseded_by: None,
            corrects: None,
            tags: vec![],
            has_embedding: false,
        }
    }
}
