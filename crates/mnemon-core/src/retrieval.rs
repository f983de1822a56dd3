//! Retrieval Pipeline - scoring and selection
//!
//! The pure half of the pipeline: combined scoring, ranking, and the
//! diversity- and budget-bounded walk over the ranked list. The engine
//! supplies candidates (with similarities) and applies the post-return
//! side effects; everything here is deterministic and unit-tested.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::memory::{MemoryRecord, PatternType};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Hard minimum cosine similarity when a query embedding is available
pub const SEMANTIC_FLOOR: f32 = 0.30;

/// Maximum entries per domain among ranked (non-spread) selections
pub const DOMAIN_CAP: usize = 3;

/// Maximum neighbours injected by the spreading-activation fill
pub const SPREAD_LIMIT: usize = 8;

/// Flat character charge added per selected entry
pub const ENTRY_OVERHEAD_CHARS: usize = 20;

/// Characters budgeted per token
pub const CHARS_PER_TOKEN: usize = 4;

/// Bonus for memories retrieved within the last 24 hours
pub const RECENCY_BONUS: f64 = 0.03;

/// Spread fill runs only below this fraction of budget consumption
pub const SPREAD_FILL_THRESHOLD: f64 = 0.9;

/// Candidate pool size for the activation-only fallback
pub const ACTIVATION_FALLBACK_LIMIT: usize = 100;

/// Post-return side effects cover at most this many selected ids
pub const SIDE_EFFECT_CAP: usize = 20;

// ============================================================================
// REQUEST TYPES
// ============================================================================

/// Scoring weights for the combined relevance blend
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScoreWeights {
    /// Weight of cosine similarity
    pub semantic: f64,
    /// Weight of normalised activation
    pub activation: f64,
    /// Bonus granted on a domain-hint match
    pub domain: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            semantic: 0.6,
            activation: 0.3,
            domain: 0.1,
        }
    }
}

/// A retrieval request
#[derive(Debug, Clone)]
pub struct RetrievalRequest {
    /// Free-text query
    pub query: String,
    /// Optional domain hints (0-3 strings)
    pub domains: Vec<String>,
    /// Cap on selected entries
    pub max_entries: usize,
    /// Token budget for the selection
    pub token_budget: usize,
    /// Scoring weights
    pub weights: ScoreWeights,
}

impl RetrievalRequest {
    /// A request with default limits and weights
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            domains: vec![],
            max_entries: 20,
            token_budget: 800,
            weights: ScoreWeights::default(),
        }
    }

    /// Character budget derived from the token budget
    pub fn char_budget(&self) -> usize {
        self.token_budget * CHARS_PER_TOKEN
    }
}

/// A candidate carrying its similarity and combined score
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    /// The stored record
    pub record: MemoryRecord,
    /// Cosine similarity to the query, when an embedding was available
    pub similarity: Option<f32>,
    /// Combined relevance score
    pub score: f64,
}

// ============================================================================
// SCORING
// ============================================================================

/// Type-based editorial bonus
pub fn type_bonus(pattern_type: Option<PatternType>) -> f64 {
    match pattern_type {
        Some(PatternType::Rule) | Some(PatternType::Directive) => 0.08,
        Some(PatternType::Correction) | Some(PatternType::BugInsight) => 0.05,
        Some(PatternType::Command) => 0.04,
        Some(PatternType::Solution) => 0.03,
        _ => 0.0,
    }
}

/// Cumulative editorial penalties
pub fn penalties(record: &MemoryRecord) -> f64 {
    let mut penalty = 0.0;
    if record.domain == "general" {
        penalty += 0.20;
    }
    if record.title.to_lowercase().contains("daily log") {
        penalty += 0.25;
    }
    if record.pattern_type.is_none() {
        penalty += 0.10;
    }
    if record.detail.chars().count() < 20 {
        penalty += 0.15;
    }
    penalty
}

/// Domain bonus: granted when any hint is a case-insensitive substring
/// of the candidate's domain
pub fn domain_bonus(record: &MemoryRecord, hints: &[String], weight: f64) -> f64 {
    let domain = record.domain.to_lowercase();
    if hints
        .iter()
        .any(|hint| !hint.is_empty() && domain.contains(&hint.to_lowercase()))
    {
        weight
    } else {
        0.0
    }
}

/// Combined relevance score for one candidate
pub fn score_candidate(
    record: &MemoryRecord,
    similarity: Option<f32>,
    normalised_activation: f64,
    hints: &[String],
    weights: &ScoreWeights,
    now: DateTime<Utc>,
) -> f64 {
    let semantic = similarity.map(|s| s as f64).unwrap_or(0.0);
    let recency = if record.retrieved_within(Duration::hours(24), now) {
        RECENCY_BONUS
    } else {
        0.0
    };

    weights.semantic * semantic
        + weights.activation * normalised_activation
        + recency
        + domain_bonus(record, hints, weights.domain)
        + type_bonus(record.pattern_type)
        - penalties(record)
}

/// Sort candidates by score descending. Tie order is unspecified.
pub fn rank(mut candidates: Vec<ScoredCandidate>) -> Vec<ScoredCandidate> {
    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    candidates
}

// ============================================================================
// SELECTION
// ============================================================================

/// Character charge for one entry: the detail (title when the detail
/// is empty) plus a flat overhead.
pub fn entry_cost(record: &MemoryRecord) -> usize {
    let text = if record.detail.is_empty() {
        &record.title
    } else {
        &record.detail
    };
    text.chars().count() + ENTRY_OVERHEAD_CHARS
}

/// Outcome of the budgeted walk
#[derive(Debug)]
pub struct Selection {
    /// Selected candidates in rank order
    pub entries: Vec<ScoredCandidate>,
    /// Characters charged so far
    pub spent: usize,
}

/// Walk the ranked list selecting entries under the character budget
/// and the per-domain diversity cap.
///
/// A candidate is skipped when its domain already has [`DOMAIN_CAP`]
/// selections; the walk stops when the next entry would exceed the
/// budget and something is already selected, or when `max_entries` is
/// reached. The first entry is always admitted, even oversized.
pub fn select(
    ranked: Vec<ScoredCandidate>,
    max_entries: usize,
    char_budget: usize,
) -> Selection {
    let mut entries: Vec<ScoredCandidate> = Vec::new();
    let mut spent = 0usize;
    let mut domain_counts: std::collections::HashMap<String, usize> =
        std::collections::HashMap::new();

    for candidate in ranked {
        if entries.len() >= max_entries {
            break;
        }

        let count = domain_counts
            .get(candidate.record.domain.as_str())
            .copied()
            .unwrap_or(0);
        if count >= DOMAIN_CAP {
            continue;
        }

        let cost = entry_cost(&candidate.record);
        if spent + cost > char_budget && !entries.is_empty() {
            break;
        }

        spent += cost;
        *domain_counts
            .entry(candidate.record.domain.clone())
            .or_insert(0) += 1;
        entries.push(candidate);
    }

    Selection { entries, spent }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStatus;

    fn record(id: &str, domain: &str, detail_len: usize) -> MemoryRecord {
        MemoryRecord {
            id: id.to_string(),
            title: format!("title {}", id),
            detail: "d".repeat(detail_len),
            domain: domain.to_string(),
            pattern_type: Some(PatternType::Fact),
            source: None,
            source_section: None,
            created: Utc::now(),
            last_retrieved: None,
            retrieval_count: 1,
            activation: 0.5,
            content_hash: String::new(),
            status: MemoryStatus::Active,
            superseded_by: None,
            corrects: None,
            tags: vec![],
            has_embedding: false,
        }
    }

    fn scored(id: &str, domain: &str, score: f64) -> ScoredCandidate {
        ScoredCandidate {
            record: record(id, domain, 100),
            similarity: None,
            score,
        }
    }

    #[test]
    fn type_bonus_ladder() {
        assert_eq!(type_bonus(Some(PatternType::Rule)), 0.08);
        assert_eq!(type_bonus(Some(PatternType::Directive)), 0.08);
        assert_eq!(type_bonus(Some(PatternType::Correction)), 0.05);
        assert_eq!(type_bonus(Some(PatternType::BugInsight)), 0.05);
        assert_eq!(type_bonus(Some(PatternType::Command)), 0.04);
        assert_eq!(type_bonus(Some(PatternType::Solution)), 0.03);
        assert_eq!(type_bonus(Some(PatternType::Fact)), 0.0);
        assert_eq!(type_bonus(None), 0.0);
    }

    #[test]
    fn penalties_are_cumulative() {
        let mut rec = record("g:x:1", "general", 5);
        rec.title = "Daily Log for Monday".to_string();
        rec.pattern_type = None;
        // general (0.20) + daily log (0.25) + no type (0.10) + short detail (0.15)
        assert!((penalties(&rec) - 0.70).abs() < 1e-9);
    }

    #[test]
    fn domain_bonus_matches_substring_case_insensitive() {
        let rec = record("p:x:1", "peekaboo-web", 100);
        assert_eq!(domain_bonus(&rec, &["Peekaboo".to_string()], 0.1), 0.1);
        assert_eq!(domain_bonus(&rec, &["tts".to_string()], 0.1), 0.0);
        assert_eq!(domain_bonus(&rec, &[], 0.1), 0.0);
    }

    #[test]
    fn recency_bonus_applies_within_24h() {
        let now = Utc::now();
        let weights = ScoreWeights::default();

        let mut rec = record("t:x:1", "tts", 100);
        let cold = score_candidate(&rec, None, 0.0, &[], &weights, now);

        rec.last_retrieved = Some(now - Duration::hours(1));
        let warm = score_candidate(&rec, None, 0.0, &[], &weights, now);
        assert!((warm - cold - RECENCY_BONUS).abs() < 1e-9);
    }

    #[test]
    fn score_blends_similarity_and_activation() {
        let now = Utc::now();
        let weights = ScoreWeights::default();
        let rec = record("t:x:1", "tts", 100);

        let s = score_candidate(&rec, Some(0.8), 0.5, &[], &weights, now);
        // 0.6*0.8 + 0.3*0.5, fact type, no bonuses or penalties
        assert!((s - (0.48 + 0.15)).abs() < 1e-6);
    }

    #[test]
    fn rank_orders_by_score_descending() {
        let ranked = rank(vec![
            scored("a", "x", 0.1),
            scored("b", "x", 0.9),
            scored("c", "x", 0.5),
        ]);
        let ids: Vec<&str> = ranked.iter().map(|c| c.record.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
    }

    #[test]
    fn select_enforces_domain_cap() {
        let mut ranked = Vec::new();
        for i in 0..10 {
            ranked.push(scored(&format!("c{}", i), "comfyui", 1.0 - i as f64 * 0.01));
        }
        ranked.push(scored("t0", "tts", 0.5));
        ranked.push(scored("t1", "tts", 0.4));

        let selection = select(ranked, 20, 100_000);
        let comfy = selection
            .entries
            .iter()
            .filter(|c| c.record.domain == "comfyui")
            .count();
        let tts = selection
            .entries
            .iter()
            .filter(|c| c.record.domain == "tts")
            .count();
        assert_eq!(comfy, DOMAIN_CAP);
        assert_eq!(tts, 2);
    }

    #[test]
    fn select_stops_at_budget_after_first_entry() {
        // Each entry costs 100 + 20 chars; a 300-char budget fits two
        let ranked = vec![
            scored("a", "x", 0.9),
            scored("b", "y", 0.8),
            scored("c", "z", 0.7),
        ];
        let selection = select(ranked, 20, 300);
        assert_eq!(selection.entries.len(), 2);
        assert_eq!(selection.spent, 240);
    }

    #[test]
    fn select_admits_oversized_first_entry() {
        let big = ScoredCandidate {
            record: record("a", "x", 10_000),
            similarity: None,
            score: 1.0,
        };
        let selection = select(vec![big], 20, 100);
        assert_eq!(selection.entries.len(), 1);
    }

    #[test]
    fn select_respects_max_entries() {
        let ranked: Vec<ScoredCandidate> = (0..50)
            .map(|i| scored(&format!("m{}", i), &format!("d{}", i), 1.0))
            .collect();
        let selection = select(ranked, 7, 1_000_000);
        assert_eq!(selection.entries.len(), 7);
    }

    #[test]
    fn entry_cost_falls_back_to_title() {
        let mut rec = record("a", "x", 0);
        rec.title = "short".to_string();
        assert_eq!(entry_cost(&rec), 5 + ENTRY_OVERHEAD_CHARS);
    }
}
