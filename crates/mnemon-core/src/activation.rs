//! Activation Engine
//!
//! Hebbian bookkeeping: retrieval bumps activation additively, a
//! scheduled pass decays it multiplicatively, and scoring sees a
//! percentile-normalised value so a handful of runaway-high entries
//! cannot dominate the blend.

/// Activation added to each returned memory on retrieval
pub const RETRIEVAL_BUMP: f64 = 0.5;

/// Activation added on a tool-triggered refresh
pub const REFRESH_BUMP: f64 = 0.3;

/// Default multiplicative decay factor per scheduled invocation
pub const DAILY_DECAY_FACTOR: f64 = 0.9995;

/// Nearest-rank 95th percentile of a value set.
///
/// Returns 0.0 for an empty input.
pub fn p95(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    // Nearest-rank: ceil(0.95 * n), 1-based
    let rank = ((0.95 * sorted.len() as f64).ceil() as usize).max(1);
    sorted[rank - 1]
}

/// Normalise an activation against the candidate p95, clipped to [0, 1].
///
/// The divisor floors at 1.0 so small stores do not inflate scores.
pub fn normalised(activation: f64, p95: f64) -> f64 {
    (activation / p95.max(1.0)).clamp(0.0, 1.0)
}

// ============================================================================
// TESTS
// ============================================================================
