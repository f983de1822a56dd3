//! Co-occurrence Engine
//!
//! Maintains the symmetric, additive-weight graph over memory ids and
//! computes spreading activation from it. Edges are wired only between
//! memories of the same domain that were returned by the same
//! retrieval; cross-domain pairs stay unwired.

use std::collections::{HashMap, HashSet};

use crate::memory::MemoryRecord;
use crate::storage::{Result, Store};

/// Neighbours fetched per seed id during spreading activation
pub const NEIGHBOUR_FETCH: usize = 20;

/// Fraction of edge weight converted into boost
pub const SPREAD_FACTOR: f64 = 0.3;

/// Unordered same-domain pairs among a returned set.
///
/// Memories are grouped by domain (the `"general"` sentinel forms its
/// own group) and every within-group pair is emitted once.
pub fn same_domain_pairs(records: &[&MemoryRecord]) -> Vec<(String, String)> {
    let mut groups: HashMap<&str, Vec<&str>> = HashMap::new();
    for record in records {
        groups
            .entry(record.domain.as_str())
            .or_default()
            .push(record.id.as_str());
    }

    let mut pairs = Vec::new();
    for ids in groups.values() {
        for i in 0..ids.len() {
            for j in (i + 1)..ids.len() {
                pairs.push((ids[i].to_string(), ids[j].to_string()));
            }
        }
    }
    pairs
}

/// Wire +1 onto both directed edges of every same-domain pair in the
/// returned set, in one transaction. Returns the pair count.
pub fn wire(store: &Store, records: &[&MemoryRecord]) -> Result<usize> {
    let pairs = same_domain_pairs(records);
    store.wire_pairs(&pairs)
}

/// Spreading activation: for every neighbour of the active set that is
/// not itself active, accumulate `weight * SPREAD_FACTOR`, then return
/// the top `limit` neighbours by boost, each reunited with its record.
/// Deprecated and missing neighbours are dropped.
pub fn spread(
    store: &Store,
    active_ids: &[String],
    limit: usize,
) -> Result<Vec<(MemoryRecord, f64)>> {
    if active_ids.is_empty() || limit == 0 {
        return Ok(vec![]);
    }

    let active: HashSet<&str> = active_ids.iter().map(|s| s.as_str()).collect();
    let mut boosts: HashMap<String, f64> = HashMap::new();

    for id in active_ids {
        for (neighbour, weight) in store.neighbours(id, NEIGHBOUR_FETCH)? {
            if active.contains(neighbour.as_str()) {
                continue;
            }
            *boosts.entry(neighbour).or_insert(0.0) += weight * SPREAD_FACTOR;
        }
    }

    let mut ranked: Vec<(String, f64)> = boosts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let mut result = Vec::new();
    for (id, boost) in ranked {
        if result.len() >= limit {
            break;
        }
        match store.get_memory(&id)? {
            Some(record) if record.status == crate::memory::MemoryStatus::Active => {
                result.push((record, boost));
            }
            _ => {}
        }
    }
    Ok(result)
}

// ============================================================================
// TESTS
// ============================================================================
