//! Vector math and blob codec
//!
//! Vectors are persisted as raw little-endian f32 byte sequences.
//! Loads validate the blob length against the configured dimension and
//! treat mismatches as missing.

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 when the lengths differ or either norm is zero.
#[inline]
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0_f32;
    let mut norm_a = 0.0_f32;
    let mut norm_b = 0.0_f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denominator = (norm_a * norm_b).sqrt();
    if denominator > 0.0 {
        dot / denominator
    } else {
        0.0
    }
}

/// Serialise a vector to a little-endian f32 blob
pub fn to_blob(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Deserialise a blob, requiring exactly `dimensions` floats.
///
/// Returns `None` on any length mismatch; callers treat that as a
/// missing embedding.
pub fn from_blob(bytes: &[u8], dimensions: usize) -> Option<Vec<f32>> {
    if bytes.len() != dimensions * 4 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect(),
    )
}

// ============================================================================
// TESTS
// ============================================================================
