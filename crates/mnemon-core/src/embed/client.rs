//! Embedding oracle client
//!
//! Stateless HTTP client for an Ollama-compatible embedding endpoint:
//! `POST {base}/api/embed` with `{"model": ..., "input": [...]}` and a
//! `{"embeddings": [[f32; D], ...]}` response. Inputs are truncated to
//! 512 characters and sent in batches of at most 25; the whole call is
//! bounded by a 15-second timeout.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use serde::{Deserialize, Serialize};

use crate::memory::PatternType;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Maximum texts per oracle request
pub const EMBED_BATCH_SIZE: usize = 25;

/// Maximum characters per input text
pub const MAX_EMBED_CHARS: usize = 512;

/// Per-request timeout in seconds
pub const EMBED_TIMEOUT_SECS: u64 = 15;

/// Soft cap on cached query embeddings
const QUERY_CACHE_CAPACITY: usize = 100;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Embedding oracle error. Callers on the query path recover from all
/// variants by proceeding without a semantic component.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    /// The oracle could not be reached
    #[error("embedding oracle unavailable: {0}")]
    Unavailable(String),
    /// The request exceeded the timeout
    #[error("embedding request timed out after {EMBED_TIMEOUT_SECS}s")]
    Timeout,
    /// The response did not match the request shape
    #[error("malformed embedding response: {0}")]
    Malformed(String),
    /// The oracle produced vectors of the wrong dimension
    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    Dimension {
        /// Configured dimension
        expected: usize,
        /// Dimension actually returned
        got: usize,
    },
}

impl From<reqwest::Error> for EmbedError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            EmbedError::Timeout
        } else if e.is_decode() {
            EmbedError::Malformed(e.to_string())
        } else {
            EmbedError::Unavailable(e.to_string())
        }
    }
}

// ============================================================================
// WIRE TYPES
// ============================================================================

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

// ============================================================================
// CLIENT
// ============================================================================

/// Client for the embedding oracle
pub struct EmbeddingClient {
    http: reqwest::blocking::Client,
    endpoint: String,
    model: String,
    dimensions: usize,
}

impl EmbeddingClient {
    /// Build a client for the given base URL, model, and vector dimension
    pub fn new(base_url: &str, model: &str, dimensions: usize) -> Result<Self, EmbedError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(EMBED_TIMEOUT_SECS))
            .build()
            .map_err(|e| EmbedError::Unavailable(format!("failed to build http client: {}", e)))?;

        let endpoint = format!("{}/api/embed", base_url.trim_end_matches('/'));

        Ok(Self {
            http,
            endpoint,
            model: model.to_string(),
            dimensions,
        })
    }

    /// The vector dimension this client expects
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Embed a single text
    pub fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let mut batch = self.embed_batch(&[text.to_string()])?;
        batch
            .pop()
            .ok_or_else(|| EmbedError::Malformed("empty embeddings array".to_string()))
    }

    /// Embed a batch of texts, preserving order.
    ///
    /// Inputs are truncated to [`MAX_EMBED_CHARS`] and sent in chunks of
    /// [`EMBED_BATCH_SIZE`]. The returned vector has the same length as
    /// the input or the call fails as a whole.
    pub fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let truncated: Vec<String> = texts
            .iter()
            .map(|t| truncate_chars(t, MAX_EMBED_CHARS))
            .collect();

        let mut all = Vec::with_capacity(truncated.len());
        for chunk in truncated.chunks(EMBED_BATCH_SIZE) {
            let request = EmbedRequest {
                model: &self.model,
                input: chunk,
            };

            let response = self
                .http
                .post(&self.endpoint)
                .json(&request)
                .send()?
                .error_for_status()
                .map_err(|e| EmbedError::Unavailable(e.to_string()))?;

            let body: EmbedResponse = response
                .json()
                .map_err(|e| EmbedError::Malformed(e.to_string()))?;

            if body.embeddings.len() != chunk.len() {
                return Err(EmbedError::Malformed(format!(
                    "requested {} embeddings, got {}",
                    chunk.len(),
                    body.embeddings.len()
                )));
            }
            for vector in &body.embeddings {
                if vector.len() != self.dimensions {
                    return Err(EmbedError::Dimension {
                        expected: self.dimensions,
                        got: vector.len(),
                    });
                }
            }

            all.extend(body.embeddings);
        }

        Ok(all)
    }
}

/// Build the canonical embed text for a memory:
/// `"[domain] (pattern_type) title detail source_section"`, empty
/// fields omitted, whitespace-joined, truncated to 512 characters.
pub fn embed_text(
    domain: &str,
    pattern_type: Option<PatternType>,
    title: &str,
    detail: &str,
    source_section: Option<&str>,
) -> String {
    let mut parts: Vec<String> = Vec::with_capacity(5);
    if !domain.is_empty() {
        parts.push(format!("[{}]", domain));
    }
    if let Some(pt) = pattern_type {
        parts.push(format!("({})", pt.as_str()));
    }
    if !title.is_empty() {
        parts.push(title.to_string());
    }
    if !detail.is_empty() {
        parts.push(detail.to_string());
    }
    if let Some(section) = source_section {
        if !section.is_empty() {
            parts.push(section.to_string());
        }
    }
    truncate_chars(&parts.join(" "), MAX_EMBED_CHARS)
}

/// Truncate on a character boundary
fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

// ============================================================================
// QUERY CACHE
// ============================================================================

/// Process-local cache of query-text embeddings.
///
/// TTL-bounded LRU: entries older than the TTL read as misses and are
/// dropped; the capacity cap evicts oldest-first.
pub struct QueryEmbeddingCache {
    entries: LruCache<String, (Instant, Vec<f32>)>,
    ttl: Duration,
}

impl QueryEmbeddingCache {
    /// Create a cache with the given TTL
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: LruCache::new(
                NonZeroUsize::new(QUERY_CACHE_CAPACITY).expect("capacity is non-zero"),
            ),
            ttl,
        }
    }

    /// Fetch a cached embedding, dropping it if expired
    pub fn get(&mut self, query: &str) -> Option<Vec<f32>> {
        let expired = match self.entries.get(query) {
            Some((stamp, vector)) => {
                if stamp.elapsed() <= self.ttl {
                    return Some(vector.clone());
                }
                true
            }
            None => false,
        };
        if expired {
            self.entries.pop(query);
        }
        None
    }

    /// Insert an embedding for a query text
    pub fn put(&mut self, query: String, vector: Vec<f32>) {
        self.entries.put(query, (Instant::now(), vector));
    }

    /// Number of live entries (expired entries included until touched)
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ============================================================================
// TESTS
// ============================================================================
