//! Memory Engine
//!
//! The facade composing the store, the embedding oracle client, and
//! the query-embedding cache behind `&self`. Hosts hold one engine for
//! the life of the process; every operation maps to one spec surface:
//! retrieve, ingest, decay, supervise, back-fill.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;

use crate::activation::{self, REFRESH_BUMP, RETRIEVAL_BUMP};
use crate::config::MnemonConfig;
use crate::cooccurrence;
use crate::embed::{cosine, embed_text, EmbeddingClient, QueryEmbeddingCache, EMBED_BATCH_SIZE};
use crate::error::{MemoryError, Result};
use crate::ingest::{
    content_hash, memory_id, semantic_duplicate_of, IngestReport, SourceStamp, INITIAL_ACTIVATION,
};
use crate::memory::{CandidateEntry, MemoryRecord, MemoryStatus, RetrievedMemory};
use crate::retrieval::{
    entry_cost, rank, score_candidate, select, RetrievalRequest, ScoredCandidate,
    ACTIVATION_FALLBACK_LIMIT, SEMANTIC_FLOOR, SIDE_EFFECT_CAP, SPREAD_FILL_THRESHOLD,
    SPREAD_LIMIT,
};
use crate::storage::Store;

// ============================================================================
// REPORTS
// ============================================================================

/// Counters returned by an embedding back-fill pass
#[derive(Debug, Clone, Default, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackfillReport {
    /// Rows that received an embedding
    pub embedded: usize,
    /// Rows whose batch failed at the oracle
    pub failed: usize,
}

// ============================================================================
// ENGINE
// ============================================================================

/// The memory engine
pub struct MemoryEngine {
    config: MnemonConfig,
    store: Store,
    embedder: EmbeddingClient,
    query_cache: Mutex<QueryEmbeddingCache>,
    last_selection: Mutex<Vec<String>>,
}

impl MemoryEngine {
    /// Open the engine with the given configuration
    pub fn new(config: MnemonConfig) -> Result<Self> {
        config.validate()?;
        let store = Store::open(config.db_path.clone())?;
        let embedder = EmbeddingClient::new(
            &config.embed_url,
            &config.embed_model,
            config.embed_dimensions,
        )?;
        let query_cache = Mutex::new(QueryEmbeddingCache::new(Duration::from_millis(
            config.embedding_cache_ttl_ms,
        )));

        Ok(Self {
            config,
            store,
            embedder,
            query_cache,
            last_selection: Mutex::new(vec![]),
        })
    }

    /// The underlying store
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// The active configuration
    pub fn config(&self) -> &MnemonConfig {
        &self.config
    }

    /// A retrieval request carrying the configured limits and weights
    pub fn default_request(&self, query: impl Into<String>) -> RetrievalRequest {
        RetrievalRequest {
            query: query.into(),
            domains: vec![],
            max_entries: self.config.max_entries,
            token_budget: self.config.max_context_tokens,
            weights: crate::retrieval::ScoreWeights {
                semantic: self.config.semantic_weight,
                activation: self.config.activation_weight,
                domain: self.config.domain_weight,
            },
        }
    }

    // ========================================================================
    // QUERY EMBEDDING
    // ========================================================================

    /// Embed the query text, consulting the TTL cache first. Any oracle
    /// failure degrades to `None`; retrieval then proceeds without a
    /// semantic component.
    fn query_embedding(&self, query: &str) -> Option<Vec<f32>> {
        let trimmed = query.trim();
        if trimmed.is_empty() {
            return None;
        }

        if let Ok(mut cache) = self.query_cache.lock() {
            if let Some(cached) = cache.get(trimmed) {
                return Some(cached);
            }
        }

        match self.embedder.embed(trimmed) {
            Ok(vector) => {
                if let Ok(mut cache) = self.query_cache.lock() {
                    cache.put(trimmed.to_string(), vector.clone());
                }
                Some(vector)
            }
            Err(e) => {
                tracing::warn!("query embedding unavailable, degrading: {}", e);
                None
            }
        }
    }

    // ========================================================================
    // RETRIEVAL
    // ========================================================================

    /// Run the full retrieval pipeline for a request
    pub fn retrieve(&self, request: &RetrievalRequest) -> Result<Vec<RetrievedMemory>> {
        let query_embedding = self.query_embedding(&request.query);
        self.retrieve_with_embedding(request, query_embedding)
    }

    /// Run retrieval with a caller-supplied query embedding (`None`
    /// selects the degraded domain-hint / activation-only path).
    pub fn retrieve_with_embedding(
        &self,
        request: &RetrievalRequest,
        query_embedding: Option<Vec<f32>>,
    ) -> Result<Vec<RetrievedMemory>> {
        let now = Utc::now();

        // Candidate selection, with the hard semantic floor applied as
        // soon as similarities exist. An embedded query over a store
        // with no embedded rows falls through to the degraded paths
        // (the floor is vacuous there).
        let mut candidates: Vec<(MemoryRecord, Option<f32>)> = Vec::new();
        let mut semantic = false;
        if let Some(query_vector) = &query_embedding {
            let scan = self.store.scan_embedded(self.config.embed_dimensions)?;
            if !scan.is_empty() {
                semantic = true;
                for (record, vector) in scan {
                    let similarity = cosine(query_vector, &vector);
                    if similarity < SEMANTIC_FLOOR {
                        continue;
                    }
                    candidates.push((record, Some(similarity)));
                }
            }
        }
        if !semantic {
            if !request.domains.is_empty() {
                for record in self.store.scan_domains(&request.domains)? {
                    candidates.push((record, None));
                }
            } else {
                for record in self.store.top_by_activation(ACTIVATION_FALLBACK_LIMIT)? {
                    candidates.push((record, None));
                }
            }
        }

        // Score against the candidate-set p95 so runaway activations
        // cannot dominate.
        let activations: Vec<f64> = candidates.iter().map(|(r, _)| r.activation).collect();
        let p95 = activation::p95(&activations);

        let scored: Vec<ScoredCandidate> = candidates
            .into_iter()
            .map(|(record, similarity)| {
                let norm = activation::normalised(record.activation, p95);
                let score = score_candidate(
                    &record,
                    similarity,
                    norm,
                    &request.domains,
                    &request.weights,
                    now,
                );
                ScoredCandidate {
                    record,
                    similarity,
                    score,
                }
            })
            .collect();

        let char_budget = request.char_budget();
        let selection = select(rank(scored), request.max_entries, char_budget);

        let mut results: Vec<RetrievedMemory> = selection
            .entries
            .into_iter()
            .map(|candidate| RetrievedMemory {
                memory: candidate.record,
                score: candidate.score,
                via_spread: false,
            })
            .collect();

        // Spreading-activation fill when the ranked walk left headroom
        if !results.is_empty()
            && (selection.spent as f64) < SPREAD_FILL_THRESHOLD * char_budget as f64
        {
            let selected_ids: Vec<String> =
                results.iter().map(|r| r.memory.id.clone()).collect();
            let mut remaining = char_budget.saturating_sub(selection.spent);

            for (record, boost) in
                cooccurrence::spread(&self.store, &selected_ids, SPREAD_LIMIT)?
            {
                if results.len() >= request.max_entries {
                    break;
                }
                let cost = entry_cost(&record);
                if cost > remaining {
                    break;
                }
                remaining -= cost;
                results.push(RetrievedMemory {
                    memory: record,
                    score: boost,
                    via_spread: true,
                });
            }
        }

        // Hydrate tags on the final set only
        for result in &mut results {
            if let Some(full) = self.store.get_memory(&result.memory.id)? {
                result.memory.tags = full.tags;
            }
        }

        self.apply_side_effects(&results, now)?;
        Ok(results)
    }

    /// Post-return side effects: bump + wire over the first
    /// [`SIDE_EFFECT_CAP`] selected ids that carry both a domain and a
    /// pattern type. Bump and wire run back to back; neither affects
    /// the ranking already computed.
    fn apply_side_effects(
        &self,
        results: &[RetrievedMemory],
        now: chrono::DateTime<Utc>,
    ) -> Result<()> {
        {
            let mut last = self
                .last_selection
                .lock()
                .map_err(|_| {
                    MemoryError::Store(crate::storage::StoreError::Init(
                        "selection lock poisoned".to_string(),
                    ))
                })?;
            *last = results.iter().map(|r| r.memory.id.clone()).collect();
        }

        let eligible: Vec<&RetrievedMemory> = results
            .iter()
            .filter(|r| !r.memory.domain.is_empty() && r.memory.pattern_type.is_some())
            .take(SIDE_EFFECT_CAP)
            .collect();
        if eligible.is_empty() {
            return Ok(());
        }

        let ids: Vec<String> = eligible.iter().map(|r| r.memory.id.clone()).collect();
        self.store.bump(&ids, RETRIEVAL_BUMP, now)?;

        let records: Vec<&MemoryRecord> = eligible.iter().map(|r| &r.memory).collect();
        cooccurrence::wire(&self.store, &records)?;
        Ok(())
    }

    /// Refresh bump for the most recently returned set, invoked from
    /// the post-tool host callback.
    pub fn refresh_last_selection(&self) -> Result<usize> {
        let ids: Vec<String> = {
            let last = self
                .last_selection
                .lock()
                .map_err(|_| {
                    MemoryError::Store(crate::storage::StoreError::Init(
                        "selection lock poisoned".to_string(),
                    ))
                })?;
            last.iter().take(SIDE_EFFECT_CAP).cloned().collect()
        };
        Ok(self.store.bump(&ids, REFRESH_BUMP, Utc::now())?)
    }

    // ========================================================================
    // INGESTION
    // ========================================================================

    /// Ingest a batch of candidate entries from one channel.
    ///
    /// Dedupes by deterministic id, then semantically against the
    /// stored corpus and earlier candidates in this run; embeds in
    /// oracle-sized chunks, falling back to embedding-less inserts
    /// when a chunk fails. With a [`SourceStamp`], an unchanged
    /// fingerprint skips the whole source unless `force` is set.
    pub fn ingest(
        &self,
        entries: &[CandidateEntry],
        channel: &str,
        stamp: Option<&SourceStamp>,
        force: bool,
    ) -> Result<IngestReport> {
        let mut report = IngestReport::default();

        if let (Some(stamp), false) = (stamp, force) {
            if let Some(previous) = self.store.get_meta(&stamp.meta_key())? {
                if previous == stamp.fingerprint {
                    report.source_unchanged = true;
                    return Ok(report);
                }
            }
        }

        let now = Utc::now();
        let mut pending: Vec<MemoryRecord> = Vec::new();
        let mut seen_ids: HashSet<String> = HashSet::new();

        for entry in entries {
            let id = memory_id(&entry.domain, channel, &entry.title);
            if !seen_ids.insert(id.clone()) || self.store.id_exists(&id)? {
                report.skipped_existing += 1;
                continue;
            }
            pending.push(MemoryRecord {
                id,
                title: entry.title.clone(),
                detail: entry.detail.clone(),
                domain: entry.domain.clone(),
                pattern_type: entry.pattern_type,
                source: entry.source.clone(),
                source_section: entry.source_section.clone(),
                created: now,
                last_retrieved: None,
                retrieval_count: 1,
                activation: INITIAL_ACTIVATION,
                content_hash: content_hash(&entry.detail),
                status: MemoryStatus::Active,
                superseded_by: None,
                corrects: None,
                tags: entry.tags.iter().map(|t| t.to_lowercase()).collect(),
                has_embedding: false,
            });
        }

        // Stored corpus for semantic deduplication
        let stored: Vec<(String, Vec<f32>)> = self
            .store
            .scan_embedded(self.config.embed_dimensions)?
            .into_iter()
            .map(|(record, vector)| (record.id, vector))
            .collect();

        let mut kept_vectors: Vec<(usize, Vec<f32>)> = Vec::new();
        let mut batch_index = 0usize;

        for chunk in pending.chunks(EMBED_BATCH_SIZE) {
            let texts: Vec<String> = chunk
                .iter()
                .map(|r| {
                    embed_text(
                        &r.domain,
                        r.pattern_type,
                        &r.title,
                        &r.detail,
                        r.source_section.as_deref(),
                    )
                })
                .collect();

            let embeddings: Vec<Option<Vec<f32>>> = match self.embedder.embed_batch(&texts) {
                Ok(vectors) => vectors.into_iter().map(Some).collect(),
                Err(e) => {
                    tracing::warn!(
                        "embedding batch failed, inserting {} rows without embeddings: {}",
                        chunk.len(),
                        e
                    );
                    report.embed_failures += 1;
                    vec![None; chunk.len()]
                }
            };

            let mut to_insert: Vec<(MemoryRecord, Option<Vec<f32>>)> = Vec::new();
            for (record, embedding) in chunk.iter().zip(embeddings) {
                if let Some(vector) = &embedding {
                    if let Some(duplicate_of) =
                        semantic_duplicate_of(vector, &stored, &kept_vectors)
                    {
                        tracing::debug!(
                            id = %record.id,
                            duplicate_of = %duplicate_of,
                            "semantic duplicate rejected"
                        );
                        report.skipped_duplicate += 1;
                        batch_index += 1;
                        continue;
                    }
                    kept_vectors.push((batch_index, vector.clone()));
                    report.embedded += 1;
                }
                to_insert.push((record.clone(), embedding));
                batch_index += 1;
            }

            report.added += self.store.insert_batch(&to_insert)?;
        }

        if let Some(stamp) = stamp {
            self.store.set_meta(&stamp.meta_key(), &stamp.fingerprint)?;
        }

        Ok(report)
    }

    // ========================================================================
    // MAINTENANCE
    // ========================================================================

    /// Apply multiplicative decay across all rows. `None` uses the
    /// configured daily factor.
    pub fn decay(&self, factor: Option<f64>) -> Result<usize> {
        let factor = factor.unwrap_or(self.config.decay.daily_factor);
        if !factor.is_finite() || factor < 0.0 {
            return Err(MemoryError::ConfigInvalid(format!(
                "decay factor must be a non-negative number, got {}",
                factor
            )));
        }
        Ok(self.store.decay(factor)?)
    }

    /// Generate embeddings for rows missing them
    pub fn backfill_embeddings(&self) -> Result<BackfillReport> {
        let mut report = BackfillReport::default();
        let missing = self.store.missing_embeddings()?;

        for chunk in missing.chunks(EMBED_BATCH_SIZE) {
            let texts: Vec<String> = chunk
                .iter()
                .map(|r| {
                    embed_text(
                        &r.domain,
                        r.pattern_type,
                        &r.title,
                        &r.detail,
                        r.source_section.as_deref(),
                    )
                })
                .collect();

            match self.embedder.embed_batch(&texts) {
                Ok(vectors) => {
                    for (record, vector) in chunk.iter().zip(vectors) {
                        self.store.write_embedding(&record.id, &vector)?;
                        report.embedded += 1;
                    }
                }
                Err(e) => {
                    tracing::warn!("back-fill batch failed: {}", e);
                    report.failed += chunk.len();
                }
            }
        }

        Ok(report)
    }

    // ========================================================================
    // SUPERVISION
    // ========================================================================

    /// Deprecate a memory in favour of its replacement
    pub fn deprecate(
        &self,
        old_id: &str,
        new_id: &str,
    ) -> Result<crate::memory::SupervisionOutcome> {
        validate_id(old_id)?;
        validate_id(new_id)?;
        Ok(self.store.deprecate(old_id, new_id)?)
    }

    /// Mark one memory as correcting another
    pub fn mark_correction(
        &self,
        correction_id: &str,
        corrected_id: &str,
    ) -> Result<crate::memory::SupervisionOutcome> {
        validate_id(correction_id)?;
        validate_id(corrected_id)?;
        Ok(self.store.mark_correction(correction_id, corrected_id)?)
    }

    // ========================================================================
    // DOMAIN HINTS
    // ========================================================================

    /// Keyword scan of a text against the known domains; used by the
    /// host pre-query hook to derive weak domain hints.
    pub fn scan_domain_hints(&self, text: &str, cap: usize) -> Result<Vec<String>> {
        let lower = text.to_lowercase();
        let hints = self
            .store
            .distinct_domains()?
            .into_iter()
            .filter(|domain| domain != "general" && lower.contains(&domain.to_lowercase()))
            .take(cap)
            .collect();
        Ok(hints)
    }
}

/// Supervision ids must be non-blank before any row is touched
fn validate_id(id: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(MemoryError::InvalidId("blank id".to_string()));
    }
    Ok(())
}
