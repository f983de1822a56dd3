mod helpers;

use helpers::{engine_with_oracle, test_engine};
use mnemon_core::{CandidateEntry, PatternType, RetrievalRequest, SourceStamp};

fn candidate(domain: &str, title: &str, detail: &str) -> CandidateEntry {
    CandidateEntry {
        domain: domain.to_string(),
        pattern_type: Some(PatternType::Fact),
        title: title.to_string(),
        detail: detail.to_string(),
        source: Some("knowledge/notes.md".to_string()),
        source_section: None,
        tags: vec!["SQLite".to_string()],
    }
}

#[test]
fn ingest_without_oracle_inserts_unembedded() {
    let (_dir, engine) = test_engine();

    let entries = vec![
        candidate("db", "WAL mode", "Use WAL mode for concurrent SQLite access"),
        candidate("db", "Busy timeout", "Set a busy timeout so writers do not fail fast"),
    ];
    let report = engine.ingest(&entries, "atomic", None, false).unwrap();

    assert_eq!(report.added, 2);
    assert_eq!(report.embedded, 0);
    assert_eq!(report.embed_failures, 1);
    assert_eq!(engine.store().count().unwrap(), 2);

    // Rows landed with the deterministic initial state
    let top = engine.store().top_by_activation(10).unwrap();
    assert!(top.iter().all(|r| (r.activation - 0.5).abs() < 1e-9));
    assert!(top.iter().all(|r| r.retrieval_count == 1));
    assert!(top.iter().all(|r| !r.has_embedding));
    assert!(top.iter().all(|r| r.id.starts_with("db:atomic:")));
}

#[test]
fn reingesting_the_same_candidates_adds_nothing() {
    let (_dir, engine) = test_engine();

    let entries = vec![
        candidate("db", "WAL mode", "Use WAL mode for concurrent SQLite access"),
        candidate("db", "Busy timeout", "Set a busy timeout so writers do not fail fast"),
    ];
    engine.ingest(&entries, "atomic", None, false).unwrap();
    let second = engine.ingest(&entries, "atomic", None, false).unwrap();

    assert_eq!(second.added, 0);
    assert_eq!(second.skipped_existing, 2);
    assert_eq!(engine.store().count().unwrap(), 2);
}

#[test]
fn same_title_different_channel_gets_a_distinct_id() {
    let (_dir, engine) = test_engine();

    let entries = vec![candidate("db", "WAL mode", "Use WAL mode for concurrent SQLite access")];
    engine.ingest(&entries, "atomic", None, false).unwrap();
    let report = engine.ingest(&entries, "session", None, false).unwrap();

    assert_eq!(report.added, 1);
    assert_eq!(engine.store().count().unwrap(), 2);
}

#[test]
fn unchanged_fingerprint_skips_the_source() {
    let (_dir, engine) = test_engine();

    let entries = vec![candidate("db", "WAL mode", "Use WAL mode for concurrent SQLite access")];
    let stamp = SourceStamp::of("knowledge/notes.md", b"# notes v1");

    let first = engine.ingest(&entries, "atomic", Some(&stamp), false).unwrap();
    assert_eq!(first.added, 1);
    assert!(!first.source_unchanged);

    // Same fingerprint: the whole source is skipped
    let second = engine.ingest(&entries, "atomic", Some(&stamp), false).unwrap();
    assert!(second.source_unchanged);
    assert_eq!(second.added, 0);
    assert_eq!(second.skipped_existing, 0);

    // Force overrides the fingerprint check (the id dedup still holds)
    let forced = engine.ingest(&entries, "atomic", Some(&stamp), true).unwrap();
    assert!(!forced.source_unchanged);
    assert_eq!(forced.skipped_existing, 1);

    // A changed source is processed again
    let stamp2 = SourceStamp::of("knowledge/notes.md", b"# notes v2");
    let third = engine.ingest(&entries, "atomic", Some(&stamp2), false).unwrap();
    assert!(!third.source_unchanged);
}

#[test]
fn semantic_duplicate_against_store_is_rejected() {
    // Both phrasings embed to the same direction at the mock oracle
    let (_dir, engine) = engine_with_oracle(vec![("WAL", [1.0, 0.0, 0.0, 0.0])]);

    let first = vec![candidate(
        "db",
        "WAL for readers",
        "Enable SQLite WAL for multi-reader safety",
    )];
    let report = engine.ingest(&first, "atomic", None, false).unwrap();
    assert_eq!(report.added, 1);
    assert_eq!(report.embedded, 1);

    let near_duplicate = vec![candidate(
        "db",
        "WAL for concurrency",
        "Use WAL mode for concurrent SQLite access",
    )];
    let report = engine.ingest(&near_duplicate, "atomic", None, false).unwrap();

    assert_eq!(report.added, 0);
    assert_eq!(report.skipped_duplicate, 1);
    assert_eq!(engine.store().count().unwrap(), 1);
}

#[test]
fn semantic_duplicate_within_one_batch_is_rejected() {
    let (_dir, engine) = engine_with_oracle(vec![("WAL", [1.0, 0.0, 0.0, 0.0])]);

    let entries = vec![
        candidate("db", "WAL for readers", "Enable SQLite WAL for multi-reader safety"),
        candidate("db", "WAL for concurrency", "Use WAL mode for concurrent SQLite access"),
    ];
    let report = engine.ingest(&entries, "atomic", None, false).unwrap();

    assert_eq!(report.added, 1);
    assert_eq!(report.skipped_duplicate, 1);
}

#[test]
fn ingested_memories_are_retrievable_semantically() {
    let (_dir, engine) = engine_with_oracle(vec![
        ("WAL", [1.0, 0.0, 0.0, 0.0]),
        ("latency", [0.0, 1.0, 0.0, 0.0]),
    ]);

    let entries = vec![
        candidate("db", "WAL for readers", "Enable SQLite WAL for multi-reader safety"),
        candidate("tts", "Streaming", "Streaming synthesis halves latency for long prompts"),
    ];
    let report = engine.ingest(&entries, "atomic", None, false).unwrap();
    assert_eq!(report.added, 2);
    assert_eq!(report.embedded, 2);

    // The query embeds to the WAL direction; only the db entry clears
    // the semantic floor.
    let results = engine
        .retrieve(&RetrievalRequest::new("how does WAL help"))
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].memory.domain, "db");
}

#[test]
fn tags_are_lowercased_on_ingest() {
    let (_dir, engine) = test_engine();

    let entries = vec![candidate("db", "WAL mode", "Use WAL mode for concurrent SQLite access")];
    engine.ingest(&entries, "atomic", None, false).unwrap();

    let top = engine.store().top_by_activation(1).unwrap();
    let full = engine.store().get_memory(&top[0].id).unwrap().unwrap();
    assert_eq!(full.tags, vec!["sqlite".to_string()]);
}

#[test]
fn backfill_repairs_missing_embeddings() {
    // Ingest with a dead oracle, then back-fill against a live one by
    // rebuilding the engine over the same store.
    let dir = tempfile::tempdir().unwrap();
    let mut config = helpers::test_config(&dir);

    let engine = mnemon_core::MemoryEngine::new(config.clone()).unwrap();
    let entries = vec![candidate("db", "WAL mode", "Use WAL mode for concurrent SQLite access")];
    let report = engine.ingest(&entries, "atomic", None, false).unwrap();
    assert_eq!(report.embedded, 0);
    drop(engine);

    config.embed_url = helpers::spawn_mock_oracle(vec![("WAL", [1.0, 0.0, 0.0, 0.0])]);
    let engine = mnemon_core::MemoryEngine::new(config).unwrap();
    let report = engine.backfill_embeddings().unwrap();
    assert_eq!(report.embedded, 1);
    assert_eq!(report.failed, 0);

    let top = engine.store().top_by_activation(1).unwrap();
    assert!(top[0].has_embedding);
}
