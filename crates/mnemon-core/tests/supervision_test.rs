mod helpers;

use helpers::{insert, record, test_engine};
use mnemon_core::{MemoryStatus, PatternType, RetrievalRequest, SupervisionOutcome};

#[test]
fn deprecation_hides_a_from_retrieval_but_keeps_b() {
    let (_dir, engine) = test_engine();

    // A would otherwise win on activation alone
    let a = record(
        "db:atomic:0000000a",
        "db",
        Some(PatternType::Fact),
        "Old advice",
        "Open a new connection per query to stay safe",
        100.0,
    );
    let b = record(
        "db:atomic:0000000b",
        "db",
        Some(PatternType::Correction),
        "Current advice",
        "Reuse pooled connections; per-query connections thrash WAL",
        1.0,
    );
    insert(&engine, a.clone(), None);
    insert(&engine, b.clone(), None);

    assert_eq!(
        engine.deprecate(&a.id, &b.id).unwrap(),
        SupervisionOutcome::Applied
    );

    let results = engine.retrieve(&RetrievalRequest::new("")).unwrap();
    assert!(results.iter().any(|r| r.memory.id == b.id));
    assert!(results.iter().all(|r| r.memory.id != a.id));

    // The deprecated row is retained with its provenance, not deleted
    let stored = engine.store().get_memory(&a.id).unwrap().unwrap();
    assert_eq!(stored.status, MemoryStatus::Deprecated);
    assert_eq!(stored.superseded_by.as_deref(), Some(b.id.as_str()));
    assert_eq!(engine.store().count().unwrap(), 2);
}

#[test]
fn supervision_against_missing_ids_mutates_nothing() {
    let (_dir, engine) = test_engine();

    let a = record(
        "db:atomic:0000000a",
        "db",
        Some(PatternType::Fact),
        "Entry",
        "An entry that must stay untouched on a failed operation",
        1.0,
    );
    insert(&engine, a.clone(), None);

    assert_eq!(
        engine.deprecate("db:atomic:missing0", &a.id).unwrap(),
        SupervisionOutcome::NotFound {
            id: "db:atomic:missing0".to_string()
        }
    );
    assert_eq!(
        engine.deprecate(&a.id, "db:atomic:missing0").unwrap(),
        SupervisionOutcome::NotFound {
            id: "db:atomic:missing0".to_string()
        }
    );
    assert_eq!(
        engine
            .mark_correction("db:atomic:missing0", &a.id)
            .unwrap(),
        SupervisionOutcome::NotFound {
            id: "db:atomic:missing0".to_string()
        }
    );

    let stored = engine.store().get_memory(&a.id).unwrap().unwrap();
    assert_eq!(stored.status, MemoryStatus::Active);
    assert!(stored.superseded_by.is_none());
}

#[test]
fn a_correction_stays_active_and_linked() {
    let (_dir, engine) = test_engine();

    let wrong = record(
        "db:atomic:0000000a",
        "db",
        Some(PatternType::Fact),
        "Wrong claim",
        "The default page size is always optimal for this workload",
        5.0,
    );
    let fix = record(
        "db:atomic:0000000b",
        "db",
        Some(PatternType::Correction),
        "Measured correction",
        "8k pages cut large-row read time by a quarter in benchmarks",
        1.0,
    );
    insert(&engine, wrong.clone(), None);
    insert(&engine, fix.clone(), None);

    assert_eq!(
        engine.mark_correction(&fix.id, &wrong.id).unwrap(),
        SupervisionOutcome::Applied
    );

    let stored = engine.store().get_memory(&fix.id).unwrap().unwrap();
    assert_eq!(stored.corrects.as_deref(), Some(wrong.id.as_str()));
    assert_eq!(stored.status, MemoryStatus::Active);

    // The corrected memory stays active too; correction is a link,
    // not a supersession.
    let results = engine.retrieve(&RetrievalRequest::new("")).unwrap();
    assert!(results.iter().any(|r| r.memory.id == fix.id));
    assert!(results.iter().any(|r| r.memory.id == wrong.id));
}
