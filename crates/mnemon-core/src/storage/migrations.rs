//! Database Migrations
//!
//! Schema migration definitions for the storage layer. The current
//! schema version lives in the `meta` table under `schema_version`.

/// Migration definitions
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Initial schema: memories, tags, co-occurrences, meta",
        up: MIGRATION_V1_UP,
    },
    Migration {
        version: 2,
        description: "Correction links between memories",
        up: MIGRATION_V2_UP,
    },
];

/// A database migration
#[derive(Debug, Clone)]
pub struct Migration {
    /// Version number
    pub version: u32,
    /// Description
    pub description: &'static str,
    /// SQL to apply
    pub up: &'static str,
}

/// V1: Initial schema
const MIGRATION_V1_UP: &str = r#"
CREATE TABLE IF NOT EXISTS memories (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    detail TEXT NOT NULL,
    domain TEXT NOT NULL DEFAULT 'general',
    pattern_type TEXT,
    source TEXT,
    source_section TEXT,
    created TEXT NOT NULL,
    last_retrieved TEXT,
    retrieval_count INTEGER NOT NULL DEFAULT 0,
    activation REAL NOT NULL DEFAULT 0.0,
    content_hash TEXT NOT NULL DEFAULT '',

    -- Raw little-endian f32 vector; NULL until embedded or back-filled
    embedding BLOB,

    -- Lifecycle: NULL reads as active for rows predating the column
    status TEXT DEFAULT 'active',
    superseded_by TEXT REFERENCES memories(id)
);

CREATE INDEX IF NOT EXISTS idx_memories_domain ON memories(domain);
CREATE INDEX IF NOT EXISTS idx_memories_activation ON memories(activation DESC);
CREATE INDEX IF NOT EXISTS idx_memories_type ON memories(pattern_type);
CREATE INDEX IF NOT EXISTS idx_memories_domain_activation ON memories(domain, activation DESC);

CREATE TABLE IF NOT EXISTS memory_tags (
    memory_id TEXT NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
    tag TEXT NOT NULL,
    PRIMARY KEY (memory_id, tag)
);

CREATE INDEX IF NOT EXISTS idx_tags_tag ON memory_tags(tag);

-- Symmetric co-occurrence graph: both directed edges are stored so
-- neighbour lookup is a single indexed scan on `a`.
CREATE TABLE IF NOT EXISTS cooccurrences (
    a TEXT NOT NULL,
    b TEXT NOT NULL,
    weight REAL NOT NULL DEFAULT 0,
    PRIMARY KEY (a, b)
);

CREATE INDEX IF NOT EXISTS idx_cooc_a ON cooccurrences(a);
CREATE INDEX IF NOT EXISTS idx_cooc_b ON cooccurrences(b);

-- Key/value metadata: schema version, ingester fingerprints
CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

INSERT INTO meta (key, value) VALUES ('schema_version', '1')
    ON CONFLICT(key) DO UPDATE SET value = '1';
"#;

/// V2: corrective entries point at the memory they correct
const MIGRATION_V2_UP: &str = r#"
ALTER TABLE memories ADD COLUMN corrects TEXT REFERENCES memories(id);

UPDATE meta SET value = '2' WHERE key = 'schema_version';
"#;

/// Get current schema version from database
pub fn get_current_version(conn: &rusqlite::Connection) -> u32 {
    conn.query_row(
        "SELECT value FROM meta WHERE key = 'schema_version'",
        [],
        |row| row.get::<_, String>(0),
    )
    .ok()
    .and_then(|v| v.parse().ok())
    .unwrap_or(0)
}

/// Apply pending migrations
pub fn apply_migrations(conn: &rusqlite::Connection) -> rusqlite::Result<u32> {
    let current_version = get_current_version(conn);
    let mut applied = 0;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                "Applying migration v{}: {}",
                migration.version,
                migration.description
            );
            conn.execute_batch(migration.up)?;
            applied += 1;
        }
    }

    Ok(applied)
}
