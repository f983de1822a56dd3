//! SQLite Storage Implementation
//!
//! Core persistence for memories, tags, co-occurrence edges, and meta.
//! Uses separate reader/writer connections for interior mutability so
//! all methods take `&self` and the store is `Send + Sync`.

use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use rusqlite::{params, Connection, OptionalExtension};

use crate::embed::{from_blob, to_blob};
use crate::memory::{MemoryRecord, MemoryStats, MemoryStatus, PatternType, SupervisionOutcome};

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Storage error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The database could not be reached or a statement failed
    #[error("store unavailable: {0}")]
    Unavailable(#[from] rusqlite::Error),
    /// Stored data violates an invariant
    #[error("store corruption: {0}")]
    Corruption(String),
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Initialization error
    #[error("initialization error: {0}")]
    Init(String),
}

type Result<T> = std::result::Result<T, StoreError>;

// ============================================================================
// STORE
// ============================================================================

/// Columns fetched for record mapping; the embedding blob is fetched
/// separately where a scan actually needs it.
const MEMORY_COLUMNS: &str = "id, title, detail, domain, pattern_type, source, source_section, \
     created, last_retrieved, retrieval_count, activation, content_hash, status, \
     superseded_by, corrects, (embedding IS NOT NULL) AS has_embedding";

/// Rows that retrieval may see. NULL status reads as active for rows
/// written before the status column existed.
const ACTIVE_PREDICATE: &str = "(status IS NULL OR status != 'deprecated')";

/// Embedded relational store
pub struct Store {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
}

impl Store {
    /// Apply PRAGMAs to a connection
    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -64000;
             PRAGMA temp_store = MEMORY;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        Ok(())
    }

    /// Resolve the default store path under the platform data directory
    fn default_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("ai", "mnemon", "mnemon")
            .ok_or_else(|| StoreError::Init("could not determine project directories".to_string()))?;
        let data_dir = proj_dirs.data_dir();
        std::fs::create_dir_all(data_dir)?;
        Ok(data_dir.join("mnemon.db"))
    }

    /// Open (or create) the store at the given path, applying pending
    /// migrations on the writer connection.
    pub fn open(db_path: Option<PathBuf>) -> Result<Self> {
        let path = match db_path {
            Some(p) => {
                if let Some(parent) = p.parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent)?;
                    }
                }
                p
            }
            None => Self::default_path()?,
        };

        let writer_conn = Connection::open(&path)?;
        Self::configure_connection(&writer_conn)?;
        super::migrations::apply_migrations(&writer_conn)?;

        if super::migrations::get_current_version(&writer_conn) == 0 {
            return Err(StoreError::Corruption(
                "schema_version missing after migrations".to_string(),
            ));
        }

        let reader_conn = Connection::open(&path)?;
        Self::configure_connection(&reader_conn)?;

        Ok(Self {
            writer: Mutex::new(writer_conn),
            reader: Mutex::new(reader_conn),
        })
    }

    fn read(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.reader
            .lock()
            .map_err(|_| StoreError::Init("reader lock poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.writer
            .lock()
            .map_err(|_| StoreError::Init("writer lock poisoned".to_string()))
    }

    // ========================================================================
    // ROW MAPPING
    // ========================================================================

    /// Parse RFC3339 timestamp
    fn parse_timestamp(value: &str, field_name: &str) -> rusqlite::Result<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(value)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    Box::new(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        format!("invalid {} timestamp '{}': {}", field_name, value, e),
                    )),
                )
            })
    }

    /// Convert a row (selected via [`MEMORY_COLUMNS`]) to a MemoryRecord
    fn row_to_memory(row: &rusqlite::Row) -> rusqlite::Result<MemoryRecord> {
        let created: String = row.get("created")?;
        let created = Self::parse_timestamp(&created, "created")?;

        let last_retrieved: Option<String> = row.get("last_retrieved")?;
        let last_retrieved = last_retrieved.and_then(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
        });

        let pattern_type: Option<String> = row.get("pattern_type")?;
        let status: Option<String> = row.get("status")?;
        let has_embedding: i64 = row.get("has_embedding")?;

        Ok(MemoryRecord {
            id: row.get("id")?,
            title: row.get("title")?,
            detail: row.get("detail")?,
            domain: row.get("domain")?,
            pattern_type: pattern_type.as_deref().and_then(PatternType::parse_name),
            source: row.get("source")?,
            source_section: row.get("source_section")?,
            created,
            last_retrieved,
            retrieval_count: row.get("retrieval_count")?,
            activation: row.get("activation")?,
            content_hash: row.get("content_hash")?,
            status: status
                .as_deref()
                .map(MemoryStatus::parse_name)
                .unwrap_or_default(),
            superseded_by: row.get("superseded_by")?,
            corrects: row.get("corrects")?,
            tags: vec![],
            has_embedding: has_embedding != 0,
        })
    }

    // ========================================================================
    // MEMORY READS
    // ========================================================================

    /// Fetch a memory by id, with its tags hydrated
    pub fn get_memory(&self, id: &str) -> Result<Option<MemoryRecord>> {
        let reader = self.read()?;
        let sql = format!("SELECT {} FROM memories WHERE id = ?1", MEMORY_COLUMNS);
        let record = reader
            .prepare(&sql)?
            .query_row(params![id], Self::row_to_memory)
            .optional()?;

        let Some(mut record) = record else {
            return Ok(None);
        };

        let mut stmt =
            reader.prepare("SELECT tag FROM memory_tags WHERE memory_id = ?1 ORDER BY tag")?;
        record.tags = stmt
            .query_map(params![id], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect();

        Ok(Some(record))
    }

    /// Whether a row with the given id exists (active or deprecated)
    pub fn id_exists(&self, id: &str) -> Result<bool> {
        let reader = self.read()?;
        let count: i64 = reader.query_row(
            "SELECT COUNT(*) FROM memories WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// All active memories carrying an embedding of the expected
    /// dimension. Rows whose blob length disagrees with the dimension
    /// are skipped with a warning (treated as missing).
    pub fn scan_embedded(&self, dimensions: usize) -> Result<Vec<(MemoryRecord, Vec<f32>)>> {
        let reader = self.read()?;
        let sql = format!(
            "SELECT {}, embedding FROM memories WHERE {} AND embedding IS NOT NULL",
            MEMORY_COLUMNS, ACTIVE_PREDICATE
        );
        let mut stmt = reader.prepare(&sql)?;
        let rows: Vec<(MemoryRecord, Vec<u8>)> = stmt
            .query_map([], |row| {
                let record = Self::row_to_memory(row)?;
                let blob: Vec<u8> = row.get("embedding")?;
                Ok((record, blob))
            })?
            .filter_map(|r| r.ok())
            .collect();

        let mut result = Vec::with_capacity(rows.len());
        for (record, blob) in rows {
            match from_blob(&blob, dimensions) {
                Some(vector) => result.push((record, vector)),
                None => {
                    tracing::warn!(
                        id = %record.id,
                        blob_len = blob.len(),
                        expected = dimensions * 4,
                        "embedding blob length mismatch, skipping row"
                    );
                }
            }
        }
        Ok(result)
    }

    /// Active memories whose domain matches any hint
    /// (case-insensitive substring), each hint's group ordered by
    /// activation descending. Duplicates across hints are dropped.
    pub fn scan_domains(&self, domains: &[String]) -> Result<Vec<MemoryRecord>> {
        let reader = self.read()?;
        let sql = format!(
            "SELECT {} FROM memories
             WHERE {} AND instr(lower(domain), lower(?1)) > 0
             ORDER BY activation DESC",
            MEMORY_COLUMNS, ACTIVE_PREDICATE
        );
        let mut stmt = reader.prepare(&sql)?;

        let mut seen = std::collections::HashSet::new();
        let mut result = Vec::new();
        for hint in domains {
            let rows = stmt.query_map(params![hint], Self::row_to_memory)?;
            for record in rows.filter_map(|r| r.ok()) {
                if seen.insert(record.id.clone()) {
                    result.push(record);
                }
            }
        }
        Ok(result)
    }

    /// Top active memories by activation
    pub fn top_by_activation(&self, limit: usize) -> Result<Vec<MemoryRecord>> {
        let reader = self.read()?;
        let sql = format!(
            "SELECT {} FROM memories WHERE {} ORDER BY activation DESC LIMIT ?1",
            MEMORY_COLUMNS, ACTIVE_PREDICATE
        );
        let mut stmt = reader.prepare(&sql)?;
        let rows = stmt.query_map(params![limit as i64], Self::row_to_memory)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Active memories below the activation threshold, lowest first
    pub fn low_activation(&self, threshold: f64, limit: usize) -> Result<Vec<MemoryRecord>> {
        let reader = self.read()?;
        let sql = format!(
            "SELECT {} FROM memories WHERE {} AND activation < ?1
             ORDER BY activation ASC LIMIT ?2",
            MEMORY_COLUMNS, ACTIVE_PREDICATE
        );
        let mut stmt = reader.prepare(&sql)?;
        let rows = stmt.query_map(params![threshold, limit as i64], Self::row_to_memory)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Distinct domains among active memories
    pub fn distinct_domains(&self) -> Result<Vec<String>> {
        let reader = self.read()?;
        let sql = format!(
            "SELECT DISTINCT domain FROM memories WHERE {} ORDER BY domain",
            ACTIVE_PREDICATE
        );
        let mut stmt = reader.prepare(&sql)?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Total row count
    pub fn count(&self) -> Result<i64> {
        let reader = self.read()?;
        Ok(reader.query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))?)
    }

    /// Active row count
    pub fn count_active(&self) -> Result<i64> {
        let reader = self.read()?;
        let sql = format!("SELECT COUNT(*) FROM memories WHERE {}", ACTIVE_PREDICATE);
        Ok(reader.query_row(&sql, [], |row| row.get(0))?)
    }

    // ========================================================================
    // MEMORY WRITES
    // ========================================================================

    /// Insert a batch of memories with optional embedding blobs and
    /// their tags, in one transaction. Existing ids are left untouched.
    /// Returns the number of rows actually inserted.
    pub fn insert_batch(&self, items: &[(MemoryRecord, Option<Vec<f32>>)]) -> Result<usize> {
        let mut writer = self.write()?;
        let tx = writer.transaction()?;
        let mut inserted = 0;

        for (record, embedding) in items {
            let blob = embedding.as_deref().map(to_blob);
            let changed = tx.execute(
                "INSERT OR IGNORE INTO memories (
                    id, title, detail, domain, pattern_type, source, source_section,
                    created, last_retrieved, retrieval_count, activation, content_hash,
                    embedding, status, superseded_by, corrects
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                params![
                    record.id,
                    record.title,
                    record.detail,
                    record.domain,
                    record.pattern_type.map(|pt| pt.as_str()),
                    record.source,
                    record.source_section,
                    record.created.to_rfc3339(),
                    record.last_retrieved.map(|t| t.to_rfc3339()),
                    record.retrieval_count,
                    record.activation,
                    record.content_hash,
                    blob,
                    record.status.as_str(),
                    record.superseded_by,
                    record.corrects,
                ],
            )?;

            if changed > 0 {
                inserted += 1;
                for tag in &record.tags {
                    tx.execute(
                        "INSERT OR IGNORE INTO memory_tags (memory_id, tag) VALUES (?1, ?2)",
                        params![record.id, tag.to_lowercase()],
                    )?;
                }
            }
        }

        tx.commit()?;
        Ok(inserted)
    }

    /// Write (or replace) the embedding blob for a memory
    pub fn write_embedding(&self, id: &str, vector: &[f32]) -> Result<()> {
        let writer = self.write()?;
        writer.execute(
            "UPDATE memories SET embedding = ?1 WHERE id = ?2",
            params![to_blob(vector), id],
        )?;
        Ok(())
    }

    /// Read a memory's embedding, validating the blob length
    pub fn get_embedding(&self, id: &str, dimensions: usize) -> Result<Option<Vec<f32>>> {
        let reader = self.read()?;
        let blob: Option<Vec<u8>> = reader
            .query_row(
                "SELECT embedding FROM memories WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        Ok(blob.and_then(|b| from_blob(&b, dimensions)))
    }

    /// Active memories missing an embedding blob
    pub fn missing_embeddings(&self) -> Result<Vec<MemoryRecord>> {
        let reader = self.read()?;
        let sql = format!(
            "SELECT {} FROM memories WHERE {} AND embedding IS NULL ORDER BY created",
            MEMORY_COLUMNS, ACTIVE_PREDICATE
        );
        let mut stmt = reader.prepare(&sql)?;
        let rows = stmt.query_map([], Self::row_to_memory)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    // ========================================================================
    // ACTIVATION
    // ========================================================================

    /// Bump activation, retrieval count, and last-retrieved for a set
    /// of ids in one transaction. Returns the number of affected rows.
    pub fn bump(&self, ids: &[String], delta: f64, now: DateTime<Utc>) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let placeholders: Vec<String> = (3..3 + ids.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "UPDATE memories SET
                activation = activation + ?1,
                retrieval_count = retrieval_count + 1,
                last_retrieved = ?2
             WHERE id IN ({})",
            placeholders.join(", ")
        );

        let now_s = now.to_rfc3339();
        let mut sql_params: Vec<&dyn rusqlite::ToSql> = vec![&delta, &now_s];
        for id in ids {
            sql_params.push(id);
        }

        let writer = self.write()?;
        let affected = writer.execute(&sql, sql_params.as_slice())?;
        Ok(affected)
    }

    /// Multiply every row's activation by the factor. Single statement,
    /// single transaction; fatal on error with no partial decay.
    pub fn decay(&self, factor: f64) -> Result<usize> {
        let writer = self.write()?;
        let affected = writer.execute(
            "UPDATE memories SET activation = activation * ?1",
            params![factor],
        )?;
        Ok(affected)
    }

    // ========================================================================
    // CO-OCCURRENCE
    // ========================================================================

    /// Add +1 to both directed edges of every pair, in one transaction.
    /// Returns the number of logical pairs wired.
    pub fn wire_pairs(&self, pairs: &[(String, String)]) -> Result<usize> {
        if pairs.is_empty() {
            return Ok(0);
        }

        let mut writer = self.write()?;
        let tx = writer.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO cooccurrences (a, b, weight) VALUES (?1, ?2, 1.0)
                 ON CONFLICT(a, b) DO UPDATE SET weight = weight + 1.0",
            )?;
            for (a, b) in pairs {
                stmt.execute(params![a, b])?;
                stmt.execute(params![b, a])?;
            }
        }
        tx.commit()?;
        Ok(pairs.len())
    }

    /// Top-K neighbours of an id by descending edge weight
    pub fn neighbours(&self, id: &str, k: usize) -> Result<Vec<(String, f64)>> {
        let reader = self.read()?;
        let mut stmt = reader.prepare(
            "SELECT b, weight FROM cooccurrences WHERE a = ?1 ORDER BY weight DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![id, k as i64], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
        })?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Weight of the directed edge (a, b); 0 when absent
    pub fn edge_weight(&self, a: &str, b: &str) -> Result<f64> {
        let reader = self.read()?;
        let weight: Option<f64> = reader
            .query_row(
                "SELECT weight FROM cooccurrences WHERE a = ?1 AND b = ?2",
                params![a, b],
                |row| row.get(0),
            )
            .optional()?;
        Ok(weight.unwrap_or(0.0))
    }

    // ========================================================================
    // SUPERVISION
    // ========================================================================

    /// Deprecate `old_id` in favour of `new_id`. Both must exist; on a
    /// missing id nothing is mutated and the missing id is reported.
    pub fn deprecate(&self, old_id: &str, new_id: &str) -> Result<SupervisionOutcome> {
        if !self.id_exists(old_id)? {
            return Ok(SupervisionOutcome::NotFound {
                id: old_id.to_string(),
            });
        }
        if !self.id_exists(new_id)? {
            return Ok(SupervisionOutcome::NotFound {
                id: new_id.to_string(),
            });
        }

        let writer = self.write()?;
        writer.execute(
            "UPDATE memories SET status = 'deprecated', superseded_by = ?1 WHERE id = ?2",
            params![new_id, old_id],
        )?;
        Ok(SupervisionOutcome::Applied)
    }

    /// Mark `correction_id` as correcting `corrected_id`. The
    /// correction itself stays active.
    pub fn mark_correction(
        &self,
        correction_id: &str,
        corrected_id: &str,
    ) -> Result<SupervisionOutcome> {
        if !self.id_exists(correction_id)? {
            return Ok(SupervisionOutcome::NotFound {
                id: correction_id.to_string(),
            });
        }
        if !self.id_exists(corrected_id)? {
            return Ok(SupervisionOutcome::NotFound {
                id: corrected_id.to_string(),
            });
        }

        let writer = self.write()?;
        writer.execute(
            "UPDATE memories SET corrects = ?1 WHERE id = ?2",
            params![corrected_id, correction_id],
        )?;
        Ok(SupervisionOutcome::Applied)
    }

    // ========================================================================
    // META
    // ========================================================================

    /// Read a meta value
    pub fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let reader = self.read()?;
        Ok(reader
            .query_row(
                "SELECT value FROM meta WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Write a meta value
    pub fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        let writer = self.write()?;
        writer.execute(
            "INSERT INTO meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    // ========================================================================
    // STATS
    // ========================================================================

    /// Aggregate statistics over the store
    pub fn stats(&self) -> Result<MemoryStats> {
        let reader = self.read()?;

        let total: i64 = reader.query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))?;
        let deprecated: i64 = reader.query_row(
            "SELECT COUNT(*) FROM memories WHERE status = 'deprecated'",
            [],
            |row| row.get(0),
        )?;
        let with_embedding: i64 = reader.query_row(
            "SELECT COUNT(*) FROM memories WHERE embedding IS NOT NULL",
            [],
            |row| row.get(0),
        )?;

        let sql = format!(
            "SELECT domain, COUNT(*) AS n FROM memories WHERE {}
             GROUP BY domain ORDER BY n DESC",
            ACTIVE_PREDICATE
        );
        let by_domain: Vec<(String, i64)> = reader
            .prepare(&sql)?
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .filter_map(|r| r.ok())
            .collect();

        let sql = format!(
            "SELECT COALESCE(pattern_type, '(none)') AS pt, COUNT(*) AS n
             FROM memories WHERE {} GROUP BY pt ORDER BY n DESC",
            ACTIVE_PREDICATE
        );
        let by_pattern_type: Vec<(String, i64)> = reader
            .prepare(&sql)?
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .filter_map(|r| r.ok())
            .collect();

        let sql = format!(
            "SELECT CASE
                 WHEN activation < 0.0 THEN '< 0'
                 WHEN activation < 0.5 THEN '0 - 0.5'
                 WHEN activation < 2.0 THEN '0.5 - 2'
                 WHEN activation < 10.0 THEN '2 - 10'
                 ELSE '>= 10'
             END AS bucket, COUNT(*) AS n
             FROM memories WHERE {}
             GROUP BY bucket ORDER BY MIN(activation)",
            ACTIVE_PREDICATE
        );
        let activation_buckets: Vec<(String, i64)> = reader
            .prepare(&sql)?
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .filter_map(|r| r.ok())
            .collect();

        let oldest: Option<String> = reader
            .query_row("SELECT MIN(created) FROM memories", [], |row| row.get(0))
            .optional()?
            .flatten();
        let newest: Option<String> = reader
            .query_row("SELECT MAX(created) FROM memories", [], |row| row.get(0))
            .optional()?
            .flatten();

        Ok(MemoryStats {
            total,
            active: total - deprecated,
            deprecated,
            with_embedding,
            by_domain,
            by_pattern_type,
            activation_buckets,
            oldest: oldest.and_then(|s| {
                DateTime::parse_from_rfc3339(&s)
                    .map(|dt| dt.with_timezone(&Utc))
                    .ok()
            }),
            newest: newest.and_then(|s| {
                DateTime::parse_from_rfc3339(&s)
                    .map(|dt| dt.with_timezone(&Utc))
                    .ok()
            }),
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================
