//! Shared helpers for integration tests
//!
//! Provides throwaway engines over temporary databases and a minimal
//! in-process embedding oracle speaking the Ollama wire shape, so the
//! semantic paths can be exercised end-to-end without a real model.

// Each integration test binary compiles its own copy; not every test
// uses every helper.
#![allow(dead_code)]

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;

use chrono::Utc;
use tempfile::TempDir;

use mnemon_core::{MemoryEngine, MemoryRecord, MemoryStatus, MnemonConfig, PatternType};

/// Vector dimension used across the integration tests
pub const TEST_DIMENSIONS: usize = 4;

/// Config over a temp dir, pointing the embedder at a dead port so
/// oracle calls fail fast and the engine degrades.
pub fn test_config(dir: &TempDir) -> MnemonConfig {
    let mut config = MnemonConfig::default();
    config.db_path = Some(dir.path().join("test.db"));
    config.embed_url = dead_oracle_url();
    config.embed_dimensions = TEST_DIMENSIONS;
    config
}

/// A URL nothing is listening on: bind an ephemeral port, then drop it
fn dead_oracle_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);
    format!("http://{}", addr)
}

/// Engine with no reachable oracle
pub fn test_engine() -> (TempDir, MemoryEngine) {
    let dir = tempfile::tempdir().expect("temp dir");
    let engine = MemoryEngine::new(test_config(&dir)).expect("engine");
    (dir, engine)
}

/// Engine wired to a mock oracle with substring → vector rules
pub fn engine_with_oracle(rules: Vec<(&'static str, [f32; TEST_DIMENSIONS])>) -> (TempDir, MemoryEngine) {
    let dir = tempfile::tempdir().expect("temp dir");
    let mut config = test_config(&dir);
    config.embed_url = spawn_mock_oracle(rules);
    let engine = MemoryEngine::new(config).expect("engine");
    (dir, engine)
}

/// Build a memory record for direct store inserts
pub fn record(
    id: &str,
    domain: &str,
    pattern_type: Option<PatternType>,
    title: &str,
    detail: &str,
    activation: f64,
) -> MemoryRecord {
    MemoryRecord {
        id: id.to_string(),
        title: title.to_string(),
        detail: detail.to_string(),
        domain: domain.to_string(),
        pattern_type,
        source: None,
        source_section: None,
        created: Utc::now(),
        last_retrieved: None,
        retrieval_count: 1,
        activation,
        content_hash: String::new(),
        status: MemoryStatus::Active,
        superseded_by: None,
        corrects: None,
        tags: vec![],
        has_embedding: false,
    }
}

/// Insert one record with an optional embedding
pub fn insert(engine: &MemoryEngine, rec: MemoryRecord, embedding: Option<Vec<f32>>) {
    engine
        .store()
        .insert_batch(&[(rec, embedding)])
        .expect("insert");
}

// ============================================================================
// MOCK EMBEDDING ORACLE
// ============================================================================

/// Spawn a tiny HTTP server answering `POST /api/embed`. Each input
/// text gets the vector of the first matching substring rule, or a
/// deterministic hash-derived unit vector. Returns the base URL.
pub fn spawn_mock_oracle(rules: Vec<(&'static str, [f32; TEST_DIMENSIONS])>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock oracle");
    let addr = listener.local_addr().expect("local addr");

    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(stream) = stream else { continue };
            let rules = rules.clone();
            thread::spawn(move || handle_connection(stream, &rules));
        }
    });

    format!("http://{}", addr)
}

fn handle_connection(stream: TcpStream, rules: &[(&'static str, [f32; TEST_DIMENSIONS])]) {
    let mut reader = BufReader::new(stream);
    let mut content_length = 0usize;
    let mut saw_request_line = false;

    loop {
        let mut line = String::new();
        match reader.read_line(&mut line) {
            Ok(0) => return,
            Ok(_) => {}
            Err(_) => return,
        }
        if !saw_request_line {
            saw_request_line = true;
            continue;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            break;
        }
        if let Some(value) = trimmed
            .to_ascii_lowercase()
            .strip_prefix("content-length:")
            .map(str::trim)
            .and_then(|v| v.parse::<usize>().ok())
        {
            content_length = value;
        }
    }

    let mut body = vec![0u8; content_length];
    if reader.read_exact(&mut body).is_err() {
        return;
    }

    let parsed: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(_) => return,
    };
    let inputs: Vec<String> = parsed["input"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    let embeddings: Vec<Vec<f32>> = inputs
        .iter()
        .map(|text| vector_for(text, rules).to_vec())
        .collect();

    let payload = serde_json::to_string(&serde_json::json!({ "embeddings": embeddings })).unwrap();
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        payload.len(),
        payload
    );
    let _ = reader.get_mut().write_all(response.as_bytes());
}

fn vector_for(text: &str, rules: &[(&'static str, [f32; TEST_DIMENSIONS])]) -> [f32; TEST_DIMENSIONS] {
    for (needle, vector) in rules {
        if text.contains(needle) {
            return *vector;
        }
    }

    // Deterministic fallback: unit vector seeded from the text bytes
    let mut seed: u32 = 0x811c9dc5;
    for b in text.as_bytes() {
        seed ^= u32::from(*b);
        seed = seed.wrapping_mul(0x01000193);
    }
    let mut v = [0.0_f32; TEST_DIMENSIONS];
    for (i, slot) in v.iter_mut().enumerate() {
        let bits = seed.rotate_left((i * 8) as u32) & 0xffff;
        *slot = (bits as f32 / 65535.0) - 0.5;
    }
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt().max(1e-6);
    for slot in &mut v {
        *slot /= norm;
    }
    v
}
