//! Host integration hooks
//!
//! Five callbacks the host framework invokes from its cooperative
//! event handlers. Only `before_agent_start` returns data; the rest
//! are fire-and-forget side effects. The session miner is an external
//! program spawned detached; its only channel back to the engine is
//! the store's transactional API, and the host enforces its 120-second
//! wall clock.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use chrono::Utc;

use crate::engine::MemoryEngine;
use crate::memory::RetrievedMemory;

/// Domain hints derived from a prompt keyword scan
const MAX_DOMAIN_HINTS: usize = 3;

/// Host-facing callbacks over a shared engine
pub struct Hooks {
    engine: Arc<MemoryEngine>,
    miner_command: Option<Vec<String>>,
}

impl Hooks {
    /// Wrap an engine
    pub fn new(engine: Arc<MemoryEngine>) -> Self {
        Self {
            engine,
            miner_command: None,
        }
    }

    /// Configure the session-mining command spawned at pre-compaction.
    /// The session file path is appended as the final argument.
    pub fn with_miner_command(mut self, command: Vec<String>) -> Self {
        self.miner_command = if command.is_empty() {
            None
        } else {
            Some(command)
        };
        self
    }

    /// Pre-query: retrieve memories relevant to the prompt and format
    /// them as a context preamble. Returns `None` when nothing useful
    /// was found or the store is unavailable.
    pub fn before_agent_start(&self, prompt: &str) -> Option<String> {
        let hints = self
            .engine
            .scan_domain_hints(prompt, MAX_DOMAIN_HINTS)
            .unwrap_or_default();

        let mut request = self.engine.default_request(prompt);
        request.domains = hints;

        match self.engine.retrieve(&request) {
            Ok(results) if !results.is_empty() => Some(format_context(&results)),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!("pre-query retrieval failed, continuing without context: {}", e);
                None
            }
        }
    }

    /// Post-tool: refresh-bump the most recently returned set
    pub fn after_tool_call(&self, tool_name: &str) {
        match self.engine.refresh_last_selection() {
            Ok(affected) => {
                tracing::debug!(tool_name, affected, "post-tool refresh applied");
            }
            Err(e) => {
                tracing::warn!(tool_name, "post-tool refresh failed: {}", e);
            }
        }
    }

    /// Pre-compaction: spawn the session miner detached against the
    /// session transcript. Never blocks the host.
    pub fn before_compaction(&self, session_file: &Path) {
        let Some(command) = &self.miner_command else {
            tracing::debug!("no session miner configured, skipping pre-compaction mining");
            return;
        };

        let mut child = std::process::Command::new(&command[0]);
        child
            .args(&command[1..])
            .arg(session_file)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        match child.spawn() {
            Ok(process) => {
                tracing::info!(
                    pid = process.id(),
                    session_file = %session_file.display(),
                    "session miner spawned detached"
                );
            }
            Err(e) => {
                tracing::warn!("failed to spawn session miner: {}", e);
            }
        }
    }

    /// Session end: record session bookkeeping in the meta table
    pub fn session_end(&self, session_id: &str, message_count: u64, duration_ms: u64) {
        tracing::info!(session_id, message_count, duration_ms, "session ended");
        let store = self.engine.store();
        let _ = store.set_meta("last_session_id", session_id);
        let _ = store.set_meta("last_session_messages", &message_count.to_string());
        let _ = store.set_meta("last_session_duration_ms", &duration_ms.to_string());
    }

    /// Gateway start bookkeeping
    pub fn gateway_start(&self) {
        tracing::info!("gateway started");
        let _ = self
            .engine
            .store()
            .set_meta("gateway_started_at", &Utc::now().to_rfc3339());
    }

    /// Gateway stop bookkeeping
    pub fn gateway_stop(&self) {
        tracing::info!("gateway stopped");
        let _ = self
            .engine
            .store()
            .set_meta("gateway_stopped_at", &Utc::now().to_rfc3339());
    }
}

/// Render retrieved memories as a context preamble for the prompt
fn format_context(results: &[RetrievedMemory]) -> String {
    let mut out = String::from("Relevant memory:\n");
    for result in results {
        let memory = &result.memory;
        out.push_str("- [");
        out.push_str(&memory.domain);
        out.push(']');
        if let Some(pt) = memory.pattern_type {
            out.push_str(" (");
            out.push_str(pt.as_str());
            out.push(')');
        }
        out.push(' ');
        out.push_str(&memory.title);
        if !memory.detail.is_empty() && memory.detail != memory.title {
            out.push_str(": ");
            out.push_str(&memory.detail);
        }
        out.push('\n');
    }
    out
}

// ============================================================================
// TESTS
// ============================================================================
