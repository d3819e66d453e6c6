//! TC-011: Append-only JSONL compile event log.

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Compile event for the JSONL event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CompileEvent {
    CompileStarted {
        topology: String,
        run_id: String,
        topoc_version: String,
        source_hash: String,
    },
    CompileCompleted {
        topology: String,
        run_id: String,
        nodes: usize,
        permissions: usize,
        outputs: usize,
        fingerprint: String,
        total_seconds: f64,
    },
    CompileFailed {
        topology: String,
        run_id: String,
        error: String,
    },
}

/// Timestamped event wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampedEvent {
    pub ts: String,
    #[serde(flatten)]
    pub event: CompileEvent,
}

/// UTC timestamp, second precision (`2026-01-02T03:04:05Z`).
pub fn now_iso8601() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Generate a run ID.
pub fn generate_run_id() -> String {
    let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0) as u64;
    format!("r-{:012x}", nanos & 0xFFFF_FFFF_FFFF)
}

/// Derive the event log path for a topology.
pub fn event_log_path(events_dir: &Path, topology: &str) -> PathBuf {
    events_dir.join(topology).join("events.jsonl")
}

/// Append an event to the topology's event log.
pub fn append_event(events_dir: &Path, topology: &str, event: CompileEvent) -> Result<(), String> {
    let path = event_log_path(events_dir, topology);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| format!("cannot create events dir: {}", e))?;
    }

    let te = TimestampedEvent {
        ts: now_iso8601(),
        event,
    };
    let json = serde_json::to_string(&te).map_err(|e| format!("JSON serialize error: {}", e))?;

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| format!("cannot open event log {}: {}", path.display(), e))?;

    writeln!(file, "{}", json).map_err(|e| format!("write error: {}", e))?;
    tracing::debug!(path = %path.display(), "event appended");

    Ok(())
}

/// Read every event back, oldest first.
pub fn read_events(events_dir: &Path, topology: &str) -> Result<Vec<TimestampedEvent>, String> {
    let path = event_log_path(events_dir, topology);
    let content = match std::fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(format!("cannot read {}: {}", path.display(), e)),
    };
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).map_err(|e| format!("bad event line: {}", e)))
        .collect()
}
