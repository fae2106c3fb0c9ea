//! NDJSON trace loader
//!
//! Reads recorded event streams (one `WorkflowEvent` per line) for replay.

use std::path::Path;

use crate::error::{FlowtraceError, Result};
use crate::event::WorkflowEvent;

/// Parse newline-delimited JSON events from memory
///
/// Blank lines are skipped. The first malformed line aborts with its
/// 1-based line number.
pub fn parse_trace(content: &str) -> Result<Vec<WorkflowEvent>> {
    let mut events = Vec::new();

    for (idx, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let event: WorkflowEvent =
            serde_json::from_str(line).map_err(|e| FlowtraceError::TraceParse {
                line: idx + 1,
                details: e.to_string(),
            })?;
        events.push(event);
    }

    Ok(events)
}

/// Read and parse a trace file
pub fn read_trace(path: &Path) -> Result<Vec<WorkflowEvent>> {
    if !path.exists() {
        return Err(FlowtraceError::TraceNotFound {
            path: path.display().to_string(),
        });
    }

    let content = std::fs::read_to_string(path)?;
    let events = parse_trace(&content)?;

    tracing::debug!(path = %path.display(), events = events.len(), "Loaded trace");
    Ok(events)
}
