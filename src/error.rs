//! Error types with fix suggestions
//!
//! Error code ranges:
//! - FLOW-000-009: Trace file / event decoding errors
//! - FLOW-010-019: Configuration errors
//! - FLOW-020-029: Live session errors
//! - FLOW-090-099: IO/serialization errors
//!
//! Tolerated anomalies in the event stream (unknown ids, unmatched ends) are
//! never errors; the builder logs and moves on. Publish callback failures are
//! reported as `FlushResult` values, not through this type.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, FlowtraceError>;

/// Trait for errors that provide fix suggestions
pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

#[derive(Error, Debug)]
pub enum FlowtraceError {
    // ═══════════════════════════════════════════
    // TRACE ERRORS (000-009)
    // ═══════════════════════════════════════════
    #[error("[FLOW-001] Trace file not found: {path}")]
    TraceNotFound { path: String },

    #[error("[FLOW-002] Invalid event on line {line}: {details}")]
    TraceParse { line: usize, details: String },

    #[error("[FLOW-003] Trace contains no events")]
    EmptyTrace,

    // ═══════════════════════════════════════════
    // CONFIG ERRORS (010-019)
    // ═══════════════════════════════════════════
    #[error("[FLOW-010] Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("[FLOW-011] Config error: {reason}")]
    ConfigError { reason: String },

    // ═══════════════════════════════════════════
    // LIVE SESSION ERRORS (020-029)
    // ═══════════════════════════════════════════
    #[error("[FLOW-020] Live session requires a tokio runtime")]
    NoRuntime,

    #[error("[FLOW-021] Snapshot index {index} out of range (have {len})")]
    SnapshotOutOfRange { index: usize, len: usize },

    // ═══════════════════════════════════════════
    // IO / SERIALIZATION (090-099)
    // ═══════════════════════════════════════════
    #[error("[FLOW-093] IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("[FLOW-094] JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("[FLOW-095] YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),
}

impl FlowtraceError {
    /// Get the error code (e.g., "FLOW-001")
    pub fn code(&self) -> &'static str {
        match self {
            Self::TraceNotFound { .. } => "FLOW-001",
            Self::TraceParse { .. } => "FLOW-002",
            Self::EmptyTrace => "FLOW-003",
            Self::InvalidConfig { .. } => "FLOW-010",
            Self::ConfigError { .. } => "FLOW-011",
            Self::NoRuntime => "FLOW-020",
            Self::SnapshotOutOfRange { .. } => "FLOW-021",
            Self::IoError(_) => "FLOW-093",
            Self::JsonError(_) => "FLOW-094",
            Self::YamlError(_) => "FLOW-095",
        }
    }
}

impl FixSuggestion for FlowtraceError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            FlowtraceError::TraceNotFound { .. } => Some("Check the trace file path exists"),
            FlowtraceError::TraceParse { .. } => {
                Some("Each line must be one JSON event with a snake_case \"type\" field")
            }
            FlowtraceError::EmptyTrace => Some("Record at least a workflow_start event"),
            FlowtraceError::InvalidConfig { .. } => {
                Some("debounce_ms must be > 0 and max_wait_ms >= debounce_ms")
            }
            FlowtraceError::ConfigError { .. } => {
                Some("Check ~/.config/flowtrace/config.toml syntax")
            }
            FlowtraceError::NoRuntime => Some("Create live sessions from inside a tokio runtime"),
            FlowtraceError::SnapshotOutOfRange { .. } => {
                Some("Run `flowtrace snapshots <file>` to list available indices")
            }
            FlowtraceError::IoError(_) => Some("Check file path and permissions"),
            FlowtraceError::JsonError(_) => Some("Check JSON syntax"),
            FlowtraceError::YamlError(_) => None,
        }
    }
}
