//! WorkflowEvent + EventLog
//!
//! - WorkflowEvent: envelope with workflow id + timestamp + kind
//! - EventKind: 29 variants across 6 families (workflow/step/scope/decision/stream/hook)
//! - EventLog: thread-safe, append-only log (in-memory only)

use std::sync::Arc;

use parking_lot::RwLock;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Single lifecycle event, flat on the wire:
/// `{"type": "step_start", "workflowId": "...", "ts": 12, "stepId": "..."}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowEvent {
    /// Run this event belongs to
    pub workflow_id: String,
    /// Milliseconds; only relative ordering and differences matter
    pub ts: u64,
    /// Event type and data
    #[serde(flatten)]
    pub kind: EventKind,
}

impl WorkflowEvent {
    pub fn new(workflow_id: impl Into<String>, ts: u64, kind: EventKind) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            ts,
            kind,
        }
    }

    /// The wire discriminator (e.g. `"decision_branch"`)
    pub fn type_name(&self) -> &'static str {
        self.kind.type_name()
    }
}

/// Grouping semantics of a scope
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScopeType {
    #[default]
    Parallel,
    Race,
    AllSettled,
}

/// Backpressure transitions reported by stream events
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackpressureState {
    Active,
    Normal,
}

/// All event types emitted by the execution engine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum EventKind {
    // ═══════════════════════════════════════════
    // WORKFLOW LEVEL
    // ═══════════════════════════════════════════
    WorkflowStart,
    WorkflowSuccess {
        duration_ms: Option<u64>,
    },
    WorkflowError {
        error: Value,
        duration_ms: Option<u64>,
    },
    /// Run was aborted (signal, cancellation)
    WorkflowCancelled {
        reason: Option<String>,
        duration_ms: Option<u64>,
    },

    // ═══════════════════════════════════════════
    // STEP LEVEL
    // ═══════════════════════════════════════════
    StepStart {
        step_id: String,
        step_key: Option<String>,
        name: Option<String>,
        input: Option<Value>,
    },
    StepSuccess {
        step_id: String,
        step_key: Option<String>,
        name: Option<String>,
        duration_ms: Option<u64>,
        output: Option<Value>,
    },
    StepError {
        step_id: String,
        step_key: Option<String>,
        name: Option<String>,
        duration_ms: Option<u64>,
        error: Value,
    },
    StepRetry {
        step_id: String,
        step_key: Option<String>,
        attempt: u32,
        max_attempts: u32,
        delay_ms: u64,
        error: Option<Value>,
    },
    StepTimeout {
        step_id: String,
        step_key: Option<String>,
        timeout_ms: Option<u64>,
        duration_ms: Option<u64>,
    },
    StepSkipped {
        step_id: String,
        step_key: Option<String>,
        name: Option<String>,
        reason: Option<String>,
    },
    StepCacheHit {
        step_id: String,
        step_key: Option<String>,
    },
    StepCacheMiss {
        step_id: String,
        step_key: Option<String>,
    },

    // ═══════════════════════════════════════════
    // SCOPES (parallel / race groupings)
    // ═══════════════════════════════════════════
    ScopeStart {
        scope_id: String,
        #[serde(default)]
        scope_type: ScopeType,
        name: Option<String>,
    },
    ScopeEnd {
        scope_id: String,
        duration_ms: Option<u64>,
        /// Race scopes report the child that won
        winner_id: Option<String>,
    },

    // ═══════════════════════════════════════════
    // DECISIONS
    // ═══════════════════════════════════════════
    DecisionStart {
        decision_id: String,
        name: Option<String>,
        condition: Option<String>,
        decision_value: Option<Value>,
    },
    DecisionBranch {
        decision_id: String,
        branch_label: String,
        condition: Option<String>,
        taken: bool,
    },
    DecisionEnd {
        decision_id: String,
        branch_taken: Option<String>,
        duration_ms: Option<u64>,
    },

    // ═══════════════════════════════════════════
    // STREAMS
    // ═══════════════════════════════════════════
    StreamCreated {
        stream_id: String,
        namespace: String,
    },
    StreamWrite {
        stream_id: String,
        position: u64,
    },
    StreamRead {
        stream_id: String,
        position: u64,
    },
    StreamClose {
        stream_id: String,
        final_position: u64,
    },
    StreamError {
        stream_id: String,
        error: Value,
        position: Option<u64>,
    },
    StreamBackpressure {
        stream_id: String,
        state: BackpressureState,
    },

    // ═══════════════════════════════════════════
    // HOOKS
    // ═══════════════════════════════════════════
    HookShouldRun {
        duration_ms: u64,
        result: bool,
        #[serde(default)]
        skipped: bool,
    },
    HookShouldRunError {
        duration_ms: u64,
        error: Value,
    },
    HookBeforeStart {
        duration_ms: u64,
        result: bool,
        #[serde(default)]
        skipped: bool,
    },
    HookBeforeStartError {
        duration_ms: u64,
        error: Value,
    },
    HookAfterStep {
        step_id: String,
        step_key: Option<String>,
        duration_ms: u64,
    },
    HookAfterStepError {
        step_id: String,
        step_key: Option<String>,
        duration_ms: u64,
        error: Value,
    },
}

impl EventKind {
    /// Wire discriminator for this kind
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::WorkflowStart => "workflow_start",
            Self::WorkflowSuccess { .. } => "workflow_success",
            Self::WorkflowError { .. } => "workflow_error",
            Self::WorkflowCancelled { .. } => "workflow_cancelled",
            Self::StepStart { .. } => "step_start",
            Self::StepSuccess { .. } => "step_success",
            Self::StepError { .. } => "step_error",
            Self::StepRetry { .. } => "step_retry",
            Self::StepTimeout { .. } => "step_timeout",
            Self::StepSkipped { .. } => "step_skipped",
            Self::StepCacheHit { .. } => "step_cache_hit",
            Self::StepCacheMiss { .. } => "step_cache_miss",
            Self::ScopeStart { .. } => "scope_start",
            Self::ScopeEnd { .. } => "scope_end",
            Self::DecisionStart { .. } => "decision_start",
            Self::DecisionBranch { .. } => "decision_branch",
            Self::DecisionEnd { .. } => "decision_end",
            Self::StreamCreated { .. } => "stream_created",
            Self::StreamWrite { .. } => "stream_write",
            Self::StreamRead { .. } => "stream_read",
            Self::StreamClose { .. } => "stream_close",
            Self::StreamError { .. } => "stream_error",
            Self::StreamBackpressure { .. } => "stream_backpressure",
            Self::HookShouldRun { .. } => "hook_should_run",
            Self::HookShouldRunError { .. } => "hook_should_run_error",
            Self::HookBeforeStart { .. } => "hook_before_start",
            Self::HookBeforeStartError { .. } => "hook_before_start_error",
            Self::HookAfterStep { .. } => "hook_after_step",
            Self::HookAfterStepError { .. } => "hook_after_step_error",
        }
    }

    /// Id of the node this event creates or mutates, if any
    pub fn node_id(&self) -> Option<&str> {
        match self {
            Self::StepStart { step_id, .. }
            | Self::StepSuccess { step_id, .. }
            | Self::StepError { step_id, .. }
            | Self::StepRetry { step_id, .. }
            | Self::StepTimeout { step_id, .. }
            | Self::StepSkipped { step_id, .. }
            | Self::StepCacheHit { step_id, .. }
            | Self::StepCacheMiss { step_id, .. } => Some(step_id),
            Self::ScopeStart { scope_id, .. } | Self::ScopeEnd { scope_id, .. } => Some(scope_id),
            Self::DecisionStart { decision_id, .. }
            | Self::DecisionBranch { decision_id, .. }
            | Self::DecisionEnd { decision_id, .. } => Some(decision_id),
            Self::StreamCreated { stream_id, .. }
            | Self::StreamWrite { stream_id, .. }
            | Self::StreamRead { stream_id, .. }
            | Self::StreamClose { stream_id, .. }
            | Self::StreamError { stream_id, .. }
            | Self::StreamBackpressure { stream_id, .. } => Some(stream_id),
            _ => None,
        }
    }

    /// Check if this is a workflow-level event
    pub fn is_workflow_event(&self) -> bool {
        matches!(
            self,
            Self::WorkflowStart
                | Self::WorkflowSuccess { .. }
                | Self::WorkflowError { .. }
                | Self::WorkflowCancelled { .. }
        )
    }

    /// Check if this event ends the run
    pub fn is_terminal(&self) -> bool {
        self.is_workflow_event() && !matches!(self, Self::WorkflowStart)
    }
}

/// Thread-safe, append-only event log
///
/// Lives only as long as the process; nothing here touches disk.
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<RwLock<Vec<WorkflowEvent>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event (thread-safe, returns its index)
    pub fn emit(&self, event: WorkflowEvent) -> usize {
        let mut events = self.events.write();
        events.push(event);
        events.len() - 1
    }

    /// Get all events (cloned - use `with_events` for zero-copy access)
    pub fn events(&self) -> Vec<WorkflowEvent> {
        self.events.read().clone()
    }

    /// Zero-copy access to events via callback
    ///
    /// Holds read lock for duration of callback - keep it short.
    pub fn with_events<T>(&self, f: impl FnOnce(&[WorkflowEvent]) -> T) -> T {
        f(&self.events.read())
    }

    /// Events touching a single node id
    pub fn filter_node(&self, node_id: &str) -> Vec<WorkflowEvent> {
        self.with_events(|events| {
            events
                .iter()
                .filter(|e| e.kind.node_id() == Some(node_id))
                .cloned()
                .collect()
        })
    }

    /// Serialize to JSON for debugging
    pub fn to_json(&self) -> Value {
        self.with_events(|events| serde_json::to_value(events).unwrap_or(Value::Null))
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for EventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLog")
            .field("len", &self.len())
            .finish()
    }
}
