//! Publish sinks and flush outcomes
//!
//! A `PublishSink` is whatever receives live IR snapshots: a chat message
//! that gets edited in place, a dashboard, a websocket fan-out. Failures are
//! plain `anyhow` errors; the session turns them into `FlushResult` values.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::ir::{NodeState, WorkflowIr};

/// Terminal status handed to `PublishSink::finalize`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Success,
    Error,
    Aborted,
}

impl SessionStatus {
    /// Status matching a finished root state; anything unfinished counts as aborted
    pub fn from_state(state: NodeState) -> Self {
        match state {
            NodeState::Success | NodeState::Skipped | NodeState::Cached => Self::Success,
            NodeState::Error => Self::Error,
            NodeState::Pending | NodeState::Running | NodeState::Aborted => Self::Aborted,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Aborted => "aborted",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receiver of live updates
#[async_trait]
pub trait PublishSink: Send + Sync {
    /// First publish of a session; the returned id addresses later updates.
    /// `None` means the sink cannot update in place and the next flush posts again.
    async fn post_new(&self, ir: &WorkflowIr, title: &str) -> anyhow::Result<Option<String>>;

    async fn update_existing(
        &self,
        session_id: &str,
        ir: &WorkflowIr,
        title: &str,
    ) -> anyhow::Result<()>;

    async fn finalize(
        &self,
        session_id: Option<&str>,
        ir: &WorkflowIr,
        title: &str,
        status: SessionStatus,
    ) -> anyhow::Result<()>;

    async fn cancel(&self, _session_id: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Which sink callback a result refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PublishOp {
    PostNew,
    UpdateExisting,
    Finalize,
    Cancel,
}

/// Outcome of one publish attempt
#[derive(Debug, Clone, PartialEq)]
pub enum FlushResult {
    Posted { session_id: Option<String> },
    Updated { session_id: String },
    Finalized { session_id: Option<String> },
    Cancelled { session_id: Option<String> },
    /// Session already finalized or cancelled; no callback ran
    Inactive,
    CallbackError { op: PublishOp, message: String },
}

impl FlushResult {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Posted { .. } => "POSTED",
            Self::Updated { .. } => "UPDATED",
            Self::Finalized { .. } => "FINALIZED",
            Self::Cancelled { .. } => "CANCELLED",
            Self::Inactive => "INACTIVE",
            Self::CallbackError { .. } => "CALLBACK_ERROR",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::CallbackError { .. })
    }
}

// ═══════════════════════════════════════════════════════════════
// In-memory sink
// ═══════════════════════════════════════════════════════════════

/// One recorded sink call
#[derive(Debug, Clone)]
pub struct PublishCall {
    pub op: PublishOp,
    pub session_id: Option<String>,
    pub ir: Option<WorkflowIr>,
    pub title: String,
    pub status: Option<SessionStatus>,
    pub at: Instant,
}

#[derive(Debug, Default)]
struct MemoryState {
    calls: Vec<PublishCall>,
    failing: Vec<PublishOp>,
    next_id: u64,
}

/// Sink that records every call; failures can be injected per operation
#[derive(Debug, Default)]
pub struct MemorySink {
    state: Mutex<MemoryState>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call to `op` fail until `recover` is called
    pub fn fail_on(&self, op: PublishOp) {
        self.state.lock().failing.push(op);
    }

    pub fn recover(&self) {
        self.state.lock().failing.clear();
    }

    pub fn calls(&self) -> Vec<PublishCall> {
        self.state.lock().calls.clone()
    }

    pub fn count(&self, op: PublishOp) -> usize {
        self.state.lock().calls.iter().filter(|c| c.op == op).count()
    }

    fn record(
        &self,
        op: PublishOp,
        session_id: Option<&str>,
        ir: Option<&WorkflowIr>,
        title: &str,
        status: Option<SessionStatus>,
    ) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        state.calls.push(PublishCall {
            op,
            session_id: session_id.map(str::to_string),
            ir: ir.cloned(),
            title: title.to_string(),
            status,
            at: Instant::now(),
        });
        if state.failing.contains(&op) {
            anyhow::bail!("injected {:?} failure", op);
        }
        Ok(())
    }
}

#[async_trait]
impl PublishSink for MemorySink {
    async fn post_new(&self, ir: &WorkflowIr, title: &str) -> anyhow::Result<Option<String>> {
        self.record(PublishOp::PostNew, None, Some(ir), title, None)?;
        let mut state = self.state.lock();
        state.next_id += 1;
        Ok(Some(format!("session-{}", state.next_id)))
    }

    async fn update_existing(
        &self,
        session_id: &str,
        ir: &WorkflowIr,
        title: &str,
    ) -> anyhow::Result<()> {
        self.record(PublishOp::UpdateExisting, Some(session_id), Some(ir), title, None)
    }

    async fn finalize(
        &self,
        session_id: Option<&str>,
        ir: &WorkflowIr,
        title: &str,
        status: SessionStatus,
    ) -> anyhow::Result<()> {
        self.record(PublishOp::Finalize, session_id, Some(ir), title, Some(status))
    }

    async fn cancel(&self, session_id: &str) -> anyhow::Result<()> {
        self.record(PublishOp::Cancel, Some(session_id), None, "", None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callback_error_code() {
        let result = FlushResult::CallbackError {
            op: PublishOp::PostNew,
            message: "boom".into(),
        };
        assert_eq!(result.code(), "CALLBACK_ERROR");
        assert!(result.is_error());
        assert!(!FlushResult::Inactive.is_error());
    }

    #[test]
    fn status_from_root_state() {
        assert_eq!(SessionStatus::from_state(NodeState::Success), SessionStatus::Success);
        assert_eq!(SessionStatus::from_state(NodeState::Error), SessionStatus::Error);
        assert_eq!(SessionStatus::from_state(NodeState::Running), SessionStatus::Aborted);
        assert_eq!(SessionStatus::Aborted.to_string(), "aborted");
    }

    #[tokio::test]
    async fn memory_sink_records_and_injects_failures() {
        let sink = MemorySink::new();
        let ir = WorkflowIr::empty("wf", 0);

        let id = sink.post_new(&ir, "t").await.unwrap();
        assert_eq!(id.as_deref(), Some("session-1"));

        sink.fail_on(PublishOp::UpdateExisting);
        assert!(sink.update_existing("session-1", &ir, "t").await.is_err());
        sink.recover();
        assert!(sink.update_existing("session-1", &ir, "t").await.is_ok());

        assert_eq!(sink.count(PublishOp::PostNew), 1);
        assert_eq!(sink.count(PublishOp::UpdateExisting), 2);
    }
}
