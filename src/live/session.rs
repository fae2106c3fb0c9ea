//! LiveSession - debounced publishing of a growing trace
//!
//! ```text
//! update(event) ──► TraceBuilder ──► pending ──┐
//! update(ir)    ─────────────────► pending ──┤
//!                                            ▼
//!                         driver task: sleep_until(next deadline)
//!                                            │
//!                        post_new (no id yet) / update_existing (id)
//! ```
//!
//! `update()` is synchronous and never waits on the sink. One background
//! task per session owns the timers; it is woken through a `Notify` whenever
//! the schedule changes and stops when the session is finalized, cancelled,
//! or dropped.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::schedule::FlushSchedule;
use super::sink::{FlushResult, PublishOp, PublishSink, SessionStatus};
use crate::builder::TraceBuilder;
use crate::error::{FlowtraceError, Result};
use crate::event::{EventEmitter, WorkflowEvent};
use crate::ir::WorkflowIr;

pub const DEFAULT_DEBOUNCE_MS: u64 = 500;
pub const DEFAULT_MAX_WAIT_MS: u64 = 5000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveSessionOptions {
    pub title: String,
    pub debounce_ms: u64,
    pub max_wait_ms: u64,
}

impl Default for LiveSessionOptions {
    fn default() -> Self {
        Self {
            title: "Workflow".to_string(),
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            max_wait_ms: DEFAULT_MAX_WAIT_MS,
        }
    }
}

impl LiveSessionOptions {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn debounce_ms(mut self, ms: u64) -> Self {
        self.debounce_ms = ms;
        self
    }

    pub fn max_wait_ms(mut self, ms: u64) -> Self {
        self.max_wait_ms = ms;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.debounce_ms == 0 {
            return Err(FlowtraceError::InvalidConfig {
                message: "debounce_ms must be greater than 0".to_string(),
            });
        }
        if self.max_wait_ms < self.debounce_ms {
            return Err(FlowtraceError::InvalidConfig {
                message: format!(
                    "max_wait_ms ({}) must be >= debounce_ms ({})",
                    self.max_wait_ms, self.debounce_ms
                ),
            });
        }
        Ok(())
    }
}

/// What `update()` accepts
#[derive(Debug, Clone)]
pub enum LiveInput {
    Event(WorkflowEvent),
    /// Precomputed IR; replaces pending state without touching the builder
    Snapshot(WorkflowIr),
}

impl From<WorkflowEvent> for LiveInput {
    fn from(event: WorkflowEvent) -> Self {
        Self::Event(event)
    }
}

impl From<WorkflowIr> for LiveInput {
    fn from(ir: WorkflowIr) -> Self {
        Self::Snapshot(ir)
    }
}

/// Latest unpublished state; builder output is materialized at flush time
#[derive(Debug)]
enum Pending {
    Builder,
    Snapshot(WorkflowIr),
}

struct SessionState {
    active: bool,
    builder: TraceBuilder,
    schedule: FlushSchedule,
    pending: Option<Pending>,
    session_id: Option<String>,
    last_published: Option<WorkflowIr>,
    last_result: Option<FlushResult>,
}

impl SessionState {
    fn take_pending(&mut self) -> Option<WorkflowIr> {
        match self.pending.take()? {
            Pending::Builder => Some(self.builder.ir()),
            Pending::Snapshot(ir) => Some(ir),
        }
    }
}

struct SessionInner {
    title: String,
    sink: Arc<dyn PublishSink>,
    state: Mutex<SessionState>,
    wake: Notify,
    /// Serializes sink calls so finalize waits for an in-flight publish
    publish_lock: tokio::sync::Mutex<()>,
    shutdown: CancellationToken,
}

/// Create a session and start its timer task on the current tokio runtime
pub fn create_live_session(
    options: LiveSessionOptions,
    sink: Arc<dyn PublishSink>,
) -> Result<LiveSession> {
    LiveSession::new(options, sink)
}

/// Live, debounced view of one workflow run
pub struct LiveSession {
    inner: Arc<SessionInner>,
}

impl LiveSession {
    pub fn new(options: LiveSessionOptions, sink: Arc<dyn PublishSink>) -> Result<Self> {
        options.validate()?;
        let handle = tokio::runtime::Handle::try_current().map_err(|_| FlowtraceError::NoRuntime)?;

        let inner = Arc::new(SessionInner {
            title: options.title,
            sink,
            state: Mutex::new(SessionState {
                active: true,
                builder: TraceBuilder::new(),
                schedule: FlushSchedule::new(
                    Duration::from_millis(options.debounce_ms),
                    Duration::from_millis(options.max_wait_ms),
                ),
                pending: None,
                session_id: None,
                last_published: None,
                last_result: None,
            }),
            wake: Notify::new(),
            publish_lock: tokio::sync::Mutex::new(()),
            shutdown: CancellationToken::new(),
        });

        handle.spawn(drive(Arc::clone(&inner)));
        info!(
            title = %inner.title,
            debounce_ms = options.debounce_ms,
            max_wait_ms = options.max_wait_ms,
            "Live session started"
        );
        Ok(Self { inner })
    }

    pub fn title(&self) -> &str {
        &self.inner.title
    }

    /// Feed an event or a snapshot; returns `false` once the session is closed
    pub fn update(&self, input: impl Into<LiveInput>) -> bool {
        {
            let mut state = self.inner.state.lock();
            if !state.active {
                return false;
            }
            match input.into() {
                LiveInput::Event(event) => {
                    state.builder.handle_event(&event);
                    state.pending = Some(Pending::Builder);
                }
                LiveInput::Snapshot(ir) => state.pending = Some(Pending::Snapshot(ir)),
            }
            state.schedule.on_update(Instant::now());
        }
        self.inner.wake.notify_one();
        true
    }

    pub fn session_id(&self) -> Option<String> {
        self.inner.state.lock().session_id.clone()
    }

    pub fn is_active(&self) -> bool {
        self.inner.state.lock().active
    }

    pub fn last_result(&self) -> Option<FlushResult> {
        self.inner.state.lock().last_result.clone()
    }

    /// Current builder state, independent of what has been published
    pub fn ir(&self) -> WorkflowIr {
        self.inner.state.lock().builder.ir()
    }

    /// Publish pending state now, bypassing both timers.
    /// Returns `None` when nothing is pending.
    pub async fn flush_now(&self) -> Option<FlushResult> {
        let result = self.inner.flush(true).await;
        self.inner.wake.notify_one();
        result
    }

    /// Close the session and publish the final state exactly once
    pub async fn finalize(&self, status: SessionStatus) -> FlushResult {
        {
            let mut state = self.inner.state.lock();
            if !state.active {
                debug!(title = %self.inner.title, "finalize on inactive session ignored");
                return FlushResult::Inactive;
            }
            state.active = false;
            state.schedule.clear();
        }
        self.inner.shutdown.cancel();

        let _guard = self.inner.publish_lock.lock().await;
        let (session_id, ir) = {
            let mut state = self.inner.state.lock();
            let ir = match state.take_pending() {
                Some(ir) => ir,
                None => match state.last_published.clone() {
                    Some(ir) => ir,
                    None => state.builder.ir(),
                },
            };
            (state.session_id.clone(), ir)
        };

        let result = match self
            .inner
            .sink
            .finalize(session_id.as_deref(), &ir, &self.inner.title, status)
            .await
        {
            Ok(()) => {
                info!(title = %self.inner.title, status = %status, "Live session finalized");
                FlushResult::Finalized { session_id }
            }
            Err(e) => self.inner.callback_error(PublishOp::Finalize, &e),
        };
        self.inner.record(Some(ir), &result);
        result
    }

    /// Close the session without a final publish
    pub async fn cancel(&self) -> FlushResult {
        {
            let mut state = self.inner.state.lock();
            if !state.active {
                return FlushResult::Inactive;
            }
            state.active = false;
            state.schedule.clear();
            state.pending = None;
        }
        self.inner.shutdown.cancel();

        // An in-flight post may still assign the session id
        let _guard = self.inner.publish_lock.lock().await;
        let session_id = self.inner.state.lock().session_id.clone();

        let result = match &session_id {
            Some(id) => match self.inner.sink.cancel(id).await {
                Ok(()) => FlushResult::Cancelled {
                    session_id: session_id.clone(),
                },
                Err(e) => self.inner.callback_error(PublishOp::Cancel, &e),
            },
            None => FlushResult::Cancelled { session_id: None },
        };
        info!(title = %self.inner.title, "Live session cancelled");
        self.inner.record(None, &result);
        result
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
    }
}

impl EventEmitter for LiveSession {
    fn emit(&self, event: WorkflowEvent) {
        self.update(LiveInput::Event(event));
    }
}

impl std::fmt::Debug for LiveSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("LiveSession")
            .field("title", &self.inner.title)
            .field("active", &state.active)
            .field("session_id", &state.session_id)
            .finish()
    }
}

impl SessionInner {
    /// Take pending state and publish it. Without `force` this only
    /// happens once a deadline has passed.
    ///
    /// Pending state is taken under the publish lock, so `finalize` either
    /// sees it still pending or sees it as the last published IR.
    async fn flush(&self, force: bool) -> Option<FlushResult> {
        let _guard = self.publish_lock.lock().await;
        let ir = {
            let mut state = self.state.lock();
            let now = Instant::now();
            if !state.active || !(force || state.schedule.is_due(now)) {
                return None;
            }
            match state.take_pending() {
                Some(ir) => {
                    state.schedule.on_flush(now);
                    ir
                }
                None => {
                    if !force {
                        state.schedule.clear();
                    }
                    return None;
                }
            }
        };
        Some(self.publish(ir).await)
    }

    /// Caller holds `publish_lock`
    async fn publish(&self, ir: WorkflowIr) -> FlushResult {
        let session_id = self.state.lock().session_id.clone();

        let result = match session_id {
            None => match self.sink.post_new(&ir, &self.title).await {
                Ok(id) => {
                    debug!(title = %self.title, session_id = ?id, "Posted live trace");
                    self.state.lock().session_id = id.clone();
                    FlushResult::Posted { session_id: id }
                }
                Err(e) => self.callback_error(PublishOp::PostNew, &e),
            },
            Some(id) => match self.sink.update_existing(&id, &ir, &self.title).await {
                Ok(()) => {
                    debug!(title = %self.title, session_id = %id, "Updated live trace");
                    FlushResult::Updated { session_id: id }
                }
                Err(e) => self.callback_error(PublishOp::UpdateExisting, &e),
            },
        };
        self.record(Some(ir), &result);
        result
    }

    fn callback_error(&self, op: PublishOp, error: &anyhow::Error) -> FlushResult {
        warn!(title = %self.title, op = ?op, error = %error, "Publish callback failed");
        FlushResult::CallbackError {
            op,
            message: format!("{:#}", error),
        }
    }

    fn record(&self, ir: Option<WorkflowIr>, result: &FlushResult) {
        let mut state = self.state.lock();
        if ir.is_some() {
            state.last_published = ir;
        }
        state.last_result = Some(result.clone());
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Timer loop; one per session
async fn drive(inner: Arc<SessionInner>) {
    loop {
        let deadline = inner.state.lock().schedule.next_deadline();
        tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            _ = inner.wake.notified() => continue,
            _ = sleep_until_deadline(deadline) => {
                inner.flush(false).await;
            }
        }
    }
    debug!(title = %inner.title, "Live session driver stopped");
}
