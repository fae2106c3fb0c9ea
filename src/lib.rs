//! Flowtrace - live execution traces for branching, parallel workflows
//!
//! ```text
//! WorkflowEvent ──► TraceBuilder ──► WorkflowIr ──┬─► LiveSession ──► PublishSink
//!                                                 └─► TimeTravelRecorder
//! ```
//!
//! - `event`: input contract, `EventLog`, `EventEmitter`, `DecisionTracker`
//! - `builder`: event reducer producing the execution tree
//! - `ir`: tree types and the safe serialization boundary
//! - `live`: debounced publishing to external sinks
//! - `time_travel`: per-event snapshot history

pub mod builder;
pub mod config;
pub mod error;
pub mod event;
pub mod ir;
pub mod live;
pub mod time_travel;

pub use builder::TraceBuilder;
pub use config::FlowtraceConfig;
pub use error::{FixSuggestion, FlowtraceError, Result};
pub use event::{
    read_trace, track_if, track_switch, DecisionTracker, EventEmitter, EventKind, EventLog,
    WorkflowEvent,
};
pub use ir::{Node, NodeState, WorkflowIr};
pub use live::{
    create_live_session, FlushResult, LiveInput, LiveSession, LiveSessionOptions, PublishSink,
    SessionStatus,
};
pub use time_travel::{IrSnapshot, TimeTravelRecorder};
