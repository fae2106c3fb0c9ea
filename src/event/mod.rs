//! Event Module - workflow lifecycle events
//!
//! The input contract for everything downstream: the execution engine emits
//! `WorkflowEvent`s, the trace builder folds them into an IR.
//! Key types:
//! - `WorkflowEvent`: Envelope with workflow id + timestamp + kind
//! - `EventKind`: Tagged union across 6 families (workflow/step/scope/decision/stream/hook)
//! - `EventLog`: Thread-safe, append-only, in-memory log
//! - `EventEmitter`: Trait for dependency injection
//! - `DecisionTracker`: Turns a boolean check into a decision event triple
//! - `read_trace`: NDJSON loader for recorded event streams

mod decision;
mod emitter;
mod log;
mod trace;

pub use decision::{track_if, track_switch, DecisionTracker};
pub use emitter::{EventEmitter, NoopEmitter};
pub use log::{BackpressureState, EventKind, EventLog, ScopeType, WorkflowEvent};
pub use trace::{parse_trace, read_trace};
