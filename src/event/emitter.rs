//! EventEmitter Trait - abstraction for event emission
//!
//! Enables dependency injection: the execution engine (or `DecisionTracker`)
//! emits into whatever consumes the stream, an `EventLog`, a `LiveSession`,
//! a shared `TraceBuilder`, or `NoopEmitter` in tests.

use parking_lot::Mutex;

use super::log::{EventLog, WorkflowEvent};
use crate::builder::TraceBuilder;
use crate::time_travel::TimeTravelRecorder;

/// Trait for emitting events during workflow execution
pub trait EventEmitter: Send + Sync {
    fn emit(&self, event: WorkflowEvent);
}

impl EventEmitter for EventLog {
    fn emit(&self, event: WorkflowEvent) {
        EventLog::emit(self, event);
    }
}

/// Builders are single-owner reducers; share one behind a mutex.
impl EventEmitter for Mutex<TraceBuilder> {
    fn emit(&self, event: WorkflowEvent) {
        self.lock().handle_event(&event);
    }
}

impl EventEmitter for Mutex<TimeTravelRecorder> {
    fn emit(&self, event: WorkflowEvent) {
        self.lock().handle_event(&event);
    }
}

impl<E: EventEmitter + ?Sized> EventEmitter for std::sync::Arc<E> {
    fn emit(&self, event: WorkflowEvent) {
        (**self).emit(event);
    }
}

/// No-op emitter for testing
#[derive(Debug, Clone, Default)]
pub struct NoopEmitter;

impl NoopEmitter {
    pub fn new() -> Self {
        Self
    }
}

impl EventEmitter for NoopEmitter {
    fn emit(&self, _event: WorkflowEvent) {}
}
