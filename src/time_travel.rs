//! Time-travel recording of IR snapshots
//!
//! Every handled event produces one full IR snapshot while recording is on.
//! A cursor over the history supports scrubbing back and forth; the live
//! builder state is never affected by scrubbing.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::builder::TraceBuilder;
use crate::error::{FlowtraceError, Result};
use crate::event::WorkflowEvent;
use crate::ir::WorkflowIr;

/// IR state right after one event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IrSnapshot {
    /// Position of the event in the handled stream, starting at 0
    pub index: usize,
    pub event_type: String,
    pub ts: u64,
    pub ir: WorkflowIr,
}

#[derive(Debug, Clone)]
pub struct TimeTravelRecorder {
    builder: TraceBuilder,
    snapshots: VecDeque<IrSnapshot>,
    recording: bool,
    max_snapshots: Option<usize>,
    /// Position in `snapshots`; `None` follows the latest
    cursor: Option<usize>,
    events_seen: usize,
}

impl Default for TimeTravelRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeTravelRecorder {
    pub fn new() -> Self {
        Self {
            builder: TraceBuilder::new(),
            snapshots: VecDeque::new(),
            recording: true,
            max_snapshots: None,
            cursor: None,
            events_seen: 0,
        }
    }

    /// Keep at most `max` snapshots, evicting the oldest
    ///
    /// A cursor parked on an evicted snapshot moves to the oldest surviving
    /// one; a cursor on any other snapshot keeps pointing at it.
    pub fn with_max_snapshots(max: usize) -> Self {
        Self {
            max_snapshots: Some(max.max(1)),
            ..Self::new()
        }
    }

    pub fn handle_event(&mut self, event: &WorkflowEvent) {
        self.builder.handle_event(event);
        let index = self.events_seen;
        self.events_seen += 1;

        if !self.recording {
            return;
        }

        self.snapshots.push_back(IrSnapshot {
            index,
            event_type: event.type_name().to_string(),
            ts: event.ts,
            ir: self.builder.ir(),
        });

        if let Some(max) = self.max_snapshots {
            while self.snapshots.len() > max {
                self.snapshots.pop_front();
                self.cursor = self.cursor.map(|cursor| match cursor {
                    // Parked snapshot evicted: clamp to the oldest survivor
                    0 => 0,
                    n => n - 1,
                });
            }
        }
    }

    /// Live state, regardless of the cursor
    pub fn ir(&self) -> WorkflowIr {
        self.builder.ir()
    }

    pub fn snapshots(&self) -> &VecDeque<IrSnapshot> {
        &self.snapshots
    }

    pub fn stop_recording(&mut self) {
        self.recording = false;
    }

    pub fn start_recording(&mut self) {
        self.recording = true;
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// Drop history; builder state is kept
    pub fn clear(&mut self) {
        self.snapshots.clear();
        self.cursor = None;
    }

    pub fn latest(&self) -> Option<&IrSnapshot> {
        self.snapshots.back()
    }

    /// Snapshot under the cursor
    pub fn current(&self) -> Option<&IrSnapshot> {
        self.current_index().and_then(|i| self.snapshots.get(i))
    }

    pub fn current_index(&self) -> Option<usize> {
        match self.cursor {
            Some(i) => Some(i),
            None => self.snapshots.len().checked_sub(1),
        }
    }

    /// Move the cursor to position `index` in the history
    pub fn seek(&mut self, index: usize) -> Result<&IrSnapshot> {
        let len = self.snapshots.len();
        if index >= len {
            return Err(FlowtraceError::SnapshotOutOfRange { index, len });
        }
        self.cursor = Some(index);
        Ok(&self.snapshots[index])
    }

    /// One snapshot forward; stays put at the end
    pub fn step_forward(&mut self) -> Option<&IrSnapshot> {
        let next = (self.current_index()? + 1).min(self.snapshots.len() - 1);
        self.cursor = Some(next);
        self.snapshots.get(next)
    }

    /// One snapshot back; stays put at the start
    pub fn step_backward(&mut self) -> Option<&IrSnapshot> {
        let prev = self.current_index()?.saturating_sub(1);
        self.cursor = Some(prev);
        self.snapshots.get(prev)
    }

    /// Resume following the latest snapshot
    pub fn follow_latest(&mut self) {
        self.cursor = None;
    }
}
