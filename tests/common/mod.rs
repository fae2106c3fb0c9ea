//! Event constructors shared by integration tests
#![allow(dead_code)]

use flowtrace::event::{EventKind, ScopeType, WorkflowEvent};
use serde_json::Value;

pub const WF: &str = "wf-1";

pub fn ev(ts: u64, kind: EventKind) -> WorkflowEvent {
    WorkflowEvent::new(WF, ts, kind)
}

pub fn workflow_start(ts: u64) -> WorkflowEvent {
    ev(ts, EventKind::WorkflowStart)
}

pub fn workflow_success(ts: u64) -> WorkflowEvent {
    ev(ts, EventKind::WorkflowSuccess { duration_ms: None })
}

pub fn step_start(ts: u64, id: &str) -> WorkflowEvent {
    ev(
        ts,
        EventKind::StepStart {
            step_id: id.into(),
            step_key: None,
            name: None,
            input: None,
        },
    )
}

pub fn keyed_step_start(ts: u64, id: &str, key: &str) -> WorkflowEvent {
    ev(
        ts,
        EventKind::StepStart {
            step_id: id.into(),
            step_key: Some(key.into()),
            name: None,
            input: None,
        },
    )
}

pub fn step_success(ts: u64, id: &str, output: Option<Value>) -> WorkflowEvent {
    ev(
        ts,
        EventKind::StepSuccess {
            step_id: id.into(),
            step_key: None,
            name: None,
            duration_ms: None,
            output,
        },
    )
}

pub fn scope_start(ts: u64, id: &str) -> WorkflowEvent {
    ev(
        ts,
        EventKind::ScopeStart {
            scope_id: id.into(),
            scope_type: ScopeType::Parallel,
            name: None,
        },
    )
}

pub fn scope_end(ts: u64, id: &str) -> WorkflowEvent {
    ev(
        ts,
        EventKind::ScopeEnd {
            scope_id: id.into(),
            duration_ms: None,
            winner_id: None,
        },
    )
}

pub fn decision_start(ts: u64, id: &str) -> WorkflowEvent {
    ev(
        ts,
        EventKind::DecisionStart {
            decision_id: id.into(),
            name: None,
            condition: None,
            decision_value: None,
        },
    )
}

pub fn branch(ts: u64, id: &str, label: &str, taken: bool) -> WorkflowEvent {
    ev(
        ts,
        EventKind::DecisionBranch {
            decision_id: id.into(),
            branch_label: label.into(),
            condition: None,
            taken,
        },
    )
}

pub fn decision_end(ts: u64, id: &str) -> WorkflowEvent {
    ev(
        ts,
        EventKind::DecisionEnd {
            decision_id: id.into(),
            branch_taken: None,
            duration_ms: None,
        },
    )
}

pub fn hook_should_run(ts: u64) -> WorkflowEvent {
    ev(
        ts,
        EventKind::HookShouldRun {
            duration_ms: 3,
            result: true,
            skipped: false,
        },
    )
}

pub fn hook_before_start(ts: u64) -> WorkflowEvent {
    ev(
        ts,
        EventKind::HookBeforeStart {
            duration_ms: 1,
            result: true,
            skipped: false,
        },
    )
}

pub fn hook_after_step(ts: u64, step_id: &str) -> WorkflowEvent {
    ev(
        ts,
        EventKind::HookAfterStep {
            step_id: step_id.into(),
            step_key: None,
            duration_ms: 2,
        },
    )
}

/// Ids of `children`, in order
pub fn ids(children: &[flowtrace::Node]) -> Vec<&str> {
    children.iter().map(|n| n.id()).collect()
}
