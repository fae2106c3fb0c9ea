//! DecisionTracker - turns an imperative branch into decision events
//!
//! ```text
//! let mut d = DecisionTracker::start(&log, "wf-1", "tier check");
//! d.value(json!(tier));
//! if tier == "gold" { d.take_branch("gold"); } else { d.take_branch("standard"); }
//! d.end();
//! ```
//!
//! Emits `decision_start`, one `decision_branch` per reported arm, and a single
//! `decision_end`. Dropping an unfinished tracker ends it.

use std::time::Instant;

use serde_json::Value;

use super::emitter::EventEmitter;
use super::log::{EventKind, WorkflowEvent};

fn now_ms() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}

/// Open decision bound to an emitter
pub struct DecisionTracker<'a> {
    emitter: &'a dyn EventEmitter,
    workflow_id: String,
    decision_id: String,
    started: Instant,
    branch_taken: Option<String>,
    ended: bool,
}

impl<'a> DecisionTracker<'a> {
    /// Emit `decision_start` with a fresh id
    pub fn start(
        emitter: &'a dyn EventEmitter,
        workflow_id: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self::start_with(
            emitter,
            workflow_id,
            uuid::Uuid::new_v4().to_string(),
            Some(name.into()),
            None,
            None,
        )
    }

    /// Emit `decision_start` with every field given explicitly
    pub fn start_with(
        emitter: &'a dyn EventEmitter,
        workflow_id: impl Into<String>,
        decision_id: impl Into<String>,
        name: Option<String>,
        condition: Option<String>,
        decision_value: Option<Value>,
    ) -> Self {
        let tracker = Self {
            emitter,
            workflow_id: workflow_id.into(),
            decision_id: decision_id.into(),
            started: Instant::now(),
            branch_taken: None,
            ended: false,
        };
        tracker.emit(EventKind::DecisionStart {
            decision_id: tracker.decision_id.clone(),
            name,
            condition,
            decision_value,
        });
        tracker
    }

    pub fn id(&self) -> &str {
        &self.decision_id
    }

    /// Label of the first branch reported as taken
    pub fn branch_taken(&self) -> Option<&str> {
        self.branch_taken.as_deref()
    }

    /// Announce the condition expression being evaluated
    pub fn condition(&mut self, condition: impl Into<String>) -> &mut Self {
        self.announce(Some(condition.into()), None);
        self
    }

    /// Announce the evaluated value (for `switch`-style decisions)
    pub fn value(&mut self, value: Value) -> &mut Self {
        self.announce(None, Some(value));
        self
    }

    pub fn branch(&mut self, label: &str, taken: bool) -> &mut Self {
        self.emit_branch(label, None, taken);
        self
    }

    /// Report a branch together with its guard expression
    pub fn branch_when(&mut self, label: &str, condition: &str, taken: bool) -> &mut Self {
        self.emit_branch(label, Some(condition.to_string()), taken);
        self
    }

    pub fn take_branch(&mut self, label: &str) -> &mut Self {
        self.branch(label, true)
    }

    /// Emit `decision_end` once; later calls are no-ops
    pub fn end(&mut self) {
        if self.ended {
            return;
        }
        self.ended = true;
        let duration_ms = u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.emit(EventKind::DecisionEnd {
            decision_id: self.decision_id.clone(),
            branch_taken: self.branch_taken.clone(),
            duration_ms: Some(duration_ms),
        });
    }

    /// Re-emit `decision_start`; the builder merges the new fields
    fn announce(&self, condition: Option<String>, decision_value: Option<Value>) {
        self.emit(EventKind::DecisionStart {
            decision_id: self.decision_id.clone(),
            name: None,
            condition,
            decision_value,
        });
    }

    fn emit_branch(&mut self, label: &str, condition: Option<String>, taken: bool) {
        if taken && self.branch_taken.is_none() {
            self.branch_taken = Some(label.to_string());
        }
        self.emit(EventKind::DecisionBranch {
            decision_id: self.decision_id.clone(),
            branch_label: label.to_string(),
            condition,
            taken,
        });
    }

    fn emit(&self, kind: EventKind) {
        self.emitter
            .emit(WorkflowEvent::new(self.workflow_id.clone(), now_ms(), kind));
    }
}

impl Drop for DecisionTracker<'_> {
    fn drop(&mut self) {
        self.end();
    }
}

/// Track a boolean `if`/`else`; returns `cond` unchanged
pub fn track_if(
    emitter: &dyn EventEmitter,
    workflow_id: &str,
    name: &str,
    cond: bool,
) -> bool {
    let mut tracker = DecisionTracker::start_with(
        emitter,
        workflow_id,
        uuid::Uuid::new_v4().to_string(),
        Some(name.to_string()),
        None,
        Some(Value::Bool(cond)),
    );
    tracker.branch("if", cond).branch("else", !cond);
    tracker.end();
    cond
}

/// Track a `switch`: the first case equal to `value` is taken, otherwise
/// `default`. Returns the taken label.
pub fn track_switch(
    emitter: &dyn EventEmitter,
    workflow_id: &str,
    name: &str,
    value: &Value,
    cases: &[&str],
) -> String {
    let mut tracker = DecisionTracker::start_with(
        emitter,
        workflow_id,
        uuid::Uuid::new_v4().to_string(),
        Some(name.to_string()),
        None,
        Some(value.clone()),
    );

    let matched = cases
        .iter()
        .find(|case| match value.as_str() {
            Some(s) => s == **case,
            None => value.to_string() == **case,
        })
        .copied();

    for case in cases {
        tracker.branch(case, Some(*case) == matched);
    }
    let taken = matched.unwrap_or("default");
    if matched.is_none() {
        tracker.take_branch("default");
    }
    tracker.end();
    taken.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventLog;
    use serde_json::json;

    fn types(log: &EventLog) -> Vec<&'static str> {
        log.events().iter().map(|e| e.type_name()).collect()
    }

    #[test]
    fn tracker_emits_start_branch_end() {
        let log = EventLog::new();
        {
            let mut d = DecisionTracker::start(&log, "wf", "check");
            d.branch("no", false).take_branch("yes");
            assert_eq!(d.branch_taken(), Some("yes"));
            d.end();
        }
        assert_eq!(
            types(&log),
            vec!["decision_start", "decision_branch", "decision_branch", "decision_end"]
        );
        let events = log.events();
        match &events[3].kind {
            EventKind::DecisionEnd { branch_taken, .. } => {
                assert_eq!(branch_taken.as_deref(), Some("yes"))
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn end_is_idempotent_and_runs_on_drop() {
        let log = EventLog::new();
        {
            let mut d = DecisionTracker::start(&log, "wf", "check");
            d.end();
            d.end();
        }
        {
            let _d = DecisionTracker::start(&log, "wf", "dropped");
        }
        let ends = log
            .events()
            .iter()
            .filter(|e| e.type_name() == "decision_end")
            .count();
        assert_eq!(ends, 2);
    }

    #[test]
    fn first_taken_branch_sticks() {
        let log = EventLog::new();
        let mut d = DecisionTracker::start(&log, "wf", "check");
        d.take_branch("a").take_branch("b");
        assert_eq!(d.branch_taken(), Some("a"));
    }

    #[test]
    fn track_if_reports_both_arms() {
        let log = EventLog::new();
        assert!(!track_if(&log, "wf", "flag", false));

        let taken: Vec<(String, bool)> = log
            .events()
            .iter()
            .filter_map(|e| match &e.kind {
                EventKind::DecisionBranch {
                    branch_label,
                    taken,
                    ..
                } => Some((branch_label.clone(), *taken)),
                _ => None,
            })
            .collect();
        assert_eq!(
            taken,
            vec![("if".to_string(), false), ("else".to_string(), true)]
        );
    }

    #[test]
    fn track_switch_matches_first_case_or_default() {
        let log = EventLog::new();
        let taken = track_switch(&log, "wf", "tier", &json!("gold"), &["silver", "gold"]);
        assert_eq!(taken, "gold");

        let taken = track_switch(&log, "wf", "tier", &json!(7), &["1", "2"]);
        assert_eq!(taken, "default");

        let taken = track_switch(&log, "wf", "tier", &json!(2), &["1", "2"]);
        assert_eq!(taken, "2");
    }

    #[test]
    fn tracked_decision_builds_settled_node() {
        use crate::builder::TraceBuilder;
        use parking_lot::Mutex;

        let builder = Mutex::new(TraceBuilder::new());
        builder.emit(WorkflowEvent::new("wf", 0, EventKind::WorkflowStart));
        let mut d = DecisionTracker::start_with(&builder, "wf", "d1", Some("check".into()), None, None);
        d.condition("x > 1").value(json!(3));
        d.branch_when("no", "x <= 1", false).take_branch("yes");
        d.end();

        let ir = builder.lock().ir();
        let node = ir.find("d1").and_then(|n| n.as_decision()).unwrap();
        assert_eq!(node.branch_taken.as_deref(), Some("yes"));
        assert_eq!(node.condition.as_deref(), Some("x > 1"));
        assert_eq!(node.decision_value, Some(json!(3)));
        assert_eq!(node.name.as_deref(), Some("check"));
        assert_eq!(node.branch("no").unwrap().condition.as_deref(), Some("x <= 1"));
    }
}
