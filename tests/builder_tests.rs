//! Integration tests for the trace builder
//!
//! Structural properties of the reconstructed tree: nesting under
//! out-of-order closes, decision settlement, hook lifecycle, unknown ids.

mod common;

use common::*;
use flowtrace::event::{BackpressureState, EventKind};
use flowtrace::ir::{
    DecisionBranch, DecisionNode, HookState, Node, NodeState, StepNode, Timing,
};
use flowtrace::TraceBuilder;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serde_json::json;

fn build(events: &[flowtrace::WorkflowEvent]) -> flowtrace::WorkflowIr {
    let mut builder = TraceBuilder::new();
    for event in events {
        builder.handle_event(event);
    }
    builder.ir()
}

fn root_children(ir: &flowtrace::WorkflowIr) -> &[Node] {
    &ir.workflow().unwrap().children
}

// ============================================================================
// Scopes
// ============================================================================

#[test]
fn test_steps_land_in_innermost_scope() {
    let ir = build(&[
        workflow_start(0),
        step_start(1, "before"),
        scope_start(2, "p"),
        step_start(3, "a"),
        step_start(4, "b"),
        scope_end(5, "p"),
        step_start(6, "after"),
    ]);

    assert_eq!(ids(root_children(&ir)), vec!["before", "p", "after"]);
    let scope = ir.find("p").and_then(Node::as_parallel).unwrap();
    assert_eq!(ids(&scope.children), vec!["a", "b"]);
    assert_eq!(scope.state, NodeState::Success);
    assert_eq!(scope.timing.duration_ms, Some(3));
}

#[test]
fn test_outer_scope_closes_before_inner() {
    let ir = build(&[
        workflow_start(0),
        scope_start(1, "outer"),
        scope_start(2, "inner"),
        scope_end(5, "outer"),
        // inner is still open and still innermost
        step_start(6, "late"),
        scope_end(9, "inner"),
    ]);

    let outer = ir.find("outer").and_then(Node::as_parallel).unwrap();
    assert_eq!(outer.timing.end_ts, Some(5));
    assert_eq!(outer.timing.duration_ms, Some(4));
    assert_eq!(ids(&outer.children), vec!["inner"]);

    let inner = outer.children[0].as_parallel().unwrap();
    assert_eq!(ids(&inner.children), vec!["late"]);
    assert_eq!(inner.timing.duration_ms, Some(7));
}

#[test]
fn test_race_scope_records_winner() {
    let ir = build(&[
        workflow_start(0),
        ev(
            1,
            EventKind::ScopeStart {
                scope_id: "r".into(),
                scope_type: flowtrace::event::ScopeType::Race,
                name: Some("fastest".into()),
            },
        ),
        step_start(2, "x"),
        step_start(2, "y"),
        ev(
            8,
            EventKind::ScopeEnd {
                scope_id: "r".into(),
                duration_ms: Some(6),
                winner_id: Some("y".into()),
            },
        ),
    ]);

    let race = ir.find("r").and_then(Node::as_parallel).unwrap();
    assert_eq!(race.mode, flowtrace::ir::ParallelMode::Race);
    assert_eq!(race.winner_id.as_deref(), Some("y"));
    assert_eq!(race.name.as_deref(), Some("fastest"));
}

proptest! {
    /// Nested scopes s0 > s1 > ... closed in any order keep their nesting
    /// and their own timing
    #[test]
    fn prop_scope_close_order_never_changes_nesting(
        close_order in (1usize..7).prop_flat_map(|n| Just((0..n).collect::<Vec<_>>()).prop_shuffle())
    ) {
        let n = close_order.len();
        let mut events = vec![workflow_start(0)];
        for i in 0..n {
            events.push(scope_start(10 + i as u64, &format!("s{}", i)));
            events.push(step_start(10 + i as u64, &format!("step{}", i)));
        }
        for (k, &i) in close_order.iter().enumerate() {
            events.push(scope_end(100 + k as u64, &format!("s{}", i)));
        }
        events.push(step_start(200, "tail"));

        let ir = build(&events);

        // Walk the chain s0 > s1 > ...
        let mut container = root_children(&ir);
        for i in 0..n {
            let scope_id = format!("s{}", i);
            let scope = container
                .iter()
                .find(|c| c.id() == scope_id)
                .and_then(Node::as_parallel);
            prop_assert!(scope.is_some(), "{} not found at depth {}", scope_id, i);
            let scope = scope.unwrap();

            let k = close_order.iter().position(|&c| c == i).unwrap() as u64;
            prop_assert_eq!(scope.state, NodeState::Success);
            prop_assert_eq!(scope.timing.start_ts, Some(10 + i as u64));
            prop_assert_eq!(scope.timing.end_ts, Some(100 + k));
            prop_assert_eq!(scope.timing.duration_ms, Some(100 + k - 10 - i as u64));
            prop_assert_eq!(scope.children[0].id(), format!("step{}", i));
            container = &scope.children;
        }

        // Every scope closed: new work goes to the root
        prop_assert_eq!(root_children(&ir).last().map(Node::id), Some("tail"));
        prop_assert_eq!(ir.node_count(), 2 * n + 1);
    }

    /// Arbitrary, possibly unmatched, scope events never panic and never
    /// lose a started node
    #[test]
    fn prop_arbitrary_scope_events_keep_every_node(
        ops in proptest::collection::vec((0u8..3, 0usize..4), 0..40)
    ) {
        let mut events = vec![workflow_start(0)];
        let mut started = std::collections::HashSet::new();
        for (ts, (op, id)) in ops.into_iter().enumerate() {
            let ts = ts as u64 + 1;
            match op {
                0 => {
                    started.insert(format!("s{}", id));
                    events.push(scope_start(ts, &format!("s{}", id)));
                }
                1 => events.push(scope_end(ts, &format!("s{}", id))),
                _ => {
                    started.insert(format!("t{}", ts));
                    events.push(step_start(ts, &format!("t{}", ts)));
                }
            }
        }

        let ir = build(&events);
        prop_assert_eq!(ir.node_count(), started.len());
        for id in &started {
            prop_assert!(ir.find(id).is_some());
        }
    }
}

// ============================================================================
// Decisions
// ============================================================================

#[test]
fn test_late_taken_branch_claims_pending_children() {
    let ir = build(&[
        workflow_start(0),
        decision_start(1, "d"),
        branch(2, "d", "a", false),
        step_start(3, "x"),
        step_start(4, "y"),
        branch(5, "d", "b", true),
        step_start(6, "z"),
        decision_end(7, "d"),
    ]);

    let decision = ir.find("d").and_then(Node::as_decision).unwrap();
    assert_eq!(decision.branch_taken.as_deref(), Some("b"));
    assert!(decision.branch("a").unwrap().children.is_empty());
    assert_eq!(ids(&decision.branch("b").unwrap().children), vec!["x", "y", "z"]);
    assert_eq!(ids(root_children(&ir)), vec!["d"]);
}

#[test]
fn test_branch_taken_is_never_overwritten() {
    let ir = build(&[
        workflow_start(0),
        decision_start(1, "d"),
        branch(2, "d", "first", true),
        branch(3, "d", "second", true),
        branch(4, "d", "third", false),
        decision_end(5, "d"),
    ]);

    let decision = ir.find("d").and_then(Node::as_decision).unwrap();
    assert_eq!(decision.branch_taken.as_deref(), Some("first"));
    // The later branch keeps its own flag for rendering
    assert!(decision.branch("second").unwrap().taken);
    assert!(!decision.branch("third").unwrap().taken);
}

#[test]
fn test_settled_decision_tree_shape() {
    let ir = build(&[
        workflow_start(0),
        ev(
            1,
            EventKind::DecisionStart {
                decision_id: "tier".into(),
                name: Some("tier check".into()),
                condition: Some("tier == gold".into()),
                decision_value: Some(json!("gold")),
            },
        ),
        branch(2, "tier", "gold", true),
        branch(2, "tier", "standard", false),
        step_start(3, "discount"),
        step_success(5, "discount", Some(json!(10))),
        ev(
            6,
            EventKind::DecisionEnd {
                decision_id: "tier".into(),
                branch_taken: Some("gold".into()),
                duration_ms: Some(5),
            },
        ),
    ]);

    let expected = Node::Decision(DecisionNode {
        id: "tier".into(),
        name: Some("tier check".into()),
        condition: Some("tier == gold".into()),
        decision_value: Some(json!("gold")),
        state: NodeState::Success,
        timing: Timing {
            start_ts: Some(1),
            end_ts: Some(6),
            duration_ms: Some(5),
        },
        branches: vec![
            DecisionBranch {
                label: "gold".into(),
                condition: None,
                taken: true,
                children: vec![Node::Step(StepNode {
                    id: "discount".into(),
                    state: NodeState::Success,
                    timing: Timing {
                        start_ts: Some(3),
                        end_ts: Some(5),
                        duration_ms: Some(2),
                    },
                    output: Some(json!(10)),
                    ..StepNode::default()
                })],
            },
            DecisionBranch {
                label: "standard".into(),
                condition: None,
                taken: false,
                children: vec![],
            },
        ],
        branch_taken: Some("gold".into()),
    });

    assert_eq!(root_children(&ir), &[expected]);
}

#[test]
fn test_unsettled_decision_promotes_pending_children() {
    let ir = build(&[
        workflow_start(0),
        scope_start(1, "p"),
        decision_start(2, "d"),
        branch(3, "d", "yes", false),
        step_start(4, "orphan1"),
        step_start(5, "orphan2"),
        decision_end(6, "d"),
        step_start(7, "sibling"),
        scope_end(8, "p"),
    ]);

    let scope = ir.find("p").and_then(Node::as_parallel).unwrap();
    assert_eq!(ids(&scope.children), vec!["d", "orphan1", "orphan2", "sibling"]);
    let decision = scope.children[0].as_decision().unwrap();
    assert_eq!(decision.branch_taken, None);
    assert!(decision.branches.iter().all(|b| b.children.is_empty()));
}

#[test]
fn test_decision_end_label_settles_silent_decision() {
    let ir = build(&[
        workflow_start(0),
        decision_start(1, "d"),
        step_start(2, "x"),
        ev(
            3,
            EventKind::DecisionEnd {
                decision_id: "d".into(),
                branch_taken: Some("else".into()),
                duration_ms: None,
            },
        ),
    ]);

    let decision = ir.find("d").and_then(Node::as_decision).unwrap();
    assert_eq!(decision.branch_taken.as_deref(), Some("else"));
    assert_eq!(ids(&decision.branch("else").unwrap().children), vec!["x"]);
}

#[test]
fn test_open_decision_outranks_inner_scope() {
    let ir = build(&[
        workflow_start(0),
        decision_start(1, "d"),
        branch(2, "d", "yes", true),
        scope_start(3, "p"),
        step_start(4, "a"),
        step_start(4, "b"),
        scope_end(6, "p"),
        decision_end(7, "d"),
    ]);

    let decision = ir.find("d").and_then(Node::as_decision).unwrap();
    let taken = decision.branch("yes").unwrap();
    assert_eq!(ids(&taken.children), vec!["p", "a", "b"]);
    assert!(taken.children[0].as_parallel().unwrap().children.is_empty());
}

#[test]
fn test_scope_inside_unsettled_decision_does_not_bypass_pending() {
    let ir = build(&[
        workflow_start(0),
        decision_start(1, "d"),
        scope_start(2, "p"),
        step_start(3, "a"),
        branch(4, "d", "yes", true),
        step_start(5, "b"),
        scope_end(6, "p"),
        decision_end(7, "d"),
    ]);

    let decision = ir.find("d").and_then(Node::as_decision).unwrap();
    let taken = decision.branch("yes").unwrap();
    assert_eq!(ids(&taken.children), vec!["p", "a", "b"]);
    assert!(taken.children[0].as_parallel().unwrap().children.is_empty());
    assert_eq!(ids(root_children(&ir)), vec!["d"]);
}

#[test]
fn test_scope_opened_after_decision_ends_collects_steps() {
    let ir = build(&[
        workflow_start(0),
        decision_start(1, "d"),
        branch(2, "d", "yes", true),
        decision_end(3, "d"),
        scope_start(4, "p"),
        step_start(5, "a"),
        scope_end(6, "p"),
    ]);

    let scope = ir.find("p").and_then(Node::as_parallel).unwrap();
    assert_eq!(ids(&scope.children), vec!["a"]);
    assert_eq!(ids(root_children(&ir)), vec!["d", "p"]);
}

#[test]
fn test_nested_decision_settles_independently() {
    let ir = build(&[
        workflow_start(0),
        decision_start(1, "outer"),
        decision_start(2, "inner"),
        step_start(3, "x"),
        branch(4, "inner", "left", true),
        branch(5, "outer", "main", true),
        decision_end(6, "inner"),
        step_start(7, "y"),
        decision_end(8, "outer"),
    ]);

    let outer = ir.find("outer").and_then(Node::as_decision).unwrap();
    assert_eq!(ids(&outer.branch("main").unwrap().children), vec!["inner", "y"]);
    let inner = outer.branch("main").unwrap().children[0].as_decision().unwrap();
    assert_eq!(ids(&inner.branch("left").unwrap().children), vec!["x"]);
}

#[test]
fn test_outer_decision_ends_before_inner_decision() {
    let mut builder = TraceBuilder::new();
    for event in [
        workflow_start(0),
        decision_start(1, "outer"),
        branch(2, "outer", "main", true),
        decision_start(3, "inner"),
        decision_end(4, "outer"),
        step_start(5, "x"),
        branch(6, "inner", "left", true),
        decision_end(7, "inner"),
        step_start(8, "y"),
    ] {
        builder.handle_event(&event);
    }
    assert_eq!(builder.open_decision_count(), 0);

    let ir = builder.ir();
    assert_eq!(ids(root_children(&ir)), vec!["outer", "y"]);
    let outer = ir.find("outer").and_then(Node::as_decision).unwrap();
    assert_eq!(outer.state, NodeState::Success);
    assert_eq!(ids(&outer.branch("main").unwrap().children), vec!["inner"]);
    let inner = outer.branch("main").unwrap().children[0].as_decision().unwrap();
    assert_eq!(ids(&inner.branch("left").unwrap().children), vec!["x"]);
}

#[test]
fn test_outer_decision_ends_before_inner_scope() {
    let ir = build(&[
        workflow_start(0),
        decision_start(1, "d"),
        branch(2, "d", "yes", true),
        scope_start(3, "p"),
        decision_end(4, "d"),
        step_start(5, "late"),
        scope_end(6, "p"),
    ]);

    let decision = ir.find("d").and_then(Node::as_decision).unwrap();
    let scope = decision.branch("yes").unwrap().children[0].as_parallel().unwrap();
    assert_eq!(ids(&scope.children), vec!["late"]);
}

// ============================================================================
// Hooks
// ============================================================================

#[test]
fn test_pre_start_hooks_attach_to_next_run() {
    let ir = build(&[hook_should_run(0), hook_before_start(1), workflow_start(2)]);

    let hooks = ir.hooks.expect("hooks attached");
    assert_eq!(hooks.should_run.unwrap().result, Some(true));
    assert_eq!(hooks.on_before_start.unwrap().state, HookState::Success);
}

#[test]
fn test_pre_start_hooks_skip_unterminated_run() {
    let mut builder = TraceBuilder::new();
    for event in [
        workflow_start(0),
        step_start(1, "a"),
        hook_should_run(2),
        hook_before_start(3),
    ] {
        builder.handle_event(&event);
    }
    // The first run never terminated; its IR does not absorb the next run's hooks
    assert!(builder.ir().hooks.is_none());
    assert!(builder.pending_hooks().is_some());

    builder.handle_event(&workflow_start(10));
    let hooks = builder.ir().hooks.expect("hooks attached to second run");
    assert_eq!(hooks.should_run.unwrap().ts, 2);
    assert_eq!(hooks.on_before_start.unwrap().ts, 3);
    assert!(builder.pending_hooks().is_none());
}

#[test]
fn test_new_run_without_hooks_has_no_hooks() {
    let mut builder = TraceBuilder::new();
    for event in [
        hook_should_run(0),
        workflow_start(1),
        step_start(2, "a"),
        hook_after_step(3, "a"),
        workflow_success(4),
        workflow_start(10),
        step_start(11, "b"),
    ] {
        builder.handle_event(&event);
    }

    let ir = builder.ir();
    assert!(ir.hooks.is_none());
    assert!(ir.find("a").is_none());
    assert_eq!(ir.metadata.created_at, 10);
}

#[test]
fn test_after_step_hooks_are_keyed_by_step() {
    let ir = build(&[
        workflow_start(0),
        step_start(1, "a"),
        hook_after_step(2, "a"),
        step_start(3, "b"),
        ev(
            4,
            EventKind::HookAfterStepError {
                step_id: "b".into(),
                step_key: Some("b-key".into()),
                duration_ms: 1,
                error: json!("hook exploded"),
            },
        ),
        hook_after_step(5, "a"),
    ]);

    let hooks = ir.hooks.unwrap();
    let keys: Vec<&str> = hooks.on_after_step.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["a", "b"]);
    assert_eq!(hooks.on_after_step["a"].ts, 5);
    assert_eq!(hooks.on_after_step["b"].state, HookState::Error);
    assert_eq!(hooks.on_after_step["b"].step_key.as_deref(), Some("b-key"));
}

// ============================================================================
// Steps, streams, identity
// ============================================================================

#[test]
fn test_step_lifecycle_variants() {
    let ir = build(&[
        workflow_start(0),
        step_start(1, "retry"),
        ev(
            2,
            EventKind::StepRetry {
                step_id: "retry".into(),
                step_key: None,
                attempt: 1,
                max_attempts: 3,
                delay_ms: 100,
                error: Some(json!("flaky")),
            },
        ),
        step_success(5, "retry", None),
        step_start(6, "slow"),
        ev(
            9,
            EventKind::StepTimeout {
                step_id: "slow".into(),
                step_key: None,
                timeout_ms: Some(3),
                duration_ms: Some(3),
            },
        ),
        ev(
            10,
            EventKind::StepCacheHit {
                step_id: "memo".into(),
                step_key: None,
            },
        ),
        ev(
            11,
            EventKind::StepSkipped {
                step_id: "skip".into(),
                step_key: None,
                name: None,
                reason: Some("disabled".into()),
            },
        ),
    ]);

    let retry = ir.find("retry").and_then(Node::as_step).unwrap();
    assert_eq!(retry.retry_count, 1);
    assert_eq!(retry.state, NodeState::Success);

    let slow = ir.find("slow").and_then(Node::as_step).unwrap();
    assert!(slow.timed_out);
    assert_eq!(slow.state, NodeState::Error);

    let memo = ir.find("memo").and_then(Node::as_step).unwrap();
    assert_eq!(memo.state, NodeState::Cached);
    assert_eq!(memo.cached, Some(true));

    let skip = ir.find("skip").and_then(Node::as_step).unwrap();
    assert_eq!(skip.state, NodeState::Skipped);
    assert_eq!(skip.skip_reason.as_deref(), Some("disabled"));
}

#[test]
fn test_retry_for_unknown_step_is_ignored() {
    let ir = build(&[
        workflow_start(0),
        ev(
            1,
            EventKind::StepRetry {
                step_id: "ghost".into(),
                step_key: None,
                attempt: 1,
                max_attempts: 2,
                delay_ms: 0,
                error: None,
            },
        ),
    ]);
    assert_eq!(ir.node_count(), 0);
}

#[test]
fn test_duplicate_keys_are_distinct_nodes() {
    let ir = build(&[
        workflow_start(0),
        keyed_step_start(1, "id-1", "fetch"),
        keyed_step_start(2, "id-2", "fetch"),
        step_success(3, "id-1", None),
    ]);

    assert_eq!(ids(root_children(&ir)), vec!["id-1", "id-2"]);
    let second = ir.find("id-2").and_then(Node::as_step).unwrap();
    assert_eq!(second.state, NodeState::Running);
}

#[test]
fn test_stream_lifecycle() {
    let ir = build(&[
        workflow_start(0),
        ev(
            1,
            EventKind::StreamCreated {
                stream_id: "tokens".into(),
                namespace: "llm".into(),
            },
        ),
        ev(
            2,
            EventKind::StreamWrite {
                stream_id: "tokens".into(),
                position: 0,
            },
        ),
        ev(
            3,
            EventKind::StreamWrite {
                stream_id: "tokens".into(),
                position: 1,
            },
        ),
        ev(
            4,
            EventKind::StreamRead {
                stream_id: "tokens".into(),
                position: 0,
            },
        ),
        ev(
            5,
            EventKind::StreamBackpressure {
                stream_id: "tokens".into(),
                state: BackpressureState::Active,
            },
        ),
        ev(
            6,
            EventKind::StreamClose {
                stream_id: "tokens".into(),
                final_position: 2,
            },
        ),
    ]);

    let stream = ir.find("tokens").and_then(Node::as_stream).unwrap();
    assert_eq!(stream.write_count, 2);
    assert_eq!(stream.read_count, 1);
    assert!(stream.backpressure_occurred);
    assert_eq!(stream.final_position, Some(2));
    assert_eq!(stream.stream_state, flowtrace::ir::StreamState::Closed);
}

#[test]
fn test_workflow_terminal_states() {
    let ir = build(&[
        workflow_start(0),
        ev(
            9,
            EventKind::WorkflowCancelled {
                reason: Some("SIGINT".into()),
                duration_ms: None,
            },
        ),
    ]);
    assert_eq!(ir.state(), NodeState::Aborted);
    assert_eq!(ir.workflow().unwrap().timing.duration_ms, Some(9));

    let ir = build(&[
        workflow_start(0),
        ev(
            4,
            EventKind::WorkflowError {
                error: json!({"message": "boom"}),
                duration_ms: Some(4),
            },
        ),
    ]);
    assert_eq!(ir.state(), NodeState::Error);
    assert_eq!(ir.workflow().unwrap().error, Some(json!({"message": "boom"})));
}

#[test]
fn test_ir_json_shape() {
    let ir = build(&[workflow_start(0), step_start(1, "a"), workflow_success(2)]);
    let json = ir.to_json_safe();

    assert_eq!(json["root"]["type"], "workflow");
    assert_eq!(json["root"]["state"], "success");
    assert_eq!(json["root"]["children"][0]["type"], "step");
    assert_eq!(json["metadata"]["lastUpdatedAt"], 2);
    assert!(json.get("hooks").is_none());
}

#[test]
fn test_pathological_payloads_survive_serialization() {
    let mut nested = json!("leaf");
    for _ in 0..1_000 {
        nested = json!({ "self": nested });
    }
    let ir = build(&[
        workflow_start(0),
        ev(
            1,
            EventKind::StepStart {
                step_id: "big".into(),
                step_key: None,
                name: None,
                input: Some(nested),
            },
        ),
        step_success(2, "big", Some(json!({ "id": u64::MAX }))),
    ]);

    let text = ir.to_json_string_safe(false);
    let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
    let step = &parsed["root"]["children"][0];
    assert_eq!(step["output"]["id"], json!(u64::MAX.to_string()));
    assert!(text.contains("[Max depth exceeded]"));
}
