//! Trace Builder - folds lifecycle events into a `WorkflowIr`
//!
//! Pure state machine: one event in, state updated, no I/O, no timers.
//!
//! ## Insertion point
//!
//! Every event that creates a node (step, scope, decision, stream) attaches
//! it according to the innermost open decision. Scopes only matter when no
//! decision is open:
//!
//! | Innermost open decision | New node goes to |
//! |-------------------------|------------------|
//! | settled                 | the taken branch |
//! | unsettled               | the decision's pending buffer |
//! | none, scope open        | the innermost scope's children |
//! | none, no scope          | the workflow root |
//!
//! Pending children move, in arrival order, into the first branch reported
//! with `taken: true`. A decision that ends without ever settling promotes
//! its pending children into its own container, right after itself.
//!
//! ## Closing
//!
//! `scope_end` / `decision_end` resolve their target by id, anywhere in the
//! open stack. Closing never requires LIFO order.

mod arena;

use rustc_hash::FxHashMap;
use serde_json::{json, Value};
use tracing::debug;

use crate::event::{BackpressureState, EventKind, ScopeType, WorkflowEvent};
use crate::ir::{
    DecisionNode, HookExecution, HookMap, HookState, IrMetadata, Node, NodeState, ParallelNode,
    StepNode, StreamNode, StreamState, Timing, WorkflowIr, WorkflowNode,
};
use arena::{Arena, Container, DecisionSlot, Slot, SlotId};

/// An open scope or decision, in opening order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Open {
    Scope(SlotId),
    Decision(SlotId),
}

/// Id -> slot lookups, one namespace per node kind
#[derive(Debug, Clone, Default)]
struct NodeIndex {
    steps: FxHashMap<String, SlotId>,
    scopes: FxHashMap<String, SlotId>,
    decisions: FxHashMap<String, SlotId>,
    streams: FxHashMap<String, SlotId>,
}

/// Reconstructs the execution tree of one workflow run
#[derive(Debug, Clone, Default)]
pub struct TraceBuilder {
    root: WorkflowNode,
    arena: Arena,
    index: NodeIndex,
    open: Vec<Open>,
    hooks: Option<HookMap>,
    /// Pre-start hooks waiting for the next `workflow_start`
    pending_hooks: Option<HookMap>,
    created_at: Option<u64>,
    last_updated_at: u64,
}

impl TraceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget the current run; buffered pre-start hooks survive
    pub fn reset(&mut self) {
        let pending_hooks = self.pending_hooks.take();
        *self = Self {
            pending_hooks,
            ..Self::default()
        };
    }

    /// Id of the current run (empty before any `workflow_start`)
    pub fn workflow_id(&self) -> &str {
        &self.root.id
    }

    pub fn open_scope_count(&self) -> usize {
        self.open
            .iter()
            .filter(|o| matches!(o, Open::Scope(_)))
            .count()
    }

    pub fn open_decision_count(&self) -> usize {
        self.open
            .iter()
            .filter(|o| matches!(o, Open::Decision(_)))
            .count()
    }

    /// Pre-start hooks buffered for the next run
    pub fn pending_hooks(&self) -> Option<&HookMap> {
        self.pending_hooks.as_ref()
    }

    /// Snapshot of the tree as of the last processed event
    pub fn ir(&self) -> WorkflowIr {
        let mut root = self.root.clone();
        root.children = self
            .arena
            .root_children()
            .iter()
            .map(|&id| self.arena.materialize(id))
            .collect();

        WorkflowIr {
            root: Node::Workflow(root),
            metadata: IrMetadata {
                created_at: self.created_at.unwrap_or(self.last_updated_at),
                last_updated_at: self.last_updated_at,
            },
            hooks: self.hooks.clone(),
        }
    }

    /// Fold one event into the tree
    pub fn handle_event(&mut self, event: &WorkflowEvent) {
        let ts = event.ts;
        if self.created_at.is_none() {
            self.created_at = Some(ts);
        }
        self.last_updated_at = ts;

        match &event.kind {
            // ═══════════════════════════════════════════
            // WORKFLOW
            // ═══════════════════════════════════════════
            EventKind::WorkflowStart => self.start_run(&event.workflow_id, ts),
            EventKind::WorkflowSuccess { duration_ms } => {
                self.finish_run(NodeState::Success, ts, *duration_ms, None)
            }
            EventKind::WorkflowError { error, duration_ms } => {
                self.finish_run(NodeState::Error, ts, *duration_ms, Some(error.clone()))
            }
            EventKind::WorkflowCancelled {
                reason,
                duration_ms,
            } => {
                let reason = reason.as_ref().map(|r| json!({ "reason": r }));
                self.finish_run(NodeState::Aborted, ts, *duration_ms, reason)
            }

            // ═══════════════════════════════════════════
            // STEPS
            // ═══════════════════════════════════════════
            EventKind::StepStart {
                step_id,
                step_key,
                name,
                input,
            } => self.step_start(step_id, step_key, name, input, ts),
            EventKind::StepSuccess {
                step_id,
                step_key,
                name,
                duration_ms,
                output,
            } => {
                let slot = self.step_or_synthesize(step_id, step_key, name, ts, *duration_ms);
                if let Some(step) = self.step_mut(slot) {
                    step.state = NodeState::Success;
                    step.output = output.clone();
                    step.timing.close(ts, *duration_ms);
                }
            }
            EventKind::StepError {
                step_id,
                step_key,
                name,
                duration_ms,
                error,
            } => {
                let slot = self.step_or_synthesize(step_id, step_key, name, ts, *duration_ms);
                if let Some(step) = self.step_mut(slot) {
                    step.state = NodeState::Error;
                    step.error = Some(error.clone());
                    step.timing.close(ts, *duration_ms);
                }
            }
            EventKind::StepRetry {
                step_id,
                attempt,
                max_attempts,
                delay_ms,
                error,
                ..
            } => match self.index.steps.get(step_id).copied() {
                Some(slot) => {
                    if let Some(step) = self.step_mut(slot) {
                        step.retry_count += 1;
                        step.state = NodeState::Running;
                        if error.is_some() {
                            step.error = error.clone();
                        }
                    }
                    debug!(step_id = %step_id, attempt, max_attempts, delay_ms, "Step retry");
                }
                None => debug!(step_id = %step_id, "Retry for unknown step ignored"),
            },
            EventKind::StepTimeout {
                step_id,
                step_key,
                timeout_ms,
                duration_ms,
            } => {
                let slot = self.step_or_synthesize(step_id, step_key, &None, ts, *duration_ms);
                if let Some(step) = self.step_mut(slot) {
                    step.state = NodeState::Error;
                    step.timed_out = true;
                    if step.error.is_none() {
                        step.error = Some(json!({ "timedOut": true, "timeoutMs": timeout_ms }));
                    }
                    step.timing.close(ts, *duration_ms);
                }
            }
            EventKind::StepSkipped {
                step_id,
                step_key,
                name,
                reason,
            } => {
                let slot = self.step_or_synthesize(step_id, step_key, name, ts, Some(0));
                if let Some(step) = self.step_mut(slot) {
                    step.state = NodeState::Skipped;
                    step.skip_reason = reason.clone();
                    step.timing.close(ts, None);
                }
            }
            EventKind::StepCacheHit { step_id, step_key } => {
                match self.index.steps.get(step_id).copied() {
                    Some(slot) => {
                        if let Some(step) = self.step_mut(slot) {
                            step.cached = Some(true);
                        }
                    }
                    None => {
                        // Served from cache without ever starting
                        let slot = self.create_step(step_id, step_key, &None, &None, ts);
                        if let Some(step) = self.step_mut(slot) {
                            step.state = NodeState::Cached;
                            step.cached = Some(true);
                            step.timing.close(ts, Some(0));
                        }
                    }
                }
            }
            EventKind::StepCacheMiss { step_id, .. } => {
                match self.index.steps.get(step_id).copied() {
                    Some(slot) => {
                        if let Some(step) = self.step_mut(slot) {
                            step.cached = Some(false);
                        }
                    }
                    None => debug!(step_id = %step_id, "Cache miss for unknown step ignored"),
                }
            }

            // ═══════════════════════════════════════════
            // SCOPES
            // ═══════════════════════════════════════════
            EventKind::ScopeStart {
                scope_id,
                scope_type,
                name,
            } => self.scope_start(scope_id, *scope_type, name, ts),
            EventKind::ScopeEnd {
                scope_id,
                duration_ms,
                winner_id,
            } => self.scope_end(scope_id, *duration_ms, winner_id, ts),

            // ═══════════════════════════════════════════
            // DECISIONS
            // ═══════════════════════════════════════════
            EventKind::DecisionStart {
                decision_id,
                name,
                condition,
                decision_value,
            } => self.decision_start(decision_id, name, condition, decision_value, ts),
            EventKind::DecisionBranch {
                decision_id,
                branch_label,
                condition,
                taken,
            } => self.decision_branch(decision_id, branch_label, condition, *taken),
            EventKind::DecisionEnd {
                decision_id,
                branch_taken,
                duration_ms,
            } => self.decision_end(decision_id, branch_taken, *duration_ms, ts),

            // ═══════════════════════════════════════════
            // STREAMS
            // ═══════════════════════════════════════════
            EventKind::StreamCreated {
                stream_id,
                namespace,
            } => {
                if self.index.streams.contains_key(stream_id) {
                    debug!(stream_id = %stream_id, "Duplicate stream_created ignored");
                    return;
                }
                let slot = self.arena.insert(
                    Slot::Stream(StreamNode {
                        id: stream_id.clone(),
                        namespace: namespace.clone(),
                        stream_state: StreamState::Active,
                        timing: Timing::started(ts),
                        ..StreamNode::default()
                    }),
                    self.insertion_point(),
                );
                self.index.streams.insert(stream_id.clone(), slot);
            }
            EventKind::StreamWrite { stream_id, .. } => {
                self.with_stream(stream_id, |s| s.write_count += 1)
            }
            EventKind::StreamRead { stream_id, .. } => {
                self.with_stream(stream_id, |s| s.read_count += 1)
            }
            EventKind::StreamClose {
                stream_id,
                final_position,
            } => self.with_stream(stream_id, |s| {
                s.stream_state = StreamState::Closed;
                s.final_position = Some(*final_position);
                s.timing.close(ts, None);
            }),
            EventKind::StreamError {
                stream_id, error, ..
            } => self.with_stream(stream_id, |s| {
                s.stream_state = StreamState::Error;
                s.error = Some(error.clone());
                s.timing.close(ts, None);
            }),
            EventKind::StreamBackpressure { stream_id, state } => {
                if *state == BackpressureState::Active {
                    self.with_stream(stream_id, |s| s.backpressure_occurred = true)
                }
            }

            // ═══════════════════════════════════════════
            // HOOKS
            // ═══════════════════════════════════════════
            EventKind::HookShouldRun {
                duration_ms,
                result,
                skipped,
            } => {
                let exec = hook_success(ts, *duration_ms, Some(*result), *skipped, None);
                self.pre_start_hooks().should_run = Some(exec);
            }
            EventKind::HookShouldRunError { duration_ms, error } => {
                let exec = hook_error(ts, *duration_ms, error, None);
                self.pre_start_hooks().should_run = Some(exec);
            }
            EventKind::HookBeforeStart {
                duration_ms,
                result,
                skipped,
            } => {
                let exec = hook_success(ts, *duration_ms, Some(*result), *skipped, None);
                self.pre_start_hooks().on_before_start = Some(exec);
            }
            EventKind::HookBeforeStartError { duration_ms, error } => {
                let exec = hook_error(ts, *duration_ms, error, None);
                self.pre_start_hooks().on_before_start = Some(exec);
            }
            EventKind::HookAfterStep {
                step_id,
                step_key,
                duration_ms,
            } => {
                let exec = hook_success(ts, *duration_ms, None, false, step_key.clone());
                self.hooks
                    .get_or_insert_with(HookMap::default)
                    .on_after_step
                    .insert(step_id.clone(), exec);
            }
            EventKind::HookAfterStepError {
                step_id,
                step_key,
                duration_ms,
                error,
            } => {
                let exec = hook_error(ts, *duration_ms, error, step_key.clone());
                self.hooks
                    .get_or_insert_with(HookMap::default)
                    .on_after_step
                    .insert(step_id.clone(), exec);
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════
    // Run boundaries
    // ═══════════════════════════════════════════════════════════════

    fn start_run(&mut self, workflow_id: &str, ts: u64) {
        let hooks = self.pending_hooks.take();
        *self = Self {
            root: WorkflowNode {
                id: workflow_id.to_string(),
                state: NodeState::Running,
                timing: Timing::started(ts),
                ..WorkflowNode::default()
            },
            hooks,
            created_at: Some(ts),
            last_updated_at: ts,
            ..Self::default()
        };
        debug!(workflow_id = %workflow_id, "Run started");
    }

    fn finish_run(
        &mut self,
        state: NodeState,
        ts: u64,
        duration_ms: Option<u64>,
        error: Option<Value>,
    ) {
        self.root.state = state;
        self.root.error = error;
        self.root.timing.close(ts, duration_ms);
    }

    /// Pre-start hooks always belong to the next run, even while an
    /// unterminated run is still in flight
    fn pre_start_hooks(&mut self) -> &mut HookMap {
        self.pending_hooks.get_or_insert_with(HookMap::default)
    }

    // ═══════════════════════════════════════════════════════════════
    // Insertion point
    // ═══════════════════════════════════════════════════════════════

    fn insertion_point(&self) -> Container {
        let innermost_decision = self.open.iter().rev().find_map(|o| match o {
            Open::Decision(id) => Some(*id),
            Open::Scope(_) => None,
        });
        if let Some(id) = innermost_decision {
            return match self.arena.decision(id).and_then(|d| d.settled) {
                Some(branch) => Container::Branch(id, branch),
                None => Container::Pending(id),
            };
        }
        let innermost_scope = self.open.iter().rev().find_map(|o| match o {
            Open::Scope(id) => Some(*id),
            Open::Decision(_) => None,
        });
        innermost_scope.map_or(Container::Root, Container::Scope)
    }

    fn close_open(&mut self, target: Open) {
        if let Some(pos) = self.open.iter().rposition(|o| *o == target) {
            self.open.remove(pos);
        }
    }

    // ═══════════════════════════════════════════════════════════════
    // Steps
    // ═══════════════════════════════════════════════════════════════

    fn step_mut(&mut self, slot: SlotId) -> Option<&mut StepNode> {
        match self.arena.get_mut(slot) {
            Slot::Step(step) => Some(step),
            _ => None,
        }
    }

    fn create_step(
        &mut self,
        step_id: &str,
        step_key: &Option<String>,
        name: &Option<String>,
        input: &Option<Value>,
        ts: u64,
    ) -> SlotId {
        let slot = self.arena.insert(
            Slot::Step(StepNode {
                id: step_id.to_string(),
                key: step_key.clone(),
                name: name.clone(),
                state: NodeState::Running,
                timing: Timing::started(ts),
                input: input.clone(),
                ..StepNode::default()
            }),
            self.insertion_point(),
        );
        self.index.steps.insert(step_id.to_string(), slot);
        slot
    }

    fn step_start(
        &mut self,
        step_id: &str,
        step_key: &Option<String>,
        name: &Option<String>,
        input: &Option<Value>,
        ts: u64,
    ) {
        let Some(slot) = self.index.steps.get(step_id).copied() else {
            self.create_step(step_id, step_key, name, input, ts);
            return;
        };

        // Same id again: the step is re-entered, not duplicated
        if let Some(step) = self.step_mut(slot) {
            step.state = NodeState::Running;
            step.timing.end_ts = None;
            step.timing.duration_ms = None;
            if step_key.is_some() {
                step.key = step_key.clone();
            }
            if name.is_some() {
                step.name = name.clone();
            }
            if input.is_some() {
                step.input = input.clone();
            }
        }
    }

    /// Known slot, or a minimal node at the insertion point
    fn step_or_synthesize(
        &mut self,
        step_id: &str,
        step_key: &Option<String>,
        name: &Option<String>,
        ts: u64,
        duration_ms: Option<u64>,
    ) -> SlotId {
        if let Some(slot) = self.index.steps.get(step_id).copied() {
            return slot;
        }
        debug!(step_id = %step_id, "Terminal event for unknown step, synthesizing node");
        let start = ts.saturating_sub(duration_ms.unwrap_or(0));
        self.create_step(step_id, step_key, name, &None, start)
    }

    // ═══════════════════════════════════════════════════════════════
    // Scopes
    // ═══════════════════════════════════════════════════════════════

    fn scope_start(
        &mut self,
        scope_id: &str,
        scope_type: ScopeType,
        name: &Option<String>,
        ts: u64,
    ) {
        if self.index.scopes.contains_key(scope_id) {
            debug!(scope_id = %scope_id, "Duplicate scope_start ignored");
            return;
        }
        let node = ParallelNode {
            id: scope_id.to_string(),
            name: name.clone(),
            mode: scope_type.into(),
            state: NodeState::Running,
            timing: Timing::started(ts),
            ..ParallelNode::default()
        };
        let slot = self
            .arena
            .insert(Slot::Parallel(node, Vec::new()), self.insertion_point());
        self.index.scopes.insert(scope_id.to_string(), slot);
        self.open.push(Open::Scope(slot));
    }

    fn scope_end(
        &mut self,
        scope_id: &str,
        duration_ms: Option<u64>,
        winner_id: &Option<String>,
        ts: u64,
    ) {
        let Some(slot) = self.index.scopes.get(scope_id).copied() else {
            debug!(scope_id = %scope_id, "scope_end for unknown scope ignored");
            return;
        };
        if let Slot::Parallel(node, _) = self.arena.get_mut(slot) {
            if !node.state.is_finished() {
                node.state = NodeState::Success;
            }
            node.timing.close(ts, duration_ms);
            if winner_id.is_some() {
                node.winner_id = winner_id.clone();
            }
        }
        self.close_open(Open::Scope(slot));
    }

    // ═══════════════════════════════════════════════════════════════
    // Decisions
    // ═══════════════════════════════════════════════════════════════

    fn decision_start(
        &mut self,
        decision_id: &str,
        name: &Option<String>,
        condition: &Option<String>,
        decision_value: &Option<Value>,
        ts: u64,
    ) {
        // Repeated start for an open decision fills in late-known fields
        if let Some(slot) = self.index.decisions.get(decision_id).copied() {
            if let Some(decision) = self.arena.decision_mut(slot) {
                let node = &mut decision.node;
                if name.is_some() {
                    node.name = name.clone();
                }
                if condition.is_some() {
                    node.condition = condition.clone();
                }
                if decision_value.is_some() {
                    node.decision_value = decision_value.clone();
                }
            }
            return;
        }
        // Insertion point is computed before the decision itself is open
        let container = self.insertion_point();
        let node = DecisionNode {
            id: decision_id.to_string(),
            name: name.clone(),
            condition: condition.clone(),
            decision_value: decision_value.clone(),
            state: NodeState::Running,
            timing: Timing::started(ts),
            ..DecisionNode::default()
        };
        let slot = self
            .arena
            .insert(Slot::Decision(DecisionSlot::new(node)), container);
        self.index.decisions.insert(decision_id.to_string(), slot);
        self.open.push(Open::Decision(slot));
    }

    fn decision_branch(
        &mut self,
        decision_id: &str,
        label: &str,
        condition: &Option<String>,
        taken: bool,
    ) {
        let Some(slot) = self.index.decisions.get(decision_id).copied() else {
            debug!(decision_id = %decision_id, label, "Branch for unknown decision ignored");
            return;
        };
        let Some(decision) = self.arena.decision_mut(slot) else {
            return;
        };

        let idx = decision.branch_index(label, condition.clone());
        decision.node.branches[idx].taken = taken;

        if taken && decision.settled.is_none() {
            self.settle(slot, idx);
        }
    }

    fn settle(&mut self, slot: SlotId, branch: usize) {
        if let Some(decision) = self.arena.decision_mut(slot) {
            decision.settled = Some(branch);
            decision.node.branch_taken = Some(decision.node.branches[branch].label.clone());
        }
        self.arena.settle_pending(slot, branch);
    }

    fn decision_end(
        &mut self,
        decision_id: &str,
        branch_taken: &Option<String>,
        duration_ms: Option<u64>,
        ts: u64,
    ) {
        let Some(slot) = self.index.decisions.get(decision_id).copied() else {
            debug!(decision_id = %decision_id, "decision_end for unknown decision ignored");
            return;
        };

        // A label on the end event settles a decision whose branches never did
        let late_branch = match (self.arena.decision_mut(slot), branch_taken) {
            (Some(decision), Some(label)) if decision.settled.is_none() => {
                let idx = decision.branch_index(label, None);
                decision.node.branches[idx].taken = true;
                Some(idx)
            }
            _ => None,
        };
        if let Some(idx) = late_branch {
            self.settle(slot, idx);
        }

        if let Some(decision) = self.arena.decision_mut(slot) {
            decision.node.state = NodeState::Success;
            decision.node.timing.close(ts, duration_ms);
        }

        let unsettled = self
            .arena
            .decision(slot)
            .is_some_and(|d| d.settled.is_none());
        if unsettled {
            let promoted = self.arena.promote_pending(slot);
            if promoted > 0 {
                debug!(decision_id = %decision_id, promoted, "Decision ended unsettled, promoted pending children");
            }
        }

        self.close_open(Open::Decision(slot));
    }

    // ═══════════════════════════════════════════════════════════════
    // Streams
    // ═══════════════════════════════════════════════════════════════

    fn with_stream(&mut self, stream_id: &str, f: impl FnOnce(&mut StreamNode)) {
        let Some(slot) = self.index.streams.get(stream_id).copied() else {
            debug!(stream_id = %stream_id, "Event for unknown stream ignored");
            return;
        };
        if let Slot::Stream(stream) = self.arena.get_mut(slot) {
            f(stream);
        }
    }
}

fn hook_success(
    ts: u64,
    duration_ms: u64,
    result: Option<bool>,
    skipped: bool,
    step_key: Option<String>,
) -> HookExecution {
    HookExecution {
        state: HookState::Success,
        ts,
        duration_ms,
        result,
        skipped,
        step_key,
        error: None,
    }
}

fn hook_error(ts: u64, duration_ms: u64, error: &Value, step_key: Option<String>) -> HookExecution {
    HookExecution {
        state: HookState::Error,
        ts,
        duration_ms,
        result: None,
        skipped: false,
        step_key,
        error: Some(error.clone()),
    }
}
