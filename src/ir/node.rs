//! IR node types
//!
//! The reconstructed tree is a plain owned value: every container owns its
//! children, so a snapshot can be cloned, diffed, and serialized freely.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::event::ScopeType;

/// Lifecycle state shared by all node kinds
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    /// Root before any `workflow_start`
    #[default]
    Pending,
    Running,
    Success,
    Error,
    Aborted,
    Skipped,
    Cached,
}

impl NodeState {
    pub fn is_finished(self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }
}

/// Start/end timestamps and duration (ms)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Timing {
    pub start_ts: Option<u64>,
    pub end_ts: Option<u64>,
    pub duration_ms: Option<u64>,
}

impl Timing {
    pub fn started(ts: u64) -> Self {
        Self {
            start_ts: Some(ts),
            ..Self::default()
        }
    }

    /// Close the interval; an explicit duration wins over `end - start`
    pub fn close(&mut self, end_ts: u64, duration_ms: Option<u64>) {
        self.end_ts = Some(end_ts);
        self.duration_ms = duration_ms.or_else(|| {
            self.start_ts
                .map(|start| end_ts.saturating_sub(start))
        });
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum ParallelMode {
    #[default]
    All,
    Race,
    AllSettled,
}

impl From<ScopeType> for ParallelMode {
    fn from(scope_type: ScopeType) -> Self {
        match scope_type {
            ScopeType::Parallel => Self::All,
            ScopeType::Race => Self::Race,
            ScopeType::AllSettled => Self::AllSettled,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StreamState {
    #[default]
    Active,
    Closed,
    Error,
}

/// A node in the execution tree
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Node {
    Workflow(WorkflowNode),
    Step(StepNode),
    Parallel(ParallelNode),
    Decision(DecisionNode),
    Stream(StreamNode),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowNode {
    pub id: String,
    pub state: NodeState,
    #[serde(flatten)]
    pub timing: Timing,
    pub error: Option<Value>,
    pub children: Vec<Node>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct StepNode {
    pub id: String,
    pub key: Option<String>,
    pub name: Option<String>,
    pub state: NodeState,
    #[serde(flatten)]
    pub timing: Timing,
    pub input: Option<Value>,
    pub output: Option<Value>,
    pub error: Option<Value>,
    pub retry_count: u32,
    pub timed_out: bool,
    /// `Some(true)` on cache hit, `Some(false)` on miss
    pub cached: Option<bool>,
    pub skip_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ParallelNode {
    pub id: String,
    pub name: Option<String>,
    pub mode: ParallelMode,
    pub state: NodeState,
    #[serde(flatten)]
    pub timing: Timing,
    pub winner_id: Option<String>,
    pub children: Vec<Node>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct DecisionBranch {
    pub label: String,
    pub condition: Option<String>,
    pub taken: bool,
    pub children: Vec<Node>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct DecisionNode {
    pub id: String,
    pub name: Option<String>,
    pub condition: Option<String>,
    pub decision_value: Option<Value>,
    pub state: NodeState,
    #[serde(flatten)]
    pub timing: Timing,
    pub branches: Vec<DecisionBranch>,
    /// Label of the settled branch; set at most once
    pub branch_taken: Option<String>,
}

impl DecisionNode {
    pub fn branch(&self, label: &str) -> Option<&DecisionBranch> {
        self.branches.iter().find(|b| b.label == label)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct StreamNode {
    pub id: String,
    pub namespace: String,
    pub stream_state: StreamState,
    #[serde(flatten)]
    pub timing: Timing,
    pub write_count: u64,
    pub read_count: u64,
    pub final_position: Option<u64>,
    pub backpressure_occurred: bool,
    pub error: Option<Value>,
}

impl Node {
    pub fn id(&self) -> &str {
        match self {
            Node::Workflow(n) => &n.id,
            Node::Step(n) => &n.id,
            Node::Parallel(n) => &n.id,
            Node::Decision(n) => &n.id,
            Node::Stream(n) => &n.id,
        }
    }

    /// Stream nodes report their state through `stream_state`
    pub fn state(&self) -> Option<NodeState> {
        match self {
            Node::Workflow(n) => Some(n.state),
            Node::Step(n) => Some(n.state),
            Node::Parallel(n) => Some(n.state),
            Node::Decision(n) => Some(n.state),
            Node::Stream(_) => None,
        }
    }

    pub fn timing(&self) -> &Timing {
        match self {
            Node::Workflow(n) => &n.timing,
            Node::Step(n) => &n.timing,
            Node::Parallel(n) => &n.timing,
            Node::Decision(n) => &n.timing,
            Node::Stream(n) => &n.timing,
        }
    }

    /// Direct children; decision children are listed branch by branch
    pub fn children(&self) -> Vec<&Node> {
        match self {
            Node::Workflow(n) => n.children.iter().collect(),
            Node::Parallel(n) => n.children.iter().collect(),
            Node::Decision(n) => n.branches.iter().flat_map(|b| b.children.iter()).collect(),
            Node::Step(_) | Node::Stream(_) => Vec::new(),
        }
    }

    /// Depth-first search by id
    pub fn find(&self, id: &str) -> Option<&Node> {
        if self.id() == id {
            return Some(self);
        }
        self.children().into_iter().find_map(|child| child.find(id))
    }

    /// Total number of nodes in this subtree, including self
    pub fn count(&self) -> usize {
        1 + self
            .children()
            .into_iter()
            .map(Node::count)
            .sum::<usize>()
    }

    pub fn as_step(&self) -> Option<&StepNode> {
        match self {
            Node::Step(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_parallel(&self) -> Option<&ParallelNode> {
        match self {
            Node::Parallel(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_decision(&self) -> Option<&DecisionNode> {
        match self {
            Node::Decision(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_stream(&self) -> Option<&StreamNode> {
        match self {
            Node::Stream(n) => Some(n),
            _ => None,
        }
    }
}

/// Outcome of a single hook invocation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HookState {
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HookExecution {
    pub state: HookState,
    pub ts: u64,
    pub duration_ms: u64,
    /// Boolean verdict of `shouldRun` / `onBeforeStart`
    pub result: Option<bool>,
    pub skipped: bool,
    pub step_key: Option<String>,
    pub error: Option<Value>,
}

/// Hook outcomes attached to a run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct HookMap {
    pub should_run: Option<HookExecution>,
    pub on_before_start: Option<HookExecution>,
    /// Step id -> most recent outcome for that step
    pub on_after_step: BTreeMap<String, HookExecution>,
}

impl HookMap {
    pub fn is_empty(&self) -> bool {
        self.should_run.is_none() && self.on_before_start.is_none() && self.on_after_step.is_empty()
    }
}
