//! Intermediate Representation of one workflow run
//!
//! `WorkflowIr` is what the builder produces and what every downstream
//! consumer (live sinks, time-travel history, renderers) receives.

mod node;
mod serialize;

pub use node::{
    DecisionBranch, DecisionNode, HookExecution, HookMap, HookState, Node, NodeState,
    ParallelMode, ParallelNode, StepNode, StreamNode, StreamState, Timing, WorkflowNode,
};
pub use serialize::{safe_stringify, sanitize_payload, MAX_PAYLOAD_DEPTH};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct IrMetadata {
    pub created_at: u64,
    pub last_updated_at: u64,
}

/// Snapshot of a run's execution tree
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowIr {
    /// Always a `Node::Workflow`
    pub root: Node,
    pub metadata: IrMetadata,
    /// `None` when the run produced no hook events
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub hooks: Option<HookMap>,
}

impl WorkflowIr {
    /// Empty IR for a run that has not started yet
    pub fn empty(workflow_id: impl Into<String>, ts: u64) -> Self {
        Self {
            root: Node::Workflow(WorkflowNode {
                id: workflow_id.into(),
                ..WorkflowNode::default()
            }),
            metadata: IrMetadata {
                created_at: ts,
                last_updated_at: ts,
            },
            hooks: None,
        }
    }

    pub fn workflow(&self) -> Option<&WorkflowNode> {
        match &self.root {
            Node::Workflow(n) => Some(n),
            _ => None,
        }
    }

    pub fn state(&self) -> NodeState {
        self.root.state().unwrap_or_default()
    }

    pub fn find(&self, id: &str) -> Option<&Node> {
        self.root.find(id)
    }

    /// Number of nodes excluding the root
    pub fn node_count(&self) -> usize {
        self.root.count() - 1
    }
}
