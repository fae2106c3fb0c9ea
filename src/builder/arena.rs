//! Slot arena backing the trace builder
//!
//! Nodes live in a flat `Vec<Slot>` and refer to children by `SlotId`.
//! Moving a subtree (pending buffer -> branch) is a move of ids, never a
//! copy of nodes. `ir()` materializes the owned tree on demand.

use crate::ir::{DecisionBranch, DecisionNode, Node, ParallelNode, StepNode, StreamNode};

pub(crate) type SlotId = usize;

/// Where a slot is attached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Container {
    Root,
    Scope(SlotId),
    /// Decision slot + branch index
    Branch(SlotId, usize),
    /// Decision slot's pending buffer (unsettled)
    Pending(SlotId),
}

#[derive(Debug, Clone)]
pub(crate) struct DecisionSlot {
    /// Branch `children` are kept empty here; see `branch_children`
    pub node: DecisionNode,
    pub branch_children: Vec<Vec<SlotId>>,
    pub pending: Vec<SlotId>,
    /// Index into `node.branches` once settled
    pub settled: Option<usize>,
}

impl DecisionSlot {
    pub fn new(node: DecisionNode) -> Self {
        Self {
            node,
            branch_children: Vec::new(),
            pending: Vec::new(),
            settled: None,
        }
    }

    /// Index of `label`, appending a new branch if needed
    pub fn branch_index(&mut self, label: &str, condition: Option<String>) -> usize {
        if let Some(idx) = self.node.branches.iter().position(|b| b.label == label) {
            if condition.is_some() {
                self.node.branches[idx].condition = condition;
            }
            return idx;
        }
        self.node.branches.push(DecisionBranch {
            label: label.to_string(),
            condition,
            taken: false,
            children: Vec::new(),
        });
        self.branch_children.push(Vec::new());
        self.node.branches.len() - 1
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Slot {
    Step(StepNode),
    Stream(StreamNode),
    /// Node `children` kept empty; ids live alongside
    Parallel(ParallelNode, Vec<SlotId>),
    Decision(DecisionSlot),
}

/// Flat node storage plus ownership bookkeeping
#[derive(Debug, Clone, Default)]
pub(crate) struct Arena {
    slots: Vec<Slot>,
    parents: Vec<Container>,
    root_children: Vec<SlotId>,
}

impl Arena {
    pub fn get_mut(&mut self, id: SlotId) -> &mut Slot {
        &mut self.slots[id]
    }

    #[cfg(test)]
    pub fn parent(&self, id: SlotId) -> Container {
        self.parents[id]
    }

    pub fn decision_mut(&mut self, id: SlotId) -> Option<&mut DecisionSlot> {
        match &mut self.slots[id] {
            Slot::Decision(d) => Some(d),
            _ => None,
        }
    }

    pub fn decision(&self, id: SlotId) -> Option<&DecisionSlot> {
        match &self.slots[id] {
            Slot::Decision(d) => Some(d),
            _ => None,
        }
    }

    /// Store a new slot and append it to `container`
    pub fn insert(&mut self, slot: Slot, container: Container) -> SlotId {
        let id = self.slots.len();
        self.slots.push(slot);
        self.parents.push(container);
        self.children_mut(container).push(id);
        id
    }

    pub fn root_children(&self) -> &[SlotId] {
        &self.root_children
    }

    fn children_mut(&mut self, container: Container) -> &mut Vec<SlotId> {
        match container {
            Container::Root => &mut self.root_children,
            Container::Scope(id) => match &mut self.slots[id] {
                Slot::Parallel(_, children) => children,
                _ => unreachable!("scope container {} is not a parallel slot", id),
            },
            Container::Branch(id, idx) => match &mut self.slots[id] {
                Slot::Decision(d) => &mut d.branch_children[idx],
                _ => unreachable!("branch container {} is not a decision slot", id),
            },
            Container::Pending(id) => match &mut self.slots[id] {
                Slot::Decision(d) => &mut d.pending,
                _ => unreachable!("pending container {} is not a decision slot", id),
            },
        }
    }

    /// Move a decision's pending buffer into one of its branches
    pub fn settle_pending(&mut self, decision: SlotId, branch: usize) {
        let moved = match &mut self.slots[decision] {
            Slot::Decision(d) => std::mem::take(&mut d.pending),
            _ => return,
        };
        for &child in &moved {
            self.parents[child] = Container::Branch(decision, branch);
        }
        self.children_mut(Container::Branch(decision, branch))
            .extend(moved);
    }

    /// Move a decision's pending buffer next to the decision itself,
    /// right after it in its current container, preserving order
    pub fn promote_pending(&mut self, decision: SlotId) -> usize {
        let moved = match &mut self.slots[decision] {
            Slot::Decision(d) => std::mem::take(&mut d.pending),
            _ => return 0,
        };
        let count = moved.len();
        let parent = self.parents[decision];
        for &child in &moved {
            self.parents[child] = parent;
        }
        let siblings = self.children_mut(parent);
        let at = siblings
            .iter()
            .position(|&id| id == decision)
            .map_or(siblings.len(), |pos| pos + 1);
        siblings.splice(at..at, moved);
        count
    }

    /// Owned subtree rooted at `id`
    pub fn materialize(&self, id: SlotId) -> Node {
        match &self.slots[id] {
            Slot::Step(step) => Node::Step(step.clone()),
            Slot::Stream(stream) => Node::Stream(stream.clone()),
            Slot::Parallel(node, children) => {
                let mut node = node.clone();
                node.children = children.iter().map(|&c| self.materialize(c)).collect();
                Node::Parallel(node)
            }
            Slot::Decision(d) => {
                let mut node = d.node.clone();
                for (branch, ids) in node.branches.iter_mut().zip(&d.branch_children) {
                    branch.children = ids.iter().map(|&c| self.materialize(c)).collect();
                }
                Node::Decision(node)
            }
        }
    }
}
