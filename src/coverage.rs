//! Decides which tasks run for real and which are restored from the cache.
//!
//! Every task carries a reference count: the number of required consumers
//! that are going to run for real, plus one pin if the task is a target. A
//! task with a non-zero count is required. A required task is covered when it
//! has a setscene variant, was not explicitly requested and a valid cached
//! artifact exists for it; otherwise it is notcovered and holds a reference
//! on each of its dependencies. Covered tasks hold nothing, which is how
//! whole chains of real work drop out of the plan.
//!
//! The counts are maintained incrementally. [`Coverage::cover`] and
//! [`Coverage::uncover`] flip one task and propagate the change through a
//! work-list, so late answers from the equivalence service can prune work
//! that has not started yet.

use std::collections::BTreeSet;

use petgraph::graph::NodeIndex;
use tracing::debug;

use crate::core::UnifiedId;
use crate::graph::{TaskGraph, TaskId};

/// Snapshot of a coverage decision.
///
/// `covered` tasks are restored through their setscene variant, `notcovered`
/// tasks are executed. The two sets are disjoint and together hold exactly
/// the required tasks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    pub covered: BTreeSet<TaskId>,
    pub notcovered: BTreeSet<TaskId>,
}

impl Plan {
    pub fn len(&self) -> usize {
        self.covered.len() + self.notcovered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_covered(&self, id: &TaskId) -> bool {
        self.covered.contains(id)
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.covered.contains(id) || self.notcovered.contains(id)
    }
}

pub struct Coverage<'g> {
    graph: &'g TaskGraph,
    refs: Vec<u32>,
    eligible: Vec<bool>,
    valid: Vec<Option<UnifiedId>>,
}

impl<'g> Coverage<'g> {
    /// Resolves the initial coverage.
    ///
    /// `valid` is consulted for tasks eligible for substitution only, and
    /// may be indexed by any node of the graph.
    pub fn new(graph: &'g TaskGraph, valid: impl Fn(NodeIndex) -> Option<UnifiedId>) -> Self {
        let eligible: Vec<bool> = graph
            .indices()
            .map(|ix| {
                let node = graph.node(ix);
                node.setscene && !node.explicit
            })
            .collect();

        let valid = graph
            .indices()
            .map(|ix| if eligible[ix.index()] { valid(ix) } else { None })
            .collect();

        let mut coverage = Self {
            graph,
            refs: vec![0; graph.len()],
            eligible,
            valid,
        };

        for &target in graph.targets() {
            coverage.acquire(vec![target]);
        }

        coverage
    }

    pub fn is_required(&self, ix: NodeIndex) -> bool {
        self.refs[ix.index()] > 0
    }

    /// Required and substituted by a cached artifact.
    pub fn is_covered(&self, ix: NodeIndex) -> bool {
        self.is_required(ix) && self.substitutes(ix)
    }

    /// Required and executed for real.
    pub fn is_notcovered(&self, ix: NodeIndex) -> bool {
        self.is_required(ix) && !self.substitutes(ix)
    }

    /// Whether the task could still be substituted by the cache.
    pub fn is_eligible(&self, ix: NodeIndex) -> bool {
        self.eligible[ix.index()]
    }

    /// Identity to restore a covered task from.
    pub fn unified(&self, ix: NodeIndex) -> Option<UnifiedId> {
        self.valid[ix.index()]
    }

    /// Dependencies the task needs before it can be dispatched. A covered
    /// task is restored without looking at its dependencies.
    pub fn retained(&self, ix: NodeIndex) -> &'g [NodeIndex] {
        let graph: &'g TaskGraph = self.graph;
        if self.substitutes(ix) {
            &[]
        } else {
            graph.dependencies(ix)
        }
    }

    /// Records a late positive validity answer.
    ///
    /// If the task is required it becomes covered and releases its
    /// dependencies. Returns the tasks that stopped being required.
    pub fn cover(&mut self, ix: NodeIndex, unified: UnifiedId) -> Vec<NodeIndex> {
        if !self.eligible[ix.index()] || self.substitutes(ix) {
            return Vec::new();
        }

        self.valid[ix.index()] = Some(unified);
        debug!(task = %self.graph.node(ix).id, %unified, "covered");

        if !self.is_required(ix) {
            return Vec::new();
        }

        self.release(self.graph.dependencies(ix).to_vec())
    }

    /// Takes a task out of substitution for the rest of the run, for example
    /// because restoring it failed.
    ///
    /// If the task is required it now holds its dependencies again. Returns
    /// the tasks that became required.
    pub fn uncover(&mut self, ix: NodeIndex) -> Vec<NodeIndex> {
        let was_covered = self.substitutes(ix);
        self.eligible[ix.index()] = false;
        self.valid[ix.index()] = None;

        if !was_covered || !self.is_required(ix) {
            return Vec::new();
        }

        debug!(task = %self.graph.node(ix).id, "uncovered");
        self.acquire(self.graph.dependencies(ix).to_vec())
    }

    /// Which tasks would be required if every task in `assume` turned out to
    /// be covered as well.
    pub fn required_assuming(&self, assume: impl Fn(NodeIndex) -> bool) -> Vec<bool> {
        let mut required = vec![false; self.refs.len()];

        for &target in self.graph.targets() {
            required[target.index()] = true;
        }

        for &ix in self.graph.topological().iter().rev() {
            if !required[ix.index()] {
                continue;
            }
            let substituted = self.substitutes(ix) || (self.eligible[ix.index()] && assume(ix));
            if substituted {
                continue;
            }
            for &dep in self.graph.dependencies(ix) {
                required[dep.index()] = true;
            }
        }

        required
    }

    pub fn plan(&self) -> Plan {
        let mut plan = Plan::default();
        for ix in self.graph.indices() {
            let id = self.graph.node(ix).id.clone();
            if self.is_covered(ix) {
                plan.covered.insert(id);
            } else if self.is_notcovered(ix) {
                plan.notcovered.insert(id);
            }
        }
        plan
    }

    fn substitutes(&self, ix: NodeIndex) -> bool {
        self.eligible[ix.index()] && self.valid[ix.index()].is_some()
    }

    fn acquire(&mut self, mut stack: Vec<NodeIndex>) -> Vec<NodeIndex> {
        let mut added = Vec::new();
        while let Some(ix) = stack.pop() {
            self.refs[ix.index()] += 1;
            if self.refs[ix.index()] == 1 {
                added.push(ix);
                if !self.substitutes(ix) {
                    stack.extend_from_slice(self.graph.dependencies(ix));
                }
            }
        }
        added
    }

    fn release(&mut self, mut stack: Vec<NodeIndex>) -> Vec<NodeIndex> {
        let mut removed = Vec::new();
        while let Some(ix) = stack.pop() {
            self.refs[ix.index()] -= 1;
            if self.refs[ix.index()] == 0 {
                removed.push(ix);
                if !self.substitutes(ix) {
                    stack.extend_from_slice(self.graph.dependencies(ix));
                }
            }
        }
        removed
    }
}
