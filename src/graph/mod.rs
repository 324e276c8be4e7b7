//! The task graph.
//!
//! A [`TaskGraph`] holds every task reachable from the requested targets, in
//! every requested multiconfig namespace. Nodes live in a petgraph arena and
//! are addressed by [`NodeIndex`]; edges point from a dependency to the task
//! consuming it.

mod builder;
mod target;

use std::collections::HashMap;
use std::fmt::Display;

use petgraph::Direction;
use petgraph::Graph;
use petgraph::graph::NodeIndex;

use crate::core::{ArcStr, Hash32, Signature};

pub use builder::GraphBuilder;
pub use target::Target;

/// Identity of a task instance: namespace, unit and task name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId {
    pub mc: Option<ArcStr>,
    pub unit: ArcStr,
    pub task: ArcStr,
}

impl TaskId {
    pub fn new(mc: Option<&str>, unit: &str, task: &str) -> Self {
        Self {
            mc: mc.map(Into::into),
            unit: unit.into(),
            task: crate::core::task_name(task).into(),
        }
    }

    /// The unit name as shown in action records, `mc1:b1` or `b1`.
    pub fn qualified_unit(&self) -> String {
        match &self.mc {
            Some(mc) => format!("{mc}:{}", self.unit),
            None => self.unit.to_string(),
        }
    }
}

impl Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(mc) = &self.mc {
            write!(f, "mc:{mc}:")?;
        }
        write!(f, "{}:do_{}", self.unit, self.task)
    }
}

/// A task in the graph.
#[derive(Debug, Clone)]
pub struct TaskNode {
    pub id: TaskId,
    pub signature: Signature,
    /// Static input digest from the provider.
    pub(crate) inputs: Hash32,
    /// Whether a setscene variant exists for this task.
    pub setscene: bool,
    /// Requested by name, or forced. Never substituted.
    pub explicit: bool,
    /// Direct dependencies in declaration order.
    pub(crate) deps: Vec<NodeIndex>,
}

/// Dependency graph of every task needed for a run.
#[derive(Debug, Clone)]
pub struct TaskGraph {
    pub(crate) graph: Graph<TaskNode, ()>,
    pub(crate) targets: Vec<NodeIndex>,
    pub(crate) order: Vec<NodeIndex>,
    index: HashMap<TaskId, NodeIndex>,
}

impl TaskGraph {
    pub(crate) fn new(
        graph: Graph<TaskNode, ()>,
        targets: Vec<NodeIndex>,
        order: Vec<NodeIndex>,
    ) -> Self {
        let index = graph
            .node_indices()
            .map(|ix| (graph[ix].id.clone(), ix))
            .collect();

        Self {
            graph,
            targets,
            order,
            index,
        }
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn node(&self, index: NodeIndex) -> &TaskNode {
        &self.graph[index]
    }

    /// Tasks named by the targets, in request order, without duplicates.
    pub fn targets(&self) -> &[NodeIndex] {
        &self.targets
    }

    /// Every task, dependencies before their consumers.
    pub fn topological(&self) -> &[NodeIndex] {
        &self.order
    }

    pub fn get(&self, id: &TaskId) -> Option<NodeIndex> {
        self.index.get(id).copied()
    }

    /// Looks a task up by its textual form, `a1:do_package` or
    /// `mc:mc1:a1:package`.
    pub fn find(&self, text: &str) -> Option<NodeIndex> {
        let target: Target = text.parse().ok()?;
        let task = target.task?;
        self.get(&TaskId {
            mc: target.mc,
            unit: target.unit,
            task,
        })
    }

    pub fn dependencies(&self, index: NodeIndex) -> &[NodeIndex] {
        &self.graph[index].deps
    }

    pub fn dependents(&self, index: NodeIndex) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.neighbors_directed(index, Direction::Outgoing)
    }

    pub fn indices(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.node_indices()
    }
}
