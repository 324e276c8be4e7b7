use std::collections::{HashMap, VecDeque};

use petgraph::Graph;
use petgraph::graph::NodeIndex;
use tracing::debug;

use crate::core::ArcStr;
use crate::error::GraphError;
use crate::graph::{TaskGraph, TaskId, TaskNode, Target};
use crate::hash;
use crate::provider::Provider;

/// Assembles the [`TaskGraph`] for a set of targets.
///
/// The graph is closed under dependency and deterministic: the same provider
/// answers and targets always produce the same nodes, edges and signatures.
pub struct GraphBuilder<'a, P: Provider + ?Sized> {
    provider: &'a P,
    multiconfigs: &'a [String],
    task: Option<&'a str>,
    force: bool,
}

impl<'a, P: Provider + ?Sized> GraphBuilder<'a, P> {
    pub fn new(provider: &'a P) -> Self {
        Self {
            provider,
            multiconfigs: &[],
            task: None,
            force: false,
        }
    }

    /// Namespaces that targets may refer to with `mc:<name>:`.
    pub fn multiconfigs(mut self, names: &'a [String]) -> Self {
        self.multiconfigs = names;
        self
    }

    /// Task run for targets that name only a unit, instead of the unit's
    /// default task. Tasks selected this way count as explicitly requested.
    pub fn task(mut self, task: Option<&'a str>) -> Self {
        self.task = task;
        self
    }

    /// Treat every target task as explicitly requested.
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn build(&self, targets: &[Target]) -> Result<TaskGraph, GraphError> {
        let mut graph = Graph::<TaskNode, ()>::new();
        let mut interned: HashMap<TaskId, NodeIndex> = HashMap::new();
        let mut queue = VecDeque::new();
        let mut roots = Vec::new();

        for target in targets {
            let (id, explicit) = self.resolve_target(target)?;
            let ix = intern(&mut graph, &mut interned, &mut queue, id, self.provider);

            if explicit || self.force {
                graph[ix].explicit = true;
            }
            if !roots.contains(&ix) {
                roots.push(ix);
            }
        }

        while let Some(ix) = queue.pop_front() {
            let id = graph[ix].id.clone();

            for dep in self.provider.dependencies_of(&id.unit, &id.task) {
                let known = self
                    .provider
                    .tasks_of(&dep.unit)
                    .is_some_and(|tasks| tasks.contains(&dep.task));

                let dep_id = TaskId {
                    mc: id.mc.clone(),
                    unit: dep.unit,
                    task: dep.task,
                };

                if !known {
                    return Err(GraphError::UnresolvedDependency {
                        from: id.to_string(),
                        to: dep_id.to_string(),
                    });
                }

                let dep_ix = intern(&mut graph, &mut interned, &mut queue, dep_id, self.provider);
                if !graph[ix].deps.contains(&dep_ix) {
                    graph[ix].deps.push(dep_ix);
                    graph.add_edge(dep_ix, ix, ());
                }
            }
        }

        let order = petgraph::algo::toposort(&graph, None)
            .map_err(|cycle| GraphError::Cycle(graph[cycle.node_id()].id.to_string()))?;

        for &ix in &order {
            let node = &graph[ix];
            let inputs = self.provider.signature_inputs(&node.id.unit, &node.id.task);
            let deps = node.deps.iter().map(|&dep| graph[dep].signature.0);
            let signature = hash::signature(&node.id.unit, &node.id.task, inputs, deps);

            graph[ix].inputs = inputs;
            graph[ix].signature = signature;
        }

        debug!(
            tasks = graph.node_count(),
            targets = roots.len(),
            "task graph assembled"
        );

        Ok(TaskGraph::new(graph, roots, order))
    }

    fn resolve_target(&self, target: &Target) -> Result<(TaskId, bool), GraphError> {
        if let Some(mc) = &target.mc
            && !self.multiconfigs.iter().any(|name| name.as_str() == &**mc)
        {
            return Err(GraphError::UnknownMulticonfig {
                target: target.to_string(),
                mc: mc.to_string(),
            });
        }

        let tasks = self
            .provider
            .tasks_of(&target.unit)
            .ok_or_else(|| GraphError::UnknownUnit(target.unit.to_string()))?;

        let (task, explicit): (ArcStr, bool) = match (&target.task, self.task) {
            (Some(task), _) => (task.clone(), true),
            (None, Some(task)) => (crate::core::task_name(task).into(), true),
            (None, None) => (self.provider.default_task(&target.unit), false),
        };

        if !tasks.contains(&task) {
            return Err(GraphError::UnknownTask {
                unit: target.unit.to_string(),
                task: task.to_string(),
            });
        }

        let id = TaskId {
            mc: target.mc.clone(),
            unit: target.unit.clone(),
            task,
        };

        Ok((id, explicit))
    }
}

fn intern<P: Provider + ?Sized>(
    graph: &mut Graph<TaskNode, ()>,
    interned: &mut HashMap<TaskId, NodeIndex>,
    queue: &mut VecDeque<NodeIndex>,
    id: TaskId,
    provider: &P,
) -> NodeIndex {
    if let Some(&ix) = interned.get(&id) {
        return ix;
    }

    let setscene = provider.has_setscene(&id.unit, &id.task);
    let ix = graph.add_node(TaskNode {
        id: id.clone(),
        signature: Default::default(),
        inputs: Default::default(),
        setscene,
        explicit: false,
        deps: Vec::new(),
    });

    interned.insert(id, ix);
    queue.push_back(ix);
    ix
}
