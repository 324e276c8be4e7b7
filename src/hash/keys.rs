use petgraph::graph::NodeIndex;

use crate::core::{Signature, UnifiedId};
use crate::graph::TaskGraph;
use crate::hash::{HashClient, signature};

/// Keys the cache and the equivalence service know tasks by.
///
/// A task's key hashes the same fields as its signature, with the unified
/// identities of its dependencies in place of their signatures. A dependency
/// whose identity is not known yet stands for its own key, so keys equal
/// signatures until some output turns out equivalent to an earlier one. From
/// then on every task downstream of it is looked up under the key of the
/// build that produced the equivalent output.
pub(crate) struct Keys {
    keys: Vec<Signature>,
    confirmed: Vec<Option<UnifiedId>>,
}

impl Keys {
    /// Computes every key bottom up, taking the identities the client
    /// already knows into account.
    pub fn resolve(graph: &TaskGraph, client: &HashClient) -> Self {
        let mut keys = Self {
            keys: vec![Signature::default(); graph.len()],
            confirmed: vec![None; graph.len()],
        };

        for &ix in graph.topological() {
            let key = keys.compute(graph, ix);
            keys.keys[ix.index()] = key;
            keys.confirmed[ix.index()] = client.unified(key);
        }

        keys
    }

    pub fn key(&self, ix: NodeIndex) -> Signature {
        self.keys[ix.index()]
    }

    /// Identity the task's output goes by, as far as is known.
    pub fn unified(&self, ix: NodeIndex) -> UnifiedId {
        self.confirmed[ix.index()].unwrap_or_else(|| self.keys[ix.index()].into())
    }

    /// Records the identity the output of `ix` resolved to and recomputes
    /// the keys downstream of it. Tasks for which `frozen` holds keep theirs.
    ///
    /// Returns the tasks whose key changed, in topological order.
    pub fn confirm(
        &mut self,
        graph: &TaskGraph,
        ix: NodeIndex,
        unified: UnifiedId,
        frozen: impl Fn(NodeIndex) -> bool,
    ) -> Vec<NodeIndex> {
        let before = self.unified(ix);
        self.confirmed[ix.index()] = Some(unified);
        if before == unified {
            return Vec::new();
        }

        let mut dirty = vec![false; graph.len()];
        dirty[ix.index()] = true;

        let mut changed = Vec::new();
        for &next in graph.topological() {
            if next == ix || frozen(next) {
                continue;
            }
            if !graph.dependencies(next).iter().any(|dep| dirty[dep.index()]) {
                continue;
            }

            let key = self.compute(graph, next);
            if key == self.keys[next.index()] {
                continue;
            }

            // An identity confirmed under the old key says nothing about the
            // new one.
            self.keys[next.index()] = key;
            self.confirmed[next.index()] = None;
            dirty[next.index()] = true;
            changed.push(next);
        }

        changed
    }

    fn compute(&self, graph: &TaskGraph, ix: NodeIndex) -> Signature {
        let node = graph.node(ix);
        let deps = graph.dependencies(ix).iter().map(|&dep| self.unified(dep).0);
        signature(&node.id.unit, &node.id.task, node.inputs, deps)
    }
}
