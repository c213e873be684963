//! Tracks which nodes are ready to build.
//!
//! A node is ready once every one of its children has been accounted for,
//! either by building it or because it didn't need building.  Per-node
//! scheduling state lives here rather than in the graph, and is owned by
//! whoever drives the build; worker threads never touch it.

use crate::buildgraph::{BuildGraph, Weight};
use crate::densemap::DenseMap;
use crate::graph::NodeId;

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum Processed {
    /// Still needs building.
    #[default]
    Pending,
    /// Built successfully, possibly in an earlier pass.
    Done,
    /// Deliberately skipped for this action.
    Filtered,
}

#[derive(Debug, Clone, Default)]
pub struct NodeState {
    pub processed: Processed,
    /// How many children have been accounted for in the current pass.
    pub children_processed: usize,
    /// Dispatched and completed in this pass, successfully or not.
    pub finished: bool,
    pub failed: bool,
}

pub struct LeafScheduler {
    /// Ready nodes, sorted by ascending weight; the next to run is last.
    ready: Vec<NodeId>,
    /// Weights of `ready`, index for index.
    weights: Vec<Weight>,
    states: DenseMap<NodeId, NodeState>,
}

impl LeafScheduler {
    pub fn new(bg: &BuildGraph) -> Self {
        LeafScheduler {
            ready: Vec::new(),
            weights: Vec::new(),
            states: DenseMap::new_sized(bg.graph.id_bound(), NodeState::default()),
        }
    }

    pub fn state(&self, id: NodeId) -> &NodeState {
        &self.states[id]
    }

    pub fn state_mut(&mut self, id: NodeId) -> &mut NodeState {
        &mut self.states[id]
    }

    /// Number of ready nodes.
    pub fn size(&self) -> usize {
        self.ready.len()
    }

    /// Nodes in `bg` that still need building.
    pub fn pending(&self, bg: &BuildGraph) -> usize {
        bg.graph
            .all_nodes()
            .filter(|&id| self.states[id].processed == Processed::Pending)
            .count()
    }

    /// Skip `id` in this action.  No effect on nodes already built.
    pub fn mark_filtered(&mut self, id: NodeId) {
        let state = &mut self.states[id];
        if state.processed == Processed::Pending {
            state.processed = Processed::Filtered;
        }
    }

    /// Forget per-pass results so a failed pass can be run again.  Nodes
    /// already built stay built.
    pub fn reset_failures(&mut self) {
        for state in self.states.iter_mut() {
            state.finished = false;
            state.failed = false;
        }
    }

    /// Start a pass: the ready list becomes every childless node that needs
    /// building.  Childless nodes that don't are reported built right away.
    pub fn fill(&mut self, bg: &BuildGraph) {
        self.ready.clear();
        self.weights.clear();
        for state in self.states.iter_mut() {
            state.children_processed = 0;
        }
        let leaves: Vec<NodeId> = bg
            .graph
            .all_nodes()
            .filter(|&id| bg.graph.children(id).is_empty())
            .collect();
        for id in leaves {
            if self.states[id].processed == Processed::Pending {
                self.insert(bg, id);
            } else {
                self.notify_built(bg, id);
            }
        }
    }

    fn insert(&mut self, bg: &BuildGraph, id: NodeId) {
        let weight = bg.node(id).weight;
        // Ahead of equal weights, so equal nodes come out first-in first-out.
        let pos = self.weights.partition_point(|w| *w < weight);
        self.weights.insert(pos, weight);
        self.ready.insert(pos, id);
    }

    /// Take the highest-weight ready node.
    pub fn get_next(&mut self) -> Option<NodeId> {
        self.weights.pop();
        self.ready.pop()
    }

    /// Record that `id` needs nothing more in this pass, readying any parent
    /// whose children are now all accounted for.  Parents that themselves
    /// don't need building are passed through to their own parents.
    pub fn notify_built(&mut self, bg: &BuildGraph, id: NodeId) {
        let mut stack = vec![id];
        while let Some(id) = stack.pop() {
            for &parent in bg.graph.parents(id) {
                let state = &mut self.states[parent];
                state.children_processed += 1;
                if state.children_processed < bg.graph.children(parent).len() {
                    continue;
                }
                if state.processed == Processed::Pending {
                    self.insert(bg, parent);
                } else {
                    stack.push(parent);
                }
            }
        }
    }

    /// Drop ready nodes that were marked as not needing a build after the
    /// pass started, passing them through to their parents instead.
    pub fn reconcile_filtered(&mut self, bg: &BuildGraph) {
        let mut skipped = Vec::new();
        let mut i = 0;
        while i < self.ready.len() {
            let id = self.ready[i];
            if self.states[id].processed == Processed::Pending {
                i += 1;
            } else {
                self.ready.remove(i);
                self.weights.remove(i);
                skipped.push(id);
            }
        }
        for id in skipped {
            self.notify_built(bg, id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buildgraph::{BuildNode, CacheKey};
    use crate::graph::Graph;
    use crate::part::{LibType, Part, PartSpec};
    use crate::weight::weigh_nodes;

    fn node(name: &str) -> BuildNode {
        BuildNode::new(Part::new(
            PartSpec {
                name: name.into(),
                context: "main".into(),
                repo: "main".into(),
                platform: "x64".into(),
                lib_type: LibType::Dynamic,
            },
            "parts.toml",
        ))
    }

    /// root -> {a, b}; a -> {c, d}; b -> {d}
    fn graph() -> (BuildGraph, [NodeId; 5]) {
        let mut graph = Graph::new();
        let ids = ["root", "a", "b", "c", "d"].map(|n| graph.add_node(n, node(n)));
        let [root, a, b, c, d] = ids;
        for (p, ch) in [(root, a), (root, b), (a, c), (a, d), (b, d)] {
            graph.add_edge(p, ch);
        }
        let mut bg = BuildGraph {
            graph,
            root,
            key: CacheKey::default(),
            excluded: Default::default(),
        };
        weigh_nodes(&mut bg);
        (bg, ids)
    }

    fn build(sched: &mut LeafScheduler, bg: &BuildGraph, id: NodeId) {
        sched.state_mut(id).processed = Processed::Done;
        sched.notify_built(bg, id);
    }

    #[test]
    fn parents_wait_for_all_children() {
        let (bg, [root, a, b, c, d]) = graph();
        let mut sched = LeafScheduler::new(&bg);
        sched.fill(&bg);
        assert_eq!(sched.size(), 2);
        // d is reached through both a and b, so it outweighs c.
        assert_eq!(sched.get_next(), Some(d));
        build(&mut sched, &bg, d);
        assert_eq!(sched.get_next(), Some(c));
        assert_eq!(sched.get_next(), Some(b));
        assert_eq!(sched.get_next(), None);
        build(&mut sched, &bg, c);
        assert_eq!(sched.get_next(), Some(a));
        build(&mut sched, &bg, b);
        assert_eq!(sched.size(), 0);
        build(&mut sched, &bg, a);
        assert_eq!(sched.get_next(), Some(root));
    }

    #[test]
    fn filtered_nodes_pass_through() {
        let (bg, [root, a, b, c, d]) = graph();
        let mut sched = LeafScheduler::new(&bg);
        sched.fill(&bg);
        for id in [a, c, d] {
            sched.mark_filtered(id);
        }
        sched.reconcile_filtered(&bg);
        assert_eq!(sched.pending(&bg), 2);
        // a is filtered too, so it passes straight through to root.
        assert_eq!(sched.get_next(), Some(b));
        assert_eq!(sched.size(), 0);
        build(&mut sched, &bg, b);
        assert_eq!(sched.get_next(), Some(root));
    }

    #[test]
    fn refill_skips_built_nodes() {
        let (bg, [root, a, b, c, d]) = graph();
        let mut sched = LeafScheduler::new(&bg);
        sched.fill(&bg);
        for id in [d, c, b] {
            build(&mut sched, &bg, id);
        }
        sched.state_mut(a).failed = true;
        sched.reset_failures();
        assert!(!sched.state(a).failed);

        sched.fill(&bg);
        assert_eq!(sched.pending(&bg), 2);
        assert_eq!(sched.get_next(), Some(a));
        assert_eq!(sched.get_next(), None);
        build(&mut sched, &bg, a);
        assert_eq!(sched.get_next(), Some(root));
    }
}
