//! The dependency graph: nodes keyed by a stable identifier string, each with
//! an ordered list of children (the nodes it depends on) and parents (the
//! nodes depending on it).
//!
//! Edges are always added and removed in pairs, so `b` appears in
//! `children(a)` exactly when `a` appears in `parents(b)`.  Nothing here
//! prevents cycles; see `find_cycle`.

use crate::densemap::{self, DenseMap};
use rustc_hash::FxHashMap;
use std::collections::VecDeque;

/// Id for a node in the graph.  Only valid for the graph that produced it.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);
impl densemap::Index for NodeId {
    fn index(&self) -> usize {
        self.0
    }
}
impl From<usize> for NodeId {
    fn from(u: usize) -> NodeId {
        NodeId(u)
    }
}

struct Slot<T> {
    key: String,
    payload: T,
    children: Vec<NodeId>,
    parents: Vec<NodeId>,
}

pub struct Graph<T> {
    /// Deleted nodes leave a hole so that ids stay stable.
    slots: DenseMap<NodeId, Option<Slot<T>>>,
    ids: FxHashMap<String, NodeId>,
    edge_count: usize,
}

impl<T> Default for Graph<T> {
    fn default() -> Self {
        Graph {
            slots: DenseMap::default(),
            ids: FxHashMap::default(),
            edge_count: 0,
        }
    }
}

impl<T> Graph<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, id: NodeId) -> &Slot<T> {
        match &self.slots[id] {
            Some(slot) => slot,
            None => panic!("{:?} was deleted", id),
        }
    }

    fn slot_mut(&mut self, id: NodeId) -> &mut Slot<T> {
        match &mut self.slots[id] {
            Some(slot) => slot,
            None => panic!("{:?} was deleted", id),
        }
    }

    /// Add a node.  Adding a key twice is a caller bug.
    pub fn add_node(&mut self, key: impl Into<String>, payload: T) -> NodeId {
        let key = key.into();
        if let Some(id) = self.ids.get(&key) {
            panic!("double add of {:?} ({:?})", key, id);
        }
        let id = self.slots.push(Some(Slot {
            key: key.clone(),
            payload,
            children: Vec::new(),
            parents: Vec::new(),
        }));
        self.ids.insert(key, id);
        id
    }

    /// Remove a node along with every edge touching it.
    pub fn delete_node(&mut self, id: NodeId) -> T {
        for child in self.slot(id).children.clone() {
            self.delete_edge(id, child);
        }
        for parent in self.slot(id).parents.clone() {
            self.delete_edge(parent, id);
        }
        let slot = match self.slots[id].take() {
            Some(slot) => slot,
            None => panic!("{:?} was deleted", id),
        };
        self.ids.remove(&slot.key);
        slot.payload
    }

    pub fn lookup(&self, key: &str) -> Option<NodeId> {
        self.ids.get(key).copied()
    }

    pub fn key(&self, id: NodeId) -> &str {
        &self.slot(id).key
    }

    pub fn node(&self, id: NodeId) -> &T {
        &self.slot(id).payload
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut T {
        &mut self.slot_mut(id).payload
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.slot(id).children
    }

    pub fn parents(&self, id: NodeId) -> &[NodeId] {
        &self.slot(id).parents
    }

    pub fn has_edge(&self, parent: NodeId, child: NodeId) -> bool {
        self.slot(parent).children.contains(&child)
    }

    /// Make `parent` depend on `child`.  Returns false, changing nothing,
    /// if the edge already exists.
    pub fn add_edge(&mut self, parent: NodeId, child: NodeId) -> bool {
        if self.has_edge(parent, child) {
            return false;
        }
        self.slot_mut(parent).children.push(child);
        self.slot_mut(child).parents.push(parent);
        self.edge_count += 1;
        true
    }

    /// Returns false if there was no such edge.
    pub fn delete_edge(&mut self, parent: NodeId, child: NodeId) -> bool {
        let children = &mut self.slot_mut(parent).children;
        let Some(pos) = children.iter().position(|&c| c == child) else {
            return false;
        };
        children.remove(pos);
        let parents = &mut self.slot_mut(child).parents;
        if let Some(pos) = parents.iter().position(|&p| p == parent) {
            parents.remove(pos);
        }
        self.edge_count -= 1;
        true
    }

    /// Live node ids, in insertion order.
    pub fn all_nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.slots.all_ids().filter(|&id| self.slots[id].is_some())
    }

    /// (node count, edge count).
    pub fn size(&self) -> (usize, usize) {
        (self.ids.len(), self.edge_count)
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// One past the largest id handed out; used to size per-node side tables.
    pub fn id_bound(&self) -> usize {
        self.slots.len()
    }

    fn parent_counts(&self) -> DenseMap<NodeId, usize> {
        let mut pending = DenseMap::new_sized(self.id_bound(), 0);
        for id in self.all_nodes() {
            pending[id] = self.parents(id).len();
        }
        pending
    }

    /// Kahn-style walk from `root`: calls `visit(parent, child, resolved)`
    /// for every edge, where `resolved` is true on the last visit to `child`,
    /// once all of its parents have been walked.  Each node is queued at
    /// most once, so edges back into the root or into a cycle are skipped.
    fn topological(&self, root: NodeId, mut visit: impl FnMut(NodeId, NodeId, bool)) {
        let mut pending = self.parent_counts();
        let mut queued = DenseMap::new_sized(self.id_bound(), false);
        queued[root] = true;
        let mut queue = VecDeque::from([root]);
        while let Some(id) = queue.pop_front() {
            for &child in self.children(id) {
                if queued[child] {
                    continue;
                }
                pending[child] -= 1;
                let resolved = pending[child] == 0;
                visit(id, child, resolved);
                if resolved {
                    queued[child] = true;
                    queue.push_back(child);
                }
            }
        }
    }

    /// Topological breadth-first walk: a node is yielded only after all of
    /// its parents have been.  Must start at the true root; nodes with a
    /// parent unreachable from `root` are never yielded.
    pub fn breadth_first(&self, root: NodeId) -> Vec<NodeId> {
        let mut order = vec![root];
        self.topological(root, |_, child, resolved| {
            if resolved {
                order.push(child);
            }
        });
        order
    }

    /// Like `breadth_first`, but yields every (parent, child) edge, in the
    /// order parents become fully resolved.  The root is never a child.
    pub fn breadth_first_children(&self, root: NodeId) -> Vec<(NodeId, NodeId)> {
        let mut pairs = Vec::new();
        self.topological(root, |parent, child, _| pairs.push((parent, child)));
        pairs
    }

    /// Post-order depth-first walk: children before the node itself, each
    /// node once.
    pub fn depth_first(&self, root: NodeId) -> Vec<NodeId> {
        let mut visited = DenseMap::new_sized(self.id_bound(), false);
        let mut order = Vec::new();
        let mut stack = vec![(root, 0usize)];
        visited[root] = true;
        while let Some(top) = stack.last_mut() {
            let (id, next) = *top;
            if let Some(&child) = self.children(id).get(next) {
                top.1 += 1;
                if !visited[child] {
                    visited[child] = true;
                    stack.push((child, 0));
                }
            } else {
                stack.pop();
                order.push(id);
            }
        }
        order
    }

    fn reach<'a>(&'a self, root: NodeId, next: impl Fn(NodeId) -> &'a [NodeId]) -> Vec<NodeId> {
        let mut visited = DenseMap::new_sized(self.id_bound(), false);
        let mut order = Vec::new();
        let mut stack = vec![root];
        visited[root] = true;
        while let Some(id) = stack.pop() {
            order.push(id);
            for &n in next(id).iter().rev() {
                if !visited[n] {
                    visited[n] = true;
                    stack.push(n);
                }
            }
        }
        order
    }

    /// Every node reachable through children, including `root`.  Valid on
    /// arbitrary subgraphs.
    pub fn child_walk(&self, root: NodeId) -> Vec<NodeId> {
        self.reach(root, |id| self.children(id))
    }

    /// Every node reachable through parents, including `root`.
    pub fn parent_walk(&self, root: NodeId) -> Vec<NodeId> {
        self.reach(root, |id| self.parents(id))
    }

    /// Depth-first search from `root` tracking the current path.  Returns
    /// the (parent, child) edge that closes a cycle, if any.
    pub fn find_cycle(&self, root: NodeId) -> Option<(NodeId, NodeId)> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            New,
            OnPath,
            Done,
        }
        let mut marks = DenseMap::new_sized(self.id_bound(), Mark::New);
        let mut stack = vec![(root, 0usize)];
        marks[root] = Mark::OnPath;
        while let Some(top) = stack.last_mut() {
            let (id, next) = *top;
            if let Some(&child) = self.children(id).get(next) {
                top.1 += 1;
                match marks[child] {
                    Mark::OnPath => return Some((id, child)),
                    Mark::Done => {}
                    Mark::New => {
                        marks[child] = Mark::OnPath;
                        stack.push((child, 0));
                    }
                }
            } else {
                marks[id] = Mark::Done;
                stack.pop();
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(edges: &[(&str, &str)]) -> Graph<()> {
        let mut g = Graph::new();
        for &(p, c) in edges {
            let p = g.lookup(p).unwrap_or_else(|| g.add_node(p, ()));
            let c = g.lookup(c).unwrap_or_else(|| g.add_node(c, ()));
            g.add_edge(p, c);
        }
        g
    }

    fn keys(g: &Graph<()>, ids: &[NodeId]) -> Vec<String> {
        ids.iter().map(|&id| g.key(id).to_string()).collect()
    }

    #[test]
    fn breadth_first_waits_for_all_parents() {
        // root -> a -> c, root -> b -> d -> c
        let g = graph(&[
            ("root", "a"),
            ("root", "b"),
            ("a", "c"),
            ("b", "d"),
            ("d", "c"),
        ]);
        let root = g.lookup("root").unwrap();
        assert_eq!(
            keys(&g, &g.breadth_first(root)),
            vec!["root", "a", "b", "d", "c"]
        );
    }

    #[test]
    fn breadth_first_children_pairs() {
        let g = graph(&[("root", "a"), ("root", "b"), ("a", "c"), ("b", "c")]);
        let root = g.lookup("root").unwrap();
        let pairs: Vec<(String, String)> = g
            .breadth_first_children(root)
            .into_iter()
            .map(|(p, c)| (g.key(p).to_string(), g.key(c).to_string()))
            .collect();
        let pairs: Vec<(&str, &str)> = pairs
            .iter()
            .map(|(p, c)| (p.as_str(), c.as_str()))
            .collect();
        assert_eq!(
            pairs,
            vec![("root", "a"), ("root", "b"), ("a", "c"), ("b", "c")]
        );
    }

    #[test]
    fn walks_survive_edges_back_to_root() {
        let g = graph(&[("root", "lib"), ("lib", "root"), ("lib", "util")]);
        let root = g.lookup("root").unwrap();
        assert_eq!(keys(&g, &g.breadth_first(root)), vec!["root", "lib", "util"]);
        let pairs = g.breadth_first_children(root);
        assert!(pairs.iter().all(|&(_, child)| child != root));
        assert_eq!(pairs.len(), 2);
    }

    #[test]
    fn depth_first_is_post_order() {
        let g = graph(&[("root", "a"), ("root", "b"), ("a", "c"), ("b", "c")]);
        let root = g.lookup("root").unwrap();
        assert_eq!(keys(&g, &g.depth_first(root)), vec!["c", "a", "b", "root"]);
    }

    #[test]
    fn child_and_parent_walks() {
        let g = graph(&[("root", "a"), ("root", "b"), ("a", "c"), ("b", "c")]);
        let a = g.lookup("a").unwrap();
        let c = g.lookup("c").unwrap();
        assert_eq!(keys(&g, &g.child_walk(a)), vec!["a", "c"]);
        assert_eq!(keys(&g, &g.parent_walk(c)), vec!["c", "a", "root", "b"]);
    }

    #[test]
    fn edges_stay_paired() {
        let mut g = graph(&[("root", "a"), ("root", "b"), ("a", "b")]);
        assert_eq!(g.size(), (3, 3));
        let (root, a, b) = (
            g.lookup("root").unwrap(),
            g.lookup("a").unwrap(),
            g.lookup("b").unwrap(),
        );
        assert!(!g.add_edge(root, a));
        assert!(g.delete_edge(a, b));
        assert!(!g.delete_edge(a, b));
        assert_eq!(g.parents(b), &[root]);

        g.delete_node(a);
        assert_eq!(g.size(), (2, 1));
        assert_eq!(g.children(root), &[b]);
        assert!(g.lookup("a").is_none());
        assert_eq!(g.all_nodes().count(), 2);
    }

    #[test]
    fn cycles() {
        let g = graph(&[("root", "a"), ("root", "b"), ("a", "c"), ("b", "c")]);
        assert_eq!(g.find_cycle(g.lookup("root").unwrap()), None);

        let g = graph(&[("root", "a"), ("a", "b"), ("b", "c"), ("c", "a")]);
        let (p, c) = g.find_cycle(g.lookup("root").unwrap()).unwrap();
        assert_eq!((g.key(p), g.key(c)), ("c", "a"));
    }
}
