//! Node weighting: prioritizes ready nodes so that those holding up the most
//! downstream work are dispatched first.

use crate::buildgraph::{BuildGraph, Weight};
use tracing::info_span;

/// Compute every node's weight from scratch.  Safe to call repeatedly.
pub fn weigh_nodes(bg: &mut BuildGraph) {
    let _span = info_span!("weight").entered();
    let root = bg.root;
    let ids: Vec<_> = bg.graph.all_nodes().collect();
    for id in ids {
        let node = bg.graph.node_mut(id);
        let early = id == root || node.part.early;
        node.weight = Weight {
            phase: early as u32,
            cumulative: 1,
        };
    }
    // Parents are fully weighted before any of their children are visited.
    for (parent, child) in bg.graph.breadth_first_children(root) {
        let from = bg.graph.node(parent).weight;
        let weight = &mut bg.graph.node_mut(child).weight;
        // Counts root-to-node paths, which can exceed u64 in layered graphs.
        weight.cumulative = weight.cumulative.saturating_add(from.cumulative);
        weight.phase = weight.phase.max(from.phase);
    }
}
