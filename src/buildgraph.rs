//! The assembled build graph: parts as nodes, plus the metadata that decides
//! whether a persisted copy of it is still valid.

use crate::fs::MTime;
use crate::graph::{Graph, NodeId};
use crate::part::{name_matches, Part};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Bumped whenever the shape of the persisted graph changes.
pub const GRAPH_VERSION: u32 = 1;

/// Scheduling priority.  Ordered lexicographically: a higher phase always
/// wins, then a higher cumulative weight.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Weight {
    pub phase: u32,
    /// Roughly how much downstream work this node holds up.
    pub cumulative: u64,
}

#[derive(Debug, Clone)]
pub struct BuildNode {
    pub part: Part,
    pub weight: Weight,
}

impl BuildNode {
    pub fn new(part: Part) -> Self {
        BuildNode {
            part,
            weight: Weight::default(),
        }
    }
}

/// What a graph was built from.  A persisted graph is reused only while
/// all of it still matches.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheKey {
    pub version: u32,
    pub tool_version: String,
    /// When the graph was assembled.
    pub created: MTime,
    /// Part definition files consulted during assembly.
    pub files: BTreeMap<PathBuf, MTime>,
    pub strategy_files: BTreeMap<PathBuf, MTime>,
    pub fingerprint: String,
    pub source_root: PathBuf,
    pub output_root: PathBuf,
    pub host: String,
    pub env: BTreeMap<String, String>,
}

pub struct BuildGraph {
    pub graph: Graph<BuildNode>,
    pub root: NodeId,
    pub key: CacheKey,
    /// Keys of parts rejected during assembly, with the reason.
    pub excluded: BTreeMap<String, String>,
}

impl BuildGraph {
    pub fn node(&self, id: NodeId) -> &BuildNode {
        self.graph.node(id)
    }

    pub fn part(&self, id: NodeId) -> &Part {
        &self.graph.node(id).part
    }

    pub fn key(&self, id: NodeId) -> &str {
        self.graph.key(id)
    }

    pub fn len(&self) -> usize {
        self.graph.size().0
    }

    pub fn is_empty(&self) -> bool {
        self.graph.is_empty()
    }

    /// Nodes whose part name matches any of `patterns`.
    pub fn find(&self, patterns: &[String]) -> Vec<NodeId> {
        self.graph
            .all_nodes()
            .filter(|&id| {
                let name = &self.part(id).spec.name;
                patterns.iter().any(|p| name_matches(name, p))
            })
            .collect()
    }
}
