//! Graph assembly: resolves the root part's sub-parts recursively into a
//! BuildGraph.

use crate::buildgraph::{BuildGraph, BuildNode, CacheKey, GRAPH_VERSION};
use crate::context::BuildContext;
use crate::error::{Error, Result};
use crate::fs::{FileSystem, MTime};
use crate::graph::{Graph, NodeId};
use crate::part::{Part, PartDescriptor, PartSpec};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info_span, warn};

/// Turns a part instance into its definition.
pub trait PartReader: Sync {
    fn read_part(&self, spec: &PartSpec) -> Result<Part>;
}

/// Scratch state for one assembly, discarded once the graph is built.
struct Assembly<'a> {
    ctx: &'a BuildContext,
    reader: &'a dyn PartReader,
    fs: &'a dyn FileSystem,
    graph: Graph<BuildNode>,
    files: BTreeMap<PathBuf, MTime>,
    rejected: BTreeMap<String, String>,
}

impl<'a> Assembly<'a> {
    fn record_file(&mut self, path: &Path) -> Result<()> {
        if !self.files.contains_key(path) {
            let mtime = self.fs.stat(path)?;
            self.files.insert(path.to_path_buf(), mtime);
        }
        Ok(())
    }

    /// Find or create the node for `spec`.  None if the part is excluded.
    fn visit(&mut self, spec: &PartSpec) -> Result<Option<NodeId>> {
        let key = spec.key();
        if self.rejected.contains_key(&key) {
            return Ok(None);
        }
        if let Some(id) = self.graph.lookup(&key) {
            let first = &self.graph.node(id).part.spec.repo;
            if *first != spec.repo {
                warn!(
                    "{} reached through repository {} but was first found in {}",
                    spec, spec.repo, first
                );
            }
            return Ok(Some(id));
        }

        let part = self.reader.read_part(spec)?;
        self.record_file(&part.source)?;
        let reason = match part.exclusion() {
            Some(reason) => Some(reason),
            None if self.ctx.strategy.is_excluded(&part) => Some("excluded by strategy".into()),
            None => None,
        };
        if let Some(reason) = reason {
            debug!("rejecting {}: {}", spec, reason);
            self.rejected.insert(key, reason);
            return Ok(None);
        }

        let id = self.graph.add_node(key, BuildNode::new(part));
        self.add_sub_parts(id)?;
        Ok(Some(id))
    }

    fn add_sub_parts(&mut self, parent: NodeId) -> Result<()> {
        let part = &self.graph.node(parent).part;
        let (parent_spec, sub_parts, sequential) =
            (part.spec.clone(), part.sub_parts.clone(), part.sequential);

        let mut added = Vec::with_capacity(sub_parts.len());
        for desc in &sub_parts {
            let spec = desc.resolve(&parent_spec);
            let Some(child) = self.visit(&spec)? else {
                continue;
            };
            if !self.graph.add_edge(parent, child) {
                let (parent, child) = (
                    self.graph.key(parent).to_string(),
                    self.graph.key(child).to_string(),
                );
                if !self.ctx.allow_duplicate_subparts {
                    return Err(Error::DuplicateSubPart { parent, child });
                }
                warn!("ignoring duplicate subpart {} in {}", child, parent);
                continue;
            }
            added.push(child);
        }

        if sequential {
            // Each sub-part waits on the one declared before it.
            for pair in added.windows(2) {
                self.graph.add_edge(pair[1], pair[0]);
            }
        }
        Ok(())
    }

    /// Attach strategy-requested parts below the root so ordinary
    /// traversal picks them up.
    fn add_strategy_parts(&mut self, root: NodeId) -> Result<()> {
        let root_spec = self.graph.node(root).part.spec.clone();
        let bootstrap = self.ctx.strategy.bootstrap_parts();
        let tools = self.ctx.strategy.tool_parts();
        for (desc, early) in bootstrap
            .iter()
            .map(|d| (d, true))
            .chain(tools.iter().map(|d| (d, false)))
        {
            let Some(id) = self.visit(&desc.resolve(&root_spec))? else {
                continue;
            };
            if id == root {
                continue;
            }
            if early {
                self.graph.node_mut(id).part.early = true;
            }
            self.graph.add_edge(root, id);
        }
        Ok(())
    }

    /// Parts requiring an aspect depend on every part providing it.
    fn add_aspect_edges(&mut self) {
        let mut edges = Vec::new();
        for id in self.graph.all_nodes() {
            let wanted = &self.graph.node(id).part.requires_aspects;
            if wanted.is_empty() {
                continue;
            }
            for other in self.graph.all_nodes() {
                let provides = &self.graph.node(other).part.aspects;
                if other != id && provides.iter().any(|a| wanted.contains(a)) {
                    edges.push((id, other));
                }
            }
        }
        for (parent, child) in edges {
            self.graph.add_edge(parent, child);
        }
    }

    fn cache_key(&mut self) -> Result<CacheKey> {
        let mut strategy_files = BTreeMap::new();
        for path in self.ctx.strategy.config_files() {
            let mtime = self.fs.stat(&path)?;
            strategy_files.insert(path, mtime);
        }
        let created = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64;
        Ok(CacheKey {
            version: GRAPH_VERSION,
            tool_version: self.ctx.tool_version.clone(),
            created: MTime::Stamp(created),
            files: std::mem::take(&mut self.files),
            strategy_files,
            fingerprint: self.ctx.strategy.fingerprint(),
            source_root: self.ctx.source_root.clone(),
            output_root: self.ctx.output_root.clone(),
            host: self.ctx.host.clone(),
            env: self.ctx.env.clone(),
        })
    }
}

/// Build the graph for `root` from scratch.
pub fn assemble(
    ctx: &BuildContext,
    reader: &dyn PartReader,
    fs: &dyn FileSystem,
    root: &PartDescriptor,
) -> Result<BuildGraph> {
    let _span = info_span!("assemble", root = %root).entered();
    let mut asm = Assembly {
        ctx,
        reader,
        fs,
        graph: Graph::new(),
        files: BTreeMap::new(),
        rejected: BTreeMap::new(),
    };

    let Some(root_id) = asm.visit(&ctx.root_spec(root))? else {
        return Err(Error::EmptyGraph);
    };
    asm.add_strategy_parts(root_id)?;
    asm.add_aspect_edges();
    if asm.graph.is_empty() {
        return Err(Error::EmptyGraph);
    }

    let (nodes, edges) = asm.graph.size();
    debug!(nodes, edges, rejected = asm.rejected.len(), "assembled graph");
    let key = asm.cache_key()?;
    Ok(BuildGraph {
        graph: asm.graph,
        root: root_id,
        key,
        excluded: asm.rejected,
    })
}
