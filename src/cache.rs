//! Reuse of a persisted BuildGraph across invocations.

use crate::assemble::{assemble, PartReader};
use crate::buildgraph::{BuildGraph, GRAPH_VERSION};
use crate::context::BuildContext;
use crate::db;
use crate::error::Result;
use crate::fs::{FileSystem, MTime};
use crate::part::PartDescriptor;
use crate::weight::weigh_nodes;
use crate::work::check_for_circular;
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, info_span, warn};

/// File name of the snapshot, under the output root.
pub const SNAPSHOT_NAME: &str = ".partbuild_graph";

pub fn snapshot_path(ctx: &BuildContext) -> PathBuf {
    ctx.output_root.join(SNAPSHOT_NAME)
}

/// Why a persisted graph can't be reused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Invalidation {
    #[error("no saved graph")]
    Missing,
    #[error("saved graph unreadable: {0}")]
    Unreadable(String),
    #[error("graph format version {0} is out of date")]
    Version(u32),
    #[error("tool version changed from {0}")]
    ToolVersion(String),
    #[error("part file {0:?} changed")]
    PartFile(PathBuf),
    #[error("strategy file {0:?} changed")]
    StrategyFile(PathBuf),
    #[error("tool file {0:?} is newer than the saved graph")]
    ToolFile(PathBuf),
    #[error("environment variable {0} was added")]
    EnvAdded(String),
    #[error("environment variable {0} was removed")]
    EnvRemoved(String),
    #[error("environment variable {0} changed")]
    EnvChanged(String),
    #[error("source root changed from {0:?}")]
    SourceRoot(PathBuf),
    #[error("output root changed from {0:?}")]
    OutputRoot(PathBuf),
    #[error("host changed from {0}")]
    Host(String),
    #[error("strategy changed")]
    Fingerprint,
    #[error("root part changed from {0}")]
    Root(String),
}

/// The first recorded file whose current mtime differs from the recorded
/// one.  Stats run in parallel; results are compared in order so the
/// reported file is deterministic.
fn first_changed(fs: &dyn FileSystem, files: &BTreeMap<PathBuf, MTime>) -> Option<PathBuf> {
    let current: Vec<(&PathBuf, MTime, std::io::Result<MTime>)> = files
        .par_iter()
        .map(|(path, &mtime)| (path, mtime, fs.stat(path)))
        .collect();
    current.into_iter().find_map(|(path, recorded, now)| match now {
        Ok(now) if now == recorded => None,
        _ => Some(path.clone()),
    })
}

fn check_env(
    cached: &BTreeMap<String, String>,
    current: &BTreeMap<String, String>,
) -> std::result::Result<(), Invalidation> {
    for (name, value) in current {
        match cached.get(name) {
            None => return Err(Invalidation::EnvAdded(name.clone())),
            Some(old) if old != value => return Err(Invalidation::EnvChanged(name.clone())),
            _ => {}
        }
    }
    if let Some(name) = cached.keys().find(|name| !current.contains_key(*name)) {
        return Err(Invalidation::EnvRemoved(name.clone()));
    }
    Ok(())
}

/// Decide whether `graph` may be reused for building `root` under `ctx`.
/// Checks run in a fixed order and stop at the first failure.
pub fn validate(
    graph: &BuildGraph,
    ctx: &BuildContext,
    fs: &dyn FileSystem,
    root: &PartDescriptor,
) -> std::result::Result<(), Invalidation> {
    let key = &graph.key;
    if key.version != GRAPH_VERSION {
        return Err(Invalidation::Version(key.version));
    }
    if key.tool_version != ctx.tool_version {
        return Err(Invalidation::ToolVersion(key.tool_version.clone()));
    }
    if let Some(path) = first_changed(fs, &key.files) {
        return Err(Invalidation::PartFile(path));
    }
    if let Some(path) = first_changed(fs, &key.strategy_files) {
        return Err(Invalidation::StrategyFile(path));
    }
    for path in &ctx.tool_files {
        // A tool file we can't stat is treated as changed.
        let newer = match fs.stat(path) {
            Ok(MTime::Stamp(t)) => MTime::Stamp(t) > key.created,
            Ok(MTime::Missing) => false,
            Err(_) => true,
        };
        if newer {
            return Err(Invalidation::ToolFile(path.clone()));
        }
    }
    check_env(&key.env, &ctx.env)?;
    if key.source_root != ctx.source_root {
        return Err(Invalidation::SourceRoot(key.source_root.clone()));
    }
    if key.output_root != ctx.output_root {
        return Err(Invalidation::OutputRoot(key.output_root.clone()));
    }
    if key.host != ctx.host {
        return Err(Invalidation::Host(key.host.clone()));
    }
    if key.fingerprint != ctx.strategy.fingerprint() {
        return Err(Invalidation::Fingerprint);
    }
    if graph.key(graph.root) != ctx.root_spec(root).key() {
        return Err(Invalidation::Root(graph.key(graph.root).to_string()));
    }
    Ok(())
}

/// Load the snapshot at `path` if it exists and is still valid.
pub fn load(
    path: &Path,
    ctx: &BuildContext,
    fs: &dyn FileSystem,
    root: &PartDescriptor,
) -> std::result::Result<BuildGraph, Invalidation> {
    let graph = match db::read(path) {
        Ok(graph) => graph,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(Invalidation::Missing)
        }
        Err(err) => {
            let mismatch = err
                .get_ref()
                .and_then(|inner| inner.downcast_ref::<db::VersionMismatch>());
            return Err(match mismatch {
                Some(db::VersionMismatch(version)) => Invalidation::Version(*version),
                None => Invalidation::Unreadable(err.to_string()),
            });
        }
    };
    validate(&graph, ctx, fs, root)?;
    Ok(graph)
}

/// Produce a weighted graph for `root`: the saved one when it is still
/// valid, otherwise a freshly assembled one, which is then saved.  A `path`
/// of None disables the snapshot entirely.
pub fn load_or_build(
    ctx: &BuildContext,
    reader: &dyn PartReader,
    fs: &dyn FileSystem,
    root: &PartDescriptor,
    path: Option<&Path>,
) -> Result<BuildGraph> {
    let _span = info_span!("load").entered();
    let fresh = || -> Result<BuildGraph> {
        let mut graph = assemble(ctx, reader, fs, root)?;
        // Weighing walks the graph from the root, so cycles go first.
        check_for_circular(&graph)?;
        weigh_nodes(&mut graph);
        Ok(graph)
    };
    let Some(path) = path else {
        return fresh();
    };
    match load(path, ctx, fs, root) {
        Ok(graph) => {
            debug!("reusing saved graph {:?}", path);
            return Ok(graph);
        }
        Err(Invalidation::Missing) => debug!("no saved graph at {:?}", path),
        Err(reason) => info!("rebuilding graph: {}", reason),
    }

    let graph = fresh()?;
    // Failing to save only costs the next invocation a rebuild.
    if let Err(err) = db::write(path, &graph) {
        warn!("saving graph to {:?}: {}", path, err);
    }
    Ok(graph)
}
