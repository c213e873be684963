//! What gets done to each node.  The executor only knows the `BuildAction`
//! interface; `StandardAction` implements it for the tool's own commands.

use crate::buildgraph::BuildGraph;
use crate::error::{Error, Result};
use crate::graph::NodeId;
use crate::part::Part;
use crate::repo::Repositories;
use crate::work::Outcome;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::debug;

/// The per-node unit of work plus the policy the executor runs it under.
pub trait BuildAction: Sync {
    /// Do the work for one node, returning its buffered output.  May be
    /// called again for the same node when a failed pass is retried.
    fn do_build_action(&self, graph: &BuildGraph, id: NodeId) -> Result<String>;

    /// Nodes to leave alone in this action.  Their parents still run.
    fn filter_parts(&self, _graph: &BuildGraph) -> Vec<NodeId> {
        Vec::new()
    }

    /// Called once per pass, before any node runs.
    fn do_before_action(&self, _graph: &BuildGraph) -> Result<()> {
        Ok(())
    }

    /// Called once per pass, after the last node finished.
    fn do_after_action(&self, _graph: &BuildGraph, _outcome: &Outcome) -> Result<()> {
        Ok(())
    }

    /// Remove a failed node's partial output ahead of a clean retry.
    fn clean_node(&self, _graph: &BuildGraph, _id: NodeId) -> Result<()> {
        Ok(())
    }

    /// Worker thread limit; 0 runs everything on the calling thread.
    fn num_threads(&self) -> usize;

    /// How long the dispatch loop waits for a completion before
    /// rechecking its state.
    fn pause_duration(&self) -> Duration {
        Duration::from_millis(100)
    }

    fn prompt_on_error(&self) -> bool {
        false
    }

    /// Keep building unrelated nodes after a node fails.
    fn ignore_errors(&self) -> bool {
        false
    }
}

/// Runs a part's own commands.
pub trait PartRunner: Sync {
    fn build(&self, part: &Part) -> Result<String>;
    fn clean(&self, part: &Part) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionKind {
    Build,
    /// Clean and build the parts matching any pattern, and their sub-parts.
    Rebuild { patterns: Vec<String> },
    Clean,
    /// List parts in build order without running anything.
    PartWalk,
    /// Bring every repository up to date, each once.
    RepoWalk,
    /// Report where each part's source came from.
    Provenance,
}

#[derive(Debug, Clone)]
pub struct ActionSettings {
    pub threads: usize,
    pub pause: Duration,
    pub prompt_on_error: bool,
    pub ignore_errors: bool,
    /// Only act on the root part itself.
    pub no_sub_parts: bool,
}

impl Default for ActionSettings {
    fn default() -> Self {
        ActionSettings {
            threads: 1,
            pause: Duration::from_millis(100),
            prompt_on_error: false,
            ignore_errors: false,
            no_sub_parts: false,
        }
    }
}

pub struct StandardAction<'a> {
    kind: ActionKind,
    settings: ActionSettings,
    runner: &'a dyn PartRunner,
    repos: &'a dyn Repositories,
    /// Pull result per repository.  The first part of a repository pulls it;
    /// the others wait for that result and share it.
    pulled: DashMap<String, Arc<OnceLock<std::result::Result<(), String>>>>,
}

impl<'a> StandardAction<'a> {
    pub fn new(
        kind: ActionKind,
        settings: ActionSettings,
        runner: &'a dyn PartRunner,
        repos: &'a dyn Repositories,
    ) -> Self {
        StandardAction {
            kind,
            settings,
            runner,
            repos,
            pulled: DashMap::new(),
        }
    }

    pub fn kind(&self) -> &ActionKind {
        &self.kind
    }

    fn pull(&self, graph: &BuildGraph, id: NodeId) -> Result<String> {
        let repo = &graph.part(id).spec.repo;
        let cell = self.pulled.entry(repo.clone()).or_default().clone();
        let mut output = String::new();
        let result = cell.get_or_init(|| match self.repos.pull(repo) {
            Ok(out) => {
                output = out;
                Ok(())
            }
            Err(Error::PartPull { message, .. }) => Err(message),
            Err(err) => Err(err.to_string()),
        });
        match result {
            Ok(()) => Ok(output),
            Err(message) => Err(Error::part_pull(graph.key(id), message.clone())),
        }
    }

    fn provenance(&self, graph: &BuildGraph, id: NodeId) -> Result<String> {
        let part = graph.part(id);
        let repo = &part.spec.repo;
        let prov = self.repos.provenance(repo)?;
        let modified = if self.repos.has_local_changes(repo)? {
            " (local changes)"
        } else {
            ""
        };
        Ok(format!("{}: {} {}{}\n", part.spec, repo, prov, modified))
    }
}

impl BuildAction for StandardAction<'_> {
    fn do_build_action(&self, graph: &BuildGraph, id: NodeId) -> Result<String> {
        let part = graph.part(id);
        match &self.kind {
            ActionKind::Build => self.runner.build(part),
            ActionKind::Rebuild { .. } => {
                let mut output = self.runner.clean(part)?;
                output.push_str(&self.runner.build(part)?);
                Ok(output)
            }
            ActionKind::Clean => self.runner.clean(part),
            ActionKind::PartWalk => Ok(format!("{}\n", graph.key(id))),
            ActionKind::RepoWalk => self.pull(graph, id),
            ActionKind::Provenance => self.provenance(graph, id),
        }
    }

    fn filter_parts(&self, graph: &BuildGraph) -> Vec<NodeId> {
        let keep: HashSet<NodeId> = if self.settings.no_sub_parts {
            HashSet::from([graph.root])
        } else if let ActionKind::Rebuild { patterns } = &self.kind {
            graph
                .find(patterns)
                .into_iter()
                .flat_map(|id| graph.graph.child_walk(id))
                .collect()
        } else {
            return Vec::new();
        };
        graph
            .graph
            .all_nodes()
            .filter(|id| !keep.contains(id))
            .collect()
    }

    fn do_before_action(&self, graph: &BuildGraph) -> Result<()> {
        if let ActionKind::Rebuild { patterns } = &self.kind {
            if graph.find(patterns).is_empty() {
                return Err(Error::build(format!(
                    "no parts match {}",
                    patterns.join(" ")
                )));
            }
        }
        // Failed pulls are tried again in the next pass.
        self.pulled
            .retain(|_, cell| !matches!(cell.get(), Some(Err(_))));
        debug!(action = ?self.kind, "starting pass");
        Ok(())
    }

    fn clean_node(&self, graph: &BuildGraph, id: NodeId) -> Result<()> {
        match self.kind {
            ActionKind::Build | ActionKind::Rebuild { .. } => {
                self.runner.clean(graph.part(id))?;
            }
            _ => {}
        }
        Ok(())
    }

    fn num_threads(&self) -> usize {
        self.settings.threads
    }

    fn pause_duration(&self) -> Duration {
        self.settings.pause
    }

    fn prompt_on_error(&self) -> bool {
        self.settings.prompt_on_error
    }

    fn ignore_errors(&self) -> bool {
        self.settings.ignore_errors
    }
}
