//! Build progress reporting, for the purpose of display to the user.

use crate::buildgraph::BuildGraph;
use crate::error::Error;
use crate::graph::NodeId;
use crate::work::Outcome;
use std::io::Write;

/// Trait for build progress notifications.
pub trait Progress {
    /// Called when a node's action is dispatched.
    fn task_started(&mut self, graph: &BuildGraph, id: NodeId);

    /// Called when a node's action succeeds, with its buffered output.
    fn task_finished(&mut self, graph: &BuildGraph, id: NodeId, output: &str);

    /// Called when a node's action fails.  `recent` is the most recent
    /// scheduling history, oldest first, for context.
    fn task_failed(&mut self, graph: &BuildGraph, id: NodeId, err: &Error, recent: &[String]);

    /// Called at the end of every pass.
    fn finish(&mut self, outcome: &Outcome);

    /// Log a line of output.
    fn log(&mut self, msg: &str);
}

/// Progress implementation for a plain console, without any overprinting.
#[derive(Default)]
pub struct ConsoleProgress {
    /// Whether to print the command of each started part.
    verbose: bool,
}

impl ConsoleProgress {
    pub fn new(verbose: bool) -> Self {
        ConsoleProgress { verbose }
    }
}

impl Progress for ConsoleProgress {
    fn task_started(&mut self, graph: &BuildGraph, id: NodeId) {
        let part = graph.part(id);
        match &part.command {
            Some(cmd) if self.verbose => self.log(&format!("{}: {}", part.spec, cmd)),
            _ => self.log(&part.spec.to_string()),
        }
    }

    fn task_finished(&mut self, _graph: &BuildGraph, _id: NodeId, output: &str) {
        if !output.is_empty() {
            let _ = std::io::stdout().write_all(output.as_bytes());
            if !output.ends_with('\n') {
                println!();
            }
        }
    }

    fn task_failed(&mut self, graph: &BuildGraph, id: NodeId, err: &Error, recent: &[String]) {
        if matches!(err, Error::PartPull { .. }) {
            // Usually transient; make it hard to miss.
            self.log(&"*".repeat(72));
            self.log(&format!("pull failed: {}", graph.part(id).spec));
            self.log(&"*".repeat(72));
        } else {
            self.log(&format!("failed: {}", graph.part(id).spec));
        }
        self.log(&err.to_string());
        if !recent.is_empty() {
            self.log("recent activity:");
            for line in recent {
                self.log(&format!("  {}", line));
            }
        }
    }

    fn finish(&mut self, outcome: &Outcome) {
        let mut msg = format!("partbuild: {} of {} parts done", outcome.built, outcome.total);
        if !outcome.failures.is_empty() {
            msg.push_str(&format!(", {} failed", outcome.failures.len()));
        }
        self.log(&msg);
    }

    fn log(&mut self, msg: &str) {
        println!("{}", msg);
    }
}

/// Discards everything; for callers that only want the outcome.
pub struct NoProgress;

impl Progress for NoProgress {
    fn task_started(&mut self, _graph: &BuildGraph, _id: NodeId) {}
    fn task_finished(&mut self, _graph: &BuildGraph, _id: NodeId, _output: &str) {}
    fn task_failed(&mut self, _graph: &BuildGraph, _id: NodeId, _err: &Error, _recent: &[String]) {}
    fn finish(&mut self, _outcome: &Outcome) {}
    fn log(&mut self, _msg: &str) {}
}
