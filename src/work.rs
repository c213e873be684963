//! Build runner, choosing and executing parts as their dependencies finish.

use crate::action::BuildAction;
use crate::buildgraph::BuildGraph;
use crate::error::{Error, Result};
use crate::graph::NodeId;
use crate::progress::Progress;
use crate::retry::{Choice, Prompter};
use crate::sched::{LeafScheduler, Processed};
use crate::task::{run_guarded, FinishedTask, Runner};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, info_span, warn};

/// How many scheduling events are kept to show alongside a failure.
pub const HISTORY_LEN: usize = 10;

pub const DEFAULT_STALL_TIMEOUT: Duration = Duration::from_secs(5);

/// How often to mention that we're waiting on long-running work.
const WAIT_LOG_INTERVAL: Duration = Duration::from_secs(10);

/// The result of one pass over the graph.
#[derive(Debug, Default)]
pub struct Outcome {
    /// Nodes built successfully in this pass.
    pub built: usize,
    /// Nodes the pass set out to build.
    pub total: usize,
    pub failures: Vec<Error>,
}

impl Outcome {
    pub fn success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Fail if the graph below the root contains a cycle.  The scheduler
/// would otherwise wait forever on it.
pub fn check_for_circular(graph: &BuildGraph) -> Result<()> {
    match graph.graph.find_cycle(graph.root) {
        None => Ok(()),
        Some((parent, child)) => Err(Error::Cycle {
            parent: graph.key(parent).to_string(),
            child: graph.key(child).to_string(),
        }),
    }
}

/// Runs one pass of a BuildAction over a graph.  Scheduling state is kept in
/// the LeafScheduler, so a later pass picks up where this one left off.
pub struct Executor<'a> {
    graph: &'a BuildGraph,
    action: &'a dyn BuildAction,
    sched: &'a mut LeafScheduler,
    progress: &'a mut dyn Progress,
    /// Asked what to do about a failure when running without threads.
    prompter: Option<&'a mut dyn Prompter>,
    stall_timeout: Duration,
    history: VecDeque<String>,
}

impl<'a> Executor<'a> {
    pub fn new(
        graph: &'a BuildGraph,
        action: &'a dyn BuildAction,
        sched: &'a mut LeafScheduler,
        progress: &'a mut dyn Progress,
    ) -> Self {
        Executor {
            graph,
            action,
            sched,
            progress,
            prompter: None,
            stall_timeout: DEFAULT_STALL_TIMEOUT,
            history: VecDeque::with_capacity(HISTORY_LEN),
        }
    }

    pub fn stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout = timeout;
        self
    }

    pub fn prompter(mut self, prompter: &'a mut dyn Prompter) -> Self {
        self.prompter = Some(prompter);
        self
    }

    /// Run a full pass.  Per-node failures are collected in the Outcome;
    /// an Err means the pass couldn't run at all.
    pub fn build(mut self) -> Result<Outcome> {
        let graph = self.graph;
        let _span = info_span!("execute", nodes = graph.len()).entered();
        check_for_circular(graph)?;
        self.action.do_before_action(graph)?;

        self.sched.fill(graph);
        let filtered = self.action.filter_parts(graph);
        if !filtered.is_empty() {
            for &id in &filtered {
                self.sched.mark_filtered(id);
            }
            self.sched.reconcile_filtered(graph);
            debug!(filtered = filtered.len(), "filtered parts");
        }
        let total = self.sched.pending(graph);

        let outcome = match self.action.num_threads() {
            0 => self.run_sequential(total),
            threads => self.run_concurrent(threads, total)?,
        };
        self.progress.finish(&outcome);
        self.action.do_after_action(graph, &outcome)?;
        Ok(outcome)
    }

    fn remember(&mut self, event: String) {
        if self.history.len() == HISTORY_LEN {
            self.history.pop_front();
        }
        self.history.push_back(event);
    }

    fn started(&mut self, id: NodeId) {
        self.remember(format!("started {}", self.graph.key(id)));
        self.progress.task_started(self.graph, id);
    }

    fn succeeded(&mut self, id: NodeId, output: &str, outcome: &mut Outcome) {
        let state = self.sched.state_mut(id);
        state.processed = Processed::Done;
        state.finished = true;
        self.sched.notify_built(self.graph, id);
        outcome.built += 1;
        self.remember(format!("finished {}", self.graph.key(id)));
        self.progress.task_finished(self.graph, id, output);
    }

    fn report_failure(&mut self, id: NodeId, err: &Error) {
        self.remember(format!("failed {}", self.graph.key(id)));
        let recent: Vec<String> = self.history.iter().cloned().collect();
        self.progress.task_failed(self.graph, id, err, &recent);
    }

    /// Record a failure.  Returns true if no further nodes should start.
    fn record_failure(&mut self, id: NodeId, err: Error, outcome: &mut Outcome) -> bool {
        let state = self.sched.state_mut(id);
        state.finished = true;
        state.failed = true;
        let stop = !(self.action.ignore_errors() && err.is_retryable());
        outcome.failures.push(err);
        stop
    }

    fn finish(&mut self, task: FinishedTask, outcome: &mut Outcome) -> bool {
        debug!(
            part = self.graph.key(task.id),
            elapsed = ?task.span.1.duration_since(task.span.0),
            ok = task.result.is_ok(),
            "task done"
        );
        match task.result {
            Ok(output) => {
                self.succeeded(task.id, &output, outcome);
                false
            }
            Err(err) => {
                self.report_failure(task.id, &err);
                self.record_failure(task.id, err, outcome)
            }
        }
    }

    fn run_concurrent(&mut self, threads: usize, total: usize) -> Result<Outcome> {
        let graph = self.graph;
        let action = self.action;
        let pause = action.pause_duration();
        let mut outcome = Outcome {
            total,
            ..Default::default()
        };

        std::thread::scope(|scope| {
            let mut runner = Runner::new(scope, threads);
            let mut stop = false;
            let mut idle_since: Option<Instant> = None;
            let mut last_wait_log = Instant::now();

            loop {
                while !stop && runner.can_start_more() {
                    let Some(id) = self.sched.get_next() else {
                        break;
                    };
                    self.started(id);
                    runner.start(id, graph.key(id).to_string(), move || {
                        action.do_build_action(graph, id)
                    });
                }

                if !runner.is_running() {
                    if stop || outcome.built == total {
                        break;
                    }
                    if self.sched.size() > 0 {
                        continue;
                    }
                    if !outcome.failures.is_empty() {
                        // Everything left depends on something that failed.
                        break;
                    }
                    let since = *idle_since.get_or_insert_with(Instant::now);
                    if since.elapsed() >= self.stall_timeout {
                        return Err(Error::Stalled {
                            executed: outcome.built,
                            total,
                        });
                    }
                    warn!(
                        "stalled: {} of {} done, nothing running or ready",
                        outcome.built, total
                    );
                    std::thread::sleep(pause);
                    continue;
                }
                idle_since = None;

                match runner.wait(pause) {
                    Some(task) => {
                        if self.finish(task, &mut outcome) {
                            stop = true;
                        }
                    }
                    None => {
                        if self.sched.size() == 0 && last_wait_log.elapsed() >= WAIT_LOG_INTERVAL {
                            debug!("waiting on {} running parts", runner.running());
                            last_wait_log = Instant::now();
                        }
                    }
                }
            }
            Ok(outcome)
        })
    }

    /// Depth-first on the calling thread: children, then the node itself.
    fn run_sequential(&mut self, total: usize) -> Outcome {
        let graph = self.graph;
        let action = self.action;
        let mut outcome = Outcome {
            total,
            ..Default::default()
        };
        for id in graph.graph.depth_first(graph.root) {
            if self.sched.state(id).processed != Processed::Pending {
                continue;
            }
            let blocked = graph
                .graph
                .children(id)
                .iter()
                .any(|&child| self.sched.state(child).processed == Processed::Pending);
            if blocked {
                // A dependency failed and errors are being ignored.
                continue;
            }

            loop {
                self.started(id);
                let err = match run_guarded(graph.key(id), || action.do_build_action(graph, id)) {
                    Ok(output) => {
                        self.succeeded(id, &output, &mut outcome);
                        break;
                    }
                    Err(err) => err,
                };
                self.report_failure(id, &err);
                let choice = match self.prompter.as_deref_mut() {
                    Some(prompter) if err.is_retryable() => {
                        prompter.ask(&[graph.key(id).to_string()])
                    }
                    _ => Choice::Abort,
                };
                match choice {
                    Choice::Retry => continue,
                    Choice::CleanRetry => match action.clean_node(graph, id) {
                        Ok(()) => continue,
                        Err(clean_err) => warn!("cleaning {}: {}", graph.key(id), clean_err),
                    },
                    Choice::Abort => {}
                }
                if self.record_failure(id, err, &mut outcome) {
                    return outcome;
                }
                break;
            }
        }
        outcome
    }
}
