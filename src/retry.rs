//! Re-running failed passes, on request.

use crate::action::BuildAction;
use crate::buildgraph::BuildGraph;
use crate::error::Result;
use crate::progress::Progress;
use crate::sched::LeafScheduler;
use crate::work::{Executor, Outcome, DEFAULT_STALL_TIMEOUT};
use std::io::{BufRead, Write};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Choice {
    Retry,
    /// Clean the failed parts, then retry.
    CleanRetry,
    Abort,
}

/// Decides what to do after a failure.
pub trait Prompter {
    /// `failed` holds the keys of the parts that failed.
    fn ask(&mut self, failed: &[String]) -> Choice;
}

/// Asks on the terminal.
pub struct ConsolePrompter<R> {
    input: R,
}

impl ConsolePrompter<std::io::StdinLock<'static>> {
    pub fn stdin() -> Self {
        ConsolePrompter {
            input: std::io::stdin().lock(),
        }
    }
}

impl<R: BufRead> ConsolePrompter<R> {
    pub fn new(input: R) -> Self {
        ConsolePrompter { input }
    }
}

impl<R: BufRead> Prompter for ConsolePrompter<R> {
    fn ask(&mut self, failed: &[String]) -> Choice {
        loop {
            print!(
                "{} failed. [r]etry, [c]lean and retry, or [a]bort? ",
                failed.join(", ")
            );
            let _ = std::io::stdout().flush();
            let mut line = String::new();
            match self.input.read_line(&mut line) {
                // No way to ask on a closed input.
                Ok(0) | Err(_) => return Choice::Abort,
                Ok(_) => {}
            }
            match line.trim().to_ascii_lowercase().as_str() {
                "r" | "retry" => return Choice::Retry,
                "c" | "clean" => return Choice::CleanRetry,
                "a" | "abort" => return Choice::Abort,
                _ => continue,
            }
        }
    }
}

/// Runs passes of an action until one succeeds or the prompter gives up.
pub struct RetryController<'a> {
    graph: &'a BuildGraph,
    action: &'a dyn BuildAction,
    progress: &'a mut dyn Progress,
    prompter: &'a mut dyn Prompter,
    stall_timeout: Duration,
}

impl<'a> RetryController<'a> {
    pub fn new(
        graph: &'a BuildGraph,
        action: &'a dyn BuildAction,
        progress: &'a mut dyn Progress,
        prompter: &'a mut dyn Prompter,
    ) -> Self {
        RetryController {
            graph,
            action,
            progress,
            prompter,
            stall_timeout: DEFAULT_STALL_TIMEOUT,
        }
    }

    pub fn stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout = timeout;
        self
    }

    /// Build until done.  Whatever happens, per-pass failure flags are
    /// cleared afterwards so `sched` can serve another action.
    pub fn run(&mut self, sched: &mut LeafScheduler) -> Result<Outcome> {
        let result = self.passes(sched);
        sched.reset_failures();
        result
    }

    fn passes(&mut self, sched: &mut LeafScheduler) -> Result<Outcome> {
        let prompt = self.action.prompt_on_error();
        // Without threads the executor asks about each failure as it happens.
        let inline = self.action.num_threads() == 0;
        loop {
            let mut exec = Executor::new(self.graph, self.action, sched, &mut *self.progress)
                .stall_timeout(self.stall_timeout);
            if prompt && inline {
                exec = exec.prompter(&mut *self.prompter);
            }
            let outcome = exec.build()?;

            if outcome.success()
                || !prompt
                || inline
                || outcome.failures.iter().any(|err| !err.is_retryable())
            {
                return Ok(outcome);
            }

            let failed: Vec<_> = self
                .graph
                .graph
                .all_nodes()
                .filter(|&id| sched.state(id).failed)
                .collect();
            let keys: Vec<String> = failed
                .iter()
                .map(|&id| self.graph.key(id).to_string())
                .collect();
            match self.prompter.ask(&keys) {
                Choice::Abort => return Ok(outcome),
                Choice::Retry => info!("retrying {}", keys.join(", ")),
                Choice::CleanRetry => {
                    info!("cleaning and retrying {}", keys.join(", "));
                    for &id in &failed {
                        self.action.clean_node(self.graph, id)?;
                    }
                }
            }
            sched.reset_failures();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn console_choices() {
        let mut p = ConsolePrompter::new("x\nc\n".as_bytes());
        assert_eq!(p.ask(&["lib".into()]), Choice::CleanRetry);
        let mut p = ConsolePrompter::new("retry\n".as_bytes());
        assert_eq!(p.ask(&["lib".into()]), Choice::Retry);
        let mut p = ConsolePrompter::new("".as_bytes());
        assert_eq!(p.ask(&["lib".into()]), Choice::Abort);
    }
}
