//! Runs build actions on worker threads, one thread per node.
//! Unaware of the graph; the caller decides what to start and when.

use crate::error::{Error, Result};
use crate::graph::NodeId;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::thread::Scope;
use std::time::{Duration, Instant};

pub struct FinishedTask {
    pub id: NodeId,
    pub span: (Instant, Instant),
    /// Buffered output on success.
    pub result: Result<String>,
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run `work`, turning a panic into a failure of the node named `key`.
pub fn run_guarded(key: &str, work: impl FnOnce() -> Result<String>) -> Result<String> {
    match panic::catch_unwind(AssertUnwindSafe(work)) {
        Ok(result) => result,
        Err(payload) => Err(Error::part_build(
            key,
            format!("panicked: {}", panic_message(payload.as_ref())),
        )),
    }
}

/// Spawns workers within a thread scope, so they may borrow the graph, and
/// collects their results.  At most `parallelism` run at once.
pub struct Runner<'scope, 'env: 'scope> {
    scope: &'scope Scope<'scope, 'env>,
    finished_send: mpsc::Sender<FinishedTask>,
    finished_recv: mpsc::Receiver<FinishedTask>,
    running: usize,
    parallelism: usize,
}

impl<'scope, 'env: 'scope> Runner<'scope, 'env> {
    pub fn new(scope: &'scope Scope<'scope, 'env>, parallelism: usize) -> Self {
        let (tx, rx) = mpsc::channel();
        Runner {
            scope,
            finished_send: tx,
            finished_recv: rx,
            running: 0,
            parallelism,
        }
    }

    pub fn can_start_more(&self) -> bool {
        self.running < self.parallelism
    }

    pub fn is_running(&self) -> bool {
        self.running > 0
    }

    pub fn running(&self) -> usize {
        self.running
    }

    pub fn start<F>(&mut self, id: NodeId, key: String, work: F)
    where
        F: FnOnce() -> Result<String> + Send + 'scope,
    {
        let tx = self.finished_send.clone();
        self.scope.spawn(move || {
            let start = Instant::now();
            let result = run_guarded(&key, work);
            let finish = Instant::now();
            // The send only fails if the receiver is gone, i.e. we're shutting down.
            let _ = tx.send(FinishedTask {
                id,
                span: (start, finish),
                result,
            });
        });
        self.running += 1;
    }

    /// Wait for a task to complete, with a timeout.
    /// If the timeout elapses return None.
    pub fn wait(&mut self, dur: Duration) -> Option<FinishedTask> {
        // We hold a sender ourselves, so the channel can't disconnect.
        let task = self.finished_recv.recv_timeout(dur).ok()?;
        self.running -= 1;
        Some(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panics_become_failures() {
        let err = run_guarded("lib*main*x64*dyn", || panic!("boom")).unwrap_err();
        assert!(matches!(&err, Error::PartBuild { part, .. } if part == "lib*main*x64*dyn"));
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn collects_results() {
        let data = vec![1, 2, 3];
        std::thread::scope(|scope| {
            let mut runner = Runner::new(scope, 2);
            for (i, n) in data.iter().enumerate().take(2) {
                runner.start(NodeId::from(i), format!("n{}", i), move || Ok(n.to_string()));
            }
            assert!(!runner.can_start_more());
            let mut outputs = Vec::new();
            while runner.is_running() {
                if let Some(task) = runner.wait(Duration::from_secs(5)) {
                    outputs.push(task.result.unwrap());
                }
            }
            outputs.sort();
            assert_eq!(outputs, vec!["1", "2"]);
        });
    }
}
