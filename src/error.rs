//! Errors raised while assembling, validating and executing a part graph.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A fatal, user-actionable condition; always aborts the current pass.
    #[error("{0}")]
    Build(String),

    /// A failure attributable to one node's build step.
    #[error("{part}: {message}")]
    PartBuild { part: String, message: String },

    /// A failure fetching source for one node.
    #[error("pull failed for {part}: {message}")]
    PartPull { part: String, message: String },

    #[error("circular dependency: {parent} depends on {child}, which already depends on {parent}")]
    Cycle { parent: String, child: String },

    #[error("duplicate subpart {child} in {parent}")]
    DuplicateSubPart { parent: String, child: String },

    #[error("no parts matched the current strategy and platform")]
    EmptyGraph,

    /// Nothing is running and nothing is ready but work remains.  Only
    /// reachable through a scheduler bug.
    #[error("scheduler stalled: {executed} of {total} nodes done, none running or ready")]
    Stalled { executed: usize, total: usize },

    #[error("{path}: {message}")]
    Manifest { path: String, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn build(message: impl Into<String>) -> Self {
        Error::Build(message.into())
    }

    pub fn part_build(part: impl Into<String>, message: impl Into<String>) -> Self {
        Error::PartBuild {
            part: part.into(),
            message: message.into(),
        }
    }

    pub fn part_pull(part: impl Into<String>, message: impl Into<String>) -> Self {
        Error::PartPull {
            part: part.into(),
            message: message.into(),
        }
    }

    /// Per-node failures may be retried; everything else aborts.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::PartBuild { .. } | Error::PartPull { .. })
    }

    /// The node a failure is attributed to, if any.
    pub fn part(&self) -> Option<&str> {
        match self {
            Error::PartBuild { part, .. } | Error::PartPull { part, .. } => Some(part),
            _ => None,
        }
    }
}
