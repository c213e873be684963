//! The source-control layer, as far as the build cares about it.

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

pub trait Repositories: Sync {
    /// Bring the named repository up to date.
    fn pull(&self, repo: &str) -> Result<String>;

    /// A string identifying the repository's current source state.
    fn provenance(&self, repo: &str) -> Result<String>;

    fn has_local_changes(&self, repo: &str) -> Result<bool>;
}

/// Repositories that are plain directories under a source root.  There is
/// nothing to pull; provenance is the content of a `REVISION` file, and
/// anything modified after that file counts as a local change.
pub struct LocalRepositories {
    root: PathBuf,
    /// The repository living directly at `root` rather than below it.
    main: String,
    /// Directories whose contents never count as local changes.
    ignored: Vec<PathBuf>,
}

const REVISION_FILE: &str = "REVISION";

impl LocalRepositories {
    pub fn new(root: impl Into<PathBuf>, main: impl Into<String>) -> Self {
        LocalRepositories {
            root: root.into(),
            main: main.into(),
            ignored: Vec::new(),
        }
    }

    /// Leave `dir` out of local change checks, typically the output root
    /// when it sits inside a repository.
    pub fn ignoring(mut self, dir: impl Into<PathBuf>) -> Self {
        self.ignored.push(dir.into());
        self
    }

    pub fn dir(&self, repo: &str) -> PathBuf {
        if repo == self.main {
            self.root.clone()
        } else {
            self.root.join(repo)
        }
    }

    fn existing_dir(&self, repo: &str) -> Result<PathBuf> {
        let dir = self.dir(repo);
        if !dir.is_dir() {
            return Err(Error::part_pull(
                repo,
                format!("repository directory {:?} not found", dir),
            ));
        }
        Ok(dir)
    }
}

fn newest_mtime(
    dir: &Path,
    skip: &Path,
    skip_dirs: &[PathBuf],
) -> std::io::Result<Option<SystemTime>> {
    let mut newest = None;
    let mut stack = vec![dir.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            let meta = entry.metadata()?;
            if meta.is_dir() {
                if !skip_dirs.contains(&path) {
                    stack.push(path);
                }
            } else if path != skip {
                let mtime = meta.modified()?;
                newest = newest.max(Some(mtime));
            }
        }
    }
    Ok(newest)
}

impl Repositories for LocalRepositories {
    fn pull(&self, repo: &str) -> Result<String> {
        let dir = self.existing_dir(repo)?;
        Ok(format!("{}: local repository at {}\n", repo, dir.display()))
    }

    fn provenance(&self, repo: &str) -> Result<String> {
        let dir = self.existing_dir(repo)?;
        match std::fs::read_to_string(dir.join(REVISION_FILE)) {
            Ok(rev) => Ok(rev.trim().to_string()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok("unversioned".into()),
            Err(err) => Err(err.into()),
        }
    }

    fn has_local_changes(&self, repo: &str) -> Result<bool> {
        // Canonical paths, so ignored directories compare equal however
        // they were spelled.
        let dir = self.existing_dir(repo)?.canonicalize()?;
        let rev = dir.join(REVISION_FILE);
        let recorded = match std::fs::metadata(&rev) {
            Ok(meta) => meta.modified()?,
            // Without a recorded revision everything is a local change.
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(true),
            Err(err) => return Err(err.into()),
        };
        let ignored: Vec<PathBuf> = self
            .ignored
            .iter()
            .filter_map(|dir| dir.canonicalize().ok())
            .collect();
        Ok(newest_mtime(&dir, &rev, &ignored)?.map_or(false, |newest| newest > recorded))
    }
}
