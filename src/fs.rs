//! File system access needed to key the graph cache: modification times.
//! Indirected as a trait so tests can run against memory.

use std::path::Path;
use std::time::UNIX_EPOCH;

/// MTime info gathered for a file.  This also models "file is absent".
/// It's not using an Option<> just because it makes the code using it easier
/// to follow.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum MTime {
    #[default]
    Missing,
    /// Nanoseconds since the unix epoch.
    Stamp(u64),
}

pub trait FileSystem: Sync {
    /// stat() an on-disk path, producing its MTime.
    fn stat(&self, path: &Path) -> std::io::Result<MTime>;
}

#[derive(Default)]
pub struct RealFileSystem {}

impl RealFileSystem {
    pub fn new() -> Self {
        RealFileSystem {}
    }
}

impl FileSystem for RealFileSystem {
    fn stat(&self, path: &Path) -> std::io::Result<MTime> {
        let meta = match std::fs::metadata(path) {
            Ok(meta) => meta,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(MTime::Missing),
            Err(err) => return Err(err),
        };
        let since_epoch = meta
            .modified()?
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        // Zero is reserved for "missing" in the on-disk snapshot.
        Ok(MTime::Stamp((since_epoch.as_nanos() as u64).max(1)))
    }
}
