//! Version control sync. A lap hands the lapped total to the repository so it's attached to the
//! current commit, and push/pull move that data between clones.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use async_trait::async_trait;
use thiserror::Error;

pub mod git;

pub use git::Git;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Remote '{0}' has no time data yet")]
    NoRemoteData(String),
    #[error("There is no local time data to push yet")]
    NoLocalData,
    #[error("git {args} failed: {message}")]
    Git { args: String, message: String },
    #[error("Failed to run git: {0}")]
    Spawn(#[from] std::io::Error),
}

impl SyncError {
    /// Absent data is an empty state, not a failure.
    pub fn is_absent(&self) -> bool {
        matches!(self, SyncError::NoRemoteData(_) | SyncError::NoLocalData)
    }
}

#[async_trait]
pub trait Vcs: Send + Sync {
    fn name(&self) -> &'static str;

    fn default_remote(&self) -> &'static str;

    fn is_available(&self) -> bool;

    /// Attaches `total` to the current position in history.
    async fn persist(&self, total: Duration) -> Result<(), SyncError>;

    /// The total attached to the current position in history, if any.
    async fn total(&self) -> Result<Option<Duration>, SyncError>;

    async fn fetch(&self, remote: &str) -> Result<(), SyncError>;

    async fn push(&self, remote: &str) -> Result<(), SyncError>;
}

/// Nearest ancestor of `start` (itself included) holding a `.git` entry, or `start` when there's
/// none.
pub fn project_root(start: &Path) -> PathBuf {
    start
        .ancestors()
        .find(|dir| dir.join(".git").exists())
        .unwrap_or(start)
        .to_path_buf()
}

/// Version control of `dir`, if it has any.
pub fn detect(dir: &Path) -> Option<Box<dyn Vcs>> {
    let git = Git::new(dir);
    git.is_available().then(|| Box::new(git) as Box<dyn Vcs>)
}
