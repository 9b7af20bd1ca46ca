//! Filesystem activity sources for timers. A timer doesn't care how changes are detected, it
//! only consumes the wakeup and error streams a [Monitor] hands out when started.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use thiserror::Error;
use tokio::sync::mpsc;

pub mod fs_monitor;

#[cfg(test)]
pub mod fake;

pub use fs_monitor::FsMonitorFactory;

/// Activity detected inside a watched directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wakeup {
    /// Path that changed, when the backend could tell.
    pub path: Option<PathBuf>,
}

impl Wakeup {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    pub fn anywhere() -> Self {
        Self { path: None }
    }
}

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("'{0}' is not a directory")]
    NotADirectory(PathBuf),
    #[error("file watcher failed: {0}")]
    Notify(#[from] notify::Error),
    #[error("{0}")]
    Backend(String),
}

/// Receivers handed out by [Monitor::start]. Both streams close once the monitor stops.
#[derive(Debug)]
pub struct MonitorStreams {
    pub wakeups: mpsc::UnboundedReceiver<Wakeup>,
    pub errors: mpsc::UnboundedReceiver<MonitorError>,
}

#[cfg_attr(test, mockall::automock)]
pub trait Monitor: Send + Sync {
    /// Starts watching. Starting a running monitor restarts it with fresh streams.
    fn start(&mut self) -> Result<MonitorStreams, MonitorError>;

    /// Stops watching. Stopping a stopped monitor does nothing.
    fn stop(&mut self) -> Result<(), MonitorError>;
}

#[cfg_attr(test, mockall::automock)]
pub trait MonitorFactory: Send + Sync {
    fn create(
        &self,
        dir: &Path,
        recursive: bool,
        latency: Duration,
    ) -> Result<Box<dyn Monitor>, MonitorError>;
}

pub type SharedMonitorFactory = Arc<dyn MonitorFactory>;
