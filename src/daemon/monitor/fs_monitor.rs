use std::{
    path::{Component, Path, PathBuf},
    time::{Duration, Instant},
};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::debug;

use super::{Monitor, MonitorError, MonitorFactory, MonitorStreams, Wakeup};

/// Creates [FsMonitor]s backed by the platform's recommended `notify` watcher.
#[derive(Default)]
pub struct FsMonitorFactory;

impl MonitorFactory for FsMonitorFactory {
    fn create(
        &self,
        dir: &Path,
        recursive: bool,
        latency: Duration,
    ) -> Result<Box<dyn Monitor>, MonitorError> {
        if !dir.is_dir() {
            return Err(MonitorError::NotADirectory(dir.to_path_buf()));
        }
        Ok(Box::new(FsMonitor::new(dir.to_path_buf(), recursive, latency)))
    }
}

pub struct FsMonitor {
    dir: PathBuf,
    recursive: bool,
    latency: Duration,
    watcher: Option<RecommendedWatcher>,
}

impl FsMonitor {
    pub fn new(dir: PathBuf, recursive: bool, latency: Duration) -> Self {
        Self {
            dir,
            recursive,
            latency,
            watcher: None,
        }
    }
}

impl Monitor for FsMonitor {
    fn start(&mut self) -> Result<MonitorStreams, MonitorError> {
        self.stop()?;

        let (wakeup_sender, wakeups) = mpsc::unbounded_channel();
        let (error_sender, errors) = mpsc::unbounded_channel();
        let mut debounce = Debounce::new(self.latency);
        let dir = self.dir.clone();

        let mut watcher = notify::recommended_watcher(move |event: notify::Result<Event>| {
            let event = match event {
                Ok(event) => event,
                Err(e) => {
                    let _ = error_sender.send(MonitorError::Notify(e));
                    return;
                }
            };
            if !is_activity(&event.kind) {
                return;
            }

            let Some(wakeup) = to_wakeup(&dir, event.paths) else {
                return;
            };
            if debounce.admit(&wakeup.path, Instant::now()) {
                // Receiver is gone once the timer stopped, nothing left to notify.
                let _ = wakeup_sender.send(wakeup);
            }
        })?;

        let mode = if self.recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        watcher.watch(&self.dir, mode)?;
        debug!("Watching {:?} ({mode:?})", self.dir);
        self.watcher = Some(watcher);

        Ok(MonitorStreams { wakeups, errors })
    }

    fn stop(&mut self) -> Result<(), MonitorError> {
        if let Some(mut watcher) = self.watcher.take() {
            watcher.unwatch(&self.dir)?;
            debug!("Stopped watching {:?}", self.dir);
        }
        Ok(())
    }
}

fn is_activity(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) | EventKind::Any
    )
}

/// Picks the first changed path outside of the repository metadata. Events that only touch
/// `.git` are dropped since committing shouldn't count as editing.
fn to_wakeup(dir: &Path, paths: Vec<PathBuf>) -> Option<Wakeup> {
    if paths.is_empty() {
        return Some(Wakeup::anywhere());
    }
    paths
        .into_iter()
        .find(|path| !is_vcs_internal(dir, path))
        .map(Wakeup::at)
}

fn is_vcs_internal(dir: &Path, path: &Path) -> bool {
    let relative = path.strip_prefix(dir).unwrap_or(path);
    relative
        .components()
        .any(|component| component == Component::Normal(".git".as_ref()))
}

/// Lets the first event through and swallows repeats of the same path within `latency`.
struct Debounce {
    latency: Duration,
    last: Option<(Instant, Option<PathBuf>)>,
}

impl Debounce {
    fn new(latency: Duration) -> Self {
        Self {
            latency,
            last: None,
        }
    }

    fn admit(&mut self, path: &Option<PathBuf>, now: Instant) -> bool {
        match &self.last {
            Some((at, last_path))
                if last_path == path && now.saturating_duration_since(*at) < self.latency =>
            {
                false
            }
            _ => {
                self.last = Some((now, path.clone()));
                true
            }
        }
    }
}
