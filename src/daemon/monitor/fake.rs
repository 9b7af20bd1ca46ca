//! Channel backed monitors for driving timers from tests.

use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};

use tokio::sync::mpsc;

use super::{Monitor, MonitorError, MonitorFactory, MonitorStreams, Wakeup};

#[derive(Default)]
struct Registry {
    running: HashMap<PathBuf, Senders>,
    refused: HashSet<PathBuf>,
    starts: HashMap<PathBuf, usize>,
    stops: HashMap<PathBuf, usize>,
}

struct Senders {
    wakeups: mpsc::UnboundedSender<Wakeup>,
    errors: mpsc::UnboundedSender<MonitorError>,
}

#[derive(Clone, Default)]
pub struct FakeMonitorFactory {
    registry: Arc<Mutex<Registry>>,
}

impl FakeMonitorFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes monitor creation fail for `dir`, as if the directory was gone.
    pub fn refuse(&self, dir: impl Into<PathBuf>) {
        self.registry.lock().unwrap().refused.insert(dir.into());
    }

    /// Sends a wakeup to the running monitor of `dir`. Returns false when nothing listens.
    pub fn wake(&self, dir: &Path, path: Option<&str>) -> bool {
        let registry = self.registry.lock().unwrap();
        let Some(senders) = registry.running.get(dir) else {
            return false;
        };
        let wakeup = match path {
            Some(path) => Wakeup::at(dir.join(path)),
            None => Wakeup::anywhere(),
        };
        senders.wakeups.send(wakeup).is_ok()
    }

    pub fn fail(&self, dir: &Path, message: &str) -> bool {
        let registry = self.registry.lock().unwrap();
        registry
            .running
            .get(dir)
            .is_some_and(|senders| senders.errors.send(MonitorError::Backend(message.into())).is_ok())
    }

    pub fn is_running(&self, dir: &Path) -> bool {
        self.registry.lock().unwrap().running.contains_key(dir)
    }

    pub fn starts(&self, dir: &Path) -> usize {
        self.registry.lock().unwrap().starts.get(dir).copied().unwrap_or(0)
    }

    pub fn stops(&self, dir: &Path) -> usize {
        self.registry.lock().unwrap().stops.get(dir).copied().unwrap_or(0)
    }
}

impl MonitorFactory for FakeMonitorFactory {
    fn create(
        &self,
        dir: &Path,
        _recursive: bool,
        _latency: Duration,
    ) -> Result<Box<dyn Monitor>, MonitorError> {
        if self.registry.lock().unwrap().refused.contains(dir) {
            return Err(MonitorError::NotADirectory(dir.to_path_buf()));
        }
        Ok(Box::new(FakeMonitor {
            dir: dir.to_path_buf(),
            registry: self.registry.clone(),
        }))
    }
}

struct FakeMonitor {
    dir: PathBuf,
    registry: Arc<Mutex<Registry>>,
}

impl Monitor for FakeMonitor {
    fn start(&mut self) -> Result<MonitorStreams, MonitorError> {
        let (wakeup_sender, wakeups) = mpsc::unbounded_channel();
        let (error_sender, errors) = mpsc::unbounded_channel();
        let mut registry = self.registry.lock().unwrap();
        registry.running.insert(
            self.dir.clone(),
            Senders {
                wakeups: wakeup_sender,
                errors: error_sender,
            },
        );
        *registry.starts.entry(self.dir.clone()).or_default() += 1;
        Ok(MonitorStreams { wakeups, errors })
    }

    fn stop(&mut self) -> Result<(), MonitorError> {
        let mut registry = self.registry.lock().unwrap();
        if registry.running.remove(&self.dir).is_some() {
            *registry.stops.entry(self.dir.clone()).or_default() += 1;
        }
        Ok(())
    }
}
