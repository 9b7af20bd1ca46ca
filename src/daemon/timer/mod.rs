//! Per project timers. A running timer is made of two tasks:
//!  - [accrual::AccrualLoop] owns the elapsed time, the paused flag and the file distribution,
//!    and credits one minimal billable unit (MBU) per period.
//!  - [activity::ActivityLoop] watches the monitor streams, pausing the timer after a period of
//!    inactivity and resuming it on the next change.
//!
//! [Timer] itself is a handle that routes requests to the accrual loop, and holds the state while
//! nothing is running.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    time::Duration,
};

use accrual::{AccrualLoop, ClockCommand, ClockState};
use activity::ActivityLoop;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    daemon::{
        config::{DEFAULT_MBU, DEFAULT_TIMEOUT},
        distribution::Distributor,
        monitor::{Monitor, MonitorError, MonitorFactory},
    },
    utils::{clock::SharedClock, duration::serde_human},
};

pub mod accrual;
pub mod activity;

const COMMAND_BUFFER: usize = 16;

#[derive(Debug, Error)]
pub enum TimerError {
    #[error("Failed to create monitor for directory '{dir}': {source}")]
    MonitorInit {
        dir: PathBuf,
        #[source]
        source: MonitorError,
    },
    #[error("Failed to start monitor for directory '{dir}': {source}")]
    MonitorStart {
        dir: PathBuf,
        #[source]
        source: MonitorError,
    },
    #[error("Failed to stop monitor for directory '{dir}': {source}")]
    MonitorStop {
        dir: PathBuf,
        #[source]
        source: MonitorError,
    },
}

/// Configuration of a single project timer.
#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
pub struct TimerSettings {
    pub dir: PathBuf,
    /// Debounce latency passed to the monitor.
    #[serde(with = "serde_human")]
    pub latency: Duration,
    /// Inactivity after which the timer pauses.
    #[serde(with = "serde_human")]
    pub timeout: Duration,
    /// Minimal billable unit.
    #[serde(with = "serde_human")]
    pub mbu: Duration,
}

impl TimerSettings {
    /// A zero unit or timeout would make the loops spin; those fall back to the defaults.
    pub fn sanitized(mut self) -> Self {
        if self.mbu.is_zero() {
            warn!("Zero MBU for {:?}, using {DEFAULT_MBU:?}", self.dir);
            self.mbu = DEFAULT_MBU;
        }
        if self.timeout.is_zero() {
            warn!("Zero timeout for {:?}, using {DEFAULT_TIMEOUT:?}", self.dir);
            self.timeout = DEFAULT_TIMEOUT;
        }
        self
    }
}

/// Persisted form of a timer.
#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
pub struct TimerSnapshot {
    pub paused: bool,
    #[serde(flatten)]
    pub settings: TimerSettings,
    #[serde(with = "serde_human")]
    pub time: Duration,
    #[serde(default)]
    pub distribution: Distributor,
}

struct Running {
    monitor: Box<dyn Monitor>,
    commands: mpsc::Sender<ClockCommand>,
    stop: CancellationToken,
    accrual: JoinHandle<ClockState>,
    activity: JoinHandle<()>,
}

pub struct Timer {
    settings: TimerSettings,
    /// Authoritative only while the timer isn't running.
    state: ClockState,
    clock: SharedClock,
    running: Option<Running>,
}

impl Timer {
    pub fn new(settings: TimerSettings, clock: SharedClock) -> Self {
        Self {
            settings: settings.sanitized(),
            state: ClockState::default(),
            clock,
            running: None,
        }
    }

    /// Restores a timer from the ledger. A snapshot taken while a file was being worked on still
    /// has that edge open; it is sealed where the snapshot left it so the downtime isn't credited
    /// to the file.
    pub fn from_snapshot(snapshot: TimerSnapshot, clock: SharedClock) -> Self {
        let mut distributor = snapshot.distribution;
        distributor.seal();
        Self {
            settings: snapshot.settings.sanitized(),
            state: ClockState {
                elapsed: snapshot.time,
                paused: snapshot.paused,
                distributor,
            },
            clock,
            running: None,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.settings.dir
    }

    pub fn settings(&self) -> &TimerSettings {
        &self.settings
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Starts watching the project and accruing time. Starting a running timer only restarts
    /// the current billing period.
    pub fn start(&mut self, monitors: &dyn MonitorFactory) -> Result<(), TimerError> {
        if let Some(running) = &self.running {
            if running.commands.try_send(ClockCommand::Realign).is_err() {
                error!("Couldn't realign timer for project {:?}", self.dir());
            }
            return Ok(());
        }

        let dir = self.settings.dir.clone();
        let mut monitor = monitors
            .create(&dir, true, self.settings.latency)
            .map_err(|source| TimerError::MonitorInit {
                dir: dir.clone(),
                source,
            })?;
        let streams = monitor.start().map_err(|source| TimerError::MonitorStart {
            dir: dir.clone(),
            source,
        })?;

        info!("Timer for project {dir:?} was started (and unpaused)");
        self.state.paused = false;

        let stop = CancellationToken::new();
        let (commands, receiver) = mpsc::channel(COMMAND_BUFFER);
        let accrual = AccrualLoop::new(
            dir.clone(),
            self.settings.mbu,
            self.state.clone(),
            self.clock.clone(),
            receiver,
            stop.clone(),
        );
        let activity = ActivityLoop::new(
            dir,
            self.settings.timeout,
            streams,
            self.clock.clone(),
            commands.clone(),
            stop.clone(),
        );

        self.running = Some(Running {
            monitor,
            commands,
            stop,
            accrual: tokio::spawn(accrual.run()),
            activity: tokio::spawn(activity.run()),
        });
        Ok(())
    }

    /// Stops both loops and the monitor, leaving the timer paused. The timer keeps its time.
    pub async fn stop(&mut self) -> Result<(), TimerError> {
        self.quiesce(true).await
    }

    /// Same as [Timer::stop] but keeps the paused flag, so a timer that was active is restarted
    /// when the daemon comes back.
    pub async fn halt(&mut self) -> Result<(), TimerError> {
        self.quiesce(false).await
    }

    async fn quiesce(&mut self, pause: bool) -> Result<(), TimerError> {
        let Some(mut running) = self.running.take() else {
            self.state.paused |= pause;
            return Ok(());
        };

        running.stop.cancel();
        if let Err(e) = running.activity.await {
            error!("Activity loop of project {:?} failed {e:?}", self.dir());
        }
        match running.accrual.await {
            Ok(state) => self.state = state,
            Err(e) => error!("Accrual loop of project {:?} failed {e:?}", self.dir()),
        }
        self.state.distributor.r#break(self.clock.time());
        self.state.paused |= pause;

        running
            .monitor
            .stop()
            .map_err(|source| TimerError::MonitorStop {
                dir: self.settings.dir.clone(),
                source,
            })
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> ClockCommand) -> Option<T> {
        let running = self.running.as_ref()?;
        let (sender, receiver) = oneshot::channel();
        running.commands.send(command(sender)).await.ok()?;
        receiver.await.ok()
    }

    async fn notify(&self, command: ClockCommand) -> bool {
        match &self.running {
            Some(running) => running.commands.send(command).await.is_ok(),
            None => false,
        }
    }

    pub async fn time(&self) -> Duration {
        self.request(ClockCommand::Time)
            .await
            .unwrap_or(self.state.elapsed)
    }

    pub async fn is_paused(&self) -> bool {
        self.current_state().await.paused
    }

    pub async fn reset(&mut self) {
        if !self.notify(ClockCommand::Reset).await {
            self.state.reset();
        }
    }

    /// Returns the elapsed time and zeroes it.
    pub async fn lap(&mut self) -> Duration {
        match self.request(ClockCommand::Lap).await {
            Some(elapsed) => elapsed,
            None => {
                let elapsed = self.state.elapsed;
                self.state.reset();
                elapsed
            }
        }
    }

    /// Clears the paused flag of a running timer without touching its monitor.
    pub async fn unpause(&mut self) {
        if !self.notify(ClockCommand::Resume).await {
            self.state.paused = false;
        }
    }

    pub async fn distribution(&self) -> BTreeMap<String, Duration> {
        self.current_state().await.distributor.lengths()
    }

    pub async fn snapshot(&self) -> TimerSnapshot {
        let state = self.current_state().await;
        TimerSnapshot {
            paused: state.paused,
            settings: self.settings.clone(),
            time: state.elapsed,
            distribution: state.distributor,
        }
    }

    async fn current_state(&self) -> ClockState {
        match self.request(ClockCommand::Snapshot).await {
            Some(state) => state,
            None => self.state.clone(),
        }
    }
}
