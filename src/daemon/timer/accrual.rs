use std::{path::PathBuf, time::Duration};

use tokio::{
    sync::{mpsc, oneshot},
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    daemon::{distribution::Distributor, monitor::Wakeup},
    utils::clock::SharedClock,
};

/// Messages understood by the accrual loop. This loop is the only owner of a running timer's
/// clock, everything else has to ask.
#[derive(Debug)]
pub enum ClockCommand {
    Time(oneshot::Sender<Duration>),
    /// Replies with the elapsed time and zeroes it in one step.
    Lap(oneshot::Sender<Duration>),
    Reset,
    /// Restarts the current billing period without touching the elapsed time.
    Realign,
    Pause,
    Resume,
    Activity(Wakeup),
    Snapshot(oneshot::Sender<ClockState>),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClockState {
    pub elapsed: Duration,
    pub paused: bool,
    pub distributor: Distributor,
}

impl ClockState {
    pub fn reset(&mut self) {
        self.elapsed = Duration::ZERO;
        self.distributor = Distributor::new();
    }
}

/// Credits one MBU at the end of every period during which the timer was active at some point.
/// A pause never takes back a unit, and a unit is never split.
pub struct AccrualLoop {
    dir: PathBuf,
    mbu: Duration,
    state: ClockState,
    clock: SharedClock,
    commands: mpsc::Receiver<ClockCommand>,
    stop: CancellationToken,
    period_start: Instant,
    period_active: bool,
}

impl AccrualLoop {
    pub fn new(
        dir: PathBuf,
        mbu: Duration,
        state: ClockState,
        clock: SharedClock,
        commands: mpsc::Receiver<ClockCommand>,
        stop: CancellationToken,
    ) -> Self {
        let period_start = clock.instant();
        let period_active = !state.paused;
        Self {
            dir,
            mbu,
            state,
            clock,
            commands,
            stop,
            period_start,
            period_active,
        }
    }

    /// Runs until stopped and hands the final state back to the owner.
    pub async fn run(mut self) -> ClockState {
        loop {
            let next_tick = self.period_start + self.mbu;
            tokio::select! {
                _ = self.stop.cancelled() => break,
                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
                _ = self.clock.sleep_until(next_tick) => self.tick(next_tick),
            }
        }
        debug!("Accrual for project {:?} finished at {:?}", self.dir, self.state.elapsed);
        self.state
    }

    fn tick(&mut self, at: Instant) {
        if self.period_active {
            self.state.elapsed += self.mbu;
            debug!(
                "Credited {:?} to project {:?}, total {:?}",
                self.mbu, self.dir, self.state.elapsed
            );
        }
        self.period_start = at;
        self.period_active = !self.state.paused;
    }

    fn handle(&mut self, command: ClockCommand) {
        match command {
            ClockCommand::Time(reply) => {
                let _ = reply.send(self.state.elapsed);
            }
            ClockCommand::Lap(reply) => {
                let _ = reply.send(self.state.elapsed);
                self.state.reset();
                info!("Timer for project {:?} was lapped", self.dir);
            }
            ClockCommand::Reset => {
                self.state.reset();
                info!("Timer for project {:?} was reset explicitly", self.dir);
            }
            ClockCommand::Realign => {
                self.period_start = self.clock.instant();
                self.period_active = !self.state.paused;
                debug!("Billing period of project {:?} realigned", self.dir);
            }
            ClockCommand::Pause => self.pause(),
            ClockCommand::Resume => {
                self.resume();
            }
            ClockCommand::Activity(wakeup) => self.activity(wakeup),
            ClockCommand::Snapshot(reply) => {
                let _ = reply.send(self.state.clone());
            }
        }
    }

    fn pause(&mut self) {
        if !self.state.paused {
            info!("Timer for project {:?} paused", self.dir);
        }
        self.state.paused = true;
        // Pausing exactly on a period boundary means the new period never saw activity.
        if self.clock.instant() <= self.period_start {
            self.period_active = false;
        }
        self.state.distributor.r#break(self.clock.time());
    }

    fn resume(&mut self) -> bool {
        self.period_active = true;
        if self.state.paused {
            self.state.paused = false;
            true
        } else {
            false
        }
    }

    fn activity(&mut self, wakeup: Wakeup) {
        let file = wakeup
            .path
            .as_deref()
            .and_then(|path| path.strip_prefix(&self.dir).ok())
            .map(|path| path.to_string_lossy().into_owned())
            .unwrap_or_default();

        if self.resume() {
            info!(
                "Timer for project {:?} woke up after some activity in '{file}'",
                self.dir
            );
        } else {
            debug!(
                "Timer saw activity for project {:?} in '{file}' but is already unpaused",
                self.dir
            );
        }
        self.state.distributor.register(&file, self.clock.time());
    }
}
