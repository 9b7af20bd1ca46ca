use std::{path::PathBuf, time::Duration};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{daemon::monitor::MonitorStreams, utils::clock::SharedClock};

use super::accrual::ClockCommand;

/// Turns monitor activity and the lack of it into pause/resume commands for the accrual loop.
pub struct ActivityLoop {
    dir: PathBuf,
    timeout: Duration,
    streams: MonitorStreams,
    clock: SharedClock,
    accrual: mpsc::Sender<ClockCommand>,
    stop: CancellationToken,
}

impl ActivityLoop {
    pub fn new(
        dir: PathBuf,
        timeout: Duration,
        streams: MonitorStreams,
        clock: SharedClock,
        accrual: mpsc::Sender<ClockCommand>,
        stop: CancellationToken,
    ) -> Self {
        Self {
            dir,
            timeout,
            streams,
            clock,
            accrual,
            stop,
        }
    }

    pub async fn run(mut self) {
        loop {
            let command = tokio::select! {
                _ = self.stop.cancelled() => {
                    info!("Timer for project {:?} was stopped explicitly", self.dir);
                    return;
                }
                Some(error) = self.streams.errors.recv() => {
                    warn!("Monitor error for project {:?}: {error}", self.dir);
                    continue;
                }
                _ = self.clock.sleep(self.timeout) => {
                    debug!("Timer for project {:?} timed out after {:?}", self.dir, self.timeout);
                    ClockCommand::Pause
                }
                Some(wakeup) = self.streams.wakeups.recv() => ClockCommand::Activity(wakeup),
            };

            let delivered = tokio::select! {
                _ = self.stop.cancelled() => return,
                sent = self.accrual.send(command) => sent.is_ok(),
            };
            if !delivered {
                debug!("Accrual loop of project {:?} is gone", self.dir);
                return;
            }
        }
    }
}
