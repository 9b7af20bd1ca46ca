use std::{collections::BTreeMap, path::PathBuf, time::Duration};

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::daemon::config::TimerDefaults;

use super::{Keeper, KeeperError, TimerStatus};

const INBOX_SIZE: usize = 32;

type Reply<T> = oneshot::Sender<Result<T, KeeperError>>;

#[derive(Debug)]
pub enum KeeperMsg {
    Start { dir: PathBuf, reply: Reply<()> },
    Remove { dir: PathBuf, reply: Reply<()> },
    Pause { dir: PathBuf, reply: Reply<()> },
    Reset { dir: PathBuf, reply: Reply<()> },
    Lap { dir: PathBuf, reply: Reply<TimerStatus> },
    Status { dir: PathBuf, reply: Reply<TimerStatus> },
    Distribution {
        dir: PathBuf,
        reply: Reply<BTreeMap<String, Duration>>,
    },
    Save { reply: Reply<()> },
}

/// Cloneable access to the keeper owned by [run_keeper].
#[derive(Clone)]
pub struct KeeperHandle {
    sender: mpsc::Sender<KeeperMsg>,
}

impl KeeperHandle {
    async fn call<T>(&self, message: impl FnOnce(Reply<T>) -> KeeperMsg) -> Result<T, KeeperError> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(message(reply))
            .await
            .map_err(|_| KeeperError::Unavailable)?;
        response.await.map_err(|_| KeeperError::Unavailable)?
    }

    pub async fn start(&self, dir: PathBuf) -> Result<(), KeeperError> {
        self.call(|reply| KeeperMsg::Start { dir, reply }).await
    }

    pub async fn remove(&self, dir: PathBuf) -> Result<(), KeeperError> {
        self.call(|reply| KeeperMsg::Remove { dir, reply }).await
    }

    pub async fn pause(&self, dir: PathBuf) -> Result<(), KeeperError> {
        self.call(|reply| KeeperMsg::Pause { dir, reply }).await
    }

    pub async fn reset(&self, dir: PathBuf) -> Result<(), KeeperError> {
        self.call(|reply| KeeperMsg::Reset { dir, reply }).await
    }

    pub async fn lap(&self, dir: PathBuf) -> Result<TimerStatus, KeeperError> {
        self.call(|reply| KeeperMsg::Lap { dir, reply }).await
    }

    pub async fn status(&self, dir: PathBuf) -> Result<TimerStatus, KeeperError> {
        self.call(|reply| KeeperMsg::Status { dir, reply }).await
    }

    pub async fn distribution(
        &self,
        dir: PathBuf,
    ) -> Result<BTreeMap<String, Duration>, KeeperError> {
        self.call(|reply| KeeperMsg::Distribution { dir, reply })
            .await
    }

    pub async fn save(&self) -> Result<(), KeeperError> {
        self.call(|reply| KeeperMsg::Save { reply }).await
    }
}

pub fn keeper_channel() -> (KeeperHandle, mpsc::Receiver<KeeperMsg>) {
    let (sender, receiver) = mpsc::channel(INBOX_SIZE);
    (KeeperHandle { sender }, receiver)
}

/// Serves requests and snapshots the registry to the ledger every snapshot interval until
/// `stop` is cancelled. Timers are left running; the keeper is handed back so the caller can
/// shut them down.
pub async fn run_keeper(
    mut keeper: Keeper,
    defaults: TimerDefaults,
    mut inbox: mpsc::Receiver<KeeperMsg>,
    stop: CancellationToken,
) -> Keeper {
    info!(
        "Started time keeper, saving every {:?}",
        keeper.snapshot_interval()
    );
    let mut next_snapshot = keeper.clock().instant();

    loop {
        let clock = keeper.clock().clone();
        tokio::select! {
            _ = stop.cancelled() => break,
            message = inbox.recv() => match message {
                Some(message) => handle(&mut keeper, &defaults, message).await,
                None => break,
            },
            _ = clock.sleep_until(next_snapshot) => {
                if let Err(e) = keeper.save().await {
                    error!("Error while saving to ledger: {e}");
                } else {
                    debug!("Saved ledger");
                }
                next_snapshot += keeper.snapshot_interval();
            }
        }
    }

    info!("Stopped time keeper");
    keeper
}

async fn handle(keeper: &mut Keeper, defaults: &TimerDefaults, message: KeeperMsg) {
    match message {
        KeeperMsg::Start { dir, reply } => {
            let _ = reply.send(keeper.add(defaults.for_dir(dir)).await);
        }
        KeeperMsg::Remove { dir, reply } => {
            let _ = reply.send(keeper.remove(&dir).await);
        }
        KeeperMsg::Pause { dir, reply } => {
            let _ = reply.send(keeper.pause(&dir).await);
        }
        KeeperMsg::Reset { dir, reply } => {
            let result = match keeper.get_mut(&dir) {
                Ok(timer) => {
                    timer.reset().await;
                    Ok(())
                }
                Err(e) => Err(e),
            };
            let _ = reply.send(result);
        }
        KeeperMsg::Lap { dir, reply } => {
            let _ = reply.send(keeper.lap(&dir).await);
        }
        KeeperMsg::Status { dir, reply } => {
            let _ = reply.send(keeper.status(&dir).await);
        }
        KeeperMsg::Distribution { dir, reply } => {
            let result = match keeper.get(&dir) {
                Ok(timer) => Ok(timer.distribution().await),
                Err(e) => Err(e),
            };
            let _ = reply.send(result);
        }
        KeeperMsg::Save { reply } => {
            let _ = reply.send(keeper.save().await);
        }
    }
}
