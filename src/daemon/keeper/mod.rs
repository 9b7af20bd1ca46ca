//! The keeper is the registry of every project timer, keyed by project directory. It is the only
//! place timers are created or dropped, and it owns their persistence:
//!   - [Keeper::load] recovers timers from the [ledger::Ledger] on boot and restarts the ones that
//!     weren't paused.
//!   - [service::run_keeper] snapshots the registry to the ledger periodically while serving
//!     requests coming through a [service::KeeperHandle].
//!   - [Keeper::shutdown] quiesces every timer and writes the final snapshot.

use std::{
    collections::{BTreeMap, HashMap},
    path::{Path, PathBuf},
    time::Duration,
};

use futures::future::join_all;
use ledger::{Ledger, LedgerError, LedgerFile};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::{
    daemon::{
        config::DEFAULT_SNAPSHOT_INTERVAL,
        monitor::SharedMonitorFactory,
        timer::{Timer, TimerError, TimerSettings},
    },
    utils::clock::SharedClock,
};

pub mod ledger;
pub mod service;

#[derive(Debug, Error)]
pub enum KeeperError {
    #[error("No known timer for '{0}'")]
    NotFound(PathBuf),
    #[error(transparent)]
    Timer(#[from] TimerError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("Time keeper is not running")]
    Unavailable,
}

/// Point in time view of one timer.
#[derive(PartialEq, Eq, Debug, Clone)]
pub struct TimerStatus {
    pub dir: PathBuf,
    pub time: Duration,
    pub paused: bool,
    pub running: bool,
}

pub struct Keeper {
    ledger: LedgerFile,
    snapshot_interval: Duration,
    timers: HashMap<PathBuf, Timer>,
    monitors: SharedMonitorFactory,
    clock: SharedClock,
}

impl Keeper {
    pub fn new(
        ledger: LedgerFile,
        snapshot_interval: Duration,
        monitors: SharedMonitorFactory,
        clock: SharedClock,
    ) -> Self {
        let snapshot_interval = if snapshot_interval.is_zero() {
            warn!("Zero snapshot interval, using {DEFAULT_SNAPSHOT_INTERVAL:?}");
            DEFAULT_SNAPSHOT_INTERVAL
        } else {
            snapshot_interval
        };
        Self {
            ledger,
            snapshot_interval,
            timers: HashMap::new(),
            monitors,
            clock,
        }
    }

    pub fn snapshot_interval(&self) -> Duration {
        self.snapshot_interval
    }

    /// A zero interval would rewrite the ledger in a tight loop and is ignored.
    pub fn set_snapshot_interval(&mut self, interval: Duration) {
        if interval.is_zero() {
            warn!(
                "Ignoring zero snapshot interval, keeping {:?}",
                self.snapshot_interval
            );
            return;
        }
        self.snapshot_interval = interval;
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    /// Recovers the registry from the ledger. Timers that weren't paused are restarted right away,
    /// a timer that fails to start is logged and left stopped.
    pub async fn load(&mut self) -> Result<(), KeeperError> {
        let Some(ledger) = self.ledger.read().await? else {
            info!("Starting with an empty ledger at {:?}", self.ledger.path());
            return Ok(());
        };

        self.set_snapshot_interval(ledger.snapshot_interval);
        for (dir, snapshot) in ledger.timers {
            if self.timers.contains_key(&dir) {
                warn!("Timer for {dir:?} is already registered, ignoring ledger entry");
                continue;
            }

            let mut timer = Timer::from_snapshot(snapshot, self.clock.clone());
            if !timer.is_paused().await {
                // The project might have been moved or deleted since, that shouldn't keep the
                // daemon from starting.
                if let Err(e) = timer.start(self.monitors.as_ref()) {
                    error!("Failed to start timer for {dir:?} after loading it from the ledger: {e}");
                }
            }
            self.timers.insert(dir, timer);
        }

        info!("Loaded {} timer(s) from {:?}", self.timers.len(), self.ledger.path());
        Ok(())
    }

    /// Registers and starts a timer for a new project. A project that is already known is
    /// unpaused instead, or restarted when nothing is running for it.
    pub async fn add(&mut self, settings: TimerSettings) -> Result<(), KeeperError> {
        match self.timers.get_mut(&settings.dir) {
            Some(timer) if timer.is_running() => {
                timer.unpause().await;
                Ok(())
            }
            Some(timer) => Ok(timer.start(self.monitors.as_ref())?),
            None => {
                let mut timer = Timer::new(settings, self.clock.clone());
                let started = timer.start(self.monitors.as_ref());
                self.timers.insert(timer.dir().to_path_buf(), timer);
                Ok(started?)
            }
        }
    }

    pub fn get(&self, dir: &Path) -> Result<&Timer, KeeperError> {
        self.timers
            .get(dir)
            .ok_or_else(|| KeeperError::NotFound(dir.to_path_buf()))
    }

    pub fn get_mut(&mut self, dir: &Path) -> Result<&mut Timer, KeeperError> {
        self.timers
            .get_mut(dir)
            .ok_or_else(|| KeeperError::NotFound(dir.to_path_buf()))
    }

    /// Stops and forgets the timer of `dir`. The timer is gone even when stopping its monitor
    /// fails.
    pub async fn remove(&mut self, dir: &Path) -> Result<(), KeeperError> {
        let mut timer = self
            .timers
            .remove(dir)
            .ok_or_else(|| KeeperError::NotFound(dir.to_path_buf()))?;
        timer.stop().await?;
        info!("Removed timer for {dir:?}");
        Ok(())
    }

    /// Stops the timer of `dir` but keeps it registered, paused, with its time.
    pub async fn pause(&mut self, dir: &Path) -> Result<(), KeeperError> {
        self.get_mut(dir)?.stop().await?;
        Ok(())
    }

    /// Zeroes the timer of `dir`. The status carries the lapped time and the paused flag as of
    /// the lap.
    pub async fn lap(&mut self, dir: &Path) -> Result<TimerStatus, KeeperError> {
        let timer = self.get_mut(dir)?;
        let time = timer.lap().await;
        Ok(TimerStatus {
            dir: dir.to_path_buf(),
            time,
            paused: timer.is_paused().await,
            running: timer.is_running(),
        })
    }

    pub async fn status(&self, dir: &Path) -> Result<TimerStatus, KeeperError> {
        let timer = self.get(dir)?;
        let snapshot = timer.snapshot().await;
        Ok(TimerStatus {
            dir: snapshot.settings.dir,
            time: snapshot.time,
            paused: snapshot.paused,
            running: timer.is_running(),
        })
    }

    pub async fn ledger(&self) -> Ledger {
        let snapshots = join_all(self.timers.values().map(|timer| timer.snapshot())).await;
        Ledger {
            snapshot_interval: self.snapshot_interval,
            timers: snapshots
                .into_iter()
                .map(|snapshot| (snapshot.settings.dir.clone(), snapshot))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    pub async fn save(&self) -> Result<(), KeeperError> {
        let ledger = self.ledger().await;
        self.ledger.write(&ledger).await?;
        Ok(())
    }

    /// Quiesces every timer, keeping their paused flags, and writes the final snapshot.
    pub async fn shutdown(&mut self) -> Result<(), KeeperError> {
        let results = join_all(self.timers.values_mut().map(|timer| timer.halt())).await;
        for result in results {
            if let Err(e) = result {
                warn!("Error while stopping timer: {e}");
            }
        }
        self.save().await
    }
}

#[cfg(test)]
mod tests {
    use std::{
        path::{Path, PathBuf},
        sync::Arc,
        time::Duration,
    };

    use anyhow::Result;
    use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
    use tempfile::{tempdir, TempDir};
    use tokio::time::sleep;

    use crate::{
        daemon::{
            config::{DEFAULT_MBU, DEFAULT_SNAPSHOT_INTERVAL},
            monitor::fake::FakeMonitorFactory,
            timer::TimerSettings,
        },
        utils::{
            clock::{AnchoredClock, SharedClock},
            logging::TEST_LOGGING,
        },
    };

    use super::{ledger::LedgerFile, Keeper, KeeperError};

    const TEST_START_DATE: NaiveDateTime =
        NaiveDateTime::new(NaiveDate::from_ymd_opt(2015, 6, 1).unwrap(), NaiveTime::MIN);

    const MINUTE: Duration = Duration::from_secs(60);

    fn settings(dir: &str) -> TimerSettings {
        TimerSettings {
            dir: PathBuf::from(dir),
            latency: Duration::from_millis(50),
            timeout: Duration::from_secs(3600),
            mbu: MINUTE,
        }
    }

    fn test_clock() -> SharedClock {
        Arc::new(AnchoredClock::at(Utc.from_utc_datetime(&TEST_START_DATE)))
    }

    fn keeper_with_clock(dir: &TempDir, monitors: &FakeMonitorFactory, clock: SharedClock) -> Keeper {
        *TEST_LOGGING;
        Keeper::new(
            LedgerFile::new(dir.path().join("ledger.json"), dir.path().join("ledger.lock")),
            MINUTE,
            Arc::new(monitors.clone()),
            clock,
        )
    }

    fn keeper(dir: &TempDir, monitors: &FakeMonitorFactory) -> Keeper {
        keeper_with_clock(dir, monitors, test_clock())
    }

    #[tokio::test(start_paused = true)]
    async fn adding_a_known_project_unpauses_it() -> Result<()> {
        let dir = tempdir()?;
        let monitors = FakeMonitorFactory::new();
        let mut keeper = keeper(&dir, &monitors);
        let repo = Path::new("/repo");

        keeper.add(settings("/repo")).await?;
        keeper.pause(repo).await?;
        assert!(keeper.status(repo).await?.paused);

        keeper.add(settings("/repo")).await?;
        let status = keeper.status(repo).await?;
        assert!(!status.paused);
        assert!(status.running);
        assert_eq!(keeper.len(), 1);
        assert_eq!(monitors.starts(repo), 2);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn adding_a_running_project_keeps_its_monitor() -> Result<()> {
        let dir = tempdir()?;
        let monitors = FakeMonitorFactory::new();
        let mut keeper = keeper(&dir, &monitors);
        let repo = Path::new("/repo");

        keeper.add(settings("/repo")).await?;
        keeper.add(settings("/repo")).await?;

        assert_eq!(keeper.len(), 1);
        assert_eq!(monitors.starts(repo), 1);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn adding_a_timed_out_project_unpauses_without_restarting() -> Result<()> {
        let dir = tempdir()?;
        let monitors = FakeMonitorFactory::new();
        let mut keeper = keeper(&dir, &monitors);
        let repo = Path::new("/repo");

        keeper
            .add(TimerSettings {
                timeout: Duration::from_secs(90),
                ..settings("/repo")
            })
            .await?;
        sleep(Duration::from_secs(200)).await;
        let status = keeper.status(repo).await?;
        assert!(status.paused);
        assert!(status.running);

        keeper.add(settings("/repo")).await?;
        let status = keeper.status(repo).await?;
        assert!(!status.paused);
        assert!(status.running);
        assert_eq!(monitors.starts(repo), 1);
        assert_eq!(monitors.stops(repo), 0);

        keeper.shutdown().await?;
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn removing_unknown_project_is_not_found() -> Result<()> {
        let dir = tempdir()?;
        let monitors = FakeMonitorFactory::new();
        let mut keeper = keeper(&dir, &monitors);
        keeper.add(settings("/repo")).await?;

        let result = keeper.remove(Path::new("/elsewhere")).await;
        assert!(matches!(result, Err(KeeperError::NotFound(p)) if p == Path::new("/elsewhere")));
        assert_eq!(keeper.len(), 1);
        assert!(keeper.get(Path::new("/repo")).is_ok());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn remove_stops_the_timer() -> Result<()> {
        let dir = tempdir()?;
        let monitors = FakeMonitorFactory::new();
        let mut keeper = keeper(&dir, &monitors);
        let repo = Path::new("/repo");

        keeper.add(settings("/repo")).await?;
        keeper.remove(repo).await?;

        assert!(keeper.is_empty());
        assert!(!monitors.is_running(repo));
        assert!(matches!(keeper.get(repo), Err(KeeperError::NotFound(_))));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn failing_project_is_still_registered() -> Result<()> {
        let dir = tempdir()?;
        let monitors = FakeMonitorFactory::new();
        monitors.refuse("/gone");
        let mut keeper = keeper(&dir, &monitors);

        let result = keeper.add(settings("/gone")).await;
        assert!(matches!(result, Err(KeeperError::Timer(_))));
        assert!(!keeper.get(Path::new("/gone"))?.is_running());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn load_restarts_only_unpaused_timers() -> Result<()> {
        let dir = tempdir()?;
        let monitors = FakeMonitorFactory::new();
        let active = Path::new("/active");
        let paused = Path::new("/paused");

        {
            let mut keeper = keeper(&dir, &monitors);
            keeper.add(settings("/active")).await?;
            keeper.add(settings("/paused")).await?;
            sleep(2 * MINUTE + Duration::from_millis(1)).await;
            keeper.pause(paused).await?;
            keeper.shutdown().await?;
        }
        assert!(!monitors.is_running(active));

        let mut keeper = keeper(&dir, &monitors);
        keeper.load().await?;

        assert_eq!(keeper.len(), 2);
        assert!(monitors.is_running(active));
        assert!(!monitors.is_running(paused));

        let paused_status = keeper.status(paused).await?;
        assert!(paused_status.paused);
        assert_eq!(paused_status.time, 2 * MINUTE);

        let active_status = keeper.status(active).await?;
        assert!(!active_status.paused);
        assert_eq!(active_status.time, 2 * MINUTE);

        keeper.shutdown().await?;
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn load_skips_timers_that_fail_to_start() -> Result<()> {
        let dir = tempdir()?;
        let monitors = FakeMonitorFactory::new();
        {
            let mut keeper = keeper(&dir, &monitors);
            keeper.add(settings("/moved")).await?;
            keeper.add(settings("/repo")).await?;
            keeper.shutdown().await?;
        }

        monitors.refuse("/moved");
        let mut keeper = keeper(&dir, &monitors);
        keeper.load().await?;

        assert_eq!(keeper.len(), 2);
        assert!(!keeper.get(Path::new("/moved"))?.is_running());
        assert!(keeper.get(Path::new("/repo"))?.is_running());
        keeper.shutdown().await?;
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn recovering_after_a_crash_does_not_credit_the_downtime() -> Result<()> {
        let dir = tempdir()?;
        let monitors = FakeMonitorFactory::new();
        let clock = test_clock();
        let repo = Path::new("/repo");

        {
            let mut keeper = keeper_with_clock(&dir, &monitors, clock.clone());
            keeper.add(settings("/repo")).await?;
            monitors.wake(repo, Some("a.rs"));
            sleep(Duration::from_secs(10)).await;
            monitors.wake(repo, Some("a.rs"));
            sleep(Duration::from_millis(1)).await;
            keeper.save().await?;
            // Dropped without a shutdown, the last periodic save is all that survives.
        }

        sleep(3 * 60 * MINUTE).await;
        let mut keeper = keeper_with_clock(&dir, &monitors, clock);
        keeper.load().await?;
        monitors.wake(repo, Some("b.rs"));
        sleep(Duration::from_millis(1)).await;

        let files = keeper.get(repo)?.distribution().await;
        assert_eq!(files.get("a.rs"), Some(&Duration::from_secs(10)));
        keeper.shutdown().await?;
        Ok(())
    }

    #[tokio::test]
    async fn zero_durations_in_the_ledger_fall_back_to_defaults() -> Result<()> {
        let dir = tempdir()?;
        tokio::fs::write(
            dir.path().join("ledger.json"),
            r#"{
                "snapshot_interval": "0s",
                "timers": {
                    "/repo": {
                        "paused": true,
                        "dir": "/repo",
                        "latency": "50ms",
                        "timeout": "0s",
                        "mbu": "0s",
                        "time": "1m0s"
                    }
                }
            }"#,
        )
        .await?;

        let mut keeper = keeper(&dir, &FakeMonitorFactory::new());
        keeper.load().await?;
        assert_eq!(keeper.snapshot_interval(), MINUTE);

        let timer = keeper.get(Path::new("/repo"))?;
        assert_eq!(timer.settings().mbu, DEFAULT_MBU);
        assert!(!timer.settings().timeout.is_zero());
        assert_eq!(timer.time().await, MINUTE);
        Ok(())
    }

    #[test]
    fn zero_snapshot_interval_is_ignored() -> Result<()> {
        let dir = tempdir()?;
        let mut keeper = keeper(&dir, &FakeMonitorFactory::new());
        keeper.set_snapshot_interval(Duration::ZERO);
        assert_eq!(keeper.snapshot_interval(), MINUTE);

        let keeper = Keeper::new(
            LedgerFile::new(dir.path().join("ledger.json"), dir.path().join("ledger.lock")),
            Duration::ZERO,
            Arc::new(FakeMonitorFactory::new()),
            test_clock(),
        );
        assert_eq!(keeper.snapshot_interval(), DEFAULT_SNAPSHOT_INTERVAL);
        Ok(())
    }

    #[tokio::test]
    async fn load_without_ledger_is_empty() -> Result<()> {
        let dir = tempdir()?;
        let mut keeper = keeper(&dir, &FakeMonitorFactory::new());
        keeper.load().await?;
        assert!(keeper.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn load_with_corrupt_ledger_fails() -> Result<()> {
        let dir = tempdir()?;
        tokio::fs::write(dir.path().join("ledger.json"), "not json").await?;
        let mut keeper = keeper(&dir, &FakeMonitorFactory::new());
        assert!(matches!(keeper.load().await, Err(KeeperError::Ledger(_))));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn load_takes_snapshot_interval_from_ledger() -> Result<()> {
        let dir = tempdir()?;
        let monitors = FakeMonitorFactory::new();
        {
            let mut keeper = keeper(&dir, &monitors);
            keeper.set_snapshot_interval(Duration::from_secs(15));
            keeper.save().await?;
        }

        let mut keeper = keeper(&dir, &monitors);
        keeper.load().await?;
        assert_eq!(keeper.snapshot_interval(), Duration::from_secs(15));
        Ok(())
    }
}
