use std::{net::SocketAddr, path::PathBuf, time::Duration};

use crate::{daemon::timer::TimerSettings, utils::dir::AppPaths};

use super::args::DaemonArgs;

pub const DEFAULT_SNAPSHOT_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_MBU: Duration = Duration::from_secs(60);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(4 * 60);
pub const DEFAULT_LATENCY: Duration = Duration::from_millis(50);
pub const DEFAULT_BIND: &str = "127.0.0.1:0";

/// Settings given to timers of projects the daemon hasn't seen before.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub struct TimerDefaults {
    pub latency: Duration,
    pub timeout: Duration,
    pub mbu: Duration,
}

impl Default for TimerDefaults {
    fn default() -> Self {
        Self {
            latency: DEFAULT_LATENCY,
            timeout: DEFAULT_TIMEOUT,
            mbu: DEFAULT_MBU,
        }
    }
}

impl TimerDefaults {
    pub fn for_dir(&self, dir: PathBuf) -> TimerSettings {
        TimerSettings {
            dir,
            latency: self.latency,
            timeout: self.timeout,
            mbu: self.mbu,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub paths: AppPaths,
    pub bind: SocketAddr,
    /// Overrides the interval stored in the ledger when set.
    pub snapshot_interval: Option<Duration>,
    pub timers: TimerDefaults,
}

impl DaemonConfig {
    pub fn new(paths: AppPaths) -> Self {
        Self {
            paths,
            bind: SocketAddr::from(([127, 0, 0, 1], 0)),
            snapshot_interval: None,
            timers: TimerDefaults::default(),
        }
    }

    pub fn from_args(paths: AppPaths, args: &DaemonArgs) -> Self {
        Self {
            paths,
            bind: args.bind,
            snapshot_interval: args.snapshot_interval,
            timers: TimerDefaults {
                latency: args.latency,
                timeout: args.timeout,
                mbu: args.mbu,
            },
        }
    }
}
