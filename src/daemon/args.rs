use std::{net::SocketAddr, path::PathBuf, time::Duration};

use clap::Parser;
use tracing::level_filters::LevelFilter;

use crate::utils::duration::parse_positive_duration;

use super::config::DEFAULT_BIND;

#[derive(Parser, Debug)]
#[command(name = "glass-daemon", version, about = "Keeps time for your repositories")]
pub struct DaemonArgs {
    /// Run in the foreground instead of detaching.
    #[arg(long)]
    pub force: bool,
    #[arg(
        long,
        help = "Application directory. By default tries to save into $XDG_STATE_HOME or $HOME/.local/state"
    )]
    pub dir: Option<PathBuf>,
    /// This option is for debugging purposes only.
    #[arg(long = "log-console")]
    pub log_console: bool,
    #[arg(long = "log-filter")]
    pub log: Option<LevelFilter>,
    #[arg(long, default_value = DEFAULT_BIND, help = "Loopback address to listen on")]
    pub bind: SocketAddr,
    #[arg(long, value_parser = parse_positive_duration, help = "How often timers are written to the ledger")]
    pub snapshot_interval: Option<Duration>,
    #[arg(long, value_parser = parse_positive_duration, default_value = "1m", help = "Minimal billable unit of new timers")]
    pub mbu: Duration,
    #[arg(long, value_parser = parse_positive_duration, default_value = "4m", help = "Inactivity after which new timers pause")]
    pub timeout: Duration,
    #[arg(long, value_parser = parse_positive_duration, default_value = "50ms", help = "Debounce latency of the file monitor")]
    pub latency: Duration,
}
