use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    fs::operations::write_atomic,
    utils::clock::{default_clock, SharedClock},
};

use config::DaemonConfig;
use keeper::{
    ledger::LedgerFile,
    service::{keeper_channel, run_keeper},
    Keeper,
};
use monitor::{FsMonitorFactory, SharedMonitorFactory};

pub mod args;
pub mod config;
pub mod distribution;
pub mod keeper;
pub mod monitor;
pub mod server;
pub mod shutdown;
pub mod timer;

/// Represents the starting point for the daemon
pub async fn start_daemon(config: DaemonConfig) -> Result<()> {
    let shutdown_token = CancellationToken::new();
    run_daemon(
        config,
        Arc::new(FsMonitorFactory),
        default_clock(),
        shutdown_token.clone(),
        shutdown::detect_shutdown(shutdown_token),
    )
    .await
}

async fn run_daemon(
    config: DaemonConfig,
    monitors: SharedMonitorFactory,
    clock: SharedClock,
    shutdown_token: CancellationToken,
    shutdown_detection: impl std::future::Future<Output = ()>,
) -> Result<()> {
    let paths = &config.paths;
    let ledger = LedgerFile::new(paths.ledger(), paths.ledger_lock());
    let mut keeper = Keeper::new(
        ledger,
        config::DEFAULT_SNAPSHOT_INTERVAL,
        monitors,
        clock,
    );
    keeper
        .load()
        .await
        .context("Failed to recover timers from the ledger")?;
    if let Some(interval) = config.snapshot_interval {
        keeper.set_snapshot_interval(interval);
    }

    let listener = TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind))?;
    let addr = listener.local_addr()?;
    write_atomic(&paths.daemon_addr(), addr.to_string().as_bytes())
        .await
        .with_context(|| format!("Failed to publish address to {:?}", paths.daemon_addr()))?;
    info!("Daemon listening on {addr}");

    let (handle, inbox) = keeper_channel();
    let (_, mut keeper, _) = tokio::join!(
        shutdown_detection,
        run_keeper(keeper, config.timers, inbox, shutdown_token.clone()),
        server::serve(listener, handle, shutdown_token.clone()),
    );

    if let Err(e) = tokio::fs::remove_file(paths.daemon_addr()).await {
        warn!("Failed to remove {:?}: {e}", paths.daemon_addr());
    }

    keeper.shutdown().await.inspect_err(|e| {
        error!("Failed to save the ledger on shutdown {e:?}");
    })?;
    info!("Daemon stopped");
    Ok(())
}

#[cfg(test)]
mod daemon_tests {
    use std::{path::Path, sync::Arc, time::Duration};

    use anyhow::{Context, Result};
    use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
    use tempfile::tempdir;
    use tokio::{
        io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
        net::TcpStream,
    };
    use tokio_util::sync::CancellationToken;

    use crate::{
        daemon::{
            config::DaemonConfig,
            keeper::ledger::LedgerFile,
            monitor::fake::FakeMonitorFactory,
        },
        protocol::{Request, Response},
        utils::{clock::AnchoredClock, dir::AppPaths, logging::TEST_LOGGING},
    };

    use super::run_daemon;

    const TEST_START_DATE: NaiveDateTime =
        NaiveDateTime::new(NaiveDate::from_ymd_opt(2018, 7, 4).unwrap(), NaiveTime::MIN);

    async fn request(addr_file: &Path, request: &Request) -> Result<Response> {
        let addr = tokio::fs::read_to_string(addr_file).await?;
        let mut stream = TcpStream::connect(addr.trim()).await?;
        let mut line = serde_json::to_vec(request)?;
        line.push(b'\n');
        stream.write_all(&line).await?;
        let mut response = String::new();
        BufReader::new(stream).read_line(&mut response).await?;
        Ok(serde_json::from_str(&response)?)
    }

    /// Runs a whole daemon over a fake monitor: register a project, let it accrue, then shut down
    /// and check the ledger and the address file.
    #[tokio::test]
    async fn smoke_test_daemon() -> Result<()> {
        *TEST_LOGGING;
        let state = tempdir()?;
        let paths = AppPaths::new(state.path().to_path_buf());
        let mut config = DaemonConfig::new(paths.clone());
        config.timers.mbu = Duration::from_millis(100);
        config.snapshot_interval = Some(Duration::from_secs(30));

        let monitors = FakeMonitorFactory::new();
        let shutdown_token = CancellationToken::new();
        let clock = Arc::new(AnchoredClock::at(Utc.from_utc_datetime(&TEST_START_DATE)));

        let project = Path::new("/repo").to_path_buf();
        let (daemon_result, client_result) = tokio::join!(
            run_daemon(
                config,
                Arc::new(monitors.clone()),
                clock,
                shutdown_token.clone(),
                shutdown_token.clone().cancelled_owned(),
            ),
            async {
                let result = async {
                    let addr_file = paths.daemon_addr();
                    while !addr_file.exists() {
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                    let started = request(&addr_file, &Request::Start { dir: project.clone() })
                        .await?;
                    tokio::time::sleep(Duration::from_millis(350)).await;
                    let status = request(&addr_file, &Request::Status { dir: project.clone() })
                        .await?;
                    anyhow::Ok((started, status))
                }
                .await;
                shutdown_token.cancel();
                result
            }
        );
        daemon_result?;
        let (started, status) = client_result?;

        assert_eq!(started, Response::Ok);
        let Response::Time { time, paused } = status else {
            panic!("Unexpected status response {status:?}");
        };
        assert!(!paused);
        assert!(time >= Duration::from_millis(200), "accrued {time:?}");
        assert!(!monitors.is_running(&project));
        assert!(!paths.daemon_addr().exists());

        let ledger = LedgerFile::new(paths.ledger(), paths.ledger_lock())
            .read()
            .await?
            .context("ledger should be saved on shutdown")?;
        assert_eq!(ledger.snapshot_interval, Duration::from_secs(30));
        let saved = &ledger.timers[&project];
        assert!(!saved.paused);
        assert!(saved.time >= time);
        Ok(())
    }
}
