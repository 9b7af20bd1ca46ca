use std::{
    env,
    ffi::OsStr,
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use anyhow::{anyhow, Result};
use sysinfo::{get_current_pid, Process, Signal, System};
use tracing::{info, warn};

use super::daemon_path::to_daemon_path;

const STARTUP_TIMEOUT: Duration = Duration::from_secs(3);
const STARTUP_POLL: Duration = Duration::from_millis(50);

/// Daemons are either the `glass-daemon` binary or `glass serve`.
fn is_server(process: &Process, cli: &Path, daemon: &Path) -> bool {
    let Some(exe) = process.exe().filter(|v| v.exists()) else {
        return false;
    };
    exe == daemon || (exe == cli && process.cmd().iter().any(|arg| arg == OsStr::new("serve")))
}

/// Terminates every running daemon and waits for them to exit. Daemons save their ledger when
/// they receive the terminate signal.
pub fn kill_previous_servers() -> Result<usize> {
    let cli = env::current_exe()?;
    let daemon = to_daemon_path(cli.clone());

    let system = System::new_all();
    let current_id = get_current_pid().map_err(|e| anyhow!("Can't get own pid: {e}"))?;
    let mut killed = 0;
    for (pid, process) in system.processes().iter() {
        if *pid == current_id || !is_server(process, &cli, &daemon) {
            continue;
        }

        info!("Terminating daemon {pid}");
        // This will forcefully terminate the process on Windows. Anything better will require a
        // lot more work.
        if process.kill_with(Signal::Term).is_none() {
            process.kill();
        }
        process.wait();
        killed += 1;
    }
    Ok(killed)
}

/// Shuts down previous daemons and starts a new one. The `glass-daemon` binary detaches itself;
/// when it isn't installed next to the cli, `glass serve` is spawned as a detached process.
pub fn restart_server(app_dir: Option<&Path>, addr_file: &Path) -> Result<()> {
    kill_previous_servers()?;
    // A daemon that was killed forcefully leaves its address behind.
    if addr_file.exists() {
        std::fs::remove_file(addr_file)?;
    }

    let cli = env::current_exe()?;
    let daemon = to_daemon_path(cli.clone());
    let dir_args = app_dir
        .map(|dir| vec!["--dir".into(), dir.as_os_str().to_owned()])
        .unwrap_or_default();

    if daemon.exists() {
        let status = std::process::Command::new(&daemon)
            .args(&dir_args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .status()?;
        if !status.success() {
            return Err(anyhow!("{daemon:?} exited with {status}"));
        }
        return Ok(());
    }

    warn!("{daemon:?} is missing, running the daemon through {cli:?}");
    spawn_detached(cli, dir_args)
}

fn spawn_detached(cli: PathBuf, dir_args: Vec<std::ffi::OsString>) -> Result<()> {
    let mut command = std::process::Command::new(cli);
    command.arg("serve").args(dir_args);

    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        // DETACHED_PROCESS
        command.creation_flags(0x0000_0008);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }
    command.stdin(Stdio::null());
    command.stdout(Stdio::null());
    command.stderr(Stdio::null());

    #[allow(clippy::zombie_processes)]
    let _ = command.spawn()?;
    Ok(())
}

/// Waits until a daemon publishes its address.
pub async fn wait_for_daemon(addr_file: &Path) -> Result<()> {
    let deadline = tokio::time::Instant::now() + STARTUP_TIMEOUT;
    while !addr_file.exists() {
        if tokio::time::Instant::now() >= deadline {
            return Err(anyhow!(
                "Daemon didn't start within {STARTUP_TIMEOUT:?}, see the daemon logs"
            ));
        }
        tokio::time::sleep(STARTUP_POLL).await;
    }
    Ok(())
}
