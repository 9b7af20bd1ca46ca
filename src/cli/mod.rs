pub mod client;
pub mod daemon_path;
pub mod output;
pub mod process;

use std::{
    env,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use client::{ClientError, DaemonClient};
use process::{kill_previous_servers, restart_server, wait_for_daemon};
use tracing::{info, level_filters::LevelFilter, warn};

use crate::{
    daemon::{config::DaemonConfig, start_daemon},
    utils::{
        dir::{create_application_default_path, ensure_dir, AppPaths},
        duration::format_duration,
        logging::{enable_logging, CLI_PREFIX},
    },
    vcs::{self, SyncError},
};

#[derive(Parser, Debug)]
#[command(name = "glass", version, long_about = None)]
#[command(about = "Automated time tracking for code repositories", long_about = None)]
struct Args {
    #[command(subcommand)]
    commands: Commands,
    #[arg(long, help = "Enable logging")]
    log: bool,
    #[arg(
        long,
        global = true,
        help = "Application directory. By default tries to save into $XDG_STATE_HOME or $HOME/.local/state"
    )]
    dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
#[command(version, about, long_about = None)]
enum Commands {
    #[command(about = "Starts a daemon for the application, replacing a running one")]
    Init {},
    #[command(about = "Stop currently running daemon")]
    Shutdown {},
    #[command(
        about = "Run a daemon directly in current console. Used for creating a daemon internally and for debugging"
    )]
    Serve {},
    #[command(about = "Start (or unpause) the timer of the current repository")]
    Start {},
    #[command(about = "Stop the timer of the current repository and forget it")]
    Stop {},
    #[command(about = "Pause the timer of the current repository, keeping its time")]
    Pause {},
    #[command(about = "Reset the timer of the current repository to 0s")]
    Reset {},
    #[command(about = "Report the time spent, attach it to the current commit and reset the timer")]
    Lap {},
    #[command(about = "Show the time spent on the current repository")]
    Status {
        #[arg(long, help = "Only print the time, for use in commit messages")]
        time_only: bool,
    },
    #[command(about = "Show the time spent per file")]
    Files {},
    #[command(about = "Push time data to a remote")]
    Push { remote: Option<String> },
    #[command(about = "Pull time data from a remote")]
    Pull { remote: Option<String> },
}

pub async fn run_cli() -> Result<()> {
    let args = Args::parse();

    let app_dir = match &args.dir {
        Some(dir) => ensure_dir(std::path::absolute(dir)?)?,
        None => create_application_default_path()?,
    };
    let paths = AppPaths::new(app_dir);

    let logging_level = if args.log {
        Some(LevelFilter::TRACE)
    } else {
        None
    };
    enable_logging(CLI_PREFIX, &paths.logs(), logging_level, args.log)?;

    let client = DaemonClient::new(paths.daemon_addr());
    match args.commands {
        Commands::Init {} => {
            restart_server(args.dir.as_ref().map(|_| paths.root()), &paths.daemon_addr())?;
            wait_for_daemon(&paths.daemon_addr()).await?;
            println!("Daemon started");
            Ok(())
        }
        Commands::Shutdown {} => {
            let killed = kill_previous_servers()?;
            println!("Stopped {killed} daemon(s)");
            Ok(())
        }
        Commands::Serve {} => start_daemon(DaemonConfig::new(paths)).await,
        Commands::Start {} => {
            let dir = project_dir()?;
            match client.start(&dir).await {
                Err(ClientError::DaemonUnreachable(reason)) => {
                    info!("Daemon is unreachable ({reason}), starting it");
                    restart_server(args.dir.as_ref().map(|_| paths.root()), &paths.daemon_addr())?;
                    wait_for_daemon(&paths.daemon_addr()).await?;
                    client.start(&dir).await?;
                }
                result => result?,
            }
            println!("Timer started for {}", dir.display());
            Ok(())
        }
        Commands::Stop {} => {
            let dir = project_dir()?;
            client.stop(&dir).await?;
            println!("Timer stopped");
            Ok(())
        }
        Commands::Pause {} => {
            let dir = project_dir()?;
            client.pause(&dir).await?;
            println!("Timer paused");
            Ok(())
        }
        Commands::Reset {} => {
            let dir = project_dir()?;
            client.reset(&dir).await?;
            println!("Timer is reset");
            Ok(())
        }
        Commands::Lap {} => lap(&client, &project_dir()?).await,
        Commands::Status { time_only } => {
            let dir = project_dir()?;
            let status = client.status(&dir).await?;
            if time_only {
                println!("{}", format_duration(status.time));
            } else {
                println!("{}", output::format_status(&dir, status));
            }
            Ok(())
        }
        Commands::Files {} => {
            let dir = project_dir()?;
            let files = client.distribution(&dir).await?;
            println!("{}", output::format_distribution(&files));
            Ok(())
        }
        Commands::Push { remote } => push(&project_dir()?, remote).await,
        Commands::Pull { remote } => pull(&project_dir()?, remote).await,
    }
}

/// Nearest repository containing the working directory.
fn project_dir() -> Result<PathBuf> {
    let cwd = env::current_dir().context("Failed to fetch current working dir")?;
    let cwd = cwd.canonicalize().unwrap_or(cwd);
    Ok(vcs::project_root(&cwd))
}

async fn lap(client: &DaemonClient, dir: &Path) -> Result<()> {
    let lapped = client.lap(dir).await?;
    match vcs::detect(dir) {
        Some(vcs) => vcs
            .persist(lapped.time)
            .await
            .with_context(|| format!("Failed to log time into {}", vcs.name()))?,
        None => warn!("{dir:?} isn't under version control, lapped time is only printed"),
    }
    println!("{}", format_duration(lapped.time));
    Ok(())
}

async fn push(dir: &Path, remote: Option<String>) -> Result<()> {
    let vcs = vcs::detect(dir).context("Current directory isn't under version control")?;
    let remote = remote.unwrap_or_else(|| vcs.default_remote().to_string());
    match vcs.push(&remote).await {
        Ok(()) => println!("Pushed time data to '{remote}'"),
        Err(e) if e.is_absent() => println!("{e}, nothing to push"),
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

async fn pull(dir: &Path, remote: Option<String>) -> Result<()> {
    let vcs = vcs::detect(dir).context("Current directory isn't under version control")?;
    let remote = remote.unwrap_or_else(|| vcs.default_remote().to_string());
    match vcs.fetch(&remote).await {
        Ok(()) => {
            println!("Pulled time data from '{remote}'");
            if let Some(total) = vcs.total().await? {
                println!("Time spent on current commit: {}", format_duration(total));
            }
        }
        Err(e @ SyncError::NoRemoteData(_)) => println!("{e}"),
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use clap::Parser;

    use super::{Args, Commands};

    #[test]
    fn parses_commands() {
        let args = Args::parse_from(["glass", "status", "--time-only"]);
        assert!(matches!(args.commands, Commands::Status { time_only: true }));

        let args = Args::parse_from(["glass", "push", "upstream", "--dir", "/tmp/glass"]);
        assert!(matches!(args.commands, Commands::Push { remote: Some(ref r) } if r == "upstream"));
        assert_eq!(args.dir, Some(PathBuf::from("/tmp/glass")));

        let args = Args::parse_from(["glass", "pull"]);
        assert!(matches!(args.commands, Commands::Pull { remote: None }));
    }

    #[test]
    fn rejects_unknown_commands() {
        assert!(Args::try_parse_from(["glass", "timeline"]).is_err());
    }
}
