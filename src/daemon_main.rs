use std::env::args;

use anyhow::Result;
use clap::Parser;
use glass::{
    daemon::{args::DaemonArgs, config::DaemonConfig, start_daemon},
    utils::{
        dir::{create_application_default_path, ensure_dir, AppPaths},
        logging::{enable_logging, DAEMON_PREFIX},
        runtime::single_thread_runtime,
    },
};

fn main() -> Result<()> {
    run_service(args().collect::<Vec<_>>())
}

fn run_service(command_args: Vec<String>) -> Result<()> {
    let args = DaemonArgs::parse_from(&command_args);

    if !args.force {
        #[cfg(windows)]
        {
            let mut command_args = command_args;
            use std::os::windows::process::CommandExt;
            // DETACHED_PROCESS
            const DETACHED_PROCESS: u32 = 0x0000_0008;

            println!("Starting detached process");
            command_args.push("--force".into());
            let process_name = std::env::current_exe()?;
            let mut command = std::process::Command::new(process_name);
            command.args(command_args.into_iter().skip(1));
            command.creation_flags(DETACHED_PROCESS);
            command.stdin(std::process::Stdio::null());
            command.stdout(std::process::Stdio::null());
            command.stderr(std::process::Stdio::null());
            #[allow(clippy::zombie_processes)]
            command.spawn()?;
            println!("Created daemon");
            return Ok(());
        }
        #[cfg(unix)]
        {
            use daemonize::Daemonize;
            use tracing::error;

            let daemonize = Daemonize::new()
                .stdout(daemonize::Stdio::devnull())
                .stderr(daemonize::Stdio::devnull())
                .execute();
            match daemonize {
                daemonize::Outcome::Parent(parent) => {
                    parent
                        .inspect_err(|e| error!("Failed to create daemon on parent side {e:?}"))?;
                    println!("Created daemon");
                    return Ok(());
                }
                daemonize::Outcome::Child(_) => (),
            }
        }
    }

    run(args)
}

fn run(args: DaemonArgs) -> Result<()> {
    let app_dir = match &args.dir {
        Some(dir) => ensure_dir(dir.clone())?,
        None => create_application_default_path()?,
    };
    let paths = AppPaths::new(app_dir);
    enable_logging(DAEMON_PREFIX, &paths.logs(), args.log, args.log_console)?;
    let config = DaemonConfig::from_args(paths, &args);
    single_thread_runtime()?.block_on(start_daemon(config))?;
    Ok(())
}
