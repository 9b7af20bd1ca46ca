use std::{
    env, io,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Result};

const APPLICATION_NAME: &str = "glass";

/// Resolves the application directory, `$XDG_STATE_HOME/glass` (or `$HOME/.local/state/glass`)
/// on unix and `%APPDATA%\glass` on Windows, and creates it if needed.
pub fn create_application_default_path() -> Result<PathBuf> {
    let mut path = platform_state_dir()?;
    path.push(APPLICATION_NAME);
    ensure_dir(path)
}

fn platform_state_dir() -> Result<PathBuf> {
    cfg_if::cfg_if! {
        if #[cfg(windows)] {
            env::var("APPDATA")
                .map(PathBuf::from)
                .map_err(|_| anyhow!("APPDATA should be present on Windows"))
        } else {
            env::var("XDG_STATE_HOME")
                .map(PathBuf::from)
                .or_else(|_| env::var("HOME").map(|home| Path::new(&home).join(".local/state")))
                .map_err(|_| anyhow!("Couldn't find neither XDG_STATE_HOME nor HOME"))
        }
    }
}

pub fn ensure_dir(path: PathBuf) -> Result<PathBuf> {
    match std::fs::create_dir_all(&path) {
        Ok(_) => Ok(path),
        Err(v) if v.kind() == io::ErrorKind::AlreadyExists => Ok(path),
        Err(v) => Err(v.into()),
    }
}

/// Well known files inside the application directory.
#[derive(Debug, Clone)]
pub struct AppPaths {
    root: PathBuf,
}

impl AppPaths {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ledger(&self) -> PathBuf {
        self.root.join("ledger.json")
    }

    /// Address the daemon is listening on. Clients read it to find the daemon.
    pub fn daemon_addr(&self) -> PathBuf {
        self.root.join("daemon.addr")
    }

    /// Guards concurrent access to the ledger.
    pub fn ledger_lock(&self) -> PathBuf {
        self.root.join("ledger.lock")
    }

    pub fn logs(&self) -> PathBuf {
        self.root.join("logs")
    }
}
