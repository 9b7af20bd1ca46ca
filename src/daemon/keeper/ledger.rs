//! The ledger is the durable mirror of the keeper: one JSON document holding every known timer
//! and the snapshot interval. Durations are stored as human readable strings.

use std::{collections::BTreeMap, io::ErrorKind, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::{
    daemon::timer::TimerSnapshot,
    fs::operations::{write_atomic, FileLock},
    utils::duration::serde_human,
};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Failed to open '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to decode JSON in '{path}': {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Failed to encode ledger: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("Error saving ledger to '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
pub struct Ledger {
    #[serde(with = "serde_human")]
    pub snapshot_interval: Duration,
    #[serde(default)]
    pub timers: BTreeMap<PathBuf, TimerSnapshot>,
}

/// Location of the ledger and its lock file.
#[derive(Debug, Clone)]
pub struct LedgerFile {
    path: PathBuf,
    lock: PathBuf,
}

impl LedgerFile {
    pub fn new(path: PathBuf, lock: PathBuf) -> Self {
        Self { path, lock }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Reads the ledger. A missing ledger isn't an error, a corrupt one is.
    pub async fn read(&self) -> Result<Option<Ledger>, LedgerError> {
        let read_error = |source| LedgerError::Read {
            path: self.path.clone(),
            source,
        };

        let lock = FileLock::shared(&self.lock).await.map_err(read_error)?;
        let contents = tokio::fs::read(&self.path).await;
        lock.release().await.map_err(read_error)?;

        let contents = match contents {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No ledger at {:?} yet", self.path);
                return Ok(None);
            }
            Err(e) => return Err(read_error(e)),
        };

        serde_json::from_slice(&contents)
            .map(Some)
            .map_err(|source| LedgerError::Decode {
                path: self.path.clone(),
                source,
            })
    }

    pub async fn write(&self, ledger: &Ledger) -> Result<(), LedgerError> {
        let write_error = |source| LedgerError::Write {
            path: self.path.clone(),
            source,
        };

        let mut contents = serde_json::to_vec_pretty(ledger).map_err(LedgerError::Encode)?;
        contents.push(b'\n');

        let lock = FileLock::exclusive(&self.lock).await.map_err(write_error)?;
        let written = write_atomic(&self.path, &contents).await;
        lock.release().await.map_err(write_error)?;
        written.map_err(write_error)
    }
}
