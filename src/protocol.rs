//! Messages exchanged between `glass` and the daemon. Every request and every response is a
//! single line of JSON over a loopback TCP connection.

use std::{collections::BTreeMap, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::utils::duration::serde_human;

#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Request {
    /// Start (or unpause) the timer of a project.
    Start { dir: PathBuf },
    /// Stop the timer and forget the project.
    Stop { dir: PathBuf },
    /// Stop the timer but keep the project and its time.
    Pause { dir: PathBuf },
    Reset { dir: PathBuf },
    /// Report the elapsed time and reset it.
    Lap { dir: PathBuf },
    Status { dir: PathBuf },
    Distribution { dir: PathBuf },
}

impl Request {
    pub fn dir(&self) -> &PathBuf {
        match self {
            Request::Start { dir }
            | Request::Stop { dir }
            | Request::Pause { dir }
            | Request::Reset { dir }
            | Request::Lap { dir }
            | Request::Status { dir }
            | Request::Distribution { dir } => dir,
        }
    }
}

#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    Ok,
    Time {
        #[serde(with = "serde_human")]
        time: Duration,
        paused: bool,
    },
    Files {
        files: BTreeMap<String, String>,
    },
    NotFound {
        dir: PathBuf,
    },
    Failed {
        message: String,
    },
}
