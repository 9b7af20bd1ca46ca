use std::{
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::utils::duration::format_duration;

use super::{SyncError, Vcs};

pub const TIME_SPENT_NOTES_REF: &str = "time-spent";

/// Stores time as git notes under `refs/notes/time-spent`, one `total=<duration>` note per
/// commit.
pub struct Git {
    work_tree: PathBuf,
}

impl Git {
    pub fn new(work_tree: &Path) -> Self {
        Self {
            work_tree: work_tree.to_path_buf(),
        }
    }

    /// Runs git in the work tree. On failure the error carries git's stderr.
    async fn run(&self, args: &[&str]) -> Result<String, SyncError> {
        debug!("Running git {}", args.join(" "));
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.work_tree)
            .stdin(Stdio::null())
            .output()
            .await?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }
        Err(SyncError::Git {
            args: args.join(" "),
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

fn parse_total(note: &str) -> Option<Duration> {
    note.lines()
        .filter_map(|line| line.trim().strip_prefix("total="))
        .find_map(|total| crate::utils::duration::parse_duration(total).ok())
}

fn notes_refspec() -> String {
    format!("refs/notes/{TIME_SPENT_NOTES_REF}")
}

/// Maps the stderr of a failed fetch or push onto the absent data sentinels.
fn classify(error: SyncError, remote: &str) -> SyncError {
    match &error {
        SyncError::Git { message, .. }
            if message.to_lowercase().contains("couldn't find remote ref") =>
        {
            SyncError::NoRemoteData(remote.to_string())
        }
        SyncError::Git { message, .. }
            if message.contains(&format!("src refspec {} does not match any", notes_refspec())) =>
        {
            SyncError::NoLocalData
        }
        _ => error,
    }
}

#[async_trait]
impl Vcs for Git {
    fn name(&self) -> &'static str {
        "git"
    }

    fn default_remote(&self) -> &'static str {
        "origin"
    }

    fn is_available(&self) -> bool {
        self.work_tree.join(".git").exists()
    }

    async fn persist(&self, total: Duration) -> Result<(), SyncError> {
        let notes_ref = format!("--ref={TIME_SPENT_NOTES_REF}");
        let message = format!("total={}", format_duration(total));
        self.run(&["notes", &notes_ref, "add", "-f", "-m", &message])
            .await?;
        info!("Attached {message} to HEAD of {:?}", self.work_tree);
        Ok(())
    }

    async fn total(&self) -> Result<Option<Duration>, SyncError> {
        let notes_ref = format!("--ref={TIME_SPENT_NOTES_REF}");
        match self.run(&["notes", &notes_ref, "show", "HEAD"]).await {
            Ok(note) => Ok(parse_total(&note)),
            Err(SyncError::Git { message, .. }) if message.contains("no note found") => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn fetch(&self, remote: &str) -> Result<(), SyncError> {
        let refspec = format!("{0}:{0}", notes_refspec());
        self.run(&["fetch", remote, &refspec])
            .await
            .map_err(|e| classify(e, remote))?;
        Ok(())
    }

    async fn push(&self, remote: &str) -> Result<(), SyncError> {
        self.run(&["push", remote, &notes_refspec()])
            .await
            .map_err(|e| classify(e, remote))?;
        Ok(())
    }
}
