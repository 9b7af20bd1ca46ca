use std::{collections::BTreeMap, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::timeline::Timeline;

/// Timeline collecting activity that couldn't be attributed to a specific file.
pub const OVERHEAD_TIMELINE: &str = "__overhead";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DistributionError {
    #[error("No known timeline for file '{0}'")]
    NotFound(String),
}

/// Distributes activity of one project across the timelines of its files.
#[derive(PartialEq, Eq, Debug, Default, Clone, Serialize, Deserialize)]
pub struct Distributor {
    /// The file whose timeline currently has an open edge.
    #[serde(default)]
    active_file: Option<String>,
    #[serde(default)]
    timelines: BTreeMap<String, Timeline>,
}

fn timeline_key(path: &str) -> &str {
    if path.is_empty() {
        OVERHEAD_TIMELINE
    } else {
        path
    }
}

impl Distributor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_file(&self) -> Option<&str> {
        self.active_file.as_deref()
    }

    pub fn timeline(&self, path: &str) -> Option<&Timeline> {
        self.timelines.get(timeline_key(path))
    }

    /// Marks `path` as the file being worked on at `t`. An empty path stands for overhead.
    ///
    /// Registering the active file again extends its open edge. Registering another file closes
    /// the open edge and opens one on the new file at the same instant.
    pub fn register(&mut self, path: &str, t: DateTime<Utc>) {
        let key = timeline_key(path);

        if self.active_file.as_deref() == Some(key) {
            if let Some(timeline) = self.timelines.get_mut(key) {
                timeline.progress_to(t);
            }
            return;
        }

        self.close_active(t);
        self.timelines.entry(key.to_owned()).or_default().open_at(t);
        self.active_file = Some(key.to_owned());
    }

    /// Closes the open edge without activating another file.
    pub fn r#break(&mut self, t: DateTime<Utc>) {
        self.close_active(t);
    }

    /// Closes the open edge at its own last mark. Used for distributions recovered from a
    /// snapshot, where nothing is known about the time between the snapshot and now.
    pub fn seal(&mut self) {
        let Some(active) = self.active_file.take() else {
            return;
        };
        if let Some(timeline) = self.timelines.get_mut(&active) {
            if let Some(last) = timeline.last_mark() {
                timeline.close_at(last);
            }
        }
    }

    fn close_active(&mut self, t: DateTime<Utc>) {
        if let Some(active) = self.active_file.take() {
            if let Some(timeline) = self.timelines.get_mut(&active) {
                timeline.close_at(t);
            }
        }
    }

    /// Time spent on `path` up to `upto`.
    pub fn extract(&self, path: &str, upto: DateTime<Utc>) -> Result<Duration, DistributionError> {
        let key = timeline_key(path);
        self.timelines
            .get(key)
            .map(|timeline| timeline.length_upto(upto))
            .ok_or_else(|| DistributionError::NotFound(key.to_owned()))
    }

    /// Total time per file, overhead included.
    pub fn lengths(&self) -> BTreeMap<String, Duration> {
        self.timelines
            .iter()
            .map(|(path, timeline)| (path.clone(), timeline.length()))
            .collect()
    }

    pub fn total(&self) -> Duration {
        self.timelines.values().map(Timeline::length).sum()
    }
}
