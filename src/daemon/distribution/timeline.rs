use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Activity spans of a single file. Each edge is `[open, progress.., close]`; only the first and
/// the last mark of an edge matter for its length, the ones in between document progress.
#[derive(PartialEq, Eq, Debug, Default, Clone, Serialize, Deserialize)]
pub struct Timeline {
    edges: Vec<Vec<DateTime<Utc>>>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn edges(&self) -> &[Vec<DateTime<Utc>>] {
        &self.edges
    }

    pub fn open_at(&mut self, t: DateTime<Utc>) {
        self.edges.push(vec![t]);
    }

    /// Extends the last edge. Does nothing for a timeline that was never opened.
    pub fn progress_to(&mut self, t: DateTime<Utc>) {
        if let Some(edge) = self.edges.last_mut() {
            edge.push(t);
        }
    }

    pub fn close_at(&mut self, t: DateTime<Utc>) {
        self.progress_to(t)
    }

    /// Latest mark of the last edge.
    pub fn last_mark(&self) -> Option<DateTime<Utc>> {
        self.edges.last().and_then(|edge| edge.last()).copied()
    }

    pub fn length(&self) -> Duration {
        self.edges.iter().map(|edge| edge_length(edge, None)).sum()
    }

    /// Length of the activity that happened before `upto`. Edges opened after it are ignored and
    /// edges spanning it are cut at `upto`.
    pub fn length_upto(&self, upto: DateTime<Utc>) -> Duration {
        self.edges
            .iter()
            .map(|edge| edge_length(edge, Some(upto)))
            .sum()
    }
}

fn edge_length(edge: &[DateTime<Utc>], upto: Option<DateTime<Utc>>) -> Duration {
    let (Some(&first), Some(&last)) = (edge.first(), edge.last()) else {
        return Duration::ZERO;
    };
    let last = match upto {
        Some(upto) if upto <= first => return Duration::ZERO,
        Some(upto) => last.min(upto),
        None => last,
    };
    (last - first).to_std().unwrap_or_default()
}
