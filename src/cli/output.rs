use std::{collections::BTreeMap, path::Path, time::Duration};

use ansi_term::{Colour, Style};

use crate::{daemon::distribution::OVERHEAD_TIMELINE, utils::duration::format_duration};

use super::client::TimerTime;

pub fn format_status(dir: &Path, status: TimerTime) -> String {
    let state = if status.paused {
        Colour::Yellow.paint("paused")
    } else {
        Colour::Green.paint("running")
    };
    format!(
        "{} {} ({state})",
        Style::new().bold().paint(format_duration(status.time)),
        Colour::Fixed(244).paint(format!("spent on {}", dir.display())),
    )
}

/// Per file breakdown, longest first. Time not attributed to a file is listed last.
pub fn format_distribution(files: &BTreeMap<String, Duration>) -> String {
    let mut entries = files
        .iter()
        .filter(|(path, _)| path.as_str() != OVERHEAD_TIMELINE)
        .collect::<Vec<_>>();
    entries.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));

    let total = files.values().sum::<Duration>();
    let width = entries
        .iter()
        .map(|(_, length)| format_duration(**length).len())
        .chain([format_duration(total).len()])
        .max()
        .unwrap_or(0);

    let mut lines = entries
        .into_iter()
        .map(|(path, length)| {
            format!(
                "{} {path}",
                Colour::Cyan.paint(format!("{:>width$}", format_duration(*length)))
            )
        })
        .collect::<Vec<_>>();

    if let Some(overhead) = files.get(OVERHEAD_TIMELINE) {
        lines.push(format!(
            "{} {}",
            Colour::Cyan.paint(format!("{:>width$}", format_duration(*overhead))),
            Colour::Fixed(244).paint("(not attributed to a file)")
        ));
    }
    lines.push(format!(
        "{} total",
        Style::new()
            .bold()
            .paint(format!("{:>width$}", format_duration(total)))
    ));
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeMap, path::Path, time::Duration};

    use crate::cli::client::TimerTime;

    use super::{format_distribution, format_status};

    #[test]
    fn status_mentions_time_and_state() {
        let line = format_status(
            Path::new("/repo"),
            TimerTime {
                time: Duration::from_secs(90),
                paused: true,
            },
        );
        assert!(line.contains("1m30s"));
        assert!(line.contains("paused"));
        assert!(line.contains("/repo"));
    }

    #[test]
    fn distribution_is_sorted_longest_first() {
        let files = BTreeMap::from([
            ("a.rs".to_string(), Duration::from_secs(5)),
            ("b.rs".to_string(), Duration::from_secs(60)),
            ("__overhead".to_string(), Duration::from_secs(120)),
        ]);
        let output = format_distribution(&files);
        let lines = output.lines().collect::<Vec<_>>();

        assert_eq!(lines.len(), 4);
        assert!(lines[0].ends_with("b.rs"));
        assert!(lines[1].ends_with("a.rs"));
        assert!(lines[2].contains("2m0s"));
        assert!(lines[3].contains("3m5s"));
    }
}
