// src/exec/log.rs

//! Marker lines the process runner writes around each tool invocation.
//!
//! ```text
//! #> start 1718000000 attempt=1 rfifind -o mask /data/obs.raw
//! ... tool stdout/stderr ...
//! #> exit 1718000042 code=0 duration=41.873
//! ```
//!
//! The reconciler reads them back: a log whose last marker is `start`
//! belongs to a stage that is still executing (or whose runner died).

use std::time::Duration;

pub const MARKER_PREFIX: &str = "#> ";

#[derive(Debug, Clone, PartialEq)]
pub enum LogMarker {
    Start { at: u64, attempt: u32 },
    Exit { at: u64, code: i32, duration_secs: f64 },
    LaunchFailed { at: u64, reason: String },
}

pub fn start_line(at: u64, attempt: u32, argv: &str) -> String {
    format!("{MARKER_PREFIX}start {at} attempt={attempt} {argv}\n")
}

pub fn exit_line(at: u64, code: i32, duration: Duration) -> String {
    format!(
        "{MARKER_PREFIX}exit {at} code={code} duration={:.3}\n",
        duration.as_secs_f64()
    )
}

pub fn launch_failed_line(at: u64, reason: &str) -> String {
    // Keep the marker on one line whatever the OS error text looks like.
    let reason = reason.replace(['\r', '\n'], " ");
    format!("{MARKER_PREFIX}launch-failed {at} {reason}\n")
}

/// Parse a single line; `None` for ordinary tool output.
pub fn parse_marker(line: &str) -> Option<LogMarker> {
    let rest = line.strip_prefix(MARKER_PREFIX)?;
    let mut parts = rest.splitn(3, ' ');
    let kind = parts.next()?;
    let at = parts.next()?.parse::<u64>().ok()?;
    let tail = parts.next().unwrap_or("");

    match kind {
        "start" => {
            let attempt = tail
                .split_whitespace()
                .next()?
                .strip_prefix("attempt=")?
                .parse()
                .ok()?;
            Some(LogMarker::Start { at, attempt })
        }
        "exit" => {
            let mut code = None;
            let mut duration_secs = None;
            for field in tail.split_whitespace() {
                if let Some(v) = field.strip_prefix("code=") {
                    code = v.parse().ok();
                } else if let Some(v) = field.strip_prefix("duration=") {
                    duration_secs = v.parse().ok();
                }
            }
            Some(LogMarker::Exit {
                at,
                code: code?,
                duration_secs: duration_secs.unwrap_or(0.0),
            })
        }
        "launch-failed" => Some(LogMarker::LaunchFailed {
            at,
            reason: tail.to_string(),
        }),
        _ => None,
    }
}

/// The last marker in `text`, if any.
pub fn last_marker(text: &str) -> Option<LogMarker> {
    text.lines().rev().find_map(parse_marker)
}

/// Number of `start` markers, i.e. how many attempts the log has seen.
pub fn attempt_count(text: &str) -> usize {
    text.lines()
        .filter_map(parse_marker)
        .filter(|m| matches!(m, LogMarker::Start { .. }))
        .count()
}

/// Last `n` lines of `text`.
pub fn tail(text: &str, n: usize) -> Vec<String> {
    let lines: Vec<&str> = text.lines().collect();
    let skip = lines.len().saturating_sub(n);
    lines[skip..].iter().map(|l| l.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markers_parse_back() {
        let start = start_line(10, 2, "rfifind -o 'a b'");
        let exit = exit_line(20, 3, Duration::from_millis(1500));
        let failed = launch_failed_line(30, "No such file\nor directory");

        assert_eq!(
            parse_marker(start.trim_end()),
            Some(LogMarker::Start { at: 10, attempt: 2 })
        );
        assert_eq!(
            parse_marker(exit.trim_end()),
            Some(LogMarker::Exit {
                at: 20,
                code: 3,
                duration_secs: 1.5
            })
        );
        assert_eq!(
            parse_marker(failed.trim_end()),
            Some(LogMarker::LaunchFailed {
                at: 30,
                reason: "No such file or directory".to_string()
            })
        );
        assert_eq!(parse_marker("#> nonsense"), None);
        assert_eq!(parse_marker("plain output"), None);
    }

    #[test]
    fn last_marker_ignores_tool_output_after_it() {
        let log = format!(
            "{}{}{}working...\nDM 10.0 done\n",
            start_line(1, 1, "x"),
            exit_line(2, 1, Duration::from_secs(1)),
            start_line(3, 2, "x"),
        );
        assert_eq!(
            last_marker(&log),
            Some(LogMarker::Start { at: 3, attempt: 2 })
        );
        assert_eq!(attempt_count(&log), 2);
        assert_eq!(tail(&log, 2), vec!["working...", "DM 10.0 done"]);
    }
}
