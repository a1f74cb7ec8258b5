//! Parsers for yt-dlp output

use regex::{Captures, Regex};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::LazyLock;

use super::traits::{ListedMember, ProgressUpdate};
use crate::error::FetchError;

static PERCENT_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^\[download\]\s+(\d+(?:\.\d+)?)%").ok());

static RATE_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\bat\s+(\d+(?:\.\d+)?)\s*([KMGT]?i?B)/s").ok());

static ETA_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\bETA\s+(\d+(?::\d{1,2}){0,2})\b").ok());

static MERGE_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"^\[Merger\] Merging formats into "(.+)"$"#).ok());

static MOVE_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"^\[MoveFiles\] Moving file ".+" to "(.+)"$"#).ok());

/// Stderr fragments of failures worth retrying
const TRANSIENT_MARKERS: &[&str] = &[
    "http error 429",
    "too many requests",
    "http error 500",
    "http error 502",
    "http error 503",
    "http error 504",
    "timed out",
    "timeout",
    "connection reset",
    "connection refused",
    "connection aborted",
    "remote end closed connection",
    "temporary failure",
    "network is unreachable",
    "incompleteread",
    "incomplete read",
    "unable to download webpage",
];

/// Stderr fragments of failures that will not change on retry
const PERMANENT_MARKERS: &[&str] = &[
    "video unavailable",
    "private video",
    "has been removed",
    "account associated with this video has been terminated",
    "sign in to confirm your age",
    "members-only",
    "unsupported url",
    "is not a valid url",
    "does not exist",
    "http error 404",
    "http error 403",
    "copyright",
    "requested format is not available",
];

fn captures<'a>(re: &LazyLock<Option<Regex>>, line: &'a str) -> Option<Captures<'a>> {
    Option::as_ref(re)?.captures(line)
}

/// Parse a `[download]  42.0% of ~10.00MiB at 1.20MiB/s ETA 00:07` line
pub fn parse_progress_line(line: &str) -> Option<ProgressUpdate> {
    let line = line.trim();
    let percent: f64 = captures(&PERCENT_RE, line)?.get(1)?.as_str().parse().ok()?;

    let rate_bps = captures(&RATE_RE, line).and_then(|caps| {
        let value: f64 = caps.get(1)?.as_str().parse().ok()?;
        unit_multiplier(caps.get(2)?.as_str()).map(|m| (value * m) as u64)
    });

    let eta_secs = captures(&ETA_RE, line)
        .and_then(|caps| caps.get(1).and_then(|m| parse_clock(m.as_str())));

    Some(ProgressUpdate {
        fraction: (percent / 100.0).clamp(0.0, 1.0),
        rate_bps,
        eta_secs,
    })
}

fn unit_multiplier(unit: &str) -> Option<f64> {
    let multiplier = match unit {
        "B" => 1.0,
        "KiB" => 1024.0,
        "MiB" => 1024.0 * 1024.0,
        "GiB" => 1024.0 * 1024.0 * 1024.0,
        "TiB" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        "KB" => 1e3,
        "MB" => 1e6,
        "GB" => 1e9,
        "TB" => 1e12,
        _ => return None,
    };
    Some(multiplier)
}

/// Parse `SS`, `MM:SS` or `HH:MM:SS` into seconds
fn parse_clock(clock: &str) -> Option<u64> {
    clock
        .split(':')
        .try_fold(0u64, |acc, part| Some(acc * 60 + part.parse::<u64>().ok()?))
}

/// Extract the file yt-dlp reports writing, if this line announces one
///
/// Later announcements supersede earlier ones (a merge replaces the per-format
/// destinations, a move replaces the merge output).
pub fn parse_output_path(line: &str) -> Option<PathBuf> {
    let line = line.trim();
    if let Some(path) = line.strip_prefix("[download] Destination: ") {
        return Some(PathBuf::from(path));
    }
    if let Some(path) = line
        .strip_prefix("[download] ")
        .and_then(|rest| rest.strip_suffix(" has already been downloaded"))
    {
        return Some(PathBuf::from(path));
    }
    if let Some(path) = line.strip_prefix("[ExtractAudio] Destination: ") {
        return Some(PathBuf::from(path));
    }
    [&MERGE_RE, &MOVE_RE]
        .into_iter()
        .find_map(|re| captures(re, line)?.get(1).map(|m| PathBuf::from(m.as_str())))
}

/// Strip the `ERROR: ` prefix from a yt-dlp diagnostic line
pub fn parse_error_line(line: &str) -> Option<&str> {
    line.trim().strip_prefix("ERROR:").map(str::trim)
}

/// Turn a failed run's stderr into a classified [`FetchError`]
///
/// The last `ERROR:` line is the message; without one, the last non-empty line is used.
/// Unrecognized failures are treated as permanent.
pub fn classify_failure(stderr_lines: &[String], exit_code: Option<i32>) -> FetchError {
    let message = stderr_lines
        .iter()
        .rev()
        .find_map(|line| parse_error_line(line))
        .or_else(|| {
            stderr_lines
                .iter()
                .rev()
                .map(|line| line.trim())
                .find(|line| !line.is_empty())
        })
        .map(str::to_string)
        .unwrap_or_else(|| match exit_code {
            Some(code) => format!("yt-dlp exited with status {code}"),
            None => "yt-dlp was terminated by a signal".to_string(),
        });

    let lowered = message.to_ascii_lowercase();
    if PERMANENT_MARKERS.iter().any(|m| lowered.contains(m)) {
        FetchError::Permanent(message)
    } else if TRANSIENT_MARKERS.iter().any(|m| lowered.contains(m)) {
        FetchError::Transient(message)
    } else {
        FetchError::Permanent(message)
    }
}

/// One line of `--flat-playlist --dump-json` output
#[derive(Debug, Deserialize)]
struct FlatEntry {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    webpage_url: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    ie_key: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    playlist_index: Option<usize>,
}

/// Parse one flat-playlist JSON line
///
/// The member's index is the entry's own `playlist_index`, if it has one.
pub fn parse_listing_line(line: &str) -> Result<ListedMember, String> {
    let entry: FlatEntry =
        serde_json::from_str(line).map_err(|e| format!("unreadable listing entry: {e}"))?;

    let target = [entry.webpage_url.as_deref(), entry.url.as_deref()]
        .into_iter()
        .flatten()
        .find(|u| u.starts_with("http://") || u.starts_with("https://"))
        .map(str::to_string)
        .or_else(|| match (entry.ie_key.as_deref(), entry.id.as_deref()) {
            (Some("Youtube"), Some(id)) => Some(format!("https://www.youtube.com/watch?v={id}")),
            _ => None,
        })
        .ok_or_else(|| match &entry.id {
            Some(id) => format!("entry {id} has no usable url"),
            None => "entry has no usable url".to_string(),
        })?;

    Ok(ListedMember {
        index: entry.playlist_index,
        target,
        title: entry.title,
    })
}
