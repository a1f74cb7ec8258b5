//! yt-dlp backed fetch and listing collaborator

use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};

use super::parser::{
    classify_failure, parse_error_line, parse_listing_line, parse_output_path,
    parse_progress_line,
};
use super::traits::{
    FetchOutput, FetchRequest, Fetcher, ListRequest, Listing, MemberLister, ProgressSink,
};
use crate::config::{RetryConfig, ToolsConfig};
use crate::error::FetchError;
use crate::range::RangeSpec;
use crate::retry::with_retry;
use crate::types::{EnumerationError, TaskOptions};

/// Stderr lines kept for failure classification
const STDERR_TAIL: usize = 50;

/// Output template used when a task does not set one
const DEFAULT_OUTPUT_TEMPLATE: &str = "%(title)s.%(ext)s";

/// Fetcher and lister that drive the external `yt-dlp` binary
///
/// # Examples
///
/// ```no_run
/// use vidqueue::fetch::YtDlp;
/// use std::path::PathBuf;
///
/// // Create with explicit path
/// let ytdlp = YtDlp::new(PathBuf::from("/usr/local/bin/yt-dlp"));
///
/// // Or auto-discover from PATH
/// let ytdlp = YtDlp::from_path().expect("yt-dlp not found in PATH");
/// ```
#[derive(Debug, Clone)]
pub struct YtDlp {
    binary_path: PathBuf,
    list_retry: RetryConfig,
}

impl YtDlp {
    /// Create a collaborator with an explicit binary path
    pub fn new(binary_path: PathBuf) -> Self {
        Self {
            binary_path,
            list_retry: RetryConfig::default(),
        }
    }

    /// Attempt to find yt-dlp in PATH
    pub fn from_path() -> Option<Self> {
        which::which("yt-dlp").ok().map(Self::new)
    }

    /// Resolve the binary from configuration: explicit path first, then PATH if allowed
    pub fn from_config(tools: &ToolsConfig) -> Option<Self> {
        match &tools.ytdlp_path {
            Some(path) => Some(Self::new(path.clone())),
            None if tools.search_path => Self::from_path(),
            None => None,
        }
    }

    /// Retry policy applied to playlist listing
    pub fn with_list_retry(mut self, retry: RetryConfig) -> Self {
        self.list_retry = retry;
        self
    }

    /// Path of the binary this collaborator runs
    pub fn binary_path(&self) -> &PathBuf {
        &self.binary_path
    }

    fn command(&self, args: &[String]) -> Command {
        let mut command = Command::new(&self.binary_path);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }

    async fn list_once(&self, request: &ListRequest) -> Result<Listing, FetchError> {
        let args = build_list_args(&request.target, request.range.as_ref());
        let child = self
            .command(&args)
            .spawn()
            .map_err(|e| FetchError::Transient(format!("failed to execute yt-dlp: {e}")))?;

        // Dropping the child on cancellation kills it.
        let output = tokio::select! {
            output = child.wait_with_output() => output.map_err(|e| {
                FetchError::Transient(format!("failed to read yt-dlp output: {e}"))
            })?,
            _ = request.cancel.cancelled() => return Err(FetchError::Cancelled),
        };

        listing_from_output(
            &String::from_utf8_lossy(&output.stdout),
            &String::from_utf8_lossy(&output.stderr),
            output.status.success(),
            output.status.code(),
        )
    }
}

enum Finish {
    Exited(std::io::Result<ExitStatus>),
    Cancelled,
    TimedOut(Duration),
}

#[async_trait]
impl Fetcher for YtDlp {
    async fn fetch(
        &self,
        request: FetchRequest,
        progress: ProgressSink,
    ) -> Result<FetchOutput, FetchError> {
        let args = build_fetch_args(&request.target, &request.options);
        tracing::debug!(
            task_id = %request.task_id,
            binary = %self.binary_path.display(),
            attempt = request.attempt,
            "Spawning yt-dlp"
        );

        let mut child = self
            .command(&args)
            .spawn()
            .map_err(|e| FetchError::Permanent(format!("failed to execute yt-dlp: {e}")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| FetchError::Permanent("yt-dlp stdout was not captured".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| FetchError::Permanent("yt-dlp stderr was not captured".into()))?;
        let stderr_task = tokio::spawn(collect_stderr(stderr));

        let mut output_path = None;
        let finish = {
            let run = async {
                let mut lines = BufReader::new(stdout).lines();
                while let Some(line) = lines.next_line().await? {
                    if let Some(update) = parse_progress_line(&line) {
                        progress.report(update);
                    } else if let Some(path) = parse_output_path(&line) {
                        output_path = Some(path);
                    }
                }
                child.wait().await
            };

            tokio::select! {
                status = run => Finish::Exited(status),
                _ = request.cancel.cancelled() => Finish::Cancelled,
                limit = deadline(request.options.timeout) => Finish::TimedOut(limit),
            }
        };

        match finish {
            Finish::Exited(Ok(status)) => {
                let stderr_lines = stderr_task.await.unwrap_or_default();
                if status.success() {
                    Ok(FetchOutput { output_path })
                } else {
                    Err(classify_failure(&stderr_lines, status.code()))
                }
            }
            Finish::Exited(Err(e)) => {
                kill(&mut child).await;
                Err(FetchError::Transient(format!(
                    "failed to read yt-dlp output: {e}"
                )))
            }
            Finish::Cancelled => {
                kill(&mut child).await;
                stderr_task.abort();
                Err(FetchError::Cancelled)
            }
            Finish::TimedOut(limit) => {
                kill(&mut child).await;
                stderr_task.abort();
                Err(FetchError::TimedOut(limit))
            }
        }
    }

    fn name(&self) -> &'static str {
        "yt-dlp"
    }
}

#[async_trait]
impl MemberLister for YtDlp {
    async fn list_members(&self, request: ListRequest) -> Result<Listing, FetchError> {
        with_retry(&self.list_retry, || self.list_once(&request)).await
    }

    fn name(&self) -> &'static str {
        "yt-dlp"
    }
}

async fn deadline(limit: Option<Duration>) -> Duration {
    match limit {
        Some(limit) => {
            tokio::time::sleep(limit).await;
            limit
        }
        None => std::future::pending().await,
    }
}

async fn kill(child: &mut Child) {
    if let Err(e) = child.kill().await {
        tracing::debug!(error = %e, "yt-dlp already exited");
    }
}

async fn collect_stderr(stderr: ChildStderr) -> Vec<String> {
    let mut lines = BufReader::new(stderr).lines();
    let mut tail = VecDeque::with_capacity(STDERR_TAIL);
    while let Ok(Some(line)) = lines.next_line().await {
        if tail.len() == STDERR_TAIL {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    tail.into()
}

/// Command line for downloading one target
pub(crate) fn build_fetch_args(target: &str, options: &TaskOptions) -> Vec<String> {
    let mut args = vec!["--newline".to_string(), "--no-playlist".to_string()];

    if let Some(format) = &options.format {
        args.push("-f".into());
        args.push(format.to_format_string());
    }
    if let Some(dir) = &options.output_dir {
        args.push("-P".into());
        args.push(dir.display().to_string());
    }
    args.push("-o".into());
    args.push(
        options
            .output_template
            .clone()
            .unwrap_or_else(|| DEFAULT_OUTPUT_TEMPLATE.to_string()),
    );
    if let Some(container) = &options.merge_output_format {
        args.push("--merge-output-format".into());
        args.push(container.clone());
    }
    if let Some(proxy) = &options.proxy {
        args.push("--proxy".into());
        args.push(proxy.clone());
    }
    if let Some(rate) = options.rate_limit_bps {
        args.push("--limit-rate".into());
        args.push(rate.to_string());
    }

    args.push("--".into());
    args.push(target.to_string());
    args
}

/// Command line for a flat listing of a playlist or channel
pub(crate) fn build_list_args(target: &str, range: Option<&RangeSpec>) -> Vec<String> {
    let mut args = vec![
        "--flat-playlist".to_string(),
        "--dump-json".to_string(),
        "--ignore-errors".to_string(),
    ];
    if let Some(range) = range {
        args.push("--playlist-items".into());
        args.push(range.to_string());
    }
    args.push("--".into());
    args.push(target.to_string());
    args
}

/// Turn captured listing output into members and per-entry errors
///
/// A failed run that still produced members is a partial success (`--ignore-errors`
/// exits non-zero when any entry failed).
pub(crate) fn listing_from_output(
    stdout: &str,
    stderr: &str,
    success: bool,
    exit_code: Option<i32>,
) -> Result<Listing, FetchError> {
    let mut listing = Listing::default();

    // Output order says nothing about container position once a range is applied
    for line in stdout.lines().filter(|line| !line.trim().is_empty()) {
        match parse_listing_line(line) {
            Ok(member) => listing.members.push(member),
            Err(message) => listing.errors.push(EnumerationError {
                index: None,
                target: None,
                message,
            }),
        }
    }

    if !success && listing.members.is_empty() {
        let lines: Vec<String> = stderr.lines().map(str::to_string).collect();
        return Err(classify_failure(&lines, exit_code));
    }

    listing
        .errors
        .extend(stderr.lines().filter_map(parse_error_line).map(|message| {
            EnumerationError {
                index: None,
                target: None,
                message: message.to_string(),
            }
        }));

    Ok(listing)
}
