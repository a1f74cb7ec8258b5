//! Traits and types shared by fetch and listing collaborators

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::FetchError;
use crate::range::RangeSpec;
use crate::types::{EnumerationError, TaskId, TaskOptions};

/// Everything a fetcher needs for one attempt
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// Task being executed
    pub task_id: TaskId,
    /// Target URL
    pub target: String,
    /// Options frozen at submission
    pub options: Arc<TaskOptions>,
    /// Retry number of this attempt (0 for the first run)
    pub attempt: u32,
    /// Fires when the task is paused, cancelled, or the engine shuts down
    pub cancel: CancellationToken,
}

/// Result of a successful fetch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchOutput {
    /// Final file written by the fetcher, when known
    pub output_path: Option<PathBuf>,
}

/// A single progress report
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProgressUpdate {
    /// Completed fraction of the current attempt (clamped to 0.0..=1.0 by the engine)
    pub fraction: f64,
    /// Transfer rate hint in bytes per second
    pub rate_bps: Option<u64>,
    /// Remaining-time hint in seconds
    pub eta_secs: Option<u64>,
}

impl ProgressUpdate {
    /// Report a bare fraction with no rate or eta hints
    pub fn fraction(fraction: f64) -> Self {
        Self {
            fraction,
            ..Default::default()
        }
    }
}

/// Callback handed to a fetcher for progress reports
///
/// Reporting never blocks on the engine; late reports after the attempt has settled
/// are ignored.
#[derive(Clone)]
pub struct ProgressSink {
    report: Arc<dyn Fn(ProgressUpdate) + Send + Sync>,
}

impl ProgressSink {
    /// Wrap a reporting closure
    pub fn new(report: impl Fn(ProgressUpdate) + Send + Sync + 'static) -> Self {
        Self {
            report: Arc::new(report),
        }
    }

    /// A sink that drops every report
    pub fn noop() -> Self {
        Self::new(|_| {})
    }

    /// Forward one report
    pub fn report(&self, update: ProgressUpdate) {
        (self.report)(update);
    }
}

impl std::fmt::Debug for ProgressSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressSink").finish_non_exhaustive()
    }
}

/// Downloads one target
///
/// Implementations must observe `request.cancel` promptly and return
/// [`FetchError::Cancelled`] when it fires. The engine enforces nothing beyond
/// waiting for the call to return.
///
/// # Examples
///
/// ```no_run
/// use vidqueue::fetch::{Fetcher, FetchRequest, ProgressSink, YtDlp};
/// use vidqueue::types::{TaskId, TaskOptions};
/// use tokio_util::sync::CancellationToken;
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let fetcher = YtDlp::from_path().ok_or("yt-dlp not found")?;
/// let request = FetchRequest {
///     task_id: TaskId::new(),
///     target: "https://www.youtube.com/watch?v=dQw4w9WgXcQ".to_string(),
///     options: Arc::new(TaskOptions::default()),
///     attempt: 0,
///     cancel: CancellationToken::new(),
/// };
/// let output = fetcher.fetch(request, ProgressSink::noop()).await?;
/// println!("saved to {:?}", output.output_path);
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Run one fetch attempt
    async fn fetch(
        &self,
        request: FetchRequest,
        progress: ProgressSink,
    ) -> Result<FetchOutput, FetchError>;

    /// Name of this implementation, for logging
    fn name(&self) -> &'static str;
}

/// Parameters for enumerating a playlist or channel
#[derive(Debug, Clone)]
pub struct ListRequest {
    /// Container URL
    pub target: String,
    /// Restrict the listing to these 1-based positions
    pub range: Option<RangeSpec>,
    /// Fires when the engine shuts down
    pub cancel: CancellationToken,
}

/// One member of a playlist or channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedMember {
    /// 1-based position in the container, when the listing reports one
    ///
    /// Never guessed from output order: a ranged listing only returns the
    /// selected entries, so line numbers do not match container positions.
    pub index: Option<usize>,
    /// Member URL
    pub target: String,
    /// Title, when the listing includes one
    pub title: Option<String>,
}

/// Members of a container plus the entries that could not be read
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    /// Members in container order
    pub members: Vec<ListedMember>,
    /// Per-member failures
    pub errors: Vec<EnumerationError>,
}

/// Enumerates the members of a playlist or channel without downloading them
#[async_trait]
pub trait MemberLister: Send + Sync {
    /// List members in flat mode
    ///
    /// Returns `Err` only when the container itself cannot be read. Individual
    /// members that fail are reported in [`Listing::errors`].
    async fn list_members(&self, request: ListRequest) -> Result<Listing, FetchError>;

    /// Name of this implementation, for logging
    fn name(&self) -> &'static str;
}
