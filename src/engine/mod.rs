//! Scheduling engine split into focused submodules.
//!
//! The `DownloadEngine` struct and its methods are organized by domain:
//! - [`queue`] - Priority queue of pending tasks
//! - [`state`] - Task registry and finished-task retention
//! - [`submit`] - Submission, playlist expansion and duplicate suppression
//! - [`worker`] - Long-lived worker loops
//! - [`execution`] - Claiming, running and settling one attempt
//! - [`control`] - Pause/resume/cancel, priority changes and status queries
//! - [`lifecycle`] - Startup and shutdown coordination

mod control;
mod execution;
mod lifecycle;
mod queue;
mod state;
mod submit;
mod worker;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tokio::sync::{Notify, broadcast};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::db::Database;
use crate::error::Result;
use crate::fetch::{Fetcher, MemberLister, ToolUnavailable, YtDlp};
use crate::history::HistoryStore;
use crate::types::Event;

use state::SchedulerState;

/// The external systems the engine drives
#[derive(Clone)]
pub struct Collaborators {
    /// Executes downloads
    pub fetcher: Arc<dyn Fetcher>,
    /// Enumerates playlists and channels
    pub lister: Arc<dyn MemberLister>,
    /// Duplicate lookups and terminal records
    pub history: Arc<dyn HistoryStore>,
}

impl Collaborators {
    /// Bundle explicit collaborator implementations
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        lister: Arc<dyn MemberLister>,
        history: Arc<dyn HistoryStore>,
    ) -> Self {
        Self {
            fetcher,
            lister,
            history,
        }
    }

    /// Production collaborators: yt-dlp for fetching and listing, SQLite for history
    ///
    /// Falls back to [`ToolUnavailable`] when yt-dlp is neither configured nor on PATH,
    /// so the engine still starts and reports a clear error per task.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let history: Arc<dyn HistoryStore> =
            Arc::new(Database::new(&config.persistence.database_path).await?);

        let (fetcher, lister): (Arc<dyn Fetcher>, Arc<dyn MemberLister>) =
            match YtDlp::from_config(&config.tools) {
                Some(ytdlp) => {
                    let ytdlp = Arc::new(ytdlp.with_list_retry(config.retry.clone()));
                    (ytdlp.clone(), ytdlp)
                }
                None => {
                    tracing::warn!("yt-dlp not found; downloads will fail until it is installed");
                    (Arc::new(ToolUnavailable), Arc::new(ToolUnavailable))
                }
            };

        tracing::info!(
            fetcher = fetcher.name(),
            lister = lister.name(),
            history = history.name(),
            "Collaborators initialized"
        );

        Ok(Self::new(fetcher, lister, history))
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("fetcher", &self.fetcher.name())
            .field("lister", &self.lister.name())
            .field("history", &self.history.name())
            .finish()
    }
}

/// Worker pool coordination handles
#[derive(Clone)]
pub(crate) struct WorkerPool {
    /// Wakes idle workers when tasks become pending
    pub(crate) work_available: Arc<Notify>,
    /// Parent of every attempt and retry-timer token
    pub(crate) shutdown: CancellationToken,
    /// Flag to indicate whether new submissions are accepted (false during shutdown)
    pub(crate) accepting_new: Arc<AtomicBool>,
    pub(crate) started: Arc<AtomicBool>,
    pub(crate) workers: Arc<parking_lot::Mutex<Vec<JoinHandle<()>>>>,
}

/// Task scheduler with a bounded worker pool (cloneable - all fields are Arc-wrapped)
///
/// # Examples
///
/// ```no_run
/// use vidqueue::{Config, DownloadEngine};
/// use vidqueue::types::TaskOptions;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let engine = DownloadEngine::from_config(Config::default()).await?;
///     engine.start()?;
///
///     let mut events = engine.subscribe();
///     tokio::spawn(async move {
///         while let Ok(event) = events.recv().await {
///             println!("{:?}", event);
///         }
///     });
///
///     let outcome = engine
///         .submit("https://www.youtube.com/watch?v=dQw4w9WgXcQ", 5, TaskOptions::default())
///         .await?;
///     println!("created {:?}", outcome.created);
///
///     engine.shutdown().await?;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct DownloadEngine {
    pub(crate) config: Arc<Config>,
    /// Queue and registry; never held across an await
    pub(crate) state: Arc<RwLock<SchedulerState>>,
    pub(crate) event_tx: broadcast::Sender<Event>,
    pub(crate) collaborators: Collaborators,
    pub(crate) pool: WorkerPool,
}

impl DownloadEngine {
    /// Create an engine around the given collaborators
    ///
    /// Validates the configuration. Workers are not spawned until [`DownloadEngine::start`];
    /// submissions made before that simply wait in the queue.
    pub fn new(config: Config, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;

        let (event_tx, _rx) = broadcast::channel(config.scheduler.event_buffer);
        let state = SchedulerState::new(config.scheduler.finished_retention);

        let pool = WorkerPool {
            work_available: Arc::new(Notify::new()),
            shutdown: CancellationToken::new(),
            accepting_new: Arc::new(AtomicBool::new(true)),
            started: Arc::new(AtomicBool::new(false)),
            workers: Arc::new(parking_lot::Mutex::new(Vec::new())),
        };

        Ok(Self {
            config: Arc::new(config),
            state: Arc::new(RwLock::new(state)),
            event_tx,
            collaborators,
            pool,
        })
    }

    /// Create an engine with the production collaborators described by `config`
    pub async fn from_config(config: Config) -> Result<Self> {
        let collaborators = Collaborators::from_config(&config).await?;
        Self::new(config, collaborators)
    }

    /// Subscribe to task events
    ///
    /// Multiple subscribers are supported. Each subscriber receives all events independently.
    ///
    /// Delivery is bounded, not guaranteed: a subscriber that falls more than
    /// `event_buffer` events behind receives `RecvError::Lagged(n)` and the `n`
    /// overwritten events are lost for it. After a lag, re-sync from
    /// [`DownloadEngine::list_active`] and [`DownloadEngine::get_status`].
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Events as a stream
    ///
    /// Same delivery as [`DownloadEngine::subscribe`], except a lag is logged and
    /// skipped silently, so the stream never tells the consumer which events it
    /// lost. Consumers that must not miss a transition should poll
    /// [`DownloadEngine::get_status`] after a gap or use `subscribe` directly.
    pub fn event_stream(&self) -> impl tokio_stream::Stream<Item = Event> + Send + Unpin + 'static {
        use tokio_stream::StreamExt;

        BroadcastStream::new(self.event_tx.subscribe()).filter_map(|item| match item {
            Ok(event) => Some(event),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event stream subscriber lagged");
                None
            }
        })
    }

    /// Get the current configuration
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Emit an event to all subscribers
    ///
    /// Dropped silently when nobody is listening.
    pub(crate) fn emit_event(&self, event: Event) {
        self.event_tx.send(event).ok();
    }
}
