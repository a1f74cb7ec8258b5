//! # vidqueue
//!
//! Priority task scheduler and bounded worker pool for video download jobs.
//!
//! ## Design Philosophy
//!
//! vidqueue is designed to be:
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Collaborator-driven** - Fetching, playlist listing and history sit behind traits;
//!   yt-dlp and SQLite are the defaults, mocks slot in for tests
//! - **Event-driven** - Consumers subscribe to events, no polling required
//! - **Bounded** - At most `max_workers` fetches run at once, however much is queued
//!
//! ## Quick Start
//!
//! ```no_run
//! use vidqueue::{Config, DownloadEngine};
//! use vidqueue::types::TaskOptions;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Config::default();
//!     config.scheduler.max_workers = 4;
//!
//!     let engine = DownloadEngine::from_config(config).await?;
//!     engine.start()?;
//!
//!     // Subscribe to events
//!     let mut events = engine.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     engine
//!         .submit_batch(
//!             "https://www.youtube.com/playlist?list=PLxyz",
//!             5,
//!             TaskOptions::default(),
//!             Some("1-10".parse()?),
//!         )
//!         .await?;
//!
//!     vidqueue::run_with_shutdown(engine).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// SQLite download history
pub mod db;
/// Scheduler, worker pool and control surface
pub mod engine;
/// Error types
pub mod error;
/// Fetch and listing collaborators (yt-dlp)
pub mod fetch;
/// History collaborator trait and in-memory implementation
pub mod history;
/// Playlist item ranges
pub mod range;
/// Retry logic with exponential backoff
pub mod retry;
/// Core types
pub mod types;

mod task;

// Re-export commonly used types
pub use config::Config;
pub use db::{Database, HistoryEntry};
pub use engine::{Collaborators, DownloadEngine};
pub use error::{DatabaseError, Error, FetchError, Result, TaskError};
pub use fetch::{Fetcher, MemberLister, YtDlp};
pub use history::{HistoryStore, MemoryHistory};
pub use range::RangeSpec;
pub use types::{
    Event, FormatSelector, Priority, QueueStats, SubmitOutcome, TaskId, TaskOptions,
    TaskSnapshot, TaskState,
};

/// Run the engine until a termination signal arrives, then shut it down gracefully.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use vidqueue::{Config, DownloadEngine, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let engine = DownloadEngine::from_config(Config::default()).await?;
///     engine.start()?;
///
///     // Run with automatic signal handling
///     run_with_shutdown(engine).await?;
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(engine: DownloadEngine) -> Result<()> {
    wait_for_signal().await;
    engine.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration can fail in restricted environments (containers, tests)
    match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM signal"),
                _ = sigint.recv() => tracing::info!("Received SIGINT signal (Ctrl+C)"),
            }
        }
        (Err(e), Ok(mut sigint)) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            sigint.recv().await;
            tracing::info!("Received SIGINT signal (Ctrl+C)");
        }
        (Ok(mut sigterm), Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            sigterm.recv().await;
            tracing::info!("Received SIGTERM signal");
        }
        (Err(e), Err(_)) => {
            tracing::error!(error = %e, "Could not register any signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl+C signal"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl+C signal"),
    }
}
