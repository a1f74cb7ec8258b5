//! Configuration types for vidqueue

use crate::error::{Error, Result};
use crate::types::FormatSelector;
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Worker pool and bookkeeping configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Number of long-lived workers (1 to 10, default: 3)
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Capacity of the event broadcast buffer (default: 1000)
    ///
    /// A subscriber that falls further behind than this receives a lag error and
    /// misses the overwritten events.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    /// Number of terminal task snapshots kept for status queries (default: 256)
    #[serde(default = "default_finished_retention")]
    pub finished_retention: usize,

    /// Fallback interval at which idle workers re-check the queue (default: 100 ms)
    #[serde(default = "default_queue_poll_interval", with = "duration_ms_serde")]
    pub queue_poll_interval: Duration,

    /// How long shutdown waits for running tasks to settle (default: 30 seconds)
    #[serde(default = "default_shutdown_timeout", with = "duration_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            event_buffer: default_event_buffer(),
            finished_retention: default_finished_retention(),
            queue_poll_interval: default_queue_poll_interval(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

/// Retry behavior configuration
///
/// Delays are serialized in milliseconds.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of automatic retries per task (default: 3)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry (default: 2 seconds)
    #[serde(default = "default_initial_delay", with = "duration_ms_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_ms_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,

    /// Also retry permanent failures (default: false)
    #[serde(default)]
    pub retry_permanent: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
            retry_permanent: false,
        }
    }
}

/// Duplicate detection configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DuplicateConfig {
    /// Drop submissions whose target already completed according to history (default: true)
    #[serde(default = "default_true")]
    pub skip_duplicates: bool,
}

impl Default for DuplicateConfig {
    fn default() -> Self {
        Self {
            skip_duplicates: true,
        }
    }
}

/// Defaults applied to [`TaskOptions`](crate::types::TaskOptions) fields the caller leaves unset
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadDefaults {
    /// Output directory (default: "./downloads")
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Format selection (default: best)
    #[serde(default)]
    pub format: FormatSelector,

    /// Merge container (default: "mp4")
    #[serde(default = "default_merge_output_format")]
    pub merge_output_format: Option<String>,

    /// Per-attempt timeout (None = unlimited)
    #[serde(default, with = "optional_duration_serde")]
    pub timeout: Option<Duration>,
}

impl Default for DownloadDefaults {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            format: FormatSelector::default(),
            merge_output_format: default_merge_output_format(),
            timeout: None,
        }
    }
}

/// External tool paths
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Path to yt-dlp executable (auto-detected if None)
    #[serde(default)]
    pub ytdlp_path: Option<PathBuf>,

    /// Whether to search PATH for yt-dlp if no explicit path is set (default: true)
    #[serde(default = "default_true")]
    pub search_path: bool,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ytdlp_path: None,
            search_path: true,
        }
    }
}

/// History storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Database path (default: "./vidqueue.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Main configuration for [`DownloadEngine`](crate::DownloadEngine)
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Worker pool settings
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Retry and backoff settings
    #[serde(default)]
    pub retry: RetryConfig,

    /// Duplicate suppression
    #[serde(default)]
    pub duplicates: DuplicateConfig,

    /// Option defaults for new tasks
    #[serde(default)]
    pub download: DownloadDefaults,

    /// External binaries
    #[serde(default)]
    pub tools: ToolsConfig,

    /// History database
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl Config {
    /// Check value ranges that serde cannot express
    pub fn validate(&self) -> Result<()> {
        let workers = self.scheduler.max_workers;
        if !(MIN_WORKERS..=MAX_WORKERS).contains(&workers) {
            return Err(Error::config(
                format!("max_workers must be between {MIN_WORKERS} and {MAX_WORKERS}, got {workers}"),
                "scheduler.max_workers",
            ));
        }
        if self.scheduler.event_buffer == 0 {
            return Err(Error::config(
                "event_buffer must be at least 1",
                "scheduler.event_buffer",
            ));
        }
        if self.scheduler.queue_poll_interval.is_zero() {
            return Err(Error::config(
                "queue_poll_interval must be non-zero",
                "scheduler.queue_poll_interval",
            ));
        }
        let multiplier = self.retry.backoff_multiplier;
        if multiplier.is_nan() || multiplier < 1.0 {
            return Err(Error::config(
                format!("backoff_multiplier must be at least 1.0, got {multiplier}"),
                "retry.backoff_multiplier",
            ));
        }
        if self.retry.initial_delay > self.retry.max_delay {
            return Err(Error::config(
                "initial_delay must not exceed max_delay",
                "retry.initial_delay",
            ));
        }
        Ok(())
    }
}

/// Smallest accepted worker pool
pub const MIN_WORKERS: usize = 1;
/// Largest accepted worker pool
pub const MAX_WORKERS: usize = 10;

fn default_max_workers() -> usize {
    3
}

fn default_event_buffer() -> usize {
    1000
}

fn default_finished_retention() -> usize {
    256
}

fn default_queue_poll_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_merge_output_format() -> Option<String> {
    Some("mp4".to_string())
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./vidqueue.db")
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Duration serialization helper (milliseconds)
mod duration_ms_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

// Optional Duration serialization helper (whole seconds)
pub(crate) mod optional_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&d.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}
