//! Shared mock collaborators and engine builders for engine tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::watch;

use crate::config::Config;
use crate::engine::{Collaborators, DownloadEngine};
use crate::error::{Error, FetchError, Result};
use crate::fetch::{
    FetchOutput, FetchRequest, Fetcher, ListRequest, ListedMember, Listing, MemberLister,
    ProgressSink, ProgressUpdate,
};
use crate::history::{HistoryStore, MemoryHistory};
use crate::range::RangeSpec;
use crate::types::{EnumerationError, Event, TaskId, TaskSnapshot, TaskState};

/// Config with millisecond-scale timers and no jitter
pub(crate) fn test_config() -> Config {
    let mut config = Config::default();
    config.scheduler.max_workers = 2;
    config.scheduler.queue_poll_interval = Duration::from_millis(20);
    config.scheduler.shutdown_timeout = Duration::from_secs(5);
    config.retry.max_retries = 3;
    config.retry.initial_delay = Duration::from_millis(10);
    config.retry.max_delay = Duration::from_millis(40);
    config.retry.jitter = false;
    config
}

/// Engine plus handles on its in-memory collaborators
pub(crate) struct TestEngine {
    pub(crate) engine: DownloadEngine,
    pub(crate) history: Arc<MemoryHistory>,
    pub(crate) lister: Arc<MockLister>,
}

/// Build an engine around `fetcher` with in-memory history and an empty lister
pub(crate) fn create_test_engine(config: Config, fetcher: Arc<dyn Fetcher>) -> TestEngine {
    create_test_engine_with(config, fetcher, Arc::new(MemoryHistory::new()))
}

pub(crate) fn create_test_engine_with(
    config: Config,
    fetcher: Arc<dyn Fetcher>,
    history: Arc<MemoryHistory>,
) -> TestEngine {
    let lister = Arc::new(MockLister::new(Listing::default()));
    let engine = DownloadEngine::new(
        config,
        Collaborators::new(fetcher, lister.clone(), history.clone()),
    )
    .unwrap();
    TestEngine {
        engine,
        history,
        lister,
    }
}

/// Poll `condition` every few milliseconds; panic after five seconds
pub(crate) async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not met within 5s");
}

/// Wait for a task to reach `state`
pub(crate) async fn wait_for_state(engine: &DownloadEngine, id: TaskId, state: TaskState) {
    wait_until(|| engine.get_status(id).is_ok_and(|s| s.state == state)).await;
}

/// Wait for a task to settle terminally and return its final snapshot
pub(crate) async fn wait_for_terminal(engine: &DownloadEngine, id: TaskId) -> TaskSnapshot {
    wait_until(|| engine.get_status(id).is_ok_and(|s| s.is_terminal())).await;
    engine.get_status(id).unwrap()
}

/// Fetcher that replays scripted outcomes per target
///
/// Targets without a script (or whose script ran out) succeed.
#[derive(Default)]
pub(crate) struct ScriptedFetcher {
    scripts: Mutex<HashMap<String, VecDeque<std::result::Result<FetchOutput, FetchError>>>>,
    panics: Mutex<HashSet<String>>,
    calls: Mutex<Vec<(String, u32)>>,
    progress: Vec<f64>,
    delay: Duration,
}

impl ScriptedFetcher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Report these fractions before returning
    pub(crate) fn with_progress(mut self, steps: Vec<f64>) -> Self {
        self.progress = steps;
        self
    }

    /// Hold every call for `delay` (cut short by cancellation)
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn script(
        &self,
        target: &str,
        outcomes: Vec<std::result::Result<FetchOutput, FetchError>>,
    ) {
        self.scripts
            .lock()
            .insert(target.to_string(), outcomes.into());
    }

    /// Fail every attempt on `target` with `error`
    pub(crate) fn always_fail(&self, target: &str, error: FetchError) {
        self.script(target, vec![Err(error); 64]);
    }

    pub(crate) fn panic_on(&self, target: &str) {
        self.panics.lock().insert(target.to_string());
    }

    /// (target, attempt) of every call, in call order
    pub(crate) fn calls(&self) -> Vec<(String, u32)> {
        self.calls.lock().clone()
    }

    pub(crate) fn targets(&self) -> Vec<String> {
        self.calls.lock().iter().map(|(t, _)| t.clone()).collect()
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(
        &self,
        request: FetchRequest,
        progress: ProgressSink,
    ) -> std::result::Result<FetchOutput, FetchError> {
        self.calls
            .lock()
            .push((request.target.clone(), request.attempt));

        if self.panics.lock().contains(&request.target) {
            panic!("scripted panic for {}", request.target);
        }

        for step in &self.progress {
            progress.report(ProgressUpdate {
                fraction: *step,
                rate_bps: Some(1024),
                eta_secs: Some(1),
            });
        }

        if !self.delay.is_zero() {
            tokio::select! {
                _ = request.cancel.cancelled() => return Err(FetchError::Cancelled),
                _ = tokio::time::sleep(self.delay) => {}
            }
        }

        let next = self
            .scripts
            .lock()
            .get_mut(&request.target)
            .and_then(VecDeque::pop_front);
        next.unwrap_or_else(|| {
            Ok(FetchOutput {
                output_path: Some(format!("/dl/{}.mp4", request.task_id).into()),
            })
        })
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Fetcher that blocks every call until the gate opens or the call is cancelled
///
/// Tracks how many calls run at once, overall and per target.
pub(crate) struct GatedFetcher {
    gate: watch::Sender<bool>,
    running: AtomicUsize,
    max_running: AtomicUsize,
    per_target: Mutex<HashMap<String, usize>>,
    overlap: AtomicBool,
    started: Mutex<Vec<String>>,
    completed: Mutex<Vec<String>>,
}

impl GatedFetcher {
    pub(crate) fn new() -> Self {
        let (gate, _) = watch::channel(false);
        Self {
            gate,
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
            per_target: Mutex::new(HashMap::new()),
            overlap: AtomicBool::new(false),
            started: Mutex::new(Vec::new()),
            completed: Mutex::new(Vec::new()),
        }
    }

    /// Let every blocked and future call succeed
    pub(crate) fn open(&self) {
        self.gate.send_replace(true);
    }

    pub(crate) fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    pub(crate) fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    /// Whether one target was ever fetched by two calls at once
    pub(crate) fn saw_overlap(&self) -> bool {
        self.overlap.load(Ordering::SeqCst)
    }

    pub(crate) fn started(&self) -> Vec<String> {
        self.started.lock().clone()
    }

    pub(crate) fn completed(&self) -> Vec<String> {
        self.completed.lock().clone()
    }
}

#[async_trait]
impl Fetcher for GatedFetcher {
    async fn fetch(
        &self,
        request: FetchRequest,
        progress: ProgressSink,
    ) -> std::result::Result<FetchOutput, FetchError> {
        let target = request.target.clone();
        {
            let mut per_target = self.per_target.lock();
            let count = per_target.entry(target.clone()).or_insert(0);
            *count += 1;
            if *count > 1 {
                self.overlap.store(true, Ordering::SeqCst);
            }
        }
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
        self.started.lock().push(target.clone());

        progress.report(ProgressUpdate::fraction(0.1));

        let mut gate = self.gate.subscribe();
        let result = tokio::select! {
            _ = request.cancel.cancelled() => Err(FetchError::Cancelled),
            opened = gate.wait_for(|open| *open) => {
                if opened.is_ok() {
                    self.completed.lock().push(target.clone());
                    Ok(FetchOutput::default())
                } else {
                    Err(FetchError::Cancelled)
                }
            }
        };

        self.running.fetch_sub(1, Ordering::SeqCst);
        if let Some(count) = self.per_target.lock().get_mut(&target) {
            *count -= 1;
        }
        result
    }

    fn name(&self) -> &'static str {
        "gated"
    }
}

/// Lister returning a fixed listing and recording requests
pub(crate) struct MockLister {
    result: Mutex<std::result::Result<Listing, FetchError>>,
    requests: Mutex<Vec<(String, Option<RangeSpec>)>>,
}

impl MockLister {
    pub(crate) fn new(listing: Listing) -> Self {
        Self {
            result: Mutex::new(Ok(listing)),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn set_listing(&self, listing: Listing) {
        *self.result.lock() = Ok(listing);
    }

    pub(crate) fn set_error(&self, error: FetchError) {
        *self.result.lock() = Err(error);
    }

    pub(crate) fn requests(&self) -> Vec<(String, Option<RangeSpec>)> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl MemberLister for MockLister {
    async fn list_members(
        &self,
        request: ListRequest,
    ) -> std::result::Result<Listing, FetchError> {
        self.requests
            .lock()
            .push((request.target.clone(), request.range.clone()));
        self.result.lock().clone()
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Listing of `count` members at `https://example.com/v/<index>`; `failing`
/// indices become enumeration errors instead
pub(crate) fn playlist(count: usize, failing: &[usize]) -> Listing {
    let mut listing = Listing::default();
    for index in 1..=count {
        if failing.contains(&index) {
            listing.errors.push(EnumerationError {
                index: Some(index),
                target: None,
                message: format!("entry {index} is private"),
            });
        } else {
            listing.members.push(ListedMember {
                index: Some(index),
                target: member_url(index),
                title: Some(format!("Video {index}")),
            });
        }
    }
    listing
}

pub(crate) fn member_url(index: usize) -> String {
    format!("https://example.com/v/{index}")
}

/// History whose every call fails
pub(crate) struct BrokenHistory;

#[async_trait]
impl HistoryStore for BrokenHistory {
    async fn is_duplicate(&self, _target: &str) -> Result<bool> {
        Err(Error::Other("history offline".into()))
    }

    async fn record_result(&self, _task: &TaskSnapshot) -> Result<()> {
        Err(Error::Other("history offline".into()))
    }

    fn name(&self) -> &'static str {
        "broken"
    }
}

/// Everything already delivered to `rx`
pub(crate) fn drain_events(rx: &mut tokio::sync::broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Run `wait_for_idle` with a five-second limit
pub(crate) async fn settle(engine: &DownloadEngine) {
    tokio::time::timeout(Duration::from_secs(5), engine.wait_for_idle())
        .await
        .expect("engine did not become idle within 5s");
}
