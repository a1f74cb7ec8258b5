//! Startup and shutdown coordination.

use std::sync::atomic::Ordering;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::task::StopRequest;
use crate::types::{Event, TaskState};

use super::DownloadEngine;

/// Interval between idle checks in [`DownloadEngine::wait_for_idle`]
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(10);

impl DownloadEngine {
    /// Spawn the worker pool
    ///
    /// Spawns exactly `max_workers` long-lived workers. Calling `start` again is a
    /// no-op. Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `Error::ShuttingDown` once [`DownloadEngine::shutdown`] has begun.
    pub fn start(&self) -> Result<()> {
        if !self.pool.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }
        if self.pool.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let max_workers = self.config.scheduler.max_workers;
        {
            let mut workers = self.pool.workers.lock();
            for worker in 0..max_workers {
                workers.push(self.spawn_worker(worker));
            }
        }

        tracing::info!(
            workers = max_workers,
            fetcher = self.collaborators.fetcher.name(),
            history = self.collaborators.history.name(),
            "Engine started"
        );
        Ok(())
    }

    /// Gracefully shut down the engine
    ///
    /// 1. Stops accepting submissions (`Error::ShuttingDown` from then on)
    /// 2. Signals every running task; those without a caller request settle as Paused
    /// 3. Cancels pending retry timers (their tasks stay Failed with `next_retry_at` set)
    /// 4. Waits for workers to exit, up to `shutdown_timeout`
    /// 5. Emits `Event::Shutdown`
    ///
    /// Pending and paused tasks are left as they are; none of these leftovers hold up
    /// [`DownloadEngine::wait_for_idle`]. Calling `shutdown` again is a no-op.
    pub async fn shutdown(&self) -> Result<()> {
        if !self.pool.accepting_new.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        tracing::info!("Initiating graceful shutdown");

        let running = {
            let mut state = self.state.write();
            let mut running = 0;
            for task in state.tasks.values_mut() {
                if task.state == TaskState::Running {
                    running += 1;
                    if task.stop_request.is_none() {
                        task.stop_request = Some(StopRequest::Pause);
                    }
                }
            }
            running
        };
        tracing::debug!(running, "Signalling running tasks");

        // Parent of every attempt and retry-timer token
        self.pool.shutdown.cancel();

        let handles: Vec<_> = std::mem::take(&mut *self.pool.workers.lock());
        let timeout = self.config.scheduler.shutdown_timeout;

        match tokio::time::timeout(timeout, futures::future::join_all(handles)).await {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        tracing::warn!(error = %e, "Worker ended abnormally");
                    }
                }
                tracing::info!("All workers stopped");
            }
            Err(_) => {
                tracing::warn!(
                    timeout_secs = timeout.as_secs(),
                    "Timeout waiting for workers to stop, proceeding with shutdown"
                );
            }
        }

        self.emit_event(Event::Shutdown);
        tracing::info!("Graceful shutdown complete");
        Ok(())
    }

    /// Whether [`DownloadEngine::shutdown`] has begun
    pub fn is_shutting_down(&self) -> bool {
        !self.pool.accepting_new.load(Ordering::SeqCst)
    }

    /// Wait until no task is pending, running, or waiting on a retry timer
    ///
    /// Paused tasks do not count as outstanding work. Terminal tasks count until
    /// their history record is written and they leave the active registry. Once
    /// shutdown has begun, nothing will pick up pending tasks or fire retry timers,
    /// so only running and settling tasks count.
    pub async fn wait_for_idle(&self) {
        loop {
            let busy = {
                let dispatching = !self.pool.shutdown.is_cancelled();
                let state = self.state.read();
                state.tasks.values().any(|task| {
                    task.state == TaskState::Running
                        || task.is_terminal()
                        || (dispatching
                            && (task.state == TaskState::Pending || task.is_retry_waiting()))
                })
            };
            if !busy {
                return;
            }
            tokio::time::sleep(IDLE_POLL_INTERVAL).await;
        }
    }
}
