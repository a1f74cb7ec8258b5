//! Long-lived worker loops.

use super::DownloadEngine;

impl DownloadEngine {
    /// Spawn one worker; it runs until the shutdown token fires
    pub(crate) fn spawn_worker(&self, worker: usize) -> tokio::task::JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move { engine.worker_loop(worker).await })
    }

    /// Worker loop
    ///
    /// 1. Registers interest in the work notification (before looking, so a push
    ///    between the look and the wait is not missed)
    /// 2. Claims the highest-priority pending task and runs it to settlement
    /// 3. Otherwise sleeps until notified, the poll interval elapses, or shutdown
    async fn worker_loop(self, worker: usize) {
        let shutdown = self.pool.shutdown.clone();
        let poll_interval = self.config.scheduler.queue_poll_interval;
        tracing::debug!(worker, "Worker started");

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let notified = self.pool.work_available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(claim) = self.claim_next() {
                self.execute(worker, claim).await;
                continue;
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = &mut notified => {}
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }

        tracing::debug!(worker, "Worker stopped");
    }

    /// Wake idle workers
    pub(crate) fn notify_workers(&self) {
        self.pool.work_available.notify_waiters();
    }
}
