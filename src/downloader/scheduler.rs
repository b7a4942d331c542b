//! Scheduler loop: activates queued tasks up to the concurrency limit.

use std::sync::atomic::Ordering;

use crate::types::{ContentType, DownloadId, Status};

use super::ChapterDownloader;
use super::process::WorkerSignals;
use super::worker::{WorkerContext, run_worker};

impl ChapterDownloader {
    /// Start the scheduler loop unless one is already running
    ///
    /// The loop polls every `download.poll_interval` and exits on its own once
    /// nothing is queued or running; enqueueing work starts it again.
    pub(crate) fn ensure_scheduler(&self) {
        if !self.is_accepting() {
            return;
        }
        if self
            .queue_state
            .scheduler_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        tracing::debug!("Scheduler started");
        let downloader = self.clone();
        tokio::spawn(async move {
            downloader.run_scheduler().await;
        });
    }

    async fn run_scheduler(self) {
        let poll_interval = self.config.download.poll_interval;

        loop {
            if !self.is_accepting() {
                break;
            }

            if self.schedule_tick().await {
                break;
            }

            tokio::time::sleep(poll_interval).await;
        }

        self.queue_state
            .scheduler_running
            .store(false, Ordering::SeqCst);
        tracing::debug!("Scheduler stopped");

        // Work may have been queued between the idle check and clearing the flag.
        if self.is_accepting() && self.has_queued().await {
            self.ensure_scheduler();
        }
    }

    async fn has_queued(&self) -> bool {
        self.queue_state
            .tasks
            .lock()
            .await
            .iter()
            .any(|t| t.status == Status::Queued)
    }

    /// One scheduling pass; returns true when there is nothing left to do
    ///
    /// Joins finished workers, drops completed tasks from the list, then activates
    /// queued tasks in FIFO order while fewer than `max_concurrent_downloads`
    /// workers are running.
    pub(crate) async fn schedule_tick(&self) -> bool {
        self.processes.reap_finished().await;

        let running = self.processes.active_count().await;
        let tracked = self.processes.tracked_ids().await;
        let limit = self.config.download.max_concurrent_downloads;

        let (to_start, idle): (Vec<(DownloadId, String, ContentType)>, bool) = {
            let mut tasks = self.queue_state.tasks.lock().await;
            tasks.retain(|t| t.status != Status::Complete);

            let mut slots = limit.saturating_sub(running);
            let mut to_start = Vec::new();
            for task in tasks.iter_mut() {
                if slots == 0 {
                    break;
                }
                // A paused worker may still be draining under the same id.
                if task.status != Status::Queued || tracked.contains(&task.id) {
                    continue;
                }
                if task.transition(Status::Active) {
                    to_start.push((task.id.clone(), task.content_name.clone(), task.content_type));
                    slots -= 1;
                }
            }

            let idle = running == 0
                && to_start.is_empty()
                && !tasks
                    .iter()
                    .any(|t| matches!(t.status, Status::Queued | Status::Active));
            (to_start, idle)
        };

        for (id, content_name, content_type) in to_start {
            if !self.is_accepting() {
                tracing::debug!(download_id = %id, "Shutting down, not starting download");
                break;
            }
            let signals = WorkerSignals::default();
            let ctx = WorkerContext {
                id: id.clone(),
                downloader: self.clone(),
                signals: signals.clone(),
            };
            let registered = self
                .processes
                .register(id.clone(), content_name, content_type, signals, run_worker(ctx))
                .await;
            if registered {
                tracing::debug!(download_id = %id, "Download activated");
            }
        }

        idle
    }
}
