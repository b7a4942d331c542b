//! Shutdown coordination.

use std::sync::atomic::Ordering;
use std::time::Duration;

use crate::error::Result;
use crate::signal::Signal;
use crate::state::DownloadState;
use crate::types::{Event, Status};

use super::ChapterDownloader;

/// Interval between checks while waiting for the scheduler to exit
const SCHEDULER_POLL_INTERVAL: Duration = Duration::from_millis(10);

impl ChapterDownloader {
    /// Gracefully shut down the downloader
    ///
    /// This method performs a graceful shutdown sequence:
    /// 1. Stops accepting new work and waits for the scheduler loop to exit
    /// 2. Writes a stop marker for every running download and asks its worker to stop
    /// 3. Waits up to `download.shutdown_grace`, then kills the remaining fetchers
    /// 4. Records interrupted downloads so they resume on the next start
    /// 5. Saves the state file and removes the stop markers
    ///
    /// Returns only after every worker has been joined.
    ///
    /// # Errors
    ///
    /// Returns an error if the final state file write fails. Every other step is
    /// attempted regardless.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        // 1. Stop accepting new work
        self.queue_state
            .accepting_new
            .store(false, Ordering::SeqCst);
        self.wait_for_scheduler().await;
        tracing::info!("Stopped accepting new downloads");

        // 2. Signal running downloads; the worker must know before the fetcher does
        let running = self.processes.tracked_ids().await;
        for id in &running {
            self.processes.request_stop(id).await;
            self.signals.raise(id, Signal::Stop).await;
        }
        tracing::info!(count = running.len(), "Signaled stop to running downloads");

        // 3. Stop, escalate, join
        let joined = self
            .processes
            .shutdown(self.config.download.shutdown_grace)
            .await;
        tracing::debug!(joined, "Download workers joined");

        // 4 + 5. Persist final state
        let result = self.persist_all_state().await;
        if let Err(ref e) = result {
            tracing::error!(error = %e, "Failed to persist final state during shutdown");
        }

        let swept = self.signals.sweep_stop_markers().await;
        tracing::debug!(swept, "Stop markers removed");

        self.emit_event(Event::Shutdown);
        tracing::info!("Graceful shutdown complete");
        result
    }

    async fn wait_for_scheduler(&self) {
        let wait = async {
            while self.queue_state.scheduler_running.load(Ordering::SeqCst) {
                tokio::time::sleep(SCHEDULER_POLL_INTERVAL).await;
            }
        };
        if tokio::time::timeout(self.config.download.shutdown_grace, wait)
            .await
            .is_err()
        {
            tracing::warn!("Timeout waiting for scheduler to stop");
        }
    }

    /// Save every task so that unfinished work resumes on the next start
    ///
    /// Tasks still marked active here never got a worker (shutdown raced with their
    /// activation); they are recorded as resumable like queued ones.
    pub(crate) async fn persist_all_state(&self) -> Result<()> {
        let states: Vec<DownloadState> = {
            let tasks = self.queue_state.tasks.lock().await;
            tasks
                .iter()
                .filter(|t| matches!(t.status, Status::Queued | Status::Active))
                .map(DownloadState::from_task)
                .collect()
        };
        let count = states.len();

        let mut store = self.store.lock().await;
        for state in states {
            store.update_state(state).await?;
        }
        store.save_all().await?;

        tracing::info!(persisted_count = count, "Final state persisted");
        Ok(())
    }
}
