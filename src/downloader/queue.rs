//! Task list management and startup restore.

use crate::error::{DownloadError, Error, Result};
use crate::state::DownloadState;
use crate::types::{DownloadId, DownloadTask, Event, Status};

use super::ChapterDownloader;

impl ChapterDownloader {
    /// Add a task to the end of the queue
    ///
    /// Returns false, without changing anything, when a task with the same id is
    /// already queued, active or paused. A finished task with the same id is replaced.
    /// Starts the scheduler if it is idle.
    pub(crate) async fn enqueue(&self, task: DownloadTask) -> bool {
        let id = task.id.clone();
        let name = task.content_name.clone();
        {
            let mut tasks = self.queue_state.tasks.lock().await;
            match tasks.iter().position(|t| t.id == id) {
                Some(pos) if !tasks[pos].status.is_finished() => {
                    tracing::warn!(
                        download_id = %id,
                        status = %tasks[pos].status,
                        "Download already in queue, ignoring"
                    );
                    return false;
                }
                Some(pos) => {
                    tasks.remove(pos);
                    tasks.push(task);
                }
                None => tasks.push(task),
            }
        }

        tracing::debug!(download_id = %id, "Download queued");
        self.emit_event(Event::Queued { id, name });
        self.ensure_scheduler();
        true
    }

    /// Snapshot of every task, in queue order
    pub async fn tasks(&self) -> Vec<DownloadTask> {
        self.queue_state.tasks.lock().await.clone()
    }

    /// Snapshot of one task
    pub async fn task(&self, id: &DownloadId) -> Option<DownloadTask> {
        self.queue_state
            .tasks
            .lock()
            .await
            .iter()
            .find(|t| &t.id == id)
            .cloned()
    }

    /// Snapshot of every durable state record
    ///
    /// Includes finished and paused downloads that are no longer in the queue.
    pub async fn states(&self) -> Vec<DownloadState> {
        self.store.lock().await.all().to_vec()
    }

    /// Forget a download entirely
    ///
    /// Removes the task from the queue and its record from the state file. An active
    /// download must be paused or cancelled first.
    pub async fn remove(&self, id: &DownloadId) -> Result<()> {
        let in_queue = {
            let mut tasks = self.queue_state.tasks.lock().await;
            match tasks.iter().position(|t| &t.id == id) {
                Some(pos) if tasks[pos].status == Status::Active => {
                    return Err(Error::Download(DownloadError::InvalidState {
                        id: id.to_string(),
                        operation: "remove".to_string(),
                        current_state: tasks[pos].status.to_string(),
                    }));
                }
                Some(pos) => {
                    tasks.remove(pos);
                    true
                }
                None => false,
            }
        };

        let in_store = self.store.lock().await.remove(id).await?.is_some();
        if !in_queue && !in_store {
            return Err(Error::Download(DownloadError::NotFound { id: id.to_string() }));
        }

        self.signals.clear_all(id).await;
        self.emit_event(Event::Removed { id: id.clone() });
        tracing::info!(download_id = %id, "Download removed");
        Ok(())
    }

    /// Re-queue every download that was running or waiting when the last session ended
    ///
    /// Each one continues after its last fetched chapter. Downloads already in the
    /// queue are skipped, so calling this twice queues nothing new. Returns the number
    /// of downloads queued.
    pub async fn restore_queue(&self) -> usize {
        let resumable = self.store.lock().await.resumable();
        if resumable.is_empty() {
            tracing::info!("No interrupted downloads to restore");
            return 0;
        }

        let mut restored = 0;
        for state in resumable {
            if self.task(&state.id).await.is_some() {
                continue;
            }
            let Some(task) = state.to_resumed_task() else {
                tracing::warn!(
                    download_id = %state.id,
                    "Interrupted download has no recorded source, not resuming"
                );
                continue;
            };
            tracing::info!(
                download_id = %state.id,
                from_chapter = task.range.start,
                "Resuming interrupted download"
            );
            if self.enqueue(task).await {
                restored += 1;
            }
        }

        tracing::info!(restored_count = restored, "Queue restoration complete");
        restored
    }
}
