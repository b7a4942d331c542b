//! Download commands: start, pause, resume, cancel, retry.

use chrono::Utc;

use crate::error::{DownloadError, Error, Result};
use crate::signal::Signal;
use crate::state::DownloadState;
use crate::types::{DownloadId, DownloadRequest, DownloadTask, Event, Status};

use super::ChapterDownloader;

/// Error recorded on a task cancelled by the user
pub(crate) const CANCELLED_BY_USER: &str = "Cancelled by user";

fn invalid_state(id: &DownloadId, operation: &str, current_state: impl ToString) -> Error {
    Error::Download(DownloadError::InvalidState {
        id: id.to_string(),
        operation: operation.to_string(),
        current_state: current_state.to_string(),
    })
}

fn not_found(id: &DownloadId) -> Error {
    Error::Download(DownloadError::NotFound { id: id.to_string() })
}

/// Status implied by a durable record of a download that is not in the queue
///
/// A finished record is cancelled only when it carries the cancellation note; a
/// completed run may still hold a non-fatal fetcher error.
fn stored_status(state: &DownloadState) -> Status {
    match (state.is_complete, state.is_paused, state.last_error.is_empty()) {
        (true, _, _) if state.last_error == CANCELLED_BY_USER => Status::Cancelled,
        (true, _, _) => Status::Complete,
        (false, true, _) => Status::Paused,
        (false, false, true) => Status::Queued,
        (false, false, false) => Status::Failed,
    }
}

impl ChapterDownloader {
    /// Queue a new download
    ///
    /// Creates the task with a fresh identifier, records its initial state and hands
    /// it to the scheduler.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShuttingDown`] once shutdown has begun.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use chapter_dl::*;
    /// # async fn example(downloader: ChapterDownloader) -> Result<()> {
    /// let id = downloader
    ///     .start(DownloadRequest {
    ///         content_name: "Example".to_string(),
    ///         content_type: ContentType::Novel,
    ///         source: FetchSource::Url("https://example.com/novel/1".to_string()),
    ///         source_name: "ExampleSite".to_string(),
    ///         range: ChapterRange::default(),
    ///         total_chapters: 0,
    ///     })
    ///     .await?;
    /// println!("queued {id}");
    /// # Ok(())
    /// # }
    /// ```
    pub async fn start(&self, request: DownloadRequest) -> Result<DownloadId> {
        if !self.is_accepting() {
            return Err(Error::ShuttingDown);
        }

        let task = DownloadTask::from_request(request, Utc::now());
        let id = task.id.clone();
        let state = DownloadState::from_task(&task);

        if self
            .task(&id)
            .await
            .is_some_and(|t| !t.status.is_finished())
        {
            tracing::warn!(download_id = %id, "Download already in queue, ignoring");
            return Ok(id);
        }

        // Recorded before the scheduler can activate it.
        self.signals.clear_all(&id).await;
        self.flush_state(state).await;
        if self.enqueue(task).await {
            tracing::info!(download_id = %id, "Download started");
        }
        Ok(id)
    }

    /// Pause a download
    ///
    /// A queued download simply stops being eligible. An active one is asked to stop:
    /// its fetcher may finish the current chapter before exiting. Pausing an already
    /// paused download does nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if the download doesn't exist or has already finished.
    pub async fn pause(&self, id: &DownloadId) -> Result<()> {
        let snapshot = {
            let mut tasks = self.queue_state.tasks.lock().await;
            match tasks.iter_mut().find(|t| &t.id == id) {
                Some(task) => match task.status {
                    Status::Paused => return Ok(()),
                    Status::Queued | Status::Active => {
                        task.transition(Status::Paused);
                        Some(DownloadState::from_task(task))
                    }
                    status => return Err(invalid_state(id, "pause", status)),
                },
                None => None,
            }
        };

        let state = match snapshot {
            Some(state) => {
                self.processes.request_stop(id).await;
                state
            }
            None => {
                let store = self.store.lock().await;
                let mut state = store.get(id).cloned().ok_or_else(|| not_found(id))?;
                if state.is_paused {
                    return Ok(());
                }
                if state.is_complete {
                    return Err(invalid_state(id, "pause", stored_status(&state)));
                }
                state.is_paused = true;
                state
            }
        };

        self.signals.raise(id, Signal::Pause).await;
        self.flush_state(state).await;
        self.emit_event(Event::Paused { id: id.clone() });
        tracing::info!(download_id = %id, "Download paused");
        Ok(())
    }

    /// Resume a paused download
    ///
    /// The download is queued again under the same identifier and continues after the
    /// last fetched chapter. Works for downloads paused in an earlier session too.
    /// Resuming a queued or active download does nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if the download doesn't exist, has finished (use
    /// [`ChapterDownloader::retry`]), or lacks the source needed to fetch it again.
    pub async fn resume(&self, id: &DownloadId) -> Result<()> {
        if !self.is_accepting() {
            return Err(Error::ShuttingDown);
        }

        let resumed_in_place = {
            let mut tasks = self.queue_state.tasks.lock().await;
            match tasks.iter_mut().find(|t| &t.id == id) {
                Some(task) => match task.status {
                    Status::Queued | Status::Active => return Ok(()),
                    Status::Paused => {
                        task.range = task.range.continue_after(task.current_chapter);
                        task.last_error.clear();
                        task.output_tail.clear();
                        task.transition(Status::Queued);
                        Some(DownloadState::from_task(task))
                    }
                    status => return Err(invalid_state(id, "resume", status)),
                },
                None => None,
            }
        };

        self.signals.clear(id, Signal::Pause).await;

        match resumed_in_place {
            Some(state) => {
                self.flush_state(state).await;
                self.emit_event(Event::Resumed { id: id.clone() });
                self.ensure_scheduler();
            }
            None => {
                let stored = self
                    .store
                    .lock()
                    .await
                    .get(id)
                    .cloned()
                    .ok_or_else(|| not_found(id))?;
                match stored_status(&stored) {
                    Status::Paused | Status::Queued => {}
                    status => return Err(invalid_state(id, "resume", status)),
                }
                let task = stored.to_resumed_task().ok_or_else(|| {
                    Error::Download(DownloadError::NotResumable {
                        id: id.to_string(),
                        reason: "no source recorded".to_string(),
                    })
                })?;
                let state = DownloadState::from_task(&task);
                self.emit_event(Event::Resumed { id: id.clone() });
                self.flush_state(state).await;
                self.enqueue(task).await;
            }
        }

        tracing::info!(download_id = %id, "Download resumed");
        Ok(())
    }

    /// Cancel a download
    ///
    /// A running fetcher is killed immediately. Already fetched chapters stay on disk
    /// and the content directory gets a `.cancelled` note. Cancelled downloads are not
    /// resumed on restart but can be retried.
    ///
    /// # Errors
    ///
    /// Returns an error if the download doesn't exist, completed, or failed.
    pub async fn cancel(&self, id: &DownloadId) -> Result<()> {
        let snapshot = {
            let mut tasks = self.queue_state.tasks.lock().await;
            match tasks.iter_mut().find(|t| &t.id == id) {
                Some(task) => match task.status {
                    Status::Cancelled => return Ok(()),
                    Status::Queued | Status::Active | Status::Paused => {
                        task.transition(Status::Cancelled);
                        task.last_error = CANCELLED_BY_USER.to_string();
                        Some(DownloadState::from_task(task))
                    }
                    status => return Err(invalid_state(id, "cancel", status)),
                },
                None => None,
            }
        };

        let state = match snapshot {
            Some(state) => {
                self.processes.request_terminate(id).await;
                state
            }
            None => {
                let store = self.store.lock().await;
                let mut state = store.get(id).cloned().ok_or_else(|| not_found(id))?;
                match stored_status(&state) {
                    Status::Cancelled => return Ok(()),
                    Status::Paused | Status::Queued => {}
                    status => return Err(invalid_state(id, "cancel", status)),
                }
                state.is_complete = true;
                state.is_paused = false;
                state.last_error = CANCELLED_BY_USER.to_string();
                state
            }
        };

        self.signals.raise(id, Signal::Cancel).await;
        self.signals
            .mark_cancelled(
                &self.config.fetcher.output_dir,
                &state.content_name,
                state.content_type,
            )
            .await;
        self.flush_state(state).await;
        self.emit_event(Event::Cancelled { id: id.clone() });
        tracing::info!(download_id = %id, "Download cancelled");
        Ok(())
    }

    /// Queue a failed or cancelled download again
    ///
    /// The download keeps its identifier and continues after the last fetched chapter.
    ///
    /// # Errors
    ///
    /// Returns an error if the download doesn't exist, is not failed or cancelled, or
    /// lacks the source needed to fetch it again.
    pub async fn retry(&self, id: &DownloadId) -> Result<()> {
        if !self.is_accepting() {
            return Err(Error::ShuttingDown);
        }

        let requeued_in_place = {
            let mut tasks = self.queue_state.tasks.lock().await;
            match tasks.iter_mut().find(|t| &t.id == id) {
                Some(task) => match task.status {
                    Status::Failed | Status::Cancelled => {
                        task.range = task.range.continue_after(task.current_chapter);
                        task.last_error.clear();
                        task.output_tail.clear();
                        task.transition(Status::Queued);
                        Some((DownloadState::from_task(task), task.content_name.clone()))
                    }
                    status => return Err(invalid_state(id, "retry", status)),
                },
                None => None,
            }
        };

        self.signals.clear_all(id).await;

        match requeued_in_place {
            Some((state, name)) => {
                self.flush_state(state).await;
                self.emit_event(Event::Queued {
                    id: id.clone(),
                    name,
                });
                self.ensure_scheduler();
            }
            None => {
                let stored = self
                    .store
                    .lock()
                    .await
                    .get(id)
                    .cloned()
                    .ok_or_else(|| not_found(id))?;
                match stored_status(&stored) {
                    Status::Failed | Status::Cancelled => {}
                    status => return Err(invalid_state(id, "retry", status)),
                }
                let task = stored.to_resumed_task().ok_or_else(|| {
                    Error::Download(DownloadError::NotResumable {
                        id: id.to_string(),
                        reason: "no source recorded".to_string(),
                    })
                })?;
                let state = DownloadState::from_task(&task);
                self.flush_state(state).await;
                self.enqueue(task).await;
            }
        }

        tracing::info!(download_id = %id, "Download retried");
        Ok(())
    }

    /// Pause every queued and active download
    ///
    /// Failures are logged per download and do not stop the others.
    pub async fn pause_all(&self) {
        let ids: Vec<DownloadId> = self
            .tasks()
            .await
            .into_iter()
            .filter(|t| matches!(t.status, Status::Queued | Status::Active))
            .map(|t| t.id)
            .collect();

        for id in ids {
            if let Err(e) = self.pause(&id).await {
                tracing::warn!(download_id = %id, error = %e, "Failed to pause download");
            }
        }
    }

    /// Resume every paused download, including ones paused in an earlier session
    ///
    /// Failures are logged per download and do not stop the others.
    pub async fn resume_all(&self) {
        let ids: Vec<DownloadId> = self
            .states()
            .await
            .into_iter()
            .filter(|s| s.is_paused && !s.is_complete)
            .map(|s| s.id)
            .collect();

        for id in ids {
            if let Err(e) = self.resume(&id).await {
                tracing::warn!(download_id = %id, error = %e, "Failed to resume download");
            }
        }
    }
}
