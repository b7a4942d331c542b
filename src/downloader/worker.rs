//! One fetcher run for one task: spawn, read output, settle the final status.

use std::time::Duration;

use tokio::time::Instant;

use crate::fetcher::{ExitStatus, FetchProcess};
use crate::progress::{ParsedLine, parse_line};
use crate::signal::Signal;
use crate::state::DownloadState;
use crate::types::{DownloadId, DownloadTask, Event, Status};

use super::ChapterDownloader;
use super::process::WorkerSignals;

/// Message recorded when the fetcher cannot be started
pub(crate) const SPAWN_FAILED: &str = "Failed to start fetcher process";
/// Message recorded when the fetcher fails without printing an error line
pub(crate) const PROCESS_FAILED: &str = "Download process failed";

/// Everything a worker needs
pub(crate) struct WorkerContext {
    pub(crate) id: DownloadId,
    pub(crate) downloader: ChapterDownloader,
    pub(crate) signals: WorkerSignals,
}

/// What the reader loop observed
#[derive(Debug, Default)]
struct RunOutcome {
    saw_complete: bool,
    last_error_line: Option<String>,
    stop_requested: bool,
    killed: bool,
    exit: Option<ExitStatus>,
}

/// Decide whether a finished run fetched what was asked
///
/// A completion marker always counts. Otherwise the process must have exited with
/// code 0 after some progress was made.
pub(crate) fn run_succeeded(
    saw_complete: bool,
    exit: Option<ExitStatus>,
    progress: f32,
) -> bool {
    saw_complete || (exit.is_some_and(ExitStatus::is_success) && progress > 0.0)
}

/// Run the fetcher for the task `ctx.id` until it exits or is told to stop
pub(crate) async fn run_worker(ctx: WorkerContext) {
    let WorkerContext {
        id,
        downloader,
        signals,
    } = ctx;

    let Some(task) = downloader.task(&id).await else {
        tracing::debug!(download_id = %id, "Task vanished before worker start");
        return;
    };
    if task.status != Status::Active {
        tracing::debug!(
            download_id = %id,
            status = %task.status,
            "Task no longer active, worker not started"
        );
        return;
    }

    downloader.signals.clear_all(&id).await;

    let invocation = downloader.fetcher.invocation(&task);
    tracing::info!(
        download_id = %id,
        content = %task.content_name,
        start = task.range.start,
        end = ?task.range.end,
        "Starting fetcher"
    );

    let mut process = match downloader.fetcher.spawn(&invocation) {
        Ok(process) => process,
        Err(e) => {
            tracing::error!(download_id = %id, error = %e, "Failed to spawn fetcher");
            fail_to_start(&downloader, &id).await;
            return;
        }
    };

    downloader.emit_event(Event::Started {
        id: id.clone(),
        start_chapter: task.range.start,
    });

    let outcome = read_until_exit(
        &downloader,
        &id,
        &mut process,
        &signals,
        downloader.config.download.stop_grace_period,
    )
    .await;

    finish(&downloader, &id, outcome).await;
}

async fn fail_to_start(downloader: &ChapterDownloader, id: &DownloadId) {
    let snapshot = {
        let mut tasks = downloader.queue_state.tasks.lock().await;
        tasks.iter_mut().find(|t| &t.id == id).and_then(|task| {
            if !task.transition(Status::Failed) {
                return None;
            }
            task.last_error = SPAWN_FAILED.to_string();
            Some(DownloadState::from_task(task))
        })
    };

    if let Some(state) = snapshot {
        downloader.flush_state(state).await;
        downloader.emit_event(Event::Failed {
            id: id.clone(),
            error: SPAWN_FAILED.to_string(),
        });
    }
}

/// One thing that happened while the fetcher ran
enum Step {
    Line(Option<String>),
    Stop,
    Kill,
    Exited(std::io::Result<ExitStatus>),
}

async fn sleep_or_pending(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn read_until_exit(
    downloader: &ChapterDownloader,
    id: &DownloadId,
    process: &mut FetchProcess,
    signals: &WorkerSignals,
    grace: Duration,
) -> RunOutcome {
    let mut outcome = RunOutcome::default();
    let mut stop_deadline: Option<Instant> = None;
    let mut lines_open = true;

    loop {
        let stop_armed = stop_deadline.is_none();
        let step = if lines_open {
            tokio::select! {
                biased;
                _ = signals.terminate.cancelled() => Step::Kill,
                _ = signals.stop.cancelled(), if stop_armed => Step::Stop,
                _ = sleep_or_pending(stop_deadline) => Step::Kill,
                line = process.next_line() => Step::Line(line),
            }
        } else {
            tokio::select! {
                biased;
                _ = signals.terminate.cancelled() => Step::Kill,
                _ = signals.stop.cancelled(), if stop_armed => Step::Stop,
                _ = sleep_or_pending(stop_deadline) => Step::Kill,
                status = process.wait() => Step::Exited(status),
            }
        };

        match step {
            Step::Line(Some(line)) => handle_line(downloader, id, &line, &mut outcome).await,
            Step::Line(None) => lines_open = false,
            Step::Stop => {
                tracing::debug!(
                    download_id = %id,
                    grace_secs = grace.as_secs(),
                    "Stop requested, draining fetcher output"
                );
                outcome.stop_requested = true;
                stop_deadline = Some(Instant::now() + grace);
            }
            Step::Kill => {
                tracing::debug!(download_id = %id, "Killing fetcher");
                kill(process, id).await;
                outcome.killed = true;
                break;
            }
            Step::Exited(Ok(status)) => {
                outcome.exit = Some(status);
                break;
            }
            Step::Exited(Err(e)) => {
                tracing::warn!(download_id = %id, error = %e, "Failed to wait for fetcher");
                break;
            }
        }
    }

    outcome
}

async fn kill(process: &mut FetchProcess, id: &DownloadId) {
    if let Err(e) = process.kill().await {
        tracing::warn!(download_id = %id, error = %e, "Failed to kill fetcher");
    }
}

async fn handle_line(
    downloader: &ChapterDownloader,
    id: &DownloadId,
    line: &str,
    outcome: &mut RunOutcome,
) {
    let tail_limit = downloader.config.download.output_tail_lines;
    let parsed = parse_line(line);

    let (event, snapshot) = {
        let mut tasks = downloader.queue_state.tasks.lock().await;
        let Some(task) = tasks.iter_mut().find(|t| &t.id == id) else {
            return;
        };
        if task.status == Status::Cancelled {
            return;
        }
        task.push_output(line, tail_limit);

        match parsed {
            ParsedLine::Progress(update) => {
                if !task.apply_progress(&update) {
                    return;
                }
                let event = Event::Progress {
                    id: id.clone(),
                    current_chapter: task.current_chapter,
                    total_chapters: task.total_chapters,
                    percent: task.progress,
                    chapter_title: update.title,
                };
                (Some(event), Some(DownloadState::from_task(task)))
            }
            ParsedLine::Complete => {
                outcome.saw_complete = true;
                (None, None)
            }
            ParsedLine::Error(message) => {
                tracing::warn!(download_id = %id, line = %message, "Fetcher reported an error");
                task.last_error = message.clone();
                outcome.last_error_line = Some(message);
                (None, None)
            }
            ParsedLine::Noise => {
                tracing::trace!(download_id = %id, line, "Fetcher output");
                (None, None)
            }
        }
    };

    if let Some(state) = snapshot {
        let mut store = downloader.store.lock().await;
        if let Err(e) = store.update_state(state).await {
            tracing::warn!(download_id = %id, error = %e, "Failed to save progress");
        }
    }
    if let Some(event) = event {
        downloader.emit_event(event);
    }
}

async fn finish(downloader: &ChapterDownloader, id: &DownloadId, outcome: RunOutcome) {
    let (event, state) = {
        let mut tasks = downloader.queue_state.tasks.lock().await;
        let Some(task) = tasks.iter_mut().find(|t| &t.id == id) else {
            return;
        };

        let was_active = task.status == Status::Active;
        let event = if was_active {
            settle_active(task, id, &outcome)
        } else {
            tracing::info!(download_id = %id, status = %task.status, "Fetcher stopped");
            None
        };

        let mut state = DownloadState::from_task(task);
        if was_active && task.status == Status::Paused {
            // Interrupted by shutdown, not paused by the user: resume on next start.
            state.is_paused = false;
        }
        (event, state)
    };

    downloader.flush_state(state).await;
    downloader.signals.clear(id, Signal::Stop).await;
    if let Some(event) = event {
        downloader.emit_event(event);
    }
}

/// Settle a task that was still active when its fetcher exited
fn settle_active(
    task: &mut DownloadTask,
    id: &DownloadId,
    outcome: &RunOutcome,
) -> Option<Event> {
    let exit = if outcome.killed {
        Some(ExitStatus::Failure)
    } else {
        outcome.exit
    };

    // A fetcher honouring a stop marker exits cleanly without finishing.
    let succeeded = if outcome.stop_requested {
        outcome.saw_complete
    } else {
        run_succeeded(outcome.saw_complete, exit, task.progress)
    };

    if succeeded {
        task.transition(Status::Complete);
        if outcome.saw_complete {
            task.progress = 100.0;
            if task.total_chapters > 0 {
                task.current_chapter = task.total_chapters;
            }
        }
        tracing::info!(
            download_id = %id,
            chapters = task.current_chapter,
            "Download complete"
        );
        return Some(Event::Complete { id: id.clone() });
    }

    if outcome.stop_requested {
        task.transition(Status::Paused);
        tracing::info!(
            download_id = %id,
            chapter = task.current_chapter,
            "Download interrupted, will resume on next start"
        );
        return None;
    }

    let error = outcome
        .last_error_line
        .clone()
        .unwrap_or_else(|| PROCESS_FAILED.to_string());
    task.transition(Status::Failed);
    task.last_error = error.clone();
    tracing::warn!(download_id = %id, error = %error, "Download failed");
    Some(Event::Failed {
        id: id.clone(),
        error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_marker_is_success_regardless_of_exit() {
        assert!(run_succeeded(true, Some(ExitStatus::Failure), 0.0));
        assert!(run_succeeded(true, None, 0.0));
    }

    #[test]
    fn clean_exit_needs_progress() {
        assert!(run_succeeded(false, Some(ExitStatus::Success), 12.5));
        assert!(!run_succeeded(false, Some(ExitStatus::Success), 0.0));
    }

    #[test]
    fn failing_exit_is_failure() {
        assert!(!run_succeeded(false, Some(ExitStatus::Failure), 80.0));
        assert!(!run_succeeded(false, None, 80.0));
    }
}
