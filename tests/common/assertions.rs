//! Custom test assertions for integration tests

use chapter_dl::{ChapterDownloader, DownloadId, DownloadState, Event};
use std::time::Duration;
use tokio::sync::broadcast::Receiver;
use tokio::sync::broadcast::error::RecvError;

/// Result of waiting for a download to finish
#[derive(Debug)]
pub enum WaitResult {
    /// Download completed successfully
    Completed,
    /// Download failed with error
    Failed(String),
    /// Timeout waiting for completion
    Timeout,
    /// Channel closed unexpectedly
    ChannelClosed,
}

/// Wait for a download to reach a terminal state (Complete or Failed)
///
/// Takes a receiver created before the download was started, so no event is missed.
pub async fn wait_for_completion(
    events: &mut Receiver<Event>,
    id: &DownloadId,
    timeout: Duration,
) -> WaitResult {
    let result = tokio::time::timeout(timeout, async {
        loop {
            match events.recv().await {
                Ok(Event::Complete { id: event_id }) if &event_id == id => {
                    return WaitResult::Completed;
                }
                Ok(Event::Failed {
                    id: event_id,
                    error,
                }) if &event_id == id => {
                    return WaitResult::Failed(error);
                }
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => return WaitResult::ChannelClosed,
            }
        }
    })
    .await;

    result.unwrap_or(WaitResult::Timeout)
}

/// Wait until a progress event reports at least `chapter` for the download
///
/// Returns the reported chapter, or None on timeout.
pub async fn wait_for_chapter(
    events: &mut Receiver<Event>,
    id: &DownloadId,
    chapter: u32,
    timeout: Duration,
) -> Option<u32> {
    tokio::time::timeout(timeout, async {
        loop {
            match events.recv().await {
                Ok(Event::Progress {
                    id: event_id,
                    current_chapter,
                    ..
                }) if &event_id == id && current_chapter >= chapter => {
                    return Some(current_chapter);
                }
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => return None,
            }
        }
    })
    .await
    .ok()
    .flatten()
}

/// Collect events until one matches `stop` (inclusive) or the timeout expires
pub async fn collect_events_until<F>(
    events: &mut Receiver<Event>,
    timeout: Duration,
    mut stop: F,
) -> Vec<Event>
where
    F: FnMut(&Event) -> bool,
{
    let mut collected = Vec::new();
    let _ = tokio::time::timeout(timeout, async {
        while let Ok(event) = events.recv().await {
            let done = stop(&event);
            collected.push(event);
            if done {
                break;
            }
        }
    })
    .await;
    collected
}

/// Poll the durable record of a download until `check` accepts it
pub async fn wait_for_state<F>(
    downloader: &ChapterDownloader,
    id: &DownloadId,
    timeout: Duration,
    mut check: F,
) -> Option<DownloadState>
where
    F: FnMut(&DownloadState) -> bool,
{
    tokio::time::timeout(timeout, async {
        loop {
            if let Some(state) = downloader
                .states()
                .await
                .into_iter()
                .find(|s| &s.id == id && check(s))
            {
                return state;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .ok()
}
