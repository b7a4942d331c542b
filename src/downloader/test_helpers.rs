//! Shared test helpers for creating ChapterDownloader instances in tests.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::tempdir;

use crate::config::Config;
use crate::downloader::ChapterDownloader;
use crate::types::{
    ChapterRange, ContentType, DownloadId, DownloadRequest, Event, FetchSource, Status,
};

/// Fetcher that never produces output and never exits on its own
pub(crate) const IDLE_SCRIPT: &str = "sleep 30";

/// Fetcher that reports three chapters and finishes
pub(crate) const COMPLETE_SCRIPT: &str = "echo 'Progress: 1/3 (33.3%) - Chapter 1'; \
     echo 'Progress: 2/3 (66.7%) - Chapter 2'; \
     echo 'Progress: 3/3 (100.0%) - Chapter 3'; \
     echo 'Download complete'";

/// Build a test configuration rooted at `root` that runs `script` as the fetcher
///
/// The fetcher arguments are available to the script as `$1`, `$2`, ...
pub(crate) fn test_config(root: &Path, script: &str) -> Config {
    let mut config = Config::default();
    config.fetcher.program = Some(PathBuf::from("sh"));
    config.fetcher.base_args = vec!["-c".to_string(), script.to_string(), "sh".to_string()];
    config.fetcher.output_dir = root.join("library");
    config.persistence.state_dir = root.join("state");
    config.persistence.save_interval = Duration::ZERO;
    config.download.max_concurrent_downloads = 1;
    config.download.poll_interval = Duration::from_millis(20);
    config.download.stop_grace_period = Duration::from_millis(200);
    config.download.shutdown_grace = Duration::from_millis(500);
    config
}

/// Helper to create a test ChapterDownloader whose fetcher idles until killed.
/// Returns the downloader and the tempdir (which must be kept alive).
pub(crate) async fn create_test_downloader() -> (ChapterDownloader, tempfile::TempDir) {
    create_test_downloader_with_script(IDLE_SCRIPT).await
}

/// Helper to create a test ChapterDownloader running `script` as its fetcher
pub(crate) async fn create_test_downloader_with_script(
    script: &str,
) -> (ChapterDownloader, tempfile::TempDir) {
    let temp_dir = tempdir().unwrap();
    let config = test_config(temp_dir.path(), script);
    let downloader = ChapterDownloader::new(config).await.unwrap();
    (downloader, temp_dir)
}

/// Request for a novel looked up by name
pub(crate) fn request(name: &str) -> DownloadRequest {
    DownloadRequest {
        content_name: name.to_string(),
        content_type: ContentType::Novel,
        source: FetchSource::Name(name.to_string()),
        source_name: "ExampleSite".to_string(),
        range: ChapterRange::default(),
        total_chapters: 3,
    }
}

/// Poll until the task reaches `status`; panics after five seconds
pub(crate) async fn wait_for_status(
    downloader: &ChapterDownloader,
    id: &DownloadId,
    status: Status,
) {
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if downloader
                .task(id)
                .await
                .is_some_and(|t| t.status == status)
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;

    if waited.is_err() {
        let current = downloader.task(id).await.map(|t| t.status);
        panic!("download {id} never reached {status:?}, currently {current:?}");
    }
}

/// Receive events until one matches; panics after five seconds
pub(crate) async fn wait_for_event<F>(
    events: &mut tokio::sync::broadcast::Receiver<Event>,
    mut matches: F,
) -> Event
where
    F: FnMut(&Event) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(event) if matches(&event) => return event,
                Ok(_) | Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                Err(e) => panic!("event channel closed: {e}"),
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("expected event never arrived"))
}

/// Poll until `n` fetchers are running; panics after five seconds
pub(crate) async fn wait_for_running(downloader: &ChapterDownloader, n: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while downloader.processes.active_count().await != n {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("expected {n} running fetchers"));
}
