//! End-to-end download flows against a fake shell fetcher
//!
//! The fetcher writes real chapter files, reports progress on stdout and honours the
//! marker files, so these tests cover the whole path from command to disk and back
//! through the state file.

#![cfg(unix)]

mod common;

use chapter_dl::{ChapterDownloader, Event, Status};
use common::{
    CHAPTER_FETCHER, FAILING_FETCHER, WaitResult, chapter_files, collect_events_until,
    create_test_config, novel_dir, novel_request, wait_for_chapter, wait_for_completion,
    wait_for_state,
};
use std::time::Duration;
use tempfile::TempDir;

const TIMEOUT: Duration = Duration::from_secs(15);

#[tokio::test]
async fn test_download_runs_to_completion() {
    let temp_dir = TempDir::new().unwrap();
    let downloader = ChapterDownloader::new(create_test_config(temp_dir.path(), CHAPTER_FETCHER))
        .await
        .unwrap();
    let mut events = downloader.subscribe();

    let id = downloader
        .start(novel_request("Five Chapters", 5))
        .await
        .unwrap();

    let seen = collect_events_until(&mut events, TIMEOUT, |e| {
        matches!(e, Event::Complete { .. } | Event::Failed { .. })
    })
    .await;

    assert!(matches!(seen.first(), Some(Event::Queued { .. })));
    assert!(
        seen.iter()
            .any(|e| matches!(e, Event::Started { start_chapter: 1, .. }))
    );
    let chapters: Vec<u32> = seen
        .iter()
        .filter_map(|e| match e {
            Event::Progress {
                current_chapter, ..
            } => Some(*current_chapter),
            _ => None,
        })
        .collect();
    assert_eq!(chapters, vec![1, 2, 3, 4, 5]);
    assert!(matches!(seen.last(), Some(Event::Complete { .. })));

    assert_eq!(chapter_files(temp_dir.path(), "Five Chapters"), 5);

    let state = wait_for_state(&downloader, &id, TIMEOUT, |s| s.is_complete)
        .await
        .expect("state should be complete");
    assert_eq!(state.current_chapter, 5);
    assert!(state.last_error.is_empty());
}

#[tokio::test]
async fn test_pause_and_resume_continue_where_left_off() {
    let temp_dir = TempDir::new().unwrap();
    let downloader = ChapterDownloader::new(create_test_config(temp_dir.path(), CHAPTER_FETCHER))
        .await
        .unwrap();
    let mut events = downloader.subscribe();

    let id = downloader.start(novel_request("Twenty", 20)).await.unwrap();
    wait_for_chapter(&mut events, &id, 2, TIMEOUT)
        .await
        .expect("fetcher should report progress");

    downloader.pause(&id).await.unwrap();
    assert!(
        temp_dir
            .path()
            .join("state")
            .join(format!(".pause_{}", id))
            .exists()
    );

    // Let the fetcher notice the marker and exit
    tokio::time::sleep(Duration::from_millis(300)).await;
    let paused_at = chapter_files(temp_dir.path(), "Twenty");
    assert!(paused_at < 20, "fetcher should stop early, fetched {paused_at}");
    assert_eq!(downloader.task(&id).await.unwrap().status, Status::Paused);

    downloader.resume(&id).await.unwrap();
    assert!(
        !temp_dir
            .path()
            .join("state")
            .join(format!(".pause_{}", id))
            .exists()
    );

    let seen = collect_events_until(&mut events, TIMEOUT, |e| {
        matches!(e, Event::Complete { .. } | Event::Failed { .. })
    })
    .await;
    let restart = seen
        .iter()
        .find_map(|e| match e {
            Event::Started { start_chapter, .. } => Some(*start_chapter),
            _ => None,
        })
        .expect("resumed run should start");
    assert!(restart > 1);
    assert!(matches!(seen.last(), Some(Event::Complete { .. })));

    assert_eq!(chapter_files(temp_dir.path(), "Twenty"), 20);
}

#[tokio::test]
async fn test_shutdown_and_restart_resume_download() {
    let temp_dir = TempDir::new().unwrap();
    let config = create_test_config(temp_dir.path(), CHAPTER_FETCHER);

    let first = ChapterDownloader::new(config.clone()).await.unwrap();
    let mut events = first.subscribe();
    let id = first.start(novel_request("Serial", 20)).await.unwrap();
    wait_for_chapter(&mut events, &id, 3, TIMEOUT)
        .await
        .expect("fetcher should report progress");

    first.shutdown().await.unwrap();

    let state = first
        .states()
        .await
        .into_iter()
        .find(|s| s.id == id)
        .unwrap();
    assert!(!state.is_paused);
    assert!(!state.is_complete);
    assert!(state.current_chapter >= 3);
    let interrupted_at = state.current_chapter;

    let leftover_stop_markers = std::fs::read_dir(temp_dir.path().join("state"))
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with(".stop_"))
        .count();
    assert_eq!(leftover_stop_markers, 0);
    drop(first);

    let second = ChapterDownloader::new(config).await.unwrap();
    let task = second.task(&id).await.expect("download should be restored");
    assert_eq!(task.range.start, interrupted_at + 1);

    let state = wait_for_state(&second, &id, TIMEOUT, |s| s.is_complete)
        .await
        .expect("restored download should complete");
    assert_eq!(state.current_chapter, 20);
    assert_eq!(chapter_files(temp_dir.path(), "Serial"), 20);

    second.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_cancel_keeps_partial_content_and_retry_finishes() {
    let temp_dir = TempDir::new().unwrap();
    let downloader = ChapterDownloader::new(create_test_config(temp_dir.path(), CHAPTER_FETCHER))
        .await
        .unwrap();
    let mut events = downloader.subscribe();

    let id = downloader.start(novel_request("Dropped", 20)).await.unwrap();
    wait_for_chapter(&mut events, &id, 2, TIMEOUT)
        .await
        .expect("fetcher should report progress");

    downloader.cancel(&id).await.unwrap();

    let state = wait_for_state(&downloader, &id, TIMEOUT, |s| s.is_complete)
        .await
        .expect("cancelled download should be recorded");
    assert_eq!(state.last_error, "Cancelled by user");
    assert!(novel_dir(temp_dir.path(), "Dropped").join(".cancelled").exists());
    assert!(chapter_files(temp_dir.path(), "Dropped") >= 2);

    downloader.retry(&id).await.unwrap();
    match wait_for_completion(&mut events, &id, TIMEOUT).await {
        WaitResult::Completed => {}
        other => panic!("retry should complete, got {:?}", other),
    }
    assert_eq!(chapter_files(temp_dir.path(), "Dropped"), 20);
}

#[tokio::test]
async fn test_failed_download_records_error_and_restores() {
    let temp_dir = TempDir::new().unwrap();
    let config = create_test_config(temp_dir.path(), FAILING_FETCHER);

    let first = ChapterDownloader::new(config.clone()).await.unwrap();
    let mut events = first.subscribe();
    let id = first.start(novel_request("Broken", 10)).await.unwrap();

    match wait_for_completion(&mut events, &id, TIMEOUT).await {
        WaitResult::Failed(error) => assert_eq!(error, "Error: connection reset by source"),
        other => panic!("expected failure, got {:?}", other),
    }
    let state = first
        .states()
        .await
        .into_iter()
        .find(|s| s.id == id)
        .unwrap();
    assert!(!state.is_complete);
    assert_eq!(state.current_chapter, 1);
    first.shutdown().await.unwrap();
    drop(first);

    // Failed downloads are picked up again on the next start
    let second = ChapterDownloader::new(config).await.unwrap();
    let task = second.task(&id).await.expect("failed download should be restored");
    assert_eq!(task.range.start, 2);
    second.shutdown().await.unwrap();
}
