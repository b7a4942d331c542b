//! # chapter-dl
//!
//! Resumable chapter download orchestration around an external fetcher process.
//!
//! ## Design Philosophy
//!
//! chapter-dl is designed to be:
//! - **Library-first** - No UI, the application drives it through a small command API
//! - **Fetcher-agnostic** - Chapters are retrieved by an external program; this crate
//!   schedules it, supervises it and reads its progress lines
//! - **Resumable** - Every download has a durable record and continues after the last
//!   fetched chapter across pauses and restarts
//! - **Event-driven** - Consumers subscribe to events or poll snapshots
//!
//! ## Quick Start
//!
//! ```no_run
//! use chapter_dl::{
//!     ChapterDownloader, ChapterRange, Config, ContentType, DownloadRequest, FetchSource,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let downloader = ChapterDownloader::new(Config::default()).await?;
//!
//!     // Subscribe to events
//!     let mut events = downloader.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     downloader
//!         .start(DownloadRequest {
//!             content_name: "Example".to_string(),
//!             content_type: ContentType::Novel,
//!             source: FetchSource::Name("Example".to_string()),
//!             source_name: "ExampleSite".to_string(),
//!             range: ChapterRange::default(),
//!             total_chapters: 0,
//!         })
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Download orchestration (queue, scheduler, workers, commands)
pub mod downloader;
/// Error types
pub mod error;
/// External fetcher invocation
pub mod fetcher;
/// Fetcher output line parsing
pub mod progress;
/// Marker-file signals
pub mod signal;
/// Durable download state
pub mod state;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use config::{Config, DownloadConfig, FetcherConfig, PersistenceConfig};
pub use downloader::ChapterDownloader;
pub use error::{DownloadError, Error, Result, StateError};
pub use fetcher::{ContentInfo, FetchInvocation, Fetcher};
pub use progress::{ParsedLine, ProgressUpdate, parse_line};
pub use signal::{Signal, SignalChannel};
pub use state::{DownloadState, StateStore};
pub use types::{
    ChapterRange, ContentType, DownloadId, DownloadRequest, DownloadTask, Event, FetchSource,
    SearchResult, Status,
};

/// Block until the process is asked to stop, then shut the downloader down.
///
/// On unix this waits for SIGTERM or SIGINT, using whichever handler could be
/// registered. Elsewhere it waits for Ctrl+C.
///
/// # Example
///
/// ```no_run
/// use chapter_dl::{ChapterDownloader, Config, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let downloader = ChapterDownloader::new(Config::default()).await?;
///
///     // Run with automatic signal handling
///     run_with_shutdown(downloader).await?;
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(downloader: ChapterDownloader) -> Result<()> {
    wait_for_signal().await;
    downloader.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Either handler can be refused in sandboxes; listen on whichever registered
    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(mut term), Ok(mut int)) => {
            let received = tokio::select! {
                _ = term.recv() => "SIGTERM",
                _ = int.recv() => "SIGINT",
            };
            tracing::info!(signal = received, "Shutdown signal received");
        }
        (Ok(mut term), Err(e)) => {
            tracing::warn!(error = %e, "SIGINT handler unavailable, listening for SIGTERM");
            term.recv().await;
            tracing::info!(signal = "SIGTERM", "Shutdown signal received");
        }
        (Err(e), Ok(mut int)) => {
            tracing::warn!(error = %e, "SIGTERM handler unavailable, listening for SIGINT");
            int.recv().await;
            tracing::info!(signal = "SIGINT", "Shutdown signal received");
        }
        (Err(term_err), Err(int_err)) => {
            tracing::error!(
                sigterm_error = %term_err,
                sigint_error = %int_err,
                "No signal handler registered, waiting for ctrl_c"
            );
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "ctrl_c listener failed");
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "ctrl_c listener failed");
        return;
    }
    tracing::info!(signal = "ctrl_c", "Shutdown signal received");
}
