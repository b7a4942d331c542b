//! Core downloader implementation split into focused submodules.
//!
//! The `ChapterDownloader` struct and its methods are organized by domain:
//! - [`queue`] - Task list, lookups and startup restore
//! - [`control`] - Commands (start/pause/resume/cancel/retry)
//! - [`scheduler`] - Polling loop that activates queued tasks
//! - [`process`] - Tracking of running fetcher workers
//! - [`worker`] - One fetcher run: output reading, progress, exit handling
//! - [`lifecycle`] - Startup and shutdown coordination

mod control;
mod lifecycle;
pub(crate) mod process;
mod queue;
mod scheduler;
mod worker;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::fetcher::Fetcher;
use crate::signal::SignalChannel;
use crate::state::{DownloadState, StateStore};
use crate::types::{DownloadTask, Event};

use process::ProcessManager;

/// Task list and scheduling flags
#[derive(Clone)]
pub(crate) struct QueueState {
    /// Tasks in submission order (tens of items, scanned linearly)
    pub(crate) tasks: Arc<tokio::sync::Mutex<Vec<DownloadTask>>>,
    /// Set while a scheduler loop is running
    pub(crate) scheduler_running: Arc<AtomicBool>,
    /// Flag to indicate whether new downloads are accepted (set to false during shutdown)
    pub(crate) accepting_new: Arc<AtomicBool>,
}

impl QueueState {
    fn new() -> Self {
        Self {
            tasks: Arc::new(tokio::sync::Mutex::new(Vec::new())),
            scheduler_running: Arc::new(AtomicBool::new(false)),
            accepting_new: Arc::new(AtomicBool::new(true)),
        }
    }
}

/// Main downloader instance (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct ChapterDownloader {
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: tokio::sync::broadcast::Sender<Event>,
    /// Configuration
    pub(crate) config: Arc<Config>,
    /// Task list and scheduling flags
    pub(crate) queue_state: QueueState,
    /// Running fetcher workers
    pub(crate) processes: ProcessManager,
    /// Durable state, one lock for every reader and writer
    pub(crate) store: Arc<tokio::sync::Mutex<StateStore>>,
    /// Marker files shared with the fetcher
    pub(crate) signals: SignalChannel,
    /// Fetcher program
    pub(crate) fetcher: Arc<Fetcher>,
}

impl ChapterDownloader {
    /// Create a new ChapterDownloader instance
    ///
    /// This validates the configuration, creates the state directory, loads the
    /// durable state and re-queues every download that was running or waiting when
    /// the previous session ended. Paused and finished downloads are kept for display.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let state_dir = config.persistence.state_dir.clone();
        tokio::fs::create_dir_all(&state_dir).await.map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!(
                    "Failed to create state directory '{}': {}",
                    state_dir.display(),
                    e
                ),
            ))
        })?;

        let mut store = StateStore::new(
            config.persistence.state_file(),
            config.persistence.save_interval,
        );
        store.load_all().await;

        let fetcher = Fetcher::new(config.fetcher.clone(), state_dir.clone());

        let (event_tx, _rx) = tokio::sync::broadcast::channel(1000);

        tracing::info!(
            state_file = %config.persistence.state_file().display(),
            fetcher = %fetcher.program().display(),
            max_concurrent = config.download.max_concurrent_downloads,
            "Downloader initialized"
        );

        let downloader = Self {
            event_tx,
            config: Arc::new(config),
            queue_state: QueueState::new(),
            processes: ProcessManager::new(),
            store: Arc::new(tokio::sync::Mutex::new(store)),
            signals: SignalChannel::new(state_dir),
            fetcher: Arc::new(fetcher),
        };

        downloader.restore_queue().await;

        Ok(downloader)
    }

    /// Subscribe to download events
    ///
    /// Multiple subscribers are supported. Each subscriber receives all events independently.
    /// Events are buffered, but if a subscriber falls behind by more than 1000 events,
    /// it will receive a `RecvError::Lagged` error.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Get the current configuration
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Fetcher handle, for one-shot operations such as search
    pub fn fetcher(&self) -> &Fetcher {
        &self.fetcher
    }

    /// Whether new work is still accepted
    pub fn is_accepting(&self) -> bool {
        self.queue_state.accepting_new.load(Ordering::SeqCst)
    }

    /// Emit an event to all subscribers
    ///
    /// If there are no active subscribers, the event is silently dropped.
    pub(crate) fn emit_event(&self, event: Event) {
        self.event_tx.send(event).ok();
    }

    /// Write a state record immediately, logging failures
    ///
    /// Used for transitions that must survive a crash (pause, cancel, complete, fail).
    pub(crate) async fn flush_state(&self, state: DownloadState) {
        let id = state.id.clone();
        let mut store = self.store.lock().await;
        if let Err(e) = store.update_state_now(state).await {
            tracing::error!(download_id = %id, error = %e, "Failed to persist download state");
        }
    }
}
