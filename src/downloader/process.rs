//! Tracking of running fetcher workers.
//!
//! Each worker owns one fetcher process. The manager keeps the worker's join handle
//! and two tokens: `stop` asks the worker to finish cooperatively (pause, shutdown),
//! `terminate` makes it kill the process at once (cancel, shutdown escalation).
//! The map lock is only held for map edits; handles are awaited after it is released.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::types::{ContentType, DownloadId};

/// Interval between checks while waiting for workers to exit
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Stop and terminate requests delivered to one worker
#[derive(Clone, Debug, Default)]
pub(crate) struct WorkerSignals {
    /// Finish cooperatively
    pub(crate) stop: CancellationToken,
    /// Kill the process now
    pub(crate) terminate: CancellationToken,
}

/// One tracked worker
pub(crate) struct ProcessEntry {
    handle: JoinHandle<()>,
    signals: WorkerSignals,
    content_name: String,
    content_type: ContentType,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<DownloadId, ProcessEntry>,
    closed: bool,
}

/// Map of running workers behind one lock
#[derive(Clone, Default)]
pub(crate) struct ProcessManager {
    inner: Arc<tokio::sync::Mutex<Inner>>,
}

impl ProcessManager {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Spawn `worker` and track it under `id`
    ///
    /// The entry is inserted before the worker can observe anything, so a stop or
    /// terminate request racing with the start is never lost. Returns false (and
    /// spawns nothing) once the manager is shut down or `id` is already tracked.
    pub(crate) async fn register<F>(
        &self,
        id: DownloadId,
        content_name: String,
        content_type: ContentType,
        signals: WorkerSignals,
        worker: F,
    ) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            tracing::debug!(download_id = %id, "Process manager closed, not starting worker");
            return false;
        }
        if inner.entries.contains_key(&id) {
            tracing::warn!(download_id = %id, "Worker already tracked for download");
            return false;
        }

        let handle = tokio::spawn(worker);
        inner.entries.insert(
            id,
            ProcessEntry {
                handle,
                signals,
                content_name,
                content_type,
            },
        );
        true
    }

    /// Ask the worker for `id` to finish cooperatively; false if not tracked
    pub(crate) async fn request_stop(&self, id: &DownloadId) -> bool {
        let inner = self.inner.lock().await;
        match inner.entries.get(id) {
            Some(entry) => {
                entry.signals.stop.cancel();
                true
            }
            None => false,
        }
    }

    /// Ask the worker for `id` to kill its process now; false if not tracked
    pub(crate) async fn request_terminate(&self, id: &DownloadId) -> bool {
        let inner = self.inner.lock().await;
        match inner.entries.get(id) {
            Some(entry) => {
                entry.signals.terminate.cancel();
                true
            }
            None => false,
        }
    }

    /// Identifiers of every tracked worker
    pub(crate) async fn tracked_ids(&self) -> Vec<DownloadId> {
        self.inner.lock().await.entries.keys().cloned().collect()
    }

    /// Number of workers still running
    pub(crate) async fn active_count(&self) -> usize {
        self.inner
            .lock()
            .await
            .entries
            .values()
            .filter(|e| !e.handle.is_finished())
            .count()
    }

    /// Join and drop every worker that has finished
    pub(crate) async fn reap_finished(&self) -> Vec<DownloadId> {
        let finished: Vec<(DownloadId, ProcessEntry)> = {
            let mut inner = self.inner.lock().await;
            let ids: Vec<DownloadId> = inner
                .entries
                .iter()
                .filter(|(_, e)| e.handle.is_finished())
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| inner.entries.remove(&id).map(|e| (id, e)))
                .collect()
        };

        let mut reaped = Vec::with_capacity(finished.len());
        for (id, entry) in finished {
            if let Err(e) = entry.handle.await {
                tracing::error!(download_id = %id, error = %e, "Download worker panicked");
            }
            tracing::debug!(
                download_id = %id,
                content = %entry.content_name,
                content_type = %entry.content_type,
                "Reaped download worker"
            );
            reaped.push(id);
        }
        reaped
    }

    /// Stop every worker, escalate after `grace`, and join them all
    ///
    /// After this returns nothing is tracked and no new worker can be registered.
    /// Returns the number of workers joined.
    pub(crate) async fn shutdown(&self, grace: Duration) -> usize {
        {
            let mut inner = self.inner.lock().await;
            inner.closed = true;
            for (id, entry) in inner.entries.iter() {
                tracing::debug!(download_id = %id, "Requesting worker stop");
                entry.signals.stop.cancel();
            }
        }

        let wait = async {
            while self.active_count().await > 0 {
                tokio::time::sleep(WAIT_POLL_INTERVAL).await;
            }
        };
        if tokio::time::timeout(grace, wait).await.is_err() {
            tracing::warn!("Timeout waiting for workers to stop, terminating the rest");
        }

        let entries: Vec<(DownloadId, ProcessEntry)> = {
            let mut inner = self.inner.lock().await;
            for entry in inner.entries.values() {
                entry.signals.terminate.cancel();
            }
            inner.entries.drain().collect()
        };

        let count = entries.len();
        let results = join_all(entries.into_iter().map(|(id, entry)| async move {
            (id, entry.handle.await)
        }))
        .await;
        for (id, result) in results {
            if let Err(e) = result {
                tracing::error!(download_id = %id, error = %e, "Download worker panicked");
            }
        }

        tracing::info!(joined = count, "All download workers joined");
        count
    }
}
