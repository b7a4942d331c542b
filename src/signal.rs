//! Marker-file signals shared with the fetcher
//!
//! Control requests are mirrored as small files in the state directory so that a
//! fetcher polling `--signal-dir` can stop on its own between chapters. Every
//! operation is best-effort: failures are logged and never reach the task.

use std::path::{Path, PathBuf};

use crate::types::{ContentType, DownloadId};

/// Kind of marker file
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Signal {
    /// User paused the download (`.pause_<id>`)
    Pause,
    /// User cancelled the download (`.cancel_<id>`)
    Cancel,
    /// Downloader is shutting down (`.stop_<id>`)
    Stop,
    /// Downloader is tearing the process down (`.stop_<id>`)
    Terminate,
}

impl Signal {
    fn prefix(self) -> &'static str {
        match self {
            Signal::Pause => ".pause_",
            Signal::Cancel => ".cancel_",
            Signal::Stop | Signal::Terminate => ".stop_",
        }
    }

    fn contents(self) -> &'static str {
        match self {
            Signal::Pause => "PAUSE\n",
            Signal::Cancel => "CANCEL\n",
            Signal::Stop => "SHUTDOWN\n",
            Signal::Terminate => "TERMINATE\n",
        }
    }
}

const STOP_PREFIX: &str = ".stop_";
const CANCELLED_MARKER: &str = ".cancelled";

/// Marker files in one directory
#[derive(Clone, Debug)]
pub struct SignalChannel {
    dir: PathBuf,
}

impl SignalChannel {
    /// Create a channel rooted at `dir` (usually the state directory)
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory the markers live in
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the marker for `id`
    pub fn marker_path(&self, id: &DownloadId, signal: Signal) -> PathBuf {
        self.dir.join(format!("{}{}", signal.prefix(), id))
    }

    /// Write the marker
    pub async fn raise(&self, id: &DownloadId, signal: Signal) {
        if let Err(e) = tokio::fs::create_dir_all(&self.dir).await {
            tracing::warn!(dir = %self.dir.display(), error = %e, "Could not create signal directory");
            return;
        }
        let path = self.marker_path(id, signal);
        if let Err(e) = tokio::fs::write(&path, signal.contents()).await {
            tracing::warn!(download_id = %id, path = %path.display(), error = %e, "Could not write signal marker");
        } else {
            tracing::debug!(download_id = %id, ?signal, "Raised signal marker");
        }
    }

    /// Remove the marker if present
    pub async fn clear(&self, id: &DownloadId, signal: Signal) {
        remove_quietly(&self.marker_path(id, signal)).await;
    }

    /// Remove every marker for `id`
    pub async fn clear_all(&self, id: &DownloadId) {
        for signal in [Signal::Pause, Signal::Cancel, Signal::Stop] {
            self.clear(id, signal).await;
        }
    }

    /// Whether the marker exists
    pub async fn is_raised(&self, id: &DownloadId, signal: Signal) -> bool {
        tokio::fs::try_exists(self.marker_path(id, signal))
            .await
            .unwrap_or(false)
    }

    /// Remove every stop marker left in the directory; returns how many were removed
    pub async fn sweep_stop_markers(&self) -> usize {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return 0,
            Err(e) => {
                tracing::warn!(dir = %self.dir.display(), error = %e, "Could not scan for stop markers");
                return 0;
            }
        };

        let mut removed = 0;
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "Error while scanning for stop markers");
                    break;
                }
            };
            let is_stop = entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(STOP_PREFIX));
            if is_stop && remove_quietly(&entry.path()).await {
                removed += 1;
            }
        }

        if removed > 0 {
            tracing::debug!(removed, "Swept stop markers");
        }
        removed
    }

    /// Leave a `.cancelled` note in the content's directory
    ///
    /// Partial content is kept. Nothing is written when the directory does not exist.
    pub async fn mark_cancelled(
        &self,
        output_dir: &Path,
        content_name: &str,
        content_type: ContentType,
    ) {
        let content_dir = output_dir
            .join(content_type.library_dir())
            .join(content_name);
        if !tokio::fs::try_exists(&content_dir).await.unwrap_or(false) {
            tracing::debug!(dir = %content_dir.display(), "No content directory to mark as cancelled");
            return;
        }
        let path = content_dir.join(CANCELLED_MARKER);
        if let Err(e) = tokio::fs::write(&path, "Download cancelled by user\n").await {
            tracing::warn!(path = %path.display(), error = %e, "Could not write cancellation note");
        }
    }
}

async fn remove_quietly(path: &Path) -> bool {
    match tokio::fs::remove_file(path).await {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Could not remove signal marker");
            false
        }
    }
}
