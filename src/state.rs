//! Durable download state
//!
//! One JSON file holds a shadow record per download so that work survives a restart.
//! The file is rewritten as a whole through a temporary file and a rename, so a
//! crash mid-write leaves the previous version intact.
//!
//! ```json
//! {
//!   "downloads": [
//!     {
//!       "id": "novel_Example_1700000000",
//!       "contentName": "Example",
//!       "type": 1,
//!       "currentChapter": 12,
//!       "totalChapters": 40,
//!       "isPaused": false,
//!       "isComplete": false,
//!       "progress": 30.0,
//!       "lastError": "",
//!       "lastUpdate": 1700000100
//!     }
//!   ]
//! }
//! ```

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;

use crate::error::{Result, StateError};
use crate::types::{ChapterRange, ContentType, DownloadId, DownloadTask, FetchSource, Status};

/// Durable record of one download
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadState {
    /// Download identifier
    pub id: DownloadId,
    /// Display name of the content
    pub content_name: String,
    /// Kind of content, stored as its integer code
    #[serde(rename = "type", with = "content_type_code")]
    pub content_type: ContentType,
    /// Last chapter fetched
    #[serde(default)]
    pub current_chapter: u32,
    /// Total chapters (0 = unknown)
    #[serde(default)]
    pub total_chapters: u32,
    /// Paused by the user
    #[serde(default)]
    pub is_paused: bool,
    /// Finished (completed or cancelled)
    #[serde(default)]
    pub is_complete: bool,
    /// Completion percentage
    #[serde(default)]
    pub progress: f32,
    /// Most recent error message (empty = none)
    #[serde(default)]
    pub last_error: String,
    /// Unix seconds of the last change
    #[serde(default)]
    pub last_update: i64,
    /// Index page URL, when the download was started from one
    #[serde(default)]
    pub source_url: String,
    /// Source site name
    #[serde(default)]
    pub source_name: String,
    /// First chapter originally requested
    #[serde(default = "default_start_chapter")]
    pub start_chapter: u32,
    /// Last chapter originally requested (None = all)
    #[serde(default)]
    pub end_chapter: Option<u32>,
}

fn default_start_chapter() -> u32 {
    1
}

impl DownloadState {
    /// Snapshot a task
    pub fn from_task(task: &DownloadTask) -> Self {
        let source_url = match &task.source {
            FetchSource::Url(url) => url.clone(),
            FetchSource::Name(_) => String::new(),
        };
        Self {
            id: task.id.clone(),
            content_name: task.content_name.clone(),
            content_type: task.content_type,
            current_chapter: task.current_chapter,
            total_chapters: task.total_chapters,
            is_paused: task.status == Status::Paused,
            is_complete: matches!(task.status, Status::Complete | Status::Cancelled),
            progress: task.progress,
            last_error: task.last_error.clone(),
            last_update: Utc::now().timestamp(),
            source_url,
            source_name: task.source_name.clone(),
            start_chapter: task.range.start,
            end_chapter: task.range.end,
        }
    }

    /// Whether startup should re-queue this download
    pub fn is_resumable(&self) -> bool {
        !self.is_complete && !self.is_paused
    }

    /// How the fetcher finds the content again, if the record says so
    pub fn fetch_source(&self) -> Option<FetchSource> {
        if !self.source_url.is_empty() {
            Some(FetchSource::Url(self.source_url.clone()))
        } else if !self.source_name.is_empty() && !self.content_name.is_empty() {
            Some(FetchSource::Name(self.content_name.clone()))
        } else {
            None
        }
    }

    /// Rebuild a queued task that continues after the last fetched chapter
    ///
    /// Returns None when the record lacks the source needed to invoke the fetcher.
    pub fn to_resumed_task(&self) -> Option<DownloadTask> {
        let source = self.fetch_source()?;
        let range = ChapterRange {
            start: self.start_chapter.max(1),
            end: self.end_chapter,
        }
        .continue_after(self.current_chapter);

        let created_at =
            chrono::DateTime::from_timestamp(self.last_update, 0).unwrap_or_else(Utc::now);

        Some(DownloadTask {
            id: self.id.clone(),
            content_name: self.content_name.clone(),
            content_type: self.content_type,
            source,
            source_name: self.source_name.clone(),
            range,
            current_chapter: self.current_chapter,
            total_chapters: self.total_chapters,
            progress: self.progress,
            status: Status::Queued,
            last_error: String::new(),
            output_tail: Default::default(),
            created_at,
        })
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StateFile {
    #[serde(default)]
    downloads: Vec<DownloadState>,
}

/// Owner of the durable state file
///
/// Not synchronized itself; the downloader keeps it behind one lock.
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    save_interval: Duration,
    states: Vec<DownloadState>,
    last_save: Option<Instant>,
}

impl StateStore {
    /// Create a store for `path`; nothing is read until [`StateStore::load_all`]
    pub fn new(path: impl Into<PathBuf>, save_interval: Duration) -> Self {
        Self {
            path: path.into(),
            save_interval,
            states: Vec::new(),
            last_save: None,
        }
    }

    /// Path of the state file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the state file, replacing the in-memory records
    ///
    /// A missing file is an empty store. An unreadable or corrupt file is logged and
    /// also treated as empty; it is overwritten on the next save.
    pub async fn load_all(&mut self) -> Vec<DownloadState> {
        self.states = match tokio::fs::read(&self.path).await {
            Ok(bytes) => match serde_json::from_slice::<StateFile>(&bytes) {
                Ok(file) => file.downloads,
                Err(e) => {
                    tracing::warn!(
                        path = %self.path.display(),
                        error = %e,
                        "State file is corrupt, starting with empty state"
                    );
                    Vec::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "No state file yet");
                Vec::new()
            }
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Could not read state file, starting with empty state"
                );
                Vec::new()
            }
        };

        tracing::info!(count = self.states.len(), "Loaded download states");
        self.states.clone()
    }

    /// Write every record to disk
    pub async fn save_all(&mut self) -> Result<()> {
        let file = StateFile {
            downloads: self.states.clone(),
        };
        let json = serde_json::to_vec_pretty(&file)?;
        write_atomic(&self.path, &json).await?;
        self.last_save = Some(Instant::now());
        tracing::debug!(count = self.states.len(), "Saved download states");
        Ok(())
    }

    /// Insert or replace a record, saving only if the last save is old enough
    ///
    /// Returns true if the file was written.
    pub async fn update_state(&mut self, state: DownloadState) -> Result<bool> {
        self.upsert(state);
        let due = self
            .last_save
            .is_none_or(|at| at.elapsed() >= self.save_interval);
        if due {
            self.save_all().await?;
        }
        Ok(due)
    }

    /// Insert or replace a record and save immediately
    pub async fn update_state_now(&mut self, state: DownloadState) -> Result<()> {
        self.upsert(state);
        self.save_all().await
    }

    /// Look up one record
    pub fn get(&self, id: &DownloadId) -> Option<&DownloadState> {
        self.states.iter().find(|s| &s.id == id)
    }

    /// All records, in insertion order
    pub fn all(&self) -> &[DownloadState] {
        &self.states
    }

    /// Records startup should re-queue
    pub fn resumable(&self) -> Vec<DownloadState> {
        self.states
            .iter()
            .filter(|s| s.is_resumable())
            .cloned()
            .collect()
    }

    /// Delete a record and save
    pub async fn remove(&mut self, id: &DownloadId) -> Result<Option<DownloadState>> {
        let Some(pos) = self.states.iter().position(|s| &s.id == id) else {
            return Ok(None);
        };
        let removed = self.states.remove(pos);
        self.save_all().await?;
        Ok(Some(removed))
    }

    fn upsert(&mut self, state: DownloadState) {
        match self.states.iter_mut().find(|s| s.id == state.id) {
            Some(existing) => *existing = state,
            None => self.states.push(state),
        }
    }
}

async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let failed = |reason: String| StateError::WriteFailed {
        path: path.to_path_buf(),
        reason,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| failed(format!("create directory: {e}")))?;
    }

    let mut temp_path = path.as_os_str().to_owned();
    temp_path.push(".tmp");
    let temp_path = PathBuf::from(temp_path);

    let mut file = tokio::fs::File::create(&temp_path)
        .await
        .map_err(|e| failed(format!("create temp file: {e}")))?;
    file.write_all(contents)
        .await
        .map_err(|e| failed(format!("write temp file: {e}")))?;
    file.sync_all()
        .await
        .map_err(|e| failed(format!("sync temp file: {e}")))?;
    drop(file);

    tokio::fs::rename(&temp_path, path)
        .await
        .map_err(|e| failed(format!("rename temp file: {e}")))?;
    Ok(())
}

mod content_type_code {
    use crate::types::ContentType;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &ContentType, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_i64(value.code())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<ContentType, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(ContentType::from_code(i64::deserialize(deserializer)?))
    }
}
