//! Core types for chapter-dl

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::progress::ProgressUpdate;

/// Unique identifier for a download
///
/// Generated once when the download is first requested and kept for its whole life,
/// across pause, resume, retry and restarts.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DownloadId(pub String);

impl DownloadId {
    /// Create a DownloadId from an existing identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate the identifier for a new download
    ///
    /// The format is `<content-type>_<name>_<unix-seconds>`, where every character of
    /// the name that is not an ASCII letter or digit becomes `_`.
    pub fn generate(content_name: &str, content_type: ContentType, now: DateTime<Utc>) -> Self {
        let sanitized: String = content_name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        Self(format!(
            "{}_{}_{}",
            content_type.as_str(),
            sanitized,
            now.timestamp()
        ))
    }

    /// Get the identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DownloadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DownloadId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<DownloadId> for String {
    fn from(id: DownloadId) -> Self {
        id.0
    }
}

/// Kind of content being downloaded
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    /// Text chapters
    #[default]
    Novel,
    /// Japanese image series
    Manga,
    /// Korean image series
    Manhwa,
    /// Chinese image series
    Manhua,
}

impl ContentType {
    /// Convert the integer code stored in the state file
    ///
    /// Code 0 is the legacy "all" filter value and unknown codes fall back to novel.
    pub fn from_code(code: i64) -> Self {
        match code {
            2 => ContentType::Manga,
            3 => ContentType::Manhwa,
            4 => ContentType::Manhua,
            _ => ContentType::Novel,
        }
    }

    /// Integer code stored in the state file
    pub fn code(&self) -> i64 {
        match self {
            ContentType::Novel => 1,
            ContentType::Manga => 2,
            ContentType::Manhwa => 3,
            ContentType::Manhua => 4,
        }
    }

    /// Lowercase name passed to the fetcher
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Novel => "novel",
            ContentType::Manga => "manga",
            ContentType::Manhwa => "manhwa",
            ContentType::Manhua => "manhua",
        }
    }

    /// Library subdirectory the content lands in
    pub fn library_dir(&self) -> &'static str {
        match self {
            ContentType::Novel => "Novels",
            ContentType::Manga | ContentType::Manhwa | ContentType::Manhua => "Manga",
        }
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Chapters to fetch, 1-based and inclusive
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterRange {
    /// First chapter to fetch
    pub start: u32,
    /// Last chapter to fetch (None = everything available)
    pub end: Option<u32>,
}

impl Default for ChapterRange {
    fn default() -> Self {
        Self { start: 1, end: None }
    }
}

impl ChapterRange {
    /// Range continuing after the last chapter already fetched
    pub fn continue_after(&self, current_chapter: u32) -> Self {
        Self {
            start: self.start.max(current_chapter.saturating_add(1)),
            end: self.end,
        }
    }
}

/// How the fetcher locates the content
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum FetchSource {
    /// Direct URL of the content's index page
    Url(String),
    /// Title to look up on the source site
    Name(String),
}

/// Download status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Waiting for a free slot
    Queued,
    /// A fetcher process is running for this task
    Active,
    /// Stopped by the user, resumable
    Paused,
    /// All requested chapters fetched
    Complete,
    /// Stopped by the user, not resumed automatically
    Cancelled,
    /// The fetcher failed or could not be started
    Failed,
}

impl Status {
    /// Whether moving from `self` to `next` is an allowed edge
    pub fn can_transition_to(self, next: Status) -> bool {
        use Status::*;
        matches!(
            (self, next),
            (Queued, Active)
                | (Queued, Paused)
                | (Queued, Cancelled)
                | (Active, Complete)
                | (Active, Failed)
                | (Active, Cancelled)
                | (Active, Paused)
                | (Paused, Queued)
                | (Paused, Cancelled)
                | (Failed, Queued)
                | (Cancelled, Queued)
        )
    }

    /// Whether the task has stopped for good (until retried)
    pub fn is_finished(self) -> bool {
        matches!(self, Status::Complete | Status::Cancelled | Status::Failed)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// What the UI submits to start a new download
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRequest {
    /// Display name of the content
    pub content_name: String,
    /// Kind of content
    pub content_type: ContentType,
    /// How the fetcher finds the content
    pub source: FetchSource,
    /// Source site name passed to the fetcher
    pub source_name: String,
    /// Chapters to fetch
    #[serde(default)]
    pub range: ChapterRange,
    /// Chapter count when already known from search (0 = unknown)
    #[serde(default)]
    pub total_chapters: u32,
}

/// In-memory record of one download job
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadTask {
    /// Stable identifier
    pub id: DownloadId,
    /// Display name of the content
    pub content_name: String,
    /// Kind of content
    pub content_type: ContentType,
    /// How the fetcher finds the content
    pub source: FetchSource,
    /// Source site name passed to the fetcher
    pub source_name: String,
    /// Chapters to fetch in the next fetcher run
    pub range: ChapterRange,
    /// Last chapter reported as fetched
    pub current_chapter: u32,
    /// Total chapters (0 = unknown)
    pub total_chapters: u32,
    /// Completion percentage (0.0 to 100.0)
    pub progress: f32,
    /// Current status
    pub status: Status,
    /// Most recent error message (empty = none)
    pub last_error: String,
    /// Last raw lines from the fetcher, oldest first
    pub output_tail: VecDeque<String>,
    /// When the task was created
    pub created_at: DateTime<Utc>,
}

impl DownloadTask {
    /// Create a queued task for a fresh request
    pub fn from_request(request: DownloadRequest, now: DateTime<Utc>) -> Self {
        let id = DownloadId::generate(&request.content_name, request.content_type, now);
        Self {
            id,
            content_name: request.content_name,
            content_type: request.content_type,
            source: request.source,
            source_name: request.source_name,
            range: request.range,
            current_chapter: 0,
            total_chapters: request.total_chapters,
            progress: 0.0,
            status: Status::Queued,
            last_error: String::new(),
            output_tail: VecDeque::new(),
            created_at: now,
        }
    }

    /// Apply a parsed progress line
    ///
    /// Chapter and percentage never move backwards, and the chapter never exceeds a
    /// known total. Returns true if anything changed.
    pub fn apply_progress(&mut self, update: &ProgressUpdate) -> bool {
        let before = (self.current_chapter, self.total_chapters, self.progress);

        if update.total > 0 {
            self.total_chapters = self.total_chapters.max(update.total);
        }
        self.current_chapter = self.current_chapter.max(update.current);
        if self.total_chapters > 0 {
            self.current_chapter = self.current_chapter.min(self.total_chapters);
        }
        let percent = update.percent.clamp(0.0, 100.0);
        if percent > self.progress {
            self.progress = percent;
        }

        before != (self.current_chapter, self.total_chapters, self.progress)
    }

    /// Append a raw fetcher line, keeping at most `limit` lines
    pub fn push_output(&mut self, line: &str, limit: usize) {
        if limit == 0 {
            return;
        }
        while self.output_tail.len() >= limit {
            self.output_tail.pop_front();
        }
        self.output_tail.push_back(line.to_string());
    }

    /// Move to `next` if the edge is allowed; returns false otherwise
    pub fn transition(&mut self, next: Status) -> bool {
        if self.status == next {
            return true;
        }
        if !self.status.can_transition_to(next) {
            tracing::debug!(
                download_id = %self.id,
                from = %self.status,
                to = %next,
                "Rejected status transition"
            );
            return false;
        }
        self.status = next;
        true
    }
}

/// Event emitted during the download lifecycle
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Download added to the queue
    Queued {
        /// Download ID
        id: DownloadId,
        /// Content name
        name: String,
    },

    /// Download removed from the queue
    Removed {
        /// Download ID
        id: DownloadId,
    },

    /// Fetcher process started for the download
    Started {
        /// Download ID
        id: DownloadId,
        /// First chapter requested from the fetcher
        start_chapter: u32,
    },

    /// Progress reported by the fetcher
    Progress {
        /// Download ID
        id: DownloadId,
        /// Last chapter fetched
        current_chapter: u32,
        /// Total chapters (0 = unknown)
        total_chapters: u32,
        /// Completion percentage (0.0 to 100.0)
        percent: f32,
        /// Title of the chapter just fetched
        #[serde(skip_serializing_if = "Option::is_none")]
        chapter_title: Option<String>,
    },

    /// Download paused
    Paused {
        /// Download ID
        id: DownloadId,
    },

    /// Download resumed
    Resumed {
        /// Download ID
        id: DownloadId,
    },

    /// All requested chapters fetched
    Complete {
        /// Download ID
        id: DownloadId,
    },

    /// Download failed
    Failed {
        /// Download ID
        id: DownloadId,
        /// Error message
        error: String,
    },

    /// Download cancelled by the user
    Cancelled {
        /// Download ID
        id: DownloadId,
    },

    /// Downloader is shutting down
    Shutdown,
}

/// One entry returned by the fetcher's search operation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Content title
    pub title: String,
    /// Author, when the source lists one
    #[serde(default)]
    pub author: String,
    /// Index page URL
    pub url: String,
    /// Source site name
    #[serde(default, alias = "sourceName")]
    pub source_name: String,
    /// Chapter count (0 = unknown)
    #[serde(default, alias = "totalChapters")]
    pub total_chapters: u32,
    /// Short description
    #[serde(default)]
    pub description: String,
    /// Cover image URL
    #[serde(default, alias = "coverUrl")]
    pub cover_url: String,
}
