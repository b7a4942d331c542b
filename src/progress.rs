//! Parser for fetcher output lines
//!
//! The fetcher writes free-form text. Three kinds of lines matter:
//!
//! - progress lines, `Progress: <current>/<total> (<percent>%) - <chapter title>`
//! - completion markers such as `Download completed successfully`
//! - error lines (anything mentioning an error or a traceback)
//!
//! Everything else is noise. Parsing is pure and never fails.

use regex::Regex;
use std::sync::LazyLock;

static PROGRESS_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"Progress:\s*(\d+)\s*/\s*(\d+)\s*\(\s*(\d+(?:\.\d+)?)\s*%\s*\)(?:\s*-\s*(.*\S))?",
    )
    .ok()
});

const COMPLETE_MARKERS: &[&str] = &[
    "download complete",
    "download completed",
    "successfully downloaded",
];

// Printed by the fetcher when one optional source file is missing; not a failure.
const BENIGN_ERRORS: &[&str] = &["error loading sources"];

/// A progress report extracted from one line
#[derive(Clone, Debug, PartialEq)]
pub struct ProgressUpdate {
    /// Absolute index of the chapter just fetched
    pub current: u32,
    /// Total chapters known to the fetcher (0 = unknown)
    pub total: u32,
    /// Completion percentage, clamped to 0.0..=100.0
    pub percent: f32,
    /// Title of the chapter just fetched
    pub title: Option<String>,
}

/// Classification of one fetcher output line
#[derive(Clone, Debug, PartialEq)]
pub enum ParsedLine {
    /// Progress report
    Progress(ProgressUpdate),
    /// The fetcher announced it finished
    Complete,
    /// The fetcher reported an error (the trimmed line)
    Error(String),
    /// Anything else
    Noise,
}

/// Classify one line of fetcher output
///
/// Progress lines win over keyword matches, so a chapter titled "Error" is still
/// progress.
pub fn parse_line(line: &str) -> ParsedLine {
    let line = line.trim();
    if line.is_empty() {
        return ParsedLine::Noise;
    }

    if let Some(update) = parse_progress(line) {
        return ParsedLine::Progress(update);
    }

    let lower = line.to_lowercase();

    if COMPLETE_MARKERS.iter().any(|m| lower.contains(m)) {
        return ParsedLine::Complete;
    }

    if BENIGN_ERRORS.iter().any(|m| lower.contains(m)) {
        return ParsedLine::Noise;
    }

    if lower.contains("error") || lower.contains("traceback") || lower.starts_with("failed") {
        return ParsedLine::Error(line.to_string());
    }

    ParsedLine::Noise
}

fn parse_progress(line: &str) -> Option<ProgressUpdate> {
    let re = PROGRESS_RE.as_ref()?;
    let caps = re.captures(line)?;

    // Overflowing numbers make the whole line noise.
    let current: u32 = caps.get(1)?.as_str().parse().ok()?;
    let total: u32 = caps.get(2)?.as_str().parse().ok()?;
    let percent: f32 = caps.get(3)?.as_str().parse().ok()?;
    if !percent.is_finite() {
        return None;
    }

    let title = caps
        .get(4)
        .map(|m| m.as_str().trim().to_string())
        .filter(|t| !t.is_empty());

    Some(ProgressUpdate {
        current,
        total,
        percent: percent.clamp(0.0, 100.0),
        title,
    })
}
