//! Configuration types for chapter-dl

use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

use crate::error::{Error, Result};

/// External fetcher invocation settings
///
/// The fetcher is an opaque program invoked once per download. It must accept the
/// `--content-type`, `--download-id` and `--signal-dir` arguments and honour the
/// marker files in the signal directory. When `program` is an interpreter, the
/// script goes first in `base_args`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FetcherConfig {
    /// Path to the fetcher executable (looked up on PATH as `program_name` if None)
    #[serde(default)]
    pub program: Option<PathBuf>,

    /// Executable name to search for on PATH when `program` is not set (default: "chapter-fetcher")
    #[serde(default = "default_program_name")]
    pub program_name: String,

    /// Arguments placed before the operation arguments (default: none)
    #[serde(default)]
    pub base_args: Vec<String>,

    /// Library root; content lands in `Novels/` or `Manga/` below it (default: ".")
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Source configuration file handed to the fetcher as `--config` (default: "sources.json")
    #[serde(default = "default_source_config")]
    pub source_config: PathBuf,

    /// Upper bound for one-shot operations such as search (default: 60 seconds)
    #[serde(default = "default_search_timeout", with = "duration_serde")]
    pub search_timeout: Duration,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            program: None,
            program_name: default_program_name(),
            base_args: Vec::new(),
            output_dir: default_output_dir(),
            source_config: default_source_config(),
            search_timeout: default_search_timeout(),
        }
    }
}

/// Scheduling and worker behavior
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Maximum simultaneously active fetches (default: 1)
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_downloads: usize,

    /// Scheduler scan interval in milliseconds (default: 500)
    #[serde(default = "default_poll_interval", with = "millis_serde")]
    pub poll_interval: Duration,

    /// How long a paused worker may keep draining output before the fetcher is killed
    /// (default: 10 seconds)
    #[serde(default = "default_stop_grace_period", with = "duration_serde")]
    pub stop_grace_period: Duration,

    /// How long shutdown waits for cooperative stops before terminating (default: 5 seconds)
    #[serde(default = "default_shutdown_grace", with = "duration_serde")]
    pub shutdown_grace: Duration,

    /// Number of raw fetcher lines kept on each task for diagnostics (default: 20)
    #[serde(default = "default_output_tail_lines")]
    pub output_tail_lines: usize,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: default_max_concurrent(),
            poll_interval: default_poll_interval(),
            stop_grace_period: default_stop_grace_period(),
            shutdown_grace: default_shutdown_grace(),
            output_tail_lines: default_output_tail_lines(),
        }
    }
}

/// Durable state and signal marker locations
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Directory holding the state file and the signal markers (default: "downloads")
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// State file name inside `state_dir` (default: "download_states.json")
    #[serde(default = "default_state_file_name")]
    pub state_file_name: String,

    /// Minimum time between two throttled state writes (default: 5 seconds)
    #[serde(default = "default_save_interval", with = "duration_serde")]
    pub save_interval: Duration,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            state_file_name: default_state_file_name(),
            save_interval: default_save_interval(),
        }
    }
}

impl PersistenceConfig {
    /// Full path of the durable state file
    pub fn state_file(&self) -> PathBuf {
        self.state_dir.join(&self.state_file_name)
    }
}

/// Main configuration for ChapterDownloader
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// External fetcher invocation
    #[serde(default)]
    pub fetcher: FetcherConfig,

    /// Scheduling and worker behavior
    #[serde(default)]
    pub download: DownloadConfig,

    /// State file and signal markers
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl Config {
    /// Reject settings the scheduler or store cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.download.max_concurrent_downloads == 0 {
            return Err(Error::Config {
                message: "max_concurrent_downloads must be at least 1".to_string(),
                key: Some("download.max_concurrent_downloads".to_string()),
            });
        }
        if self.download.poll_interval.is_zero() {
            return Err(Error::Config {
                message: "poll_interval must be greater than zero".to_string(),
                key: Some("download.poll_interval".to_string()),
            });
        }
        if self.persistence.state_file_name.trim().is_empty() {
            return Err(Error::Config {
                message: "state_file_name must not be empty".to_string(),
                key: Some("persistence.state_file_name".to_string()),
            });
        }
        if self.fetcher.program.is_none() && self.fetcher.program_name.trim().is_empty() {
            return Err(Error::Config {
                message: "either program or program_name must be set".to_string(),
                key: Some("fetcher.program".to_string()),
            });
        }
        Ok(())
    }
}

fn default_program_name() -> String {
    "chapter-fetcher".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_source_config() -> PathBuf {
    PathBuf::from("sources.json")
}

fn default_search_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_max_concurrent() -> usize {
    1
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(500)
}

fn default_stop_grace_period() -> Duration {
    Duration::from_secs(10)
}

fn default_shutdown_grace() -> Duration {
    Duration::from_secs(5)
}

fn default_output_tail_lines() -> usize {
    20
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_state_file_name() -> String {
    "download_states.json".to_string()
}

fn default_save_interval() -> Duration {
    Duration::from_secs(5)
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Duration serialization helper (milliseconds)
mod millis_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
