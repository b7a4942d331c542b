//! External fetcher invocation
//!
//! The fetcher is a separate program that retrieves chapters from a source site.
//! This module builds its argument list, spawns it with both output streams merged
//! into one line stream, and runs its one-shot operations (search, info).

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

use crate::config::FetcherConfig;
use crate::error::{Error, Result};
use crate::types::{DownloadTask, FetchSource, SearchResult};

/// Lines buffered between the output readers and the worker
const LINE_BUFFER: usize = 256;

/// Exit status of an external command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// The command exited successfully (exit code 0)
    Success,
    /// The command exited with a non-zero exit code or was killed
    Failure,
}

impl ExitStatus {
    /// Returns `true` if the exit status represents success
    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

impl From<bool> for ExitStatus {
    fn from(success: bool) -> Self {
        if success {
            Self::Success
        } else {
            Self::Failure
        }
    }
}

/// Metadata returned by the fetcher's `info` operation
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentInfo {
    /// Content title
    #[serde(default)]
    pub title: String,
    /// Author
    #[serde(default)]
    pub author: String,
    /// Short description
    #[serde(default)]
    pub description: String,
    /// Cover image URL
    #[serde(default)]
    pub cover_url: String,
    /// Chapter count
    #[serde(default)]
    pub total_chapters: u32,
    /// Chapter page URLs in reading order
    #[serde(default)]
    pub chapter_urls: Vec<String>,
}

/// Argument list for one download run
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchInvocation {
    args: Vec<String>,
}

impl FetchInvocation {
    /// Build the `download` arguments for a task
    pub fn build(task: &DownloadTask, config: &FetcherConfig, signal_dir: &Path) -> Self {
        let output = config.output_dir.join(task.content_type.library_dir());
        let mut args = vec![
            "download".to_string(),
            "--source".to_string(),
            task.source_name.clone(),
            "--output".to_string(),
            output.display().to_string(),
            "--start".to_string(),
            task.range.start.to_string(),
        ];

        match &task.source {
            FetchSource::Url(url) => {
                args.push("--url".to_string());
                args.push(url.clone());
            }
            FetchSource::Name(name) => {
                args.push("--name".to_string());
                args.push(name.clone());
            }
        }

        if let Some(end) = task.range.end.filter(|e| *e > 0) {
            args.push("--end".to_string());
            args.push(end.to_string());
        }

        args.extend([
            "--content-type".to_string(),
            task.content_type.as_str().to_string(),
            "--download-id".to_string(),
            task.id.to_string(),
            "--signal-dir".to_string(),
            signal_dir.display().to_string(),
            "--config".to_string(),
            config.source_config.display().to_string(),
        ]);

        Self { args }
    }

    /// Operation arguments (without the configured base arguments)
    pub fn args(&self) -> &[String] {
        &self.args
    }
}

/// A running fetcher process
///
/// stdout and stderr are read by two background readers feeding one channel, so
/// lines from both streams arrive in a single sequence.
#[derive(Debug)]
pub struct FetchProcess {
    child: Child,
    lines: mpsc::Receiver<String>,
}

impl FetchProcess {
    /// OS process id, while the process is running
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Next output line; None once both streams are closed
    pub async fn next_line(&mut self) -> Option<String> {
        self.lines.recv().await
    }

    /// Wait for the process to exit
    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        let status = self.child.wait().await?;
        Ok(ExitStatus::from(status.success()))
    }

    /// Kill the process and reap it
    pub async fn kill(&mut self) -> std::io::Result<()> {
        self.child.kill().await
    }
}

/// Handle for invoking the fetcher program
#[derive(Clone, Debug)]
pub struct Fetcher {
    program: PathBuf,
    config: FetcherConfig,
    signal_dir: PathBuf,
}

impl Fetcher {
    /// Resolve the fetcher program
    ///
    /// An explicit `program` is used as is. Otherwise `program_name` is looked up on
    /// PATH; if that fails the bare name is kept and spawning reports the failure.
    pub fn new(config: FetcherConfig, signal_dir: impl Into<PathBuf>) -> Self {
        let program = match &config.program {
            Some(path) => path.clone(),
            None => match which::which(&config.program_name) {
                Ok(path) => path,
                Err(e) => {
                    tracing::warn!(
                        program = %config.program_name,
                        error = %e,
                        "Fetcher program not found on PATH"
                    );
                    PathBuf::from(&config.program_name)
                }
            },
        };

        tracing::debug!(program = %program.display(), "Fetcher resolved");

        Self {
            program,
            config,
            signal_dir: signal_dir.into(),
        }
    }

    /// Resolved program path
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Fetcher settings
    pub fn config(&self) -> &FetcherConfig {
        &self.config
    }

    /// Build the download invocation for a task
    pub fn invocation(&self, task: &DownloadTask) -> FetchInvocation {
        FetchInvocation::build(task, &self.config, &self.signal_dir)
    }

    fn command(&self, args: &[String]) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.config.base_args)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        cmd
    }

    /// Start a download run
    pub fn spawn(&self, invocation: &FetchInvocation) -> std::io::Result<FetchProcess> {
        let mut child = self
            .command(invocation.args())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let (tx, lines) = mpsc::channel(LINE_BUFFER);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, tx));
        }

        Ok(FetchProcess { child, lines })
    }

    /// Search the configured sources
    pub async fn search(&self, query: &str) -> Result<Vec<SearchResult>> {
        let args = vec![
            "search".to_string(),
            "--query".to_string(),
            query.to_string(),
            "--config".to_string(),
            self.config.source_config.display().to_string(),
        ];
        self.run_json(&args, "search").await
    }

    /// Fetch metadata for one piece of content
    pub async fn info(&self, source: &FetchSource, source_name: &str) -> Result<ContentInfo> {
        let mut args = vec!["info".to_string()];
        match source {
            FetchSource::Url(url) => args.extend(["--url".to_string(), url.clone()]),
            FetchSource::Name(name) => args.extend(["--name".to_string(), name.clone()]),
        }
        args.extend([
            "--source".to_string(),
            source_name.to_string(),
            "--config".to_string(),
            self.config.source_config.display().to_string(),
        ]);
        self.run_json(&args, "info").await
    }

    async fn run_json<T: DeserializeOwned>(&self, args: &[String], operation: &str) -> Result<T> {
        let output = tokio::time::timeout(
            self.config.search_timeout,
            self.command(args)
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .output(),
        )
        .await
        .map_err(|_| {
            Error::ExternalTool(format!(
                "fetcher {} timed out after {}s",
                operation,
                self.config.search_timeout.as_secs()
            ))
        })?
        .map_err(|e| Error::ExternalTool(format!("Failed to execute fetcher: {}", e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let value = match parse_json_output(&stdout) {
            Some(value) => value,
            None if !output.status.success() => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(Error::ExternalTool(format!(
                    "fetcher {} failed: {}",
                    operation,
                    stderr.trim()
                )));
            }
            None => serde_json::from_str(stdout.trim())?,
        };

        if let Some(message) = value.get("error").and_then(|e| e.as_str()) {
            return Err(Error::ExternalTool(message.to_string()));
        }

        Ok(serde_json::from_value(value)?)
    }
}

async fn forward_lines<R>(stream: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf)
                    .trim_end_matches(['\r', '\n'])
                    .to_string();
                if tx.send(line).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "Fetcher output stream closed with error");
                break;
            }
        }
    }
}

/// Find the JSON document in fetcher output
///
/// The whole output is tried first, then the last line that looks like JSON.
fn parse_json_output(stdout: &str) -> Option<serde_json::Value> {
    if let Ok(value) = serde_json::from_str(stdout.trim()) {
        return Some(value);
    }
    stdout
        .lines()
        .rev()
        .map(str::trim)
        .filter(|l| l.starts_with('[') || l.starts_with('{'))
        .find_map(|l| serde_json::from_str(l).ok())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChapterRange, ContentType, DownloadRequest};
    use chrono::TimeZone;

    fn task(source: FetchSource, range: ChapterRange) -> DownloadTask {
        DownloadTask::from_request(
            DownloadRequest {
                content_name: "Example".to_string(),
                content_type: ContentType::Manga,
                source,
                source_name: "ExampleSite".to_string(),
                range,
                total_chapters: 0,
            },
            chrono::Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        )
    }

    fn config() -> FetcherConfig {
        FetcherConfig {
            output_dir: PathBuf::from("/library"),
            source_config: PathBuf::from("sources.json"),
            ..Default::default()
        }
    }

    #[test]
    fn invocation_with_url_and_end() {
        let t = task(
            FetchSource::Url("https://example.com/s/1".to_string()),
            ChapterRange {
                start: 5,
                end: Some(9),
            },
        );
        let inv = FetchInvocation::build(&t, &config(), Path::new("/state"));

        let expected: Vec<String> = [
            "download",
            "--source",
            "ExampleSite",
            "--output",
            "/library/Manga",
            "--start",
            "5",
            "--url",
            "https://example.com/s/1",
            "--end",
            "9",
            "--content-type",
            "manga",
            "--download-id",
            "manga_Example_1700000000",
            "--signal-dir",
            "/state",
            "--config",
            "sources.json",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        assert_eq!(inv.args(), expected.as_slice());
    }

    #[test]
    fn invocation_with_name_and_open_end() {
        let t = task(FetchSource::Name("Example".to_string()), ChapterRange::default());
        let inv = FetchInvocation::build(&t, &config(), Path::new("/state"));
        let args = inv.args();

        let name_pos = args.iter().position(|a| a == "--name").unwrap();
        assert_eq!(args[name_pos + 1], "Example");
        assert!(!args.iter().any(|a| a == "--end"));
        assert!(!args.iter().any(|a| a == "--url"));
    }

    #[test]
    fn explicit_program_is_used_as_is() {
        let fetcher = Fetcher::new(
            FetcherConfig {
                program: Some(PathBuf::from("/opt/fetch")),
                ..Default::default()
            },
            "/state",
        );
        assert_eq!(fetcher.program(), Path::new("/opt/fetch"));
    }

    #[test]
    fn json_output_found_after_noise() {
        let out = "Loading sources...\n[{\"title\":\"A\",\"url\":\"u\"}]\n";
        let value = parse_json_output(out).unwrap();
        assert!(value.is_array());
        assert!(parse_json_output("no json here").is_none());
    }

    #[cfg(unix)]
    fn shell_fetcher(script: &str) -> Fetcher {
        Fetcher::new(
            FetcherConfig {
                program: Some(PathBuf::from("sh")),
                base_args: vec!["-c".to_string(), script.to_string(), "sh".to_string()],
                ..Default::default()
            },
            "/tmp",
        )
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn search_parses_result_array() {
        let fetcher = shell_fetcher(
            r#"echo '[{"title":"Example","author":"Someone","url":"https://example.com/s/1","source_name":"ExampleSite","total_chapters":40,"description":"","cover_url":""}]'"#,
        );
        let results = fetcher.search("example").await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].title, "Example");
        assert_eq!(results[0].total_chapters, 40);
        assert_eq!(results[0].source_name, "ExampleSite");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn info_error_object_becomes_external_tool_error() {
        let fetcher = shell_fetcher(r#"echo '{"error": "unknown source"}'; exit 1"#);
        let result = fetcher
            .info(&FetchSource::Name("Example".to_string()), "Nowhere")
            .await;
        match result {
            Err(Error::ExternalTool(msg)) => assert_eq!(msg, "unknown source"),
            other => panic!("expected ExternalTool error, got: {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn spawn_merges_stdout_and_stderr() {
        let fetcher = shell_fetcher("echo out; echo err 1>&2; exit 0");
        let t = task(FetchSource::Name("Example".to_string()), ChapterRange::default());
        let mut process = fetcher.spawn(&fetcher.invocation(&t)).unwrap();

        let mut lines = Vec::new();
        while let Some(line) = process.next_line().await {
            lines.push(line);
        }
        lines.sort();
        assert_eq!(lines, vec!["err", "out"]);
        assert!(process.wait().await.unwrap().is_success());
    }

    #[tokio::test]
    async fn spawn_missing_program_fails() {
        let fetcher = Fetcher::new(
            FetcherConfig {
                program: Some(PathBuf::from("/nonexistent/path/to/fetcher")),
                ..Default::default()
            },
            "/tmp",
        );
        let t = task(FetchSource::Name("Example".to_string()), ChapterRange::default());
        assert!(fetcher.spawn(&fetcher.invocation(&t)).is_err());
        assert!(matches!(
            fetcher.search("x").await,
            Err(Error::ExternalTool(_))
        ));
    }
}
