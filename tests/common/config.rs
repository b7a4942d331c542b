//! Test configuration builders

use chapter_dl::Config;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration rooted at `root` that runs `script` through `sh` as the fetcher
pub fn create_test_config(root: &Path, script: &str) -> Config {
    let mut config = Config::default();
    config.fetcher.program = Some(PathBuf::from("sh"));
    config.fetcher.base_args = vec!["-c".to_string(), script.to_string(), "sh".to_string()];
    config.fetcher.output_dir = root.join("library");
    config.persistence.state_dir = root.join("state");
    config.persistence.save_interval = Duration::ZERO;
    config.download.poll_interval = Duration::from_millis(20);
    config.download.stop_grace_period = Duration::from_secs(2);
    config.download.shutdown_grace = Duration::from_secs(3);
    config
}

/// Directory the fake fetcher writes a novel's chapters into
pub fn novel_dir(root: &Path, name: &str) -> PathBuf {
    root.join("library").join("Novels").join(name)
}

/// Number of chapter files on disk for a novel
pub fn chapter_files(root: &Path, name: &str) -> usize {
    std::fs::read_dir(novel_dir(root, name))
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter(|e| e.file_name().to_string_lossy().starts_with("chapter_"))
                .count()
        })
        .unwrap_or(0)
}
