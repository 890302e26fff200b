//! Configuration loading for chronpipe.
//!
//! Settings are plain JSON or YAML (detected from the file extension) with
//! `CHRONPIPE_`-prefixed environment variable overrides applied on top.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrSettings {
    #[serde(default = "default_ocr_language")]
    pub language: String,
    #[serde(default = "default_ocr_engine")]
    pub engine: String,
    #[serde(default = "default_ocr_max_workers")]
    pub max_workers: usize,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            language: default_ocr_language(),
            engine: default_ocr_engine(),
            max_workers: default_ocr_max_workers(),
        }
    }
}

fn default_ocr_language() -> String {
    "eng".to_string()
}
fn default_ocr_engine() -> String {
    "tesseract".to_string()
}
fn default_ocr_max_workers() -> usize {
    2
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloaderSettings {
    #[serde(default = "default_rate_limit")]
    pub rate_limit: f64,
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
}

impl Default for DownloaderSettings {
    fn default() -> Self {
        Self {
            rate_limit: default_rate_limit(),
            max_workers: default_max_workers(),
            retry_attempts: default_retry_attempts(),
        }
    }
}

fn default_rate_limit() -> f64 {
    2.0
}
fn default_max_workers() -> usize {
    4
}
fn default_retry_attempts() -> u32 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSettings {
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_lease_duration")]
    pub lease_duration_secs: i64,
    #[serde(default = "default_max_task_duration")]
    pub max_task_duration_secs: i64,
    #[serde(default = "default_cancellation_grace")]
    pub cancellation_grace_secs: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            max_concurrent: default_max_concurrent(),
            batch_size: default_batch_size(),
            lease_duration_secs: default_lease_duration(),
            max_task_duration_secs: default_max_task_duration(),
            cancellation_grace_secs: default_cancellation_grace(),
        }
    }
}

fn default_poll_interval() -> u64 {
    5
}
fn default_max_concurrent() -> usize {
    2
}
fn default_batch_size() -> usize {
    1
}
fn default_lease_duration() -> i64 {
    600
}
fn default_max_task_duration() -> i64 {
    7200
}
fn default_cancellation_grace() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionSettings {
    #[serde(default = "default_archive_days")]
    pub archive_days: u32,
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self {
            archive_days: default_archive_days(),
        }
    }
}

fn default_archive_days() -> u32 {
    365
}

/// Top-level configuration, covering exactly the keys enumerated in the
/// spec plus directory-layout derivations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub repository_path: PathBuf,
    pub database_path: PathBuf,
    pub search_index_path: PathBuf,
    pub main_database_path: PathBuf,
    #[serde(default)]
    pub ocr: OcrSettings,
    #[serde(default)]
    pub downloader: DownloaderSettings,
    #[serde(default)]
    pub queue: QueueSettings,
    #[serde(default)]
    pub retention: RetentionSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            repository_path: PathBuf::from("./data/repository"),
            database_path: PathBuf::from("./data/repository.sqlite"),
            search_index_path: PathBuf::from("./data/search_index"),
            main_database_path: PathBuf::from("./data/main.sqlite"),
            ocr: OcrSettings::default(),
            downloader: DownloaderSettings::default(),
            queue: QueueSettings::default(),
            retention: RetentionSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings from a JSON or YAML file (detected by extension),
    /// then apply `CHRONPIPE_*` environment variable overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::Validation(format!("reading config {path:?}: {e}")))?;

        let mut settings: Settings = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&raw)
                .map_err(|e| PipelineError::Validation(format!("parsing YAML config: {e}")))?,
            _ => serde_json::from_str(&raw)
                .map_err(|e| PipelineError::Validation(format!("parsing JSON config: {e}")))?,
        };

        settings.apply_env_overrides();
        Ok(settings)
    }

    /// Apply `CHRONPIPE_*` environment variable overrides on top of a
    /// loaded (or default) configuration.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("CHRONPIPE_REPOSITORY_PATH") {
            self.repository_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("CHRONPIPE_DATABASE_PATH") {
            self.database_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("CHRONPIPE_SEARCH_INDEX_PATH") {
            self.search_index_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("CHRONPIPE_MAIN_DATABASE_PATH") {
            self.main_database_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("CHRONPIPE_OCR__ENGINE") {
            self.ocr.engine = v;
        }
        if let Ok(v) = std::env::var("CHRONPIPE_OCR__LANGUAGE") {
            self.ocr.language = v;
        }
        if let Ok(v) = std::env::var("CHRONPIPE_DOWNLOADER__RATE_LIMIT") {
            if let Ok(v) = v.parse() {
                self.downloader.rate_limit = v;
            }
        }
        if let Ok(v) = std::env::var("CHRONPIPE_QUEUE__MAX_CONCURRENT") {
            if let Ok(v) = v.parse() {
                self.queue.max_concurrent = v;
            }
        }
    }

    /// Create on-disk directories the repository store will write into.
    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [
            self.repository_path.join("originals"),
            self.repository_path.join("ocr").join("text"),
            self.repository_path.join("ocr").join("hocr"),
            self.repository_path.join("segments"),
            self.search_index_path.clone(),
        ] {
            std::fs::create_dir_all(&dir)?;
        }
        if let Some(parent) = self.database_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if let Some(parent) = self.main_database_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_have_sane_values() {
        let s = Settings::default();
        assert_eq!(s.ocr.language, "eng");
        assert_eq!(s.downloader.rate_limit, 2.0);
        assert_eq!(s.queue.poll_interval, 5);
        assert_eq!(s.retention.archive_days, 365);
    }

    #[test]
    fn loads_json_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"repository_path":"/tmp/repo","database_path":"/tmp/repo.sqlite","search_index_path":"/tmp/idx","main_database_path":"/tmp/main.sqlite","ocr":{"engine":"tesseract"}}"#,
        )
        .unwrap();
        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.repository_path, PathBuf::from("/tmp/repo"));
        assert_eq!(settings.ocr.engine, "tesseract");
    }

    #[test]
    fn loads_yaml_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "repository_path: /tmp/repo\ndatabase_path: /tmp/repo.sqlite\nsearch_index_path: /tmp/idx\nmain_database_path: /tmp/main.sqlite\n",
        )
        .unwrap();
        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.repository_path, PathBuf::from("/tmp/repo"));
    }
}
