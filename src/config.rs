//! Configuration management for vine-harvest using the prefer crate.
//!
//! Settings are layered: built-in defaults, then an optional config file,
//! then command-line flags and environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::HarvestError;
use crate::rewrite::{DEFAULT_LEGACY_HOSTS, DEFAULT_MIRROR_HOST};

pub const DEFAULT_INPUT: &str = "vine_tweets";
pub const DEFAULT_OUTPUT: &str = "vine_archive_harvest";
pub const DEFAULT_PROFILE_BASE: &str = "https://archive.vine.co/profiles";
pub const DEFAULT_POST_BASE: &str = "https://archive.vine.co/posts";
pub const DEFAULT_REFERER: &str = "https://archive.vine.co/";
pub const DEFAULT_WORKERS: usize = 32;
pub const DEFAULT_RATE_LIMIT: f64 = 10.0;
pub const DEFAULT_INPUT_SUFFIX: &str = ".txt";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;

/// Resolved settings used by the harvester.
#[derive(Debug, Clone, PartialEq)]
pub struct HarvestSettings {
    /// Corpus location: a local path or `s3://bucket/prefix`.
    pub input: String,
    /// Output location: a local path or `s3://bucket/prefix`.
    pub output: String,
    pub profile_base: String,
    pub post_base: String,
    pub workers: usize,
    /// Aggregate request ceiling in requests per second.
    pub rate_limit: f64,
    pub download_media: bool,
    /// Delay between iterations. Zero runs once.
    pub poll_interval: Duration,
    pub legacy_hosts: Vec<String>,
    pub mirror_host: String,
    /// Cap on slugs resolved per iteration.
    pub limit: Option<usize>,
    /// Only corpus keys ending with this suffix are scanned. Empty scans all.
    pub input_suffix: String,
    pub user_agent: Option<String>,
    pub referer: Option<String>,
    pub request_timeout: Duration,
}

impl Default for HarvestSettings {
    fn default() -> Self {
        Self {
            input: DEFAULT_INPUT.to_string(),
            output: DEFAULT_OUTPUT.to_string(),
            profile_base: DEFAULT_PROFILE_BASE.to_string(),
            post_base: DEFAULT_POST_BASE.to_string(),
            workers: DEFAULT_WORKERS,
            rate_limit: DEFAULT_RATE_LIMIT,
            download_media: false,
            poll_interval: Duration::ZERO,
            legacy_hosts: DEFAULT_LEGACY_HOSTS.iter().map(|h| h.to_string()).collect(),
            mirror_host: DEFAULT_MIRROR_HOST.to_string(),
            limit: None,
            input_suffix: DEFAULT_INPUT_SUFFIX.to_string(),
            user_agent: None,
            referer: Some(DEFAULT_REFERER.to_string()),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

impl HarvestSettings {
    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), HarvestError> {
        if self.input.trim().is_empty() {
            return Err(HarvestError::Config("input location is empty".to_string()));
        }
        if self.output.trim().is_empty() {
            return Err(HarvestError::Config("output location is empty".to_string()));
        }
        if self.workers == 0 {
            return Err(HarvestError::Config("workers must be at least 1".to_string()));
        }
        if !(self.rate_limit.is_finite() && self.rate_limit > 0.0) {
            return Err(HarvestError::Config(format!(
                "rate_limit must be > 0, got {}",
                self.rate_limit
            )));
        }
        if self.request_timeout.is_zero() {
            return Err(HarvestError::Config(
                "request_timeout_secs must be > 0".to_string(),
            ));
        }
        if self.profile_base.is_empty() || self.post_base.is_empty() {
            return Err(HarvestError::Config(
                "profile_base and post_base must be set".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration file contents. Every field is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_base: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_base: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,
    /// Requests per second.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_media: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legacy_hosts: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mirror_host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_suffix: Option<String>,
    /// Custom user agent, or "impersonate" for a browser one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,

    /// Path the config was loaded from.
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration using prefer for discovery.
    /// Falls back to defaults when no vineharvest config file is found.
    pub async fn load() -> Result<Self, HarvestError> {
        match prefer::load("vineharvest").await {
            Ok(pref_config) => match pref_config.source_path() {
                Some(path) => Self::load_from_path(path).await,
                None => Ok(Self::default()),
            },
            Err(_) => {
                tracing::debug!("No vineharvest config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Load configuration from a specific file. TOML for `.toml`, JSON
    /// otherwise.
    pub async fn load_from_path(path: &Path) -> Result<Self, HarvestError> {
        let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
            HarvestError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let mut config = Self::parse(&contents, path)?;
        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    fn parse(contents: &str, path: &Path) -> Result<Self, HarvestError> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");
        match ext {
            "toml" => toml::from_str(contents).map_err(|e| {
                HarvestError::Config(format!("Failed to parse TOML config: {}", e))
            }),
            _ => serde_json::from_str(contents).map_err(|e| {
                HarvestError::Config(format!("Failed to parse JSON config: {}", e))
            }),
        }
    }

    /// Directory relative paths in the file are resolved against.
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    }

    /// Resolve a location from the config file. Object storage URIs pass
    /// through; `~` is expanded and relative paths are joined to `base_dir`.
    pub fn resolve_location(&self, location: &str, base_dir: &Path) -> String {
        if location.starts_with("s3://") {
            return location.to_string();
        }
        let expanded = shellexpand::tilde(location);
        let path = Path::new(expanded.as_ref());
        if path.is_absolute() {
            path.display().to_string()
        } else {
            base_dir.join(path).display().to_string()
        }
    }

    /// Overlay this file's values onto `settings`.
    pub fn apply_to_settings(&self, settings: &mut HarvestSettings) {
        let base_dir = self
            .base_dir()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

        if let Some(ref input) = self.input {
            settings.input = self.resolve_location(input, &base_dir);
        }
        if let Some(ref output) = self.output {
            settings.output = self.resolve_location(output, &base_dir);
        }
        if let Some(ref base) = self.profile_base {
            settings.profile_base = base.clone();
        }
        if let Some(ref base) = self.post_base {
            settings.post_base = base.clone();
        }
        if let Some(workers) = self.workers {
            settings.workers = workers;
        }
        if let Some(rate) = self.rate_limit {
            settings.rate_limit = rate;
        }
        if let Some(download) = self.download_media {
            settings.download_media = download;
        }
        if let Some(secs) = self.poll_interval_secs {
            settings.poll_interval = Duration::from_secs(secs);
        }
        if let Some(ref hosts) = self.legacy_hosts {
            settings.legacy_hosts = hosts.clone();
        }
        if let Some(ref mirror) = self.mirror_host {
            settings.mirror_host = mirror.clone();
        }
        if let Some(limit) = self.limit {
            // 0 means no cap
            settings.limit = (limit > 0).then_some(limit);
        }
        if let Some(ref suffix) = self.input_suffix {
            settings.input_suffix = suffix.clone();
        }
        if let Some(ref ua) = self.user_agent {
            settings.user_agent = Some(ua.clone());
        }
        if let Some(ref referer) = self.referer {
            settings.referer = (!referer.is_empty()).then(|| referer.clone());
        }
        if let Some(secs) = self.request_timeout_secs {
            settings.request_timeout = Duration::from_secs(secs);
        }
    }

    /// Defaults with this file applied.
    pub fn to_settings(&self) -> HarvestSettings {
        let mut settings = HarvestSettings::default();
        self.apply_to_settings(&mut settings);
        settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_are_valid() {
        let settings = HarvestSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.workers, 32);
        assert_eq!(settings.rate_limit, 10.0);
        assert_eq!(settings.legacy_hosts.len(), 4);
        assert!(settings.poll_interval.is_zero());
    }

    #[test]
    fn test_validate_rejects_zero_rate_and_workers() {
        let mut settings = HarvestSettings {
            rate_limit: 0.0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());

        settings.rate_limit = 2.0;
        settings.workers = 0;
        assert!(settings.validate().is_err());
    }

    #[tokio::test]
    async fn test_load_toml_resolves_relative_paths() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vineharvest.toml");
        std::fs::write(
            &path,
            r#"
input = "corpus"
output = "s3://bucket/harvest"
workers = 8
rate_limit = 2.5
limit = 0
referer = ""
"#,
        )
        .unwrap();

        let config = Config::load_from_path(&path).await.unwrap();
        let settings = config.to_settings();

        assert_eq!(
            settings.input,
            dir.path().join("corpus").display().to_string()
        );
        assert_eq!(settings.output, "s3://bucket/harvest");
        assert_eq!(settings.workers, 8);
        assert_eq!(settings.rate_limit, 2.5);
        assert_eq!(settings.limit, None);
        assert_eq!(settings.referer, None);
        assert_eq!(settings.post_base, DEFAULT_POST_BASE);
    }

    #[tokio::test]
    async fn test_load_json_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vineharvest.json");
        std::fs::write(
            &path,
            r#"{"download_media": true, "poll_interval_secs": 600, "mirror_host": "https://mirror.example"}"#,
        )
        .unwrap();

        let settings = Config::load_from_path(&path).await.unwrap().to_settings();
        assert!(settings.download_media);
        assert_eq!(settings.poll_interval, Duration::from_secs(600));
        assert_eq!(settings.mirror_host, "https://mirror.example");
    }

    #[tokio::test]
    async fn test_unknown_keys_are_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vineharvest.toml");
        std::fs::write(&path, "wokers = 3\n").unwrap();
        assert!(Config::load_from_path(&path).await.is_err());
    }
}
