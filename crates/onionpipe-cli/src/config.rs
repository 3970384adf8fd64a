//! Configuration loading from TOML files

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use onionpipe_core::{PageLimits, RetryPolicy, TorConfig};
use onionpipe_sources::UndatedPolicy;
use serde::Deserialize;

/// Global configuration for onionpipe
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub tor: TorSection,
    pub retry: RetrySection,
    pub paging: PagingSection,
    pub bulk: BulkSection,
    pub output: OutputSection,
    pub feed: FeedSection,
    pub board: BoardSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TorSection {
    pub proxy_host: String,
    pub proxy_port: u16,
    pub control_port: u16,
    #[serde(deserialize_with = "deserialize_env_var")]
    pub control_password: Option<String>,
    pub timeout_secs: u64,
    pub settle_secs: u64,
    pub accept_invalid_certs: bool,
}

impl Default for TorSection {
    fn default() -> Self {
        Self {
            proxy_host: "127.0.0.1".to_string(),
            proxy_port: 9150,
            control_port: 9051,
            control_password: std::env::var("TOR_CONTROL_PASSWORD").ok(),
            timeout_secs: 60,
            settle_secs: 3,
            accept_invalid_certs: false,
        }
    }
}

impl TorSection {
    pub fn to_tor_config(&self) -> TorConfig {
        TorConfig {
            proxy_host: self.proxy_host.clone(),
            proxy_port: self.proxy_port,
            control_port: self.control_port,
            control_password: self.control_password.clone(),
            connect_timeout: Duration::from_secs(self.timeout_secs),
            timeout: Duration::from_secs(self.timeout_secs),
            settle: Duration::from_secs(self.settle_secs),
            accept_invalid_certs: self.accept_invalid_certs,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_attempts: u32,
    pub backoff_base_secs: u64,
    pub challenge_markers: Vec<String>,
}

impl Default for RetrySection {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            backoff_base_secs: 3,
            challenge_markers: policy.challenge_markers,
        }
    }
}

impl RetrySection {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            challenge_markers: self.challenge_markers.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct PagingSection {
    pub max_pages: u32,
    pub max_consecutive_empty: u32,
    pub delay_ms: u64,
}

impl Default for PagingSection {
    fn default() -> Self {
        Self {
            max_pages: 41,
            max_consecutive_empty: 3,
            delay_ms: 1000,
        }
    }
}

impl PagingSection {
    pub fn limits(&self, max_pages: Option<u32>) -> PageLimits {
        PageLimits {
            max_pages: Some(max_pages.unwrap_or(self.max_pages)),
            max_consecutive_empty: self.max_consecutive_empty,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct BulkSection {
    pub delay_secs: f64,
    pub batch_size: usize,
    /// Checkpoint after this many successful URLs
    pub save_every: usize,
}

impl Default for BulkSection {
    fn default() -> Self {
        Self {
            delay_secs: 3.0,
            batch_size: 20,
            save_every: 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputSection {
    pub dir: PathBuf,
    pub zstd_level: i32,
    /// Feed/board checkpoint cadence, in collected records
    pub save_every: usize,
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
            zstd_level: 3,
            save_every: 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedSection {
    pub base_url: Option<String>,
    pub group: String,
    pub year: Option<i32>,
    pub undated: UndatedPolicy,
}

impl Default for FeedSection {
    fn default() -> Self {
        Self {
            base_url: None,
            group: "akira".to_string(),
            year: None,
            undated: UndatedPolicy::Keep,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BoardSection {
    pub mirrors: Vec<String>,
    pub group: String,
    pub mirror_pause_secs: u64,
}

impl Default for BoardSection {
    fn default() -> Self {
        Self {
            mirrors: Vec::new(),
            group: "play".to_string(),
            mirror_pause_secs: 3,
        }
    }
}

/// Deserialize a string that may be an environment variable reference like ${VAR}
fn deserialize_env_var<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    Ok(opt.and_then(|s| expand_env_var(&s)))
}

/// Expand ${VAR} to environment variable value
fn expand_env_var(s: &str) -> Option<String> {
    if let Some(var_name) = s.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        std::env::var(var_name).ok()
    } else {
        Some(s.to_string())
    }
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Search order:
    /// 1. ./onionpipe.toml (current directory)
    /// 2. ~/.config/onionpipe/config.toml
    ///
    /// If no config file found, returns default config.
    pub fn load() -> Result<Self> {
        let local_config = PathBuf::from("onionpipe.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = directories::ProjectDirs::from("", "", "onionpipe") {
            let user_config = config_dir.config_dir().join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        log::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }
}
