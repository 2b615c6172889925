//! Configuration loader and validator for the photo booth backend.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::polling::{Backoff, RetryPolicy};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub app: App,
    pub provider: Provider,
    #[serde(default)]
    pub jobs: Jobs,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

/// External image-transformation provider settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Provider {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub poll_interval_ms: u64,
    pub max_attempts: u32,
    #[serde(default)]
    pub backoff: BackoffConfig,
    #[serde(default = "default_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

/// Polling backoff as written in YAML.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffConfig {
    #[default]
    Fixed,
    Exponential { factor: f64, max_interval_ms: u64 },
}

/// In-memory job bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Jobs {
    pub ttl_seconds: u64,
    pub max_entries: usize,
    pub simulated_effect_ms: u64,
}

impl Default for Jobs {
    fn default() -> Self {
        Self {
            ttl_seconds: 3600,
            max_entries: 500,
            simulated_effect_ms: 1500,
        }
    }
}

fn default_bind_addr() -> String {
    "0.0.0.0:5000".into()
}

fn default_concurrency() -> usize {
    1
}

fn default_request_timeout() -> u64 {
    60
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    /// Apply `PROVIDER_API_KEY` from the environment when present.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("PROVIDER_API_KEY") {
            if !key.trim().is_empty() {
                self.provider.api_key = key;
            }
        }
    }

    /// Poll policy used by the orchestrator for every submitted image.
    pub fn retry_policy(&self) -> RetryPolicy {
        let backoff = match &self.provider.backoff {
            BackoffConfig::Fixed => Backoff::Fixed,
            BackoffConfig::Exponential {
                factor,
                max_interval_ms,
            } => Backoff::Exponential {
                factor: *factor,
                max_interval: Duration::from_millis(*max_interval_ms),
            },
        };
        RetryPolicy {
            max_attempts: self.provider.max_attempts,
            interval: Duration::from_millis(self.provider.poll_interval_ms),
            backoff,
        }
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let mut cfg: Config = serde_yaml::from_str(&content)?;
    cfg.apply_env_overrides();
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
/// Finished jobs are kept at most 30 days.
pub const MAX_JOB_TTL_SECONDS: u64 = 30 * 24 * 3600;

pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.bind_addr.parse::<std::net::SocketAddr>().is_err() {
        return Err(ConfigError::Invalid("app.bind_addr must be host:port"));
    }

    if cfg.provider.api_key.trim().is_empty() {
        return Err(ConfigError::Invalid("provider.api_key must be non-empty"));
    }
    if reqwest::Url::parse(&cfg.provider.base_url).is_err() {
        return Err(ConfigError::Invalid("provider.base_url must be a valid URL"));
    }
    if cfg.provider.model.trim().is_empty() {
        return Err(ConfigError::Invalid("provider.model must be non-empty"));
    }
    if cfg.provider.poll_interval_ms == 0 {
        return Err(ConfigError::Invalid("provider.poll_interval_ms must be > 0"));
    }
    if cfg.provider.max_attempts == 0 {
        return Err(ConfigError::Invalid("provider.max_attempts must be > 0"));
    }
    if cfg.provider.max_concurrency == 0 {
        return Err(ConfigError::Invalid("provider.max_concurrency must be > 0"));
    }
    if let BackoffConfig::Exponential { factor, .. } = cfg.provider.backoff {
        if factor < 1.0 {
            return Err(ConfigError::Invalid("provider.backoff.factor must be >= 1.0"));
        }
    }

    if cfg.jobs.max_entries == 0 {
        return Err(ConfigError::Invalid("jobs.max_entries must be > 0"));
    }
    if !(1..=MAX_JOB_TTL_SECONDS).contains(&cfg.jobs.ttl_seconds) {
        return Err(ConfigError::Invalid(
            "jobs.ttl_seconds must be between 1 and 2592000 (30 days)",
        ));
    }

    Ok(())
}

/// Returns the example YAML document printed by `--print-example`.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  bind_addr: "0.0.0.0:5000"

provider:
  api_key: "YOUR_PROVIDER_API_KEY"
  base_url: "https://api.bfl.ai/"
  model: "v1/flux-kontext-pro"
  poll_interval_ms: 4000
  max_attempts: 30
  backoff:
    kind: fixed
  max_concurrency: 1
  request_timeout_secs: 60

jobs:
  ttl_seconds: 3600
  max_entries: 500
  simulated_effect_ms: 1500
"#
}
