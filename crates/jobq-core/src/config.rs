//! Queue configuration store
//!
//! Two tunables persisted as `config.json` in the data directory:
//! `max-retries` (default retry limit for new jobs) and `backoff-base`
//! (base of the retry backoff exponential). Every other key is
//! rejected, as is any non-positive value.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// File name of the config store inside the data directory
pub const CONFIG_FILE: &str = "config.json";

/// Recognized config keys
pub const KEY_MAX_RETRIES: &str = "max-retries";
pub const KEY_BACKOFF_BASE: &str = "backoff-base";

fn default_max_retries() -> u32 {
    crate::jobs::job::DEFAULT_MAX_RETRIES
}

fn default_backoff_base() -> f64 {
    crate::jobs::retry::DEFAULT_BACKOFF_BASE
}

/// The queue's persisted tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueueConfig {
    /// Default `max_retries` for jobs enqueued without one
    #[serde(rename = "max-retries", default = "default_max_retries")]
    pub max_retries: u32,

    /// Base of the exponential backoff between retries
    #[serde(rename = "backoff-base", default = "default_backoff_base")]
    pub backoff_base: f64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base: default_backoff_base(),
        }
    }
}

impl QueueConfig {
    /// Load the config from a data directory; a missing file yields
    /// the defaults.
    pub async fn load(data_dir: &Path) -> Result<Self> {
        match tokio::fs::read(config_path(data_dir)).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Persist the config into a data directory
    pub async fn save(&self, data_dir: &Path) -> Result<()> {
        tokio::fs::create_dir_all(data_dir).await?;
        let bytes = serde_json::to_vec_pretty(self)?;
        tokio::fs::write(config_path(data_dir), bytes).await?;
        Ok(())
    }

    /// Set a key from its string representation, validating both the
    /// key and the value.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            KEY_MAX_RETRIES => {
                let parsed: u32 = value.parse().map_err(|_| {
                    Error::validation(format!(
                        "{} must be a positive integer, got '{}'",
                        KEY_MAX_RETRIES, value
                    ))
                })?;
                if parsed == 0 {
                    return Err(Error::validation(format!(
                        "{} must be positive",
                        KEY_MAX_RETRIES
                    )));
                }
                self.max_retries = parsed;
                Ok(())
            }
            KEY_BACKOFF_BASE => {
                let parsed: f64 = value.parse().map_err(|_| {
                    Error::validation(format!(
                        "{} must be a positive number, got '{}'",
                        KEY_BACKOFF_BASE, value
                    ))
                })?;
                if !parsed.is_finite() || parsed <= 0.0 {
                    return Err(Error::validation(format!(
                        "{} must be positive",
                        KEY_BACKOFF_BASE
                    )));
                }
                self.backoff_base = parsed;
                Ok(())
            }
            other => Err(Error::validation(format!("Unknown config key: {}", other))),
        }
    }

    /// Get a key's value as a string
    pub fn get(&self, key: &str) -> Result<String> {
        match key {
            KEY_MAX_RETRIES => Ok(self.max_retries.to_string()),
            KEY_BACKOFF_BASE => Ok(self.backoff_base.to_string()),
            other => Err(Error::validation(format!("Unknown config key: {}", other))),
        }
    }

    /// All recognized keys with their current values
    pub fn entries(&self) -> Vec<(&'static str, String)> {
        vec![
            (KEY_MAX_RETRIES, self.max_retries.to_string()),
            (KEY_BACKOFF_BASE, self.backoff_base.to_string()),
        ]
    }
}

fn config_path(data_dir: &Path) -> PathBuf {
    data_dir.join(CONFIG_FILE)
}

/// Resolve the data directory: `DATA_PATH` when set, `./data`
/// otherwise.
pub fn resolve_data_dir() -> PathBuf {
    match std::env::var("DATA_PATH") {
        Ok(path) if !path.trim().is_empty() => PathBuf::from(path),
        _ => PathBuf::from("./data"),
    }
}
