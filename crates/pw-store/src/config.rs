//! Runtime configuration: `<data_dir>/config.toml` plus environment overrides.

use std::path::{Path, PathBuf};
use std::{env, fs};

use serde::{Deserialize, Serialize};
use tracing::debug;

use pw_core::{GestureConfig, MODE_RESET_MS, PENDING_EVENT_LIMIT};

use crate::error::Result;

pub const CONFIG_FILE: &str = "config.toml";
pub const CONTENT_DB: &str = "content.db";

/// Default base directory for all pagewise storage.
fn default_data_dir() -> PathBuf {
    dirs_home().join(".pagewise")
}

fn dirs_home() -> PathBuf {
    env::var("HOME")
        .or_else(|_| env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// `PW_DATA_DIR` if set, otherwise `~/.pagewise`.
pub fn data_dir() -> PathBuf {
    env::var_os("PW_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(default_data_dir)
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub gesture: GestureConfig,
    pub reader: ReaderConfig,
    pub backend: BackendConfig,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    pub mode_reset_ms: u64,
    pub pending_event_limit: usize,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            mode_reset_ms: MODE_RESET_MS,
            pending_event_limit: PENDING_EVENT_LIMIT,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub url: Option<String>,
    pub api_key: Option<String>,
}

impl Config {
    /// Parse a config file's contents. Missing keys take their defaults.
    pub fn from_toml(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Load `<dir>/config.toml` (defaults if absent), then apply the
    /// `PW_BACKEND_URL` / `PW_API_KEY` overrides.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE);
        let config = if path.exists() {
            debug!(path = %path.display(), "loading config");
            Self::from_toml(&fs::read_to_string(&path)?)?
        } else {
            Self::default()
        };
        Ok(config.with_overrides(|key| env::var(key).ok()))
    }

    /// Apply backend overrides from a key lookup (the process environment in
    /// normal use).
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = lookup("PW_BACKEND_URL").filter(|v| !v.is_empty()) {
            self.backend.url = Some(url);
        }
        if let Some(key) = lookup("PW_API_KEY").filter(|v| !v.is_empty()) {
            self.backend.api_key = Some(key);
        }
        self
    }

    pub fn content_db_path(dir: &Path) -> PathBuf {
        dir.join(CONTENT_DB)
    }
}
