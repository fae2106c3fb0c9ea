//! Flowtrace Configuration Module
//!
//! Defaults for live sessions and the time-travel recorder.
//! Config is stored in `~/.config/flowtrace/config.toml`.
//!
//! ## Priority Order (highest to lowest)
//!
//! 1. CLI flags (applied by the caller)
//! 2. Environment variables (`FLOWTRACE_DEBOUNCE_MS`, `FLOWTRACE_MAX_WAIT_MS`)
//! 3. Config file (`~/.config/flowtrace/config.toml`)
//! 4. Defaults
//!
//! ```toml
//! [live]
//! title = "Nightly ETL"
//! debounce_ms = 500
//! max_wait_ms = 5000
//!
//! [recorder]
//! max_snapshots = 1000
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{FlowtraceError, Result};
use crate::live::LiveSessionOptions;

pub const ENV_DEBOUNCE_MS: &str = "FLOWTRACE_DEBOUNCE_MS";
pub const ENV_MAX_WAIT_MS: &str = "FLOWTRACE_MAX_WAIT_MS";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FlowtraceConfig {
    #[serde(default)]
    pub live: LiveConfig,

    #[serde(default)]
    pub recorder: RecorderConfig,
}

/// `[live]` section
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LiveConfig {
    /// Title passed to sinks
    pub title: Option<String>,

    pub debounce_ms: Option<u64>,

    pub max_wait_ms: Option<u64>,
}

/// `[recorder]` section
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RecorderConfig {
    /// Snapshot history bound (unbounded if unset)
    pub max_snapshots: Option<usize>,
}

impl FlowtraceConfig {
    /// Returns `~/.config/flowtrace/` on Unix, `%APPDATA%/flowtrace/` on Windows
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("flowtrace")
    }

    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Load from the default location
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load from `path`
    ///
    /// Returns default config if file doesn't exist.
    /// Returns error if file exists but is malformed.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| FlowtraceError::ConfigError {
            reason: format!("Failed to read config file: {}", e),
        })?;

        toml::from_str(&content).map_err(|e| FlowtraceError::ConfigError {
            reason: format!("Failed to parse config file: {}", e),
        })
    }

    /// Merge with environment variables
    ///
    /// Environment variables take precedence over config file values.
    pub fn with_env(self) -> Result<Self> {
        self.with_env_from(|key| std::env::var(key).ok())
    }

    /// `with_env` over an arbitrary lookup
    pub fn with_env_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(ms) = parse_env_ms(&lookup, ENV_DEBOUNCE_MS)? {
            self.live.debounce_ms = Some(ms);
        }
        if let Some(ms) = parse_env_ms(&lookup, ENV_MAX_WAIT_MS)? {
            self.live.max_wait_ms = Some(ms);
        }
        Ok(self)
    }

    /// Session options with defaults filled in (not yet validated)
    pub fn live_options(&self) -> LiveSessionOptions {
        let mut options = LiveSessionOptions::default();
        if let Some(title) = &self.live.title {
            options.title = title.clone();
        }
        if let Some(ms) = self.live.debounce_ms {
            options.debounce_ms = ms;
        }
        if let Some(ms) = self.live.max_wait_ms {
            options.max_wait_ms = ms;
        }
        options
    }

    pub fn max_snapshots(&self) -> Option<usize> {
        self.recorder.max_snapshots
    }
}

fn parse_env_ms(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<u64>> {
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| FlowtraceError::InvalidConfig {
                message: format!("{} must be a number of milliseconds, got '{}'", key, raw),
            }),
        _ => Ok(None),
    }
}
