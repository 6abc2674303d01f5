//! Engine configuration
//!
//! All tunables are plain data with sensible defaults; an optional TOML
//! file on disk can override them. The dedup windows in particular are
//! empirically tuned heuristics, not provable bounds, which is why they
//! live here rather than as constants.

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Reconnect backoff and liveness tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// First reconnect delay in milliseconds.
    pub base_delay_ms: u64,
    /// Backoff cap in milliseconds.
    pub max_delay_ms: u64,
    /// Automatic attempts before surfacing "manual retry available".
    pub max_attempts: u32,
    /// Liveness check interval; a channel with no traffic for two
    /// consecutive intervals is treated as silently dead.
    pub liveness_interval_secs: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            max_attempts: 5,
            liveness_interval_secs: 10,
        }
    }
}

/// Duplicate-suppression tunables.
///
/// Windows are asymmetric: outbound self-echoes arrive almost immediately,
/// while a history fetch can race a live push by tens of seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub max_ids: usize,
    pub max_fingerprints: usize,
    pub outbound_window_secs: i64,
    pub inbound_window_secs: i64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            max_ids: 1_000,
            max_fingerprints: 100,
            outbound_window_secs: 1,
            inbound_window_secs: 60,
        }
    }
}

/// Typing-signal tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TypingConfig {
    /// Minimum gap between emitted local typing events.
    pub cooldown_secs: u64,
    /// How long the peer-typing flag stays up without a fresh signal.
    pub expiry_secs: u64,
}

impl Default for TypingConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: 3,
            expiry_secs: 3,
        }
    }
}

/// Viewport auto-scroll tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewportConfig {
    /// Scroll positions within this many pixels of the bottom count as
    /// "at the bottom" and auto-scroll on growth.
    pub near_bottom_px: u32,
}

impl Default for ViewportConfig {
    fn default() -> Self {
        Self { near_bottom_px: 100 }
    }
}

/// History backfill tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub page_size: usize,
    /// Pages followed on conversation open.
    pub max_pages: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            page_size: 50,
            max_pages: 4,
        }
    }
}

/// Top-level configuration for one chat session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub backoff: BackoffConfig,
    pub dedup: DedupConfig,
    pub typing: TypingConfig,
    pub viewport: ViewportConfig,
    pub history: HistoryConfig,
}

impl ChatConfig {
    fn config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "hearth-chat", "hearth-chat")
            .context("Could not determine config directory")?;
        Ok(proj_dirs.config_dir().join("config.toml"))
    }

    /// Load configuration from disk, falling back to defaults if no file
    /// exists.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        toml::from_str(&content).context("Failed to parse config file")
    }
}
