//! Configuration management for tracksync
//!
//! This module handles loading and managing engine configuration
//! from various sources including config files and environment variables.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use crate::utils::error::{IntoSyncError, Result, TrackSyncError};

/// Main engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Shared frame cache configuration
    pub cache: CacheConfig,

    /// Per-track video buffering
    pub video: VideoConfig,

    /// Audio scheduling
    pub audio: AudioConfig,

    /// Decoder pool configuration
    pub decoder: DecoderConfig,

    /// General settings
    pub general: GeneralConfig,
}

/// Frame cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of decoded frames held across all tracks
    pub capacity: usize,
}

/// Video buffering configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// Seconds of video to keep decoded ahead of the playhead
    pub buffer_ahead: f64,

    /// Cap on the number of frames tracked in one buffer's local window
    pub max_window_frames: usize,

    /// Duration assumed for tracks that report none (live captures)
    pub fallback_duration: f64,
}

/// Strategy used to hand decoded audio to the output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerStrategy {
    /// Stream resampled samples through a lock-free ring buffer
    RingBuffer,

    /// Schedule each decoded chunk as its own source at an absolute time
    Discrete,
}

/// Audio configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Seconds of audio to keep scheduled ahead of the playhead
    pub buffer_ahead: f64,

    /// Output (destination) sample rate
    pub sample_rate: u32,

    /// Output channel count
    pub channels: u16,

    /// Scheduling strategy
    pub strategy: SchedulerStrategy,
}

/// Decoder pool configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Maximum number of reusable decode contexts per pool
    pub max_pooled: usize,
}

/// General configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Rate at which the render loop ticks the players
    pub tick_rate_hz: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { capacity: 300 }
    }
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            buffer_ahead: 2.0,
            max_window_frames: 240,
            fallback_duration: 3600.0,
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            buffer_ahead: 1.0,
            sample_rate: 48000,
            channels: 2,
            strategy: SchedulerStrategy::RingBuffer,
        }
    }
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self { max_pooled: 4 }
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            tick_rate_hz: 60,
        }
    }
}

impl AudioConfig {
    /// Ring capacity in frames: one second more than the scheduling horizon
    pub fn ring_capacity_frames(&self) -> usize {
        ((self.buffer_ahead + 1.0) * self.sample_rate as f64).ceil() as usize
    }
}

impl Config {
    /// Load configuration from various sources
    ///
    /// Configuration is loaded in the following order (later sources override earlier):
    /// 1. Default values
    /// 2. System config file (/etc/tracksync/config.toml on Linux)
    /// 3. User config file (~/.config/tracksync/config.toml on Linux)
    /// 4. Environment variables (TRACKSYNC_* prefix)
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        if let Some(system_path) = Self::system_config_path() {
            if system_path.exists() {
                config = Self::load_from(&system_path)?;
            }
        }

        if let Some(user_path) = Self::user_config_path() {
            if user_path.exists() {
                config = Self::load_from(&user_path)?;
            }
        }

        config.apply_env_overrides_with(|key| std::env::var(key).ok())?;
        config.validate()?;

        Ok(config)
    }

    /// Parse a configuration from TOML text; missing keys take defaults
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .config_err("Failed to parse config")
    }

    /// Load and validate a single TOML file
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .config_err("Failed to read config file")?;
        let config = Self::from_toml_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Write configuration to the given path, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .config_err("Failed to create config directory")?;
        }

        let toml = toml::to_string_pretty(self)
            .config_err("Failed to serialize config")?;

        std::fs::write(path, toml)
            .config_err("Failed to write config file")?;

        Ok(())
    }

    /// Save configuration to the user config file
    pub fn save(&self) -> Result<()> {
        let path = Self::user_config_path()
            .ok_or_else(|| TrackSyncError::Config("Cannot determine user config path".to_string()))?;
        self.save_to(&path)
    }

    /// Apply overrides from an environment-like lookup
    pub fn apply_env_overrides_with<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(capacity) = lookup("TRACKSYNC_CACHE_CAPACITY") {
            self.cache.capacity = capacity.parse()
                .map_err(|_| TrackSyncError::Config("Invalid TRACKSYNC_CACHE_CAPACITY".to_string()))?;
        }

        if let Some(ahead) = lookup("TRACKSYNC_VIDEO_BUFFER_AHEAD") {
            self.video.buffer_ahead = ahead.parse()
                .map_err(|_| TrackSyncError::Config("Invalid TRACKSYNC_VIDEO_BUFFER_AHEAD".to_string()))?;
        }

        if let Some(ahead) = lookup("TRACKSYNC_AUDIO_BUFFER_AHEAD") {
            self.audio.buffer_ahead = ahead.parse()
                .map_err(|_| TrackSyncError::Config("Invalid TRACKSYNC_AUDIO_BUFFER_AHEAD".to_string()))?;
        }

        if let Some(log_level) = lookup("TRACKSYNC_LOG_LEVEL") {
            self.general.log_level = log_level;
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.cache.capacity == 0 {
            return Err(TrackSyncError::Config("Cache capacity must be non-zero".to_string()));
        }

        for (name, value) in [
            ("video.buffer_ahead", self.video.buffer_ahead),
            ("audio.buffer_ahead", self.audio.buffer_ahead),
            ("video.fallback_duration", self.video.fallback_duration),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(TrackSyncError::Config(format!("{} must be a positive number", name)));
            }
        }

        if self.video.max_window_frames == 0 {
            return Err(TrackSyncError::Config("video.max_window_frames must be non-zero".to_string()));
        }

        if self.audio.sample_rate == 0 {
            return Err(TrackSyncError::Config("audio.sample_rate must be non-zero".to_string()));
        }

        if !(1..=8).contains(&self.audio.channels) {
            return Err(TrackSyncError::Config("audio.channels must be between 1 and 8".to_string()));
        }

        if self.general.tick_rate_hz == 0 {
            return Err(TrackSyncError::Config("general.tick_rate_hz must be non-zero".to_string()));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.general.log_level.as_str()) {
            return Err(TrackSyncError::Config(format!(
                "Invalid log level '{}', must be one of: {:?}",
                self.general.log_level,
                valid_log_levels
            )));
        }

        Ok(())
    }

    /// Get system config file path
    fn system_config_path() -> Option<PathBuf> {
        #[cfg(target_os = "linux")]
        return Some(PathBuf::from("/etc/tracksync/config.toml"));

        #[cfg(target_os = "windows")]
        return std::env::var("PROGRAMDATA").ok()
            .map(|p| PathBuf::from(p).join("tracksync").join("config.toml"));

        #[cfg(target_os = "macos")]
        return Some(PathBuf::from("/Library/Application Support/tracksync/config.toml"));

        #[allow(unreachable_code)]
        None
    }

    /// Get user config file path
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("tracksync").join("config.toml"))
    }
}
