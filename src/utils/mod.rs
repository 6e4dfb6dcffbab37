//! Utility module for tracksync
//!
//! This module provides common utilities used throughout the crate:
//! - Error handling with custom error types
//! - Configuration management
//! - Time helpers shared by the cache and the buffers

pub mod config;
pub mod error;

// Re-export commonly used items
pub use config::{AudioConfig, CacheConfig, Config, DecoderConfig, SchedulerStrategy, VideoConfig};
pub use error::{IntoSyncError, Result, TrackSyncError};

/// Load the engine configuration
///
/// Loads configuration from:
/// 1. Default values
/// 2. System configuration file
/// 3. User configuration file
/// 4. Environment variables
pub fn load_config() -> Result<Config> {
    Config::load()
}

/// Quantise a time in seconds to whole microseconds
///
/// Presentation times arrive as doubles; keys and comparisons use the
/// quantised value so that 0.1 + 0.2 and 0.3 land on the same frame.
pub fn seconds_to_micros(seconds: f64) -> i64 {
    (seconds * 1_000_000.0).round() as i64
}

/// Inverse of [`seconds_to_micros`]
pub fn micros_to_seconds(micros: i64) -> f64 {
    micros as f64 / 1_000_000.0
}

/// Format a media time for display
///
/// Formatted as "MM:SS.mmm", or "HH:MM:SS.mmm" from one hour on.
pub fn format_timecode(seconds: f64) -> String {
    let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;
    let ms = total_ms % 1000;
    let total_secs = total_ms / 1000;
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let secs = total_secs % 60;

    if hours > 0 {
        format!("{:02}:{:02}:{:02}.{:03}", hours, minutes, secs, ms)
    } else {
        format!("{:02}:{:02}.{:03}", minutes, secs, ms)
    }
}
