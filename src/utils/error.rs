//! Error types for tracksync
//!
//! This module defines the error taxonomy used throughout the playback core.
//! We use thiserror for the library error type; anyhow only appears at the
//! binary boundary.

use thiserror::Error;

/// Main error type for tracksync
#[derive(Error, Debug)]
pub enum TrackSyncError {
    /// A single sample failed to decode, or a decoder call failed
    #[error("Decoder error: {0}")]
    Decoder(String),

    /// Demuxer read failures
    #[error("Demuxer error: {0}")]
    Demuxer(String),

    /// Audio scheduling or output errors
    #[error("Audio error: {0}")]
    Audio(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("File error: {0}")]
    FileIO(#[from] std::io::Error),

    /// Invalid input errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Unknown track id passed to a collaborator
    #[error("Invalid track id: {0}")]
    InvalidTrack(u32),

    /// Media has neither a usable audio nor video track
    #[error("No playable tracks: {0}")]
    NoTracks(String),

    /// The decoder resource was closed underneath us
    #[error("Decoder closed unexpectedly")]
    DecoderClosed,

    /// Operation on a destroyed component
    #[error("Component has been destroyed")]
    Destroyed,

    /// Operation not permitted in the current playback state
    #[error("Cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    /// Generic error for unexpected situations
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TrackSyncError {
    /// Create a decoder error from string
    pub fn decoder_error<S: Into<String>>(msg: S) -> Self {
        TrackSyncError::Decoder(msg.into())
    }

    /// Whether this error is recovered locally (skip sample, recreate
    /// decoder, retry on next tick) rather than reported upward
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TrackSyncError::Decoder(_) | TrackSyncError::Demuxer(_) | TrackSyncError::DecoderClosed
        )
    }
}

/// Convenience type alias for Results in tracksync
pub type Result<T> = std::result::Result<T, TrackSyncError>;

/// Extension trait for converting other errors to TrackSyncError
pub trait IntoSyncError<T> {
    /// Convert this error into a TrackSyncError with the given context
    fn decoder_err(self, context: &str) -> Result<T>;
    fn demuxer_err(self, context: &str) -> Result<T>;
    fn audio_err(self, context: &str) -> Result<T>;
    fn config_err(self, context: &str) -> Result<T>;
}

impl<T, E: std::fmt::Display> IntoSyncError<T> for std::result::Result<T, E> {
    fn decoder_err(self, context: &str) -> Result<T> {
        self.map_err(|e| TrackSyncError::Decoder(format!("{}: {}", context, e)))
    }

    fn demuxer_err(self, context: &str) -> Result<T> {
        self.map_err(|e| TrackSyncError::Demuxer(format!("{}: {}", context, e)))
    }

    fn audio_err(self, context: &str) -> Result<T> {
        self.map_err(|e| TrackSyncError::Audio(format!("{}: {}", context, e)))
    }

    fn config_err(self, context: &str) -> Result<T> {
        self.map_err(|e| TrackSyncError::Config(format!("{}: {}", context, e)))
    }
}

/// Helper macro for creating internal errors with file and line information
#[macro_export]
macro_rules! internal_error {
    ($msg:expr) => {
        $crate::utils::error::TrackSyncError::Internal(
            format!("{} at {}:{}", $msg, file!(), line!())
        )
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::utils::error::TrackSyncError::Internal(
            format!("{} at {}:{}", format!($fmt, $($arg)*), file!(), line!())
        )
    };
}
