//! Playback orchestration for tracksync
//!
//! This module drives the per-track pipeline from an external tick source,
//! coordinating the frame buffer, the audio decoder and the audio scheduler.
//! It handles playback state, lookahead buffering and multi-track sessions.

mod controller;
mod session;
mod state;

pub use controller::TrackPlayer;
pub use session::{PlaybackSession, SessionStatus, MAX_TRACKS};
pub use state::{StateChangeEvent, StateNotifier, StateSubscription};

use crate::audio::{AudioData, AudioScheduler};
use crate::decoder::DecoderPool;
use crate::utils::config::Config;
use crate::video::{FrameBufferOptions, FrameCache, VideoFrame};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Playback state of one track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    /// Nothing loaded
    Idle,

    /// Loading media or preparing a start position
    Loading,

    /// Loaded and positioned, not playing
    Ready,

    /// Playing
    Playing,

    /// Paused
    Paused,

    /// Seeking
    Seeking,

    /// Playback reached the end of the track
    Ended,
}

impl PlaybackState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaybackState::Idle => "idle",
            PlaybackState::Loading => "loading",
            PlaybackState::Ready => "ready",
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
            PlaybackState::Seeking => "seeking",
            PlaybackState::Ended => "ended",
        }
    }

    /// Whether media is loaded and can be positioned
    pub fn is_loaded(&self) -> bool {
        !matches!(self, PlaybackState::Idle | PlaybackState::Loading)
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Track player tuning
#[derive(Debug, Clone, PartialEq)]
pub struct TrackPlayerOptions {
    /// Video lookahead; `tick` refills once less than half of it remains
    pub video: FrameBufferOptions,

    /// Seconds of audio kept decoded and scheduled ahead of the playhead
    pub audio_buffer_ahead: f64,
}

impl Default for TrackPlayerOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl TrackPlayerOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            video: FrameBufferOptions::from_config(&config.video),
            audio_buffer_ahead: config.audio.buffer_ahead,
        }
    }
}

/// Shared resources a track player is built on
#[derive(Clone)]
pub struct PlayerDeps {
    /// Frame cache shared by every track
    pub cache: Arc<FrameCache>,

    /// Pool of video decode contexts
    pub video_pool: Arc<DecoderPool<VideoFrame>>,

    /// Pool of audio decode contexts
    pub audio_pool: Arc<DecoderPool<AudioData>>,

    /// This track's audio scheduler; also its clock
    pub scheduler: Arc<dyn AudioScheduler>,
}

/// Snapshot of one track for status reporting
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackStatus {
    pub slot: usize,
    pub state: PlaybackState,
    pub current_time: f64,
    pub duration: f64,
    pub buffer_start: f64,
    pub buffer_end: f64,
    pub buffered_frames: usize,
    pub frames_decoded: u64,
    pub queued_audio_frames: usize,
    pub audio_scheduled_until: f64,
}
