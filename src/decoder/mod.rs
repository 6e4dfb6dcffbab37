//! Decoder module for tracksync
//!
//! This module defines the collaborators the playback core consumes but
//! does not implement: container demuxing and codec decoding. Both are
//! expressed as traits so hardware decoders, WebCodecs bridges or test
//! doubles can be plugged in. It also owns the decoder pool and the
//! synthetic sources used by the demo binary and the tests.

mod pool;
pub mod synthetic;

pub use pool::{DecoderPool, PoolStats, PooledDecoder};

use crate::audio::AudioData;
use crate::utils::error::Result;
use crate::video::VideoFrame;
use async_trait::async_trait;
use std::sync::Arc;

/// An encoded access unit produced by a [`Demuxer`]
///
/// Samples are immutable once produced; the payload is shared.
#[derive(Debug, Clone)]
pub struct EncodedSample {
    /// Track this sample belongs to
    pub track_id: u32,

    /// Presentation time in seconds
    pub timestamp: f64,

    /// Decode time in seconds
    pub decode_timestamp: f64,

    /// Duration in seconds
    pub duration: f64,

    /// Whether the sample is independently decodable
    pub is_keyframe: bool,

    /// Raw payload
    pub data: Arc<[u8]>,
}

impl EncodedSample {
    /// Payload size in bytes
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Presentation end time
    pub fn end(&self) -> f64 {
        self.timestamp + self.duration
    }
}

/// Video decoder configuration
#[derive(Debug, Clone, PartialEq)]
pub struct VideoCodecConfig {
    /// Codec string (e.g. "avc1.64001f", "vp09.00.10.08")
    pub codec: String,

    /// Coded width in pixels
    pub coded_width: u32,

    /// Coded height in pixels
    pub coded_height: u32,

    /// Out-of-band codec description (avcC, hvcC, ...)
    pub description: Option<Vec<u8>>,
}

/// Audio decoder configuration
#[derive(Debug, Clone, PartialEq)]
pub struct AudioCodecConfig {
    /// Codec string (e.g. "opus", "mp4a.40.2")
    pub codec: String,

    /// Source sample rate in Hz
    pub sample_rate: u32,

    /// Number of channels
    pub channels: u16,
}

/// Configuration handed to [`Decoder::configure`]
#[derive(Debug, Clone, PartialEq)]
pub enum CodecConfig {
    Video(VideoCodecConfig),
    Audio(AudioCodecConfig),
}

/// Kind of elementary stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Video,
    Audio,
}

/// Track description reported by a demuxer
#[derive(Debug, Clone, PartialEq)]
pub struct TrackInfo {
    /// Track id used in sample queries
    pub track_id: u32,

    /// Stream kind
    pub kind: TrackKind,

    /// Duration in seconds, `None` for live captures without one
    pub duration: Option<f64>,
}

/// Container demuxer
///
/// Unknown track ids are programming errors and must fail fast with
/// [`TrackSyncError::InvalidTrack`](crate::utils::error::TrackSyncError::InvalidTrack).
#[async_trait]
pub trait Demuxer: Send + Sync {
    /// Tracks present in the container
    fn tracks(&self) -> Vec<TrackInfo>;

    /// Decoder configuration for the video track, if any
    fn video_config(&self) -> Option<VideoCodecConfig>;

    /// Decoder configuration for the audio track, if any
    fn audio_config(&self) -> Option<AudioCodecConfig>;

    /// Samples with presentation time in `[start, end)`, ordered by time
    async fn samples(&self, track_id: u32, start: f64, end: f64) -> Result<Vec<EncodedSample>>;

    /// Nearest keyframe with presentation time at or before `time`
    async fn keyframe_before(&self, track_id: u32, time: f64) -> Result<Option<EncodedSample>>;

    /// Release container resources
    fn destroy(&self);

    /// First track of the given kind
    fn track_of(&self, kind: TrackKind) -> Option<TrackInfo> {
        self.tracks().into_iter().find(|t| t.kind == kind)
    }
}

/// Lifecycle of a decoder resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    /// Created but not configured
    Unconfigured,

    /// Ready to accept samples
    Configured,

    /// Closed, either explicitly or because the resource was lost
    Closed,
}

/// Codec decoder
///
/// A decoder may report [`DecoderState::Closed`] at any time; callers
/// reconcile by recreating it rather than assuming it stays open.
#[async_trait]
pub trait Decoder: Send {
    /// Decoded unit type
    type Output: Send;

    /// Configure (or reconfigure) the decoder
    fn configure(&mut self, config: &CodecConfig) -> Result<()>;

    /// Decode one sample
    async fn decode(&mut self, sample: &EncodedSample) -> Result<Self::Output>;

    /// Drain any pending output
    async fn flush(&mut self) -> Result<()>;

    /// Drop decoder state, keeping configuration; next input must be a keyframe
    fn reset(&mut self) -> Result<()>;

    /// Release the decoder resource
    fn close(&mut self);

    /// Current lifecycle state
    fn state(&self) -> DecoderState;

    /// Shorthand for `state() == Closed`
    fn is_closed(&self) -> bool {
        self.state() == DecoderState::Closed
    }
}

/// Video decoder trait object
pub type VideoDecoder = dyn Decoder<Output = VideoFrame>;

/// Audio decoder trait object
pub type AudioDecoder = dyn Decoder<Output = AudioData>;

/// Creates fresh decoder instances for a [`DecoderPool`]
pub trait DecoderFactory<O>: Send + Sync {
    /// Create an unconfigured decoder
    fn create(&self) -> Result<Box<dyn Decoder<Output = O>>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_size_and_end() {
        let sample = EncodedSample {
            track_id: 1,
            timestamp: 1.0,
            decode_timestamp: 1.0,
            duration: 0.5,
            is_keyframe: true,
            data: Arc::from(vec![0u8; 16]),
        };
        assert_eq!(sample.size(), 16);
        assert_eq!(sample.end(), 1.5);
    }

    #[test]
    fn test_track_kind() {
        assert_ne!(TrackKind::Video, TrackKind::Audio);
        assert_ne!(DecoderState::Configured, DecoderState::Closed);
    }
}
