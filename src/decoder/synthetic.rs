//! Synthetic media sources
//!
//! Deterministic stand-ins for a container demuxer and codec decoders:
//! video frames are solid-colour pictures whose colour encodes the frame
//! index, audio chunks are sine tones. Used by the simulator binary and by
//! tests, including fault injection (failing samples, decoders that close
//! mid-stream, factories that cannot recreate a decoder).

use super::{
    AudioCodecConfig, CodecConfig, Decoder, DecoderFactory, DecoderState, Demuxer, EncodedSample,
    TrackInfo, TrackKind, VideoCodecConfig,
};
use crate::audio::AudioData;
use crate::utils::error::{Result, TrackSyncError};
use crate::utils::seconds_to_micros;
use crate::video::{CpuFrame, VideoFrame};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Track id of the synthetic video stream
pub const VIDEO_TRACK_ID: u32 = 1;

/// Track id of the synthetic audio stream
pub const AUDIO_TRACK_ID: u32 = 2;

const EPSILON: f64 = 1e-9;

/// Synthetic audio stream parameters
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticAudio {
    pub sample_rate: u32,
    pub channels: u16,
    /// Frames per encoded chunk
    pub chunk_frames: usize,
    /// Tone frequency in Hz
    pub frequency: f32,
}

impl Default for SyntheticAudio {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 2,
            chunk_frames: 1024,
            frequency: 440.0,
        }
    }
}

/// Synthetic clip description
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticClip {
    /// Clip duration; `None` models a live capture that reports none
    pub duration: Option<f64>,

    /// Media actually available when `duration` is `None`
    pub recorded: f64,

    /// Whether the clip has a video track
    pub video: bool,

    /// Video frame rate
    pub fps: f64,

    /// Frames between keyframes
    pub keyframe_interval: usize,

    /// Picture size
    pub width: u32,
    pub height: u32,

    /// Audio stream, if any
    pub audio: Option<SyntheticAudio>,
}

impl Default for SyntheticClip {
    fn default() -> Self {
        Self {
            duration: Some(10.0),
            recorded: 10.0,
            video: true,
            fps: 30.0,
            keyframe_interval: 30,
            width: 16,
            height: 9,
            audio: Some(SyntheticAudio::default()),
        }
    }
}

impl SyntheticClip {
    /// Video-only clip of the given length
    pub fn video_only(duration: f64, fps: f64, keyframe_interval: usize) -> Self {
        Self {
            duration: Some(duration),
            recorded: duration,
            fps,
            keyframe_interval,
            audio: None,
            ..Self::default()
        }
    }

    fn extent(&self) -> f64 {
        self.duration.unwrap_or(self.recorded)
    }

    fn frame_count(&self) -> usize {
        (self.extent() * self.fps - EPSILON).ceil().max(0.0) as usize
    }

    fn chunk_duration(&self, audio: &SyntheticAudio) -> f64 {
        audio.chunk_frames as f64 / audio.sample_rate as f64
    }

    fn chunk_count(&self, audio: &SyntheticAudio) -> usize {
        (self.extent() / self.chunk_duration(audio) - EPSILON).ceil().max(0.0) as usize
    }

    fn video_sample(&self, index: usize) -> EncodedSample {
        let timestamp = index as f64 / self.fps;
        EncodedSample {
            track_id: VIDEO_TRACK_ID,
            timestamp,
            decode_timestamp: timestamp,
            duration: 1.0 / self.fps,
            is_keyframe: index % self.keyframe_interval.max(1) == 0,
            data: Arc::from((index as u64).to_le_bytes().to_vec()),
        }
    }

    fn audio_sample(&self, audio: &SyntheticAudio, index: usize) -> EncodedSample {
        let duration = self.chunk_duration(audio);
        let timestamp = index as f64 * duration;
        EncodedSample {
            track_id: AUDIO_TRACK_ID,
            timestamp,
            decode_timestamp: timestamp,
            duration,
            is_keyframe: true,
            data: Arc::from((index as u64).to_le_bytes().to_vec()),
        }
    }
}

/// Demuxer over a [`SyntheticClip`]
pub struct SyntheticDemuxer {
    clip: SyntheticClip,
    destroyed: AtomicBool,
    reads: AtomicUsize,
}

impl SyntheticDemuxer {
    pub fn new(clip: SyntheticClip) -> Self {
        Self {
            clip,
            destroyed: AtomicBool::new(false),
            reads: AtomicUsize::new(0),
        }
    }

    /// Number of `samples` calls served
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }

    /// Whether `destroy` has been called
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Relaxed)
    }

    fn check_alive(&self) -> Result<()> {
        if self.is_destroyed() {
            return Err(TrackSyncError::Demuxer("demuxer destroyed".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Demuxer for SyntheticDemuxer {
    fn tracks(&self) -> Vec<TrackInfo> {
        let mut tracks = Vec::new();
        if self.clip.video {
            tracks.push(TrackInfo {
                track_id: VIDEO_TRACK_ID,
                kind: TrackKind::Video,
                duration: self.clip.duration,
            });
        }
        if self.clip.audio.is_some() {
            tracks.push(TrackInfo {
                track_id: AUDIO_TRACK_ID,
                kind: TrackKind::Audio,
                duration: self.clip.duration,
            });
        }
        tracks
    }

    fn video_config(&self) -> Option<VideoCodecConfig> {
        self.clip.video.then(|| VideoCodecConfig {
            codec: "synthetic-video".to_string(),
            coded_width: self.clip.width,
            coded_height: self.clip.height,
            description: None,
        })
    }

    fn audio_config(&self) -> Option<AudioCodecConfig> {
        self.clip.audio.as_ref().map(|audio| AudioCodecConfig {
            codec: "synthetic-audio".to_string(),
            sample_rate: audio.sample_rate,
            channels: audio.channels,
        })
    }

    async fn samples(&self, track_id: u32, start: f64, end: f64) -> Result<Vec<EncodedSample>> {
        self.check_alive()?;
        self.reads.fetch_add(1, Ordering::Relaxed);
        tokio::task::yield_now().await;

        match (track_id, &self.clip.audio) {
            (VIDEO_TRACK_ID, _) if self.clip.video => {
                let first = ((start - EPSILON) * self.clip.fps).ceil().max(0.0) as usize;
                Ok((first..self.clip.frame_count())
                    .map(|i| self.clip.video_sample(i))
                    .take_while(|s| s.timestamp < end - EPSILON)
                    .collect())
            }
            (AUDIO_TRACK_ID, Some(audio)) => {
                let chunk = self.clip.chunk_duration(audio);
                let first = ((start - EPSILON) / chunk).ceil().max(0.0) as usize;
                Ok((first..self.clip.chunk_count(audio))
                    .map(|i| self.clip.audio_sample(audio, i))
                    .take_while(|s| s.timestamp < end - EPSILON)
                    .collect())
            }
            _ => Err(TrackSyncError::InvalidTrack(track_id)),
        }
    }

    async fn keyframe_before(&self, track_id: u32, time: f64) -> Result<Option<EncodedSample>> {
        self.check_alive()?;
        tokio::task::yield_now().await;

        match (track_id, &self.clip.audio) {
            (VIDEO_TRACK_ID, _) if self.clip.video => {
                let count = self.clip.frame_count();
                if count == 0 || time < -EPSILON {
                    return Ok(None);
                }
                let index = (((time + EPSILON) * self.clip.fps).floor() as usize).min(count - 1);
                let interval = self.clip.keyframe_interval.max(1);
                Ok(Some(self.clip.video_sample(index - index % interval)))
            }
            (AUDIO_TRACK_ID, Some(audio)) => {
                let count = self.clip.chunk_count(audio);
                if count == 0 || time < -EPSILON {
                    return Ok(None);
                }
                let chunk = self.clip.chunk_duration(audio);
                let index = (((time + EPSILON) / chunk).floor() as usize).min(count - 1);
                Ok(Some(self.clip.audio_sample(audio, index)))
            }
            _ => Err(TrackSyncError::InvalidTrack(track_id)),
        }
    }

    fn destroy(&self) {
        self.destroyed.store(true, Ordering::Relaxed);
    }
}

/// Fault injection shared by a factory and every decoder it creates
#[derive(Default)]
pub struct DecoderFaults {
    /// Presentation times (microseconds) whose decode fails
    fail_at: Mutex<HashSet<i64>>,

    /// Close the decoder when the global decode count reaches this value (0 = never)
    close_after: AtomicUsize,

    /// Make `create` fail
    fail_create: AtomicBool,

    /// Simulated decode latency
    latency: Mutex<Option<Duration>>,

    decode_calls: AtomicUsize,
    created: AtomicUsize,
}

impl DecoderFaults {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail decoding of the sample presented at `timestamp`
    pub fn fail_at(&self, timestamp: f64) {
        self.fail_at.lock().insert(seconds_to_micros(timestamp));
    }

    /// Close the decoder on the `n`th decode call overall
    pub fn close_after(&self, n: usize) {
        self.close_after.store(n, Ordering::SeqCst);
    }

    /// Make decoder creation fail or succeed
    pub fn set_fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    /// Delay every decode by `latency`
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    /// Total decode calls across all decoders
    pub fn decode_calls(&self) -> usize {
        self.decode_calls.load(Ordering::SeqCst)
    }

    /// Decoders created by the factory
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Book-keeping shared by both decoders; returns an error to surface
    async fn before_decode(&self, sample: &EncodedSample) -> Result<bool> {
        let latency = *self.latency.lock();
        match latency {
            Some(latency) => tokio::time::sleep(latency).await,
            None => tokio::task::yield_now().await,
        }

        let call = self.decode_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let close_after = self.close_after.load(Ordering::SeqCst);
        if close_after != 0 && call == close_after {
            return Ok(true);
        }

        if self.fail_at.lock().contains(&seconds_to_micros(sample.timestamp)) {
            return Err(TrackSyncError::decoder_error(format!(
                "corrupt sample at {:.3}s",
                sample.timestamp
            )));
        }
        Ok(false)
    }
}

/// Video decoder producing solid-colour frames
pub struct SyntheticVideoDecoder {
    state: DecoderState,
    width: u32,
    height: u32,
    needs_keyframe: bool,
    faults: Arc<DecoderFaults>,
}

impl SyntheticVideoDecoder {
    pub fn new(faults: Arc<DecoderFaults>) -> Self {
        Self {
            state: DecoderState::Unconfigured,
            width: 0,
            height: 0,
            needs_keyframe: true,
            faults,
        }
    }
}

#[async_trait]
impl Decoder for SyntheticVideoDecoder {
    type Output = VideoFrame;

    fn configure(&mut self, config: &CodecConfig) -> Result<()> {
        match config {
            CodecConfig::Video(video) if self.state != DecoderState::Closed => {
                self.width = video.coded_width;
                self.height = video.coded_height;
                self.needs_keyframe = true;
                self.state = DecoderState::Configured;
                Ok(())
            }
            CodecConfig::Video(_) => Err(TrackSyncError::DecoderClosed),
            CodecConfig::Audio(_) => Err(TrackSyncError::InvalidInput(
                "video decoder given audio config".to_string(),
            )),
        }
    }

    async fn decode(&mut self, sample: &EncodedSample) -> Result<VideoFrame> {
        match self.state {
            DecoderState::Closed => return Err(TrackSyncError::DecoderClosed),
            DecoderState::Unconfigured => {
                return Err(TrackSyncError::decoder_error("decoder not configured"))
            }
            DecoderState::Configured => {}
        }
        if self.needs_keyframe && !sample.is_keyframe {
            return Err(TrackSyncError::decoder_error("key frame required after reset"));
        }

        if self.faults.before_decode(sample).await? {
            self.state = DecoderState::Closed;
            return Err(TrackSyncError::DecoderClosed);
        }

        self.needs_keyframe = false;
        let shade = (sample.timestamp * 30.0) as u8;
        let picture = CpuFrame::solid_rgba(self.width, self.height, [shade, 255 - shade, 128, 255]);
        Ok(VideoFrame::new(Box::new(picture), sample.timestamp, sample.duration))
    }

    async fn flush(&mut self) -> Result<()> {
        if self.state == DecoderState::Closed {
            return Err(TrackSyncError::DecoderClosed);
        }
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        if self.state == DecoderState::Closed {
            return Err(TrackSyncError::DecoderClosed);
        }
        self.needs_keyframe = true;
        Ok(())
    }

    fn close(&mut self) {
        self.state = DecoderState::Closed;
    }

    fn state(&self) -> DecoderState {
        self.state
    }
}

/// Audio decoder producing sine tones
pub struct SyntheticAudioDecoder {
    state: DecoderState,
    sample_rate: u32,
    channels: u16,
    frequency: f32,
    faults: Arc<DecoderFaults>,
}

impl SyntheticAudioDecoder {
    pub fn new(faults: Arc<DecoderFaults>, frequency: f32) -> Self {
        Self {
            state: DecoderState::Unconfigured,
            sample_rate: 0,
            channels: 0,
            frequency,
            faults,
        }
    }
}

#[async_trait]
impl Decoder for SyntheticAudioDecoder {
    type Output = AudioData;

    fn configure(&mut self, config: &CodecConfig) -> Result<()> {
        match config {
            CodecConfig::Audio(audio) if self.state != DecoderState::Closed => {
                self.sample_rate = audio.sample_rate;
                self.channels = audio.channels;
                self.state = DecoderState::Configured;
                Ok(())
            }
            CodecConfig::Audio(_) => Err(TrackSyncError::DecoderClosed),
            CodecConfig::Video(_) => Err(TrackSyncError::InvalidInput(
                "audio decoder given video config".to_string(),
            )),
        }
    }

    async fn decode(&mut self, sample: &EncodedSample) -> Result<AudioData> {
        match self.state {
            DecoderState::Closed => return Err(TrackSyncError::DecoderClosed),
            DecoderState::Unconfigured => {
                return Err(TrackSyncError::decoder_error("decoder not configured"))
            }
            DecoderState::Configured => {}
        }

        if self.faults.before_decode(sample).await? {
            self.state = DecoderState::Closed;
            return Err(TrackSyncError::DecoderClosed);
        }

        let frames = (sample.duration * self.sample_rate as f64).round() as usize;
        let step = std::f64::consts::TAU * self.frequency as f64 / self.sample_rate as f64;
        let start = sample.timestamp * self.sample_rate as f64;
        let tone: Vec<f32> = (0..frames)
            .map(|n| ((start + n as f64) * step).sin() as f32 * 0.25)
            .collect();

        Ok(AudioData {
            timestamp: sample.timestamp,
            sample_rate: self.sample_rate,
            channels: vec![tone; self.channels as usize],
        })
    }

    async fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        if self.state == DecoderState::Closed {
            return Err(TrackSyncError::DecoderClosed);
        }
        Ok(())
    }

    fn close(&mut self) {
        self.state = DecoderState::Closed;
    }

    fn state(&self) -> DecoderState {
        self.state
    }
}

/// Factory for [`SyntheticVideoDecoder`]s
pub struct SyntheticVideoDecoderFactory {
    faults: Arc<DecoderFaults>,
}

impl SyntheticVideoDecoderFactory {
    pub fn new(faults: Arc<DecoderFaults>) -> Self {
        Self { faults }
    }
}

impl DecoderFactory<VideoFrame> for SyntheticVideoDecoderFactory {
    fn create(&self) -> Result<Box<dyn Decoder<Output = VideoFrame>>> {
        if self.faults.fail_create.load(Ordering::SeqCst) {
            return Err(TrackSyncError::decoder_error("no decoder resources available"));
        }
        self.faults.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SyntheticVideoDecoder::new(Arc::clone(&self.faults))))
    }
}

/// Factory for [`SyntheticAudioDecoder`]s
pub struct SyntheticAudioDecoderFactory {
    faults: Arc<DecoderFaults>,
    frequency: f32,
}

impl SyntheticAudioDecoderFactory {
    pub fn new(faults: Arc<DecoderFaults>, frequency: f32) -> Self {
        Self { faults, frequency }
    }
}

impl DecoderFactory<AudioData> for SyntheticAudioDecoderFactory {
    fn create(&self) -> Result<Box<dyn Decoder<Output = AudioData>>> {
        if self.faults.fail_create.load(Ordering::SeqCst) {
            return Err(TrackSyncError::decoder_error("no decoder resources available"));
        }
        self.faults.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SyntheticAudioDecoder::new(Arc::clone(&self.faults), self.frequency)))
    }
}
