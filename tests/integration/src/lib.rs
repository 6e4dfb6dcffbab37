//! Integration test utilities for tracksync
//!
//! This module provides common fixtures for the scenario tests:
//! - Frame resources that count their releases
//! - A demuxer wrapper that reports what was read
//! - Session and player harnesses on a manual clock

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracksync::audio::{AudioSink, ManualTimeSource, TimeSource};
use tracksync::decoder::synthetic::{
    DecoderFaults, SyntheticAudioDecoderFactory, SyntheticClip, SyntheticDemuxer,
    SyntheticVideoDecoderFactory,
};
use tracksync::decoder::{AudioCodecConfig, Demuxer, EncodedSample, TrackInfo, VideoCodecConfig};
use tracksync::player::{PlaybackSession, PlaybackState, StateSubscription, TrackPlayer};
use tracksync::utils::SchedulerStrategy;
use tracksync::video::{FrameResource, VideoFrame};
use tracksync::{Config, FrameCache, Result};

/// Frame resource counting how many handles were released
pub struct CountingResource {
    releases: Arc<AtomicUsize>,
}

impl FrameResource for CountingResource {
    fn try_clone(&self) -> Result<Box<dyn FrameResource>> {
        Ok(Box::new(CountingResource {
            releases: Arc::clone(&self.releases),
        }))
    }

    fn close(&mut self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

/// Build frames whose releases land on one counter
#[derive(Clone, Default)]
pub struct FrameFactory {
    releases: Arc<AtomicUsize>,
}

impl FrameFactory {
    pub fn frame(&self, timestamp: f64) -> VideoFrame {
        VideoFrame::new(
            Box::new(CountingResource {
                releases: Arc::clone(&self.releases),
            }),
            timestamp,
            1.0 / 30.0,
        )
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

/// Demuxer wrapper logging every sample range requested
pub struct RecordingDemuxer {
    inner: SyntheticDemuxer,
    requests: Mutex<Vec<(u32, f64, f64)>>,
}

impl RecordingDemuxer {
    pub fn new(clip: SyntheticClip) -> Arc<Self> {
        Arc::new(Self {
            inner: SyntheticDemuxer::new(clip),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<(u32, f64, f64)> {
        self.requests.lock().clone()
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.is_destroyed()
    }
}

#[async_trait]
impl Demuxer for RecordingDemuxer {
    fn tracks(&self) -> Vec<TrackInfo> {
        self.inner.tracks()
    }

    fn video_config(&self) -> Option<VideoCodecConfig> {
        self.inner.video_config()
    }

    fn audio_config(&self) -> Option<AudioCodecConfig> {
        self.inner.audio_config()
    }

    async fn samples(&self, track_id: u32, start: f64, end: f64) -> Result<Vec<EncodedSample>> {
        self.requests.lock().push((track_id, start, end));
        self.inner.samples(track_id, start, end).await
    }

    async fn keyframe_before(&self, track_id: u32, time: f64) -> Result<Option<EncodedSample>> {
        self.inner.keyframe_before(track_id, time).await
    }

    fn destroy(&self) {
        self.inner.destroy();
    }
}

/// Clip with video and audio of the given length
pub fn clip(duration: f64) -> SyntheticClip {
    SyntheticClip {
        duration: Some(duration),
        recorded: duration,
        ..SyntheticClip::default()
    }
}

/// Session on a manual clock with synthetic decoders
pub struct SessionHarness {
    pub session: PlaybackSession,
    pub cache: Arc<FrameCache>,
    pub time: Arc<ManualTimeSource>,
    pub faults: Arc<DecoderFaults>,
    pub sinks: Vec<AudioSink>,
}

impl SessionHarness {
    pub fn new(strategy: SchedulerStrategy, cache_capacity: usize) -> Self {
        let mut config = Config::default();
        config.audio.strategy = strategy;
        config.cache.capacity = cache_capacity;
        config.video.buffer_ahead = 1.0;
        config.audio.buffer_ahead = 0.5;
        Self::with_config(&config)
    }

    pub fn with_config(config: &Config) -> Self {
        let faults = DecoderFaults::new();
        let cache = Arc::new(FrameCache::from_config(&config.cache));
        let time = ManualTimeSource::new();
        let session = PlaybackSession::new(
            config,
            Arc::clone(&cache),
            Arc::new(SyntheticVideoDecoderFactory::new(Arc::clone(&faults))),
            Arc::new(SyntheticAudioDecoderFactory::new(Arc::clone(&faults), 330.0)),
            time.clone(),
        )
        .expect("valid test configuration");

        Self {
            session,
            cache,
            time,
            faults,
            sinks: Vec::new(),
        }
    }

    /// Load `demuxer` into `slot`, keeping its audio sink
    pub async fn add(&mut self, slot: usize, demuxer: Arc<dyn Demuxer>) -> Result<Arc<TrackPlayer>> {
        if let Some(sink) = self.session.add_track(slot, demuxer).await? {
            self.sinks.push(sink);
        }
        Ok(self.session.track(slot).expect("track just added"))
    }

    /// Render one block of `frames` from the sink of the first track loaded
    pub fn render(&mut self, frames: usize) -> Vec<f32> {
        let now = self.time.now();
        let mut block = vec![0.0f32; frames * 2];
        if let Some(sink) = self.sinks.first_mut() {
            sink.render(&mut block, now);
        }
        block
    }
}

/// Value of the synthetic tone at media time `time`
pub fn tone(frequency: f64, sample_rate: u32, time: f64) -> f32 {
    let index = (time * sample_rate as f64).round();
    let step = std::f64::consts::TAU * frequency / sample_rate as f64;
    (index * step).sin() as f32 * 0.25
}

/// Every state a player moves through, in order
pub fn record_states(player: &TrackPlayer) -> (StateSubscription, Arc<Mutex<Vec<PlaybackState>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let subscription = player.on_state_change(move |event| sink.lock().push(event.current));
    (subscription, seen)
}
