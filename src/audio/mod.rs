//! Audio module for tracksync
//!
//! This module turns decoded audio into sample-accurate output:
//! - Media clock anchored to an output time source
//! - Two scheduler designs behind one [`AudioScheduler`] contract:
//!   ring-buffer streaming and discrete per-chunk sources
//! - The lock-free ring shared with the real-time render thread
//! - Optional device output through cpal

pub mod clock;
mod discrete_scheduler;
pub mod resample;
mod ring_buffer;
mod ring_scheduler;

#[cfg(feature = "cpal-output")]
mod cpal_output;

pub use clock::{ManualTimeSource, MediaClock, SchedulerState, SystemTimeSource, TimeSource};
pub use discrete_scheduler::{DiscreteOutput, DiscreteScheduler, ScheduledSource};
pub use ring_buffer::{AudioRing, RingReader, RingWriter};
pub use ring_scheduler::RingBufferScheduler;

#[cfg(feature = "cpal-output")]
pub use cpal_output::CpalOutput;

use crate::utils::config::{AudioConfig, SchedulerStrategy};
use std::sync::Arc;

/// Decoded audio in planar `f32`
#[derive(Debug, Clone, PartialEq)]
pub struct AudioData {
    /// Presentation time of the first frame
    pub timestamp: f64,

    /// Sample rate in Hz
    pub sample_rate: u32,

    /// One sample vector per channel, all the same length
    pub channels: Vec<Vec<f32>>,
}

impl AudioData {
    /// Number of frames (samples per channel)
    pub fn frames(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Duration in seconds
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Presentation time just past the last frame
    pub fn end(&self) -> f64 {
        self.timestamp + self.duration()
    }
}

/// Audio scheduling contract shared by both designs
///
/// `current_time` is always derived from the clock anchors: 0 when stopped,
/// frozen when paused, `anchor_media + (now - anchor_clock)` when playing.
pub trait AudioScheduler: Send + Sync {
    /// Queue decoded audio for presentation at `media_time`
    ///
    /// No-op unless playing.
    fn schedule(&self, data: &AudioData, media_time: f64);

    /// Start from `start_time`; no-op while already playing
    fn play(&self, start_time: f64);

    /// Freeze the media time, keeping queued audio for resume
    fn pause(&self);

    /// Discard everything queued and reset the anchors
    fn stop(&self);

    /// Discard everything queued and re-anchor at `time`, keeping play/pause state
    fn seek(&self, time: f64);

    fn current_time(&self) -> f64;

    fn state(&self) -> SchedulerState;

    /// Move queued audio to the output where there is room; returns frames moved
    ///
    /// Cheap enough to call on every tick.
    fn pump(&self) -> usize;

    /// Frames queued and not yet played
    fn queued_frames(&self) -> usize;

    /// Clock the scheduler derives its time from
    fn clock(&self) -> &MediaClock;
}

/// Output side of a scheduler created by [`create_scheduler`]
#[derive(Debug)]
pub enum AudioSink {
    /// Consumer end of the streaming ring
    Ring(RingReader),

    /// Mixer pulling discrete sources
    Discrete(DiscreteOutput),
}

impl AudioSink {
    /// Render interleaved output for the block starting at output time `now`
    pub fn render(&mut self, out: &mut [f32], now: f64) -> usize {
        match self {
            AudioSink::Ring(reader) => reader.render(out),
            AudioSink::Discrete(output) => output.render(out, now),
        }
    }
}

/// Build the scheduler selected by the configuration together with its output side
pub fn create_scheduler(
    config: &AudioConfig,
    time_source: Arc<dyn TimeSource>,
) -> (Arc<dyn AudioScheduler>, Option<AudioSink>) {
    match config.strategy {
        SchedulerStrategy::RingBuffer => {
            let scheduler = RingBufferScheduler::from_config(time_source, config);
            let sink = scheduler.take_reader().map(AudioSink::Ring);
            (Arc::new(scheduler), sink)
        }
        SchedulerStrategy::Discrete => {
            let scheduler = Arc::new(DiscreteScheduler::new(
                time_source,
                config.sample_rate,
                config.channels,
            ));
            let sink = AudioSink::Discrete(DiscreteOutput::new(Arc::clone(&scheduler)));
            (scheduler, Some(sink))
        }
    }
}
