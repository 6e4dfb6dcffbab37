//! Ring-buffer streaming scheduler
//!
//! Decoded chunks are resampled to the output rate, kept in a queue sorted
//! by media time and written into an [`AudioRing`] whenever it has room.
//! The ring's reader end is handed to whatever drives the output device.

use super::clock::{MediaClock, SchedulerState, TimeSource};
use super::resample::{interleave, linear, remap_channels};
use super::ring_buffer::{AudioRing, RingReader, RingWriter};
use super::{AudioData, AudioScheduler};
use crate::utils::config::AudioConfig;
use log::{debug, trace};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Decoded audio waiting to be written into the ring
///
/// Already converted to the output rate and layout. A partially written
/// chunk is trimmed in place: `media_time` advances and the written frames
/// are removed from the front of every channel.
#[derive(Debug, Clone)]
struct PendingAudio {
    media_time: f64,
    channels: Vec<Vec<f32>>,
}

impl PendingAudio {
    fn frames(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }

    fn end(&self, rate: f64) -> f64 {
        self.media_time + self.frames() as f64 / rate
    }

    /// Drop the first `frames` frames
    fn trim_front(&mut self, frames: usize, rate: f64) {
        let frames = frames.min(self.frames());
        for channel in &mut self.channels {
            channel.drain(..frames);
        }
        self.media_time += frames as f64 / rate;
    }
}

struct RingState {
    writer: RingWriter,
    pending: VecDeque<PendingAudio>,

    /// Media time just past the last frame written into the ring
    written_until: f64,

    scratch: Vec<f32>,
}

/// Audio scheduler streaming through a lock-free ring
pub struct RingBufferScheduler {
    clock: MediaClock,
    sample_rate: u32,
    channels: u16,
    state: Mutex<RingState>,
    reader: Mutex<Option<RingReader>>,
}

impl RingBufferScheduler {
    /// Scheduler writing `channels` channels at `sample_rate` into a ring
    /// of `capacity_frames` frames
    pub fn new(
        time_source: Arc<dyn TimeSource>,
        sample_rate: u32,
        channels: u16,
        capacity_frames: usize,
    ) -> Self {
        let (writer, reader) = AudioRing::new(channels, capacity_frames);
        debug!(
            "Ring scheduler: {} Hz, {} channels, {} frames of ring",
            sample_rate, channels, capacity_frames
        );

        Self {
            clock: MediaClock::new(time_source),
            sample_rate,
            channels,
            state: Mutex::new(RingState {
                writer,
                pending: VecDeque::new(),
                written_until: 0.0,
                scratch: Vec::new(),
            }),
            reader: Mutex::new(Some(reader)),
        }
    }

    /// Scheduler sized from the audio configuration
    ///
    /// The ring holds `buffer_ahead + 1` seconds at the output rate.
    pub fn from_config(time_source: Arc<dyn TimeSource>, config: &AudioConfig) -> Self {
        Self::new(
            time_source,
            config.sample_rate,
            config.channels,
            config.ring_capacity_frames(),
        )
    }

    /// Take the consumer end; only the first call gets it
    pub fn take_reader(&self) -> Option<RingReader> {
        self.reader.lock().take()
    }

    pub fn capacity_frames(&self) -> usize {
        self.state.lock().writer.capacity_frames()
    }

    /// Render calls that ran dry while playing
    pub fn underruns(&self) -> u64 {
        self.state.lock().writer.underruns()
    }

    fn rate(&self) -> f64 {
        self.sample_rate as f64
    }

    /// Drop queued and written audio, restarting the stream at `media_time`
    fn flush(&self, state: &mut RingState, media_time: f64) {
        state.pending.clear();
        // An empty ring has nothing stale; new audio may be written at once.
        if !state.writer.is_drained() {
            state.writer.request_flush();
        }
        state.written_until = media_time;
    }

    fn write_pending(&self, state: &mut RingState) -> usize {
        let rate = self.rate();
        let mut total = 0;

        // After an underrun the output has moved past what was written.
        let now = self.clock.current_time();
        if self.clock.state() == SchedulerState::Playing && state.written_until < now {
            state.written_until = now;
        }

        while state.writer.vacant_frames() > 0 {
            let Some(front) = state.pending.front_mut() else {
                break;
            };

            if front.end(rate) <= state.written_until {
                trace!("Dropping audio already played at {:.3}", front.media_time);
                state.pending.pop_front();
                continue;
            }
            if front.media_time < state.written_until {
                let overlap = ((state.written_until - front.media_time) * rate).round() as usize;
                front.trim_front(overlap, rate);
                if front.frames() == 0 {
                    state.pending.pop_front();
                    continue;
                }
            }

            // Keep the stream aligned with media time across gaps.
            let gap = ((front.media_time - state.written_until) * rate).round() as usize;
            if gap > 0 {
                let frames = gap.min(state.writer.vacant_frames());
                state.scratch.clear();
                state.scratch.resize(frames * state.writer.channels(), 0.0);
                let written = state.writer.write(&state.scratch);
                state.written_until += written as f64 / rate;
                total += written;
                if written < gap {
                    break;
                }
                continue;
            }

            let frames = front.frames().min(state.writer.vacant_frames());
            state.scratch.clear();
            interleave(&front.channels, 0, frames, &mut state.scratch);
            let written = state.writer.write(&state.scratch);

            front.trim_front(written, rate);
            state.written_until = front.media_time;
            total += written;

            if front.frames() == 0 {
                state.pending.pop_front();
            }
            if written < frames {
                break;
            }
        }

        total
    }
}

impl AudioScheduler for RingBufferScheduler {
    fn schedule(&self, data: &AudioData, media_time: f64) {
        if self.clock.state() != SchedulerState::Playing || data.frames() == 0 {
            return;
        }

        let converted = remap_channels(
            linear(&data.channels, data.sample_rate, self.sample_rate),
            self.channels as usize,
        );
        let mut chunk = PendingAudio {
            media_time,
            channels: converted,
        };

        let rate = self.rate();
        let played = self.clock.current_time();
        if chunk.end(rate) <= played {
            trace!("Audio at {:.3} arrived after it was due, dropping", media_time);
            return;
        }
        if chunk.media_time < played {
            let late = ((played - chunk.media_time) * rate).round() as usize;
            chunk.trim_front(late, rate);
        }

        let mut state = self.state.lock();
        let at = state.pending.partition_point(|p| p.media_time <= chunk.media_time);
        state.pending.insert(at, chunk);
        self.write_pending(&mut state);
    }

    fn play(&self, start_time: f64) {
        let was = self.clock.state();
        if !self.clock.start(start_time) {
            return;
        }
        let mut state = self.state.lock();
        if was == SchedulerState::Stopped {
            state.written_until = start_time;
        }
        state.writer.set_playing(true);
        debug!("Ring scheduler playing from {:.3}", start_time);
    }

    fn pause(&self) {
        self.clock.pause();
        self.state.lock().writer.set_playing(false);
    }

    fn stop(&self) {
        self.clock.stop();
        let mut state = self.state.lock();
        state.writer.set_playing(false);
        self.flush(&mut state, 0.0);
    }

    fn seek(&self, time: f64) {
        self.clock.seek(time);
        let mut state = self.state.lock();
        self.flush(&mut state, time);
        trace!("Ring scheduler flushed for seek to {:.3}", time);
    }

    fn current_time(&self) -> f64 {
        self.clock.current_time()
    }

    fn state(&self) -> SchedulerState {
        self.clock.state()
    }

    fn pump(&self) -> usize {
        let mut state = self.state.lock();
        if state.writer.flush_pending() {
            return 0;
        }
        self.write_pending(&mut state)
    }

    fn queued_frames(&self) -> usize {
        let state = self.state.lock();
        let pending: usize = state.pending.iter().map(PendingAudio::frames).sum();
        pending + state.writer.queued_frames()
    }

    fn clock(&self) -> &MediaClock {
        &self.clock
    }
}
