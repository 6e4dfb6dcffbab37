//! Discrete per-chunk scheduler
//!
//! Every decoded chunk becomes a [`ScheduledSource`] due at an absolute
//! output clock time, `media_time - anchor_media + anchor_clock`. The output
//! side collects sources as they come due and mixes them itself.

use super::clock::{MediaClock, SchedulerState, TimeSource};
use super::resample::{linear, remap_channels};
use super::{AudioData, AudioScheduler};
use log::{debug, trace};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::fmt;
use std::sync::Arc;

/// A chunk of audio due at a fixed output clock time
#[derive(Debug, Clone)]
pub struct ScheduledSource {
    /// Output clock time the first frame plays at
    pub start_time: f64,

    /// Media time of the first frame
    pub media_time: f64,

    /// Sample rate of `channels`
    pub sample_rate: u32,

    /// Planar samples
    pub channels: Vec<Vec<f32>>,
}

impl ScheduledSource {
    pub fn frames(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }

    pub fn duration(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Output clock time just past the last frame
    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration()
    }
}

/// Audio scheduler handing out one source per decoded chunk
pub struct DiscreteScheduler {
    clock: MediaClock,
    sample_rate: u32,
    channels: u16,

    /// Sources not yet handed out, ordered by start time
    sources: Mutex<Vec<ScheduledSource>>,

    /// Bumped by seek and stop; the output drops sources it is still mixing
    flush_epoch: AtomicU64,
}

impl DiscreteScheduler {
    pub fn new(time_source: Arc<dyn TimeSource>, sample_rate: u32, channels: u16) -> Self {
        Self {
            clock: MediaClock::new(time_source),
            sample_rate,
            channels,
            sources: Mutex::new(Vec::new()),
            flush_epoch: AtomicU64::new(0),
        }
    }

    /// Remove and return every source starting at or before `now`
    pub fn render_due(&self, now: f64) -> Vec<ScheduledSource> {
        if self.clock.state() != SchedulerState::Playing {
            return Vec::new();
        }
        let mut sources = self.sources.lock();
        let due = sources.partition_point(|s| s.start_time <= now);
        sources.drain(..due).collect()
    }

    /// Number of sources waiting to start
    pub fn pending_sources(&self) -> usize {
        self.sources.lock().len()
    }
}

impl AudioScheduler for DiscreteScheduler {
    fn schedule(&self, data: &AudioData, media_time: f64) {
        if self.clock.state() != SchedulerState::Playing || data.frames() == 0 {
            return;
        }

        let source = ScheduledSource {
            start_time: self.clock.output_time(media_time),
            media_time,
            sample_rate: self.sample_rate,
            channels: remap_channels(
                linear(&data.channels, data.sample_rate, self.sample_rate),
                self.channels as usize,
            ),
        };

        if source.end_time() <= self.clock.now() {
            trace!("Audio at {:.3} arrived after it was due, dropping", media_time);
            return;
        }

        let mut sources = self.sources.lock();
        let at = sources.partition_point(|s| s.start_time <= source.start_time);
        sources.insert(at, source);
    }

    fn play(&self, start_time: f64) {
        if !self.clock.start(start_time) {
            return;
        }
        // Sources kept across a pause are re-timed against the new anchors.
        let mut sources = self.sources.lock();
        for source in sources.iter_mut() {
            source.start_time = self.clock.output_time(source.media_time);
        }
        sources.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));
        debug!("Discrete scheduler playing from {:.3}", start_time);
    }

    fn pause(&self) {
        self.clock.pause();
    }

    fn stop(&self) {
        self.clock.stop();
        self.sources.lock().clear();
        self.flush_epoch.fetch_add(1, Ordering::Release);
    }

    fn seek(&self, time: f64) {
        self.clock.seek(time);
        self.sources.lock().clear();
        self.flush_epoch.fetch_add(1, Ordering::Release);
    }

    fn current_time(&self) -> f64 {
        self.clock.current_time()
    }

    fn state(&self) -> SchedulerState {
        self.clock.state()
    }

    /// Drops sources that finished before they were collected
    fn pump(&self) -> usize {
        if self.clock.state() != SchedulerState::Playing {
            return 0;
        }
        let now = self.clock.now();
        let mut sources = self.sources.lock();
        let before = sources.len();
        sources.retain(|s| s.end_time() > now);
        let missed = before - sources.len();
        if missed > 0 {
            trace!("{} audio sources expired uncollected", missed);
        }
        0
    }

    fn queued_frames(&self) -> usize {
        self.sources.lock().iter().map(ScheduledSource::frames).sum()
    }

    fn clock(&self) -> &MediaClock {
        &self.clock
    }
}

struct ActiveSource {
    source: ScheduledSource,
    position: usize,
}

/// Mixer collecting due sources from a [`DiscreteScheduler`]
pub struct DiscreteOutput {
    scheduler: Arc<DiscreteScheduler>,
    active: Vec<ActiveSource>,
    seen_epoch: u64,
}

impl fmt::Debug for DiscreteOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscreteOutput")
            .field("active_sources", &self.active.len())
            .field("pending_sources", &self.scheduler.pending_sources())
            .field("seen_epoch", &self.seen_epoch)
            .finish()
    }
}

impl DiscreteOutput {
    pub fn new(scheduler: Arc<DiscreteScheduler>) -> Self {
        let seen_epoch = scheduler.flush_epoch.load(Ordering::Acquire);
        Self {
            scheduler,
            active: Vec::new(),
            seen_epoch,
        }
    }

    /// Mix sources playing during `[now, now + out.len() / channels)` into `out`
    ///
    /// Returns the number of frames that carried audio. Silent while
    /// paused; sources already started resume where they left off.
    pub fn render(&mut self, out: &mut [f32], now: f64) -> usize {
        out.fill(0.0);
        let epoch = self.scheduler.flush_epoch.load(Ordering::Acquire);
        if epoch != self.seen_epoch {
            self.active.clear();
            self.seen_epoch = epoch;
        }
        if self.scheduler.state() != SchedulerState::Playing {
            return 0;
        }
        let channels = self.scheduler.channels.max(1) as usize;
        let rate = self.scheduler.sample_rate as f64;
        let frames = out.len() / channels;
        let block_end = now + frames as f64 / rate;

        for source in self.scheduler.render_due(block_end) {
            // A source collected late starts part way in.
            let late = ((now - source.start_time) * rate).round().max(0.0) as usize;
            self.active.push(ActiveSource { source, position: late });
        }

        let mut audible = vec![false; frames];
        for active in &mut self.active {
            let delay = ((active.source.start_time - now) * rate).round().max(0.0) as usize;
            for frame in delay..frames {
                let Some(first) = active.source.channels.first() else {
                    break;
                };
                if active.position >= first.len() {
                    break;
                }
                for (c, channel) in active.source.channels.iter().enumerate().take(channels) {
                    out[frame * channels + c] += channel[active.position];
                }
                audible[frame] = true;
                active.position += 1;
            }
        }

        self.active.retain(|a| a.position < a.source.frames());
        audible.iter().filter(|a| **a).count()
    }
}
