//! Media clock and time sources
//!
//! The media time of a track is never stored on its own. It is derived
//! from an anchor pair (clock time, media time) captured when playback
//! starts or seeks, plus the time elapsed on the output clock since.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Output clock in seconds
///
/// Implementations must be monotonic.
pub trait TimeSource: Send + Sync {
    /// Current clock time in seconds
    fn now(&self) -> f64;
}

/// Monotonic wall clock
pub struct SystemTimeSource {
    start_time: Instant,
}

impl SystemTimeSource {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
        }
    }
}

impl Default for SystemTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for SystemTimeSource {
    fn now(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }
}

/// Manually driven clock for tests and offline rendering
///
/// Stored in microseconds so it can be shared without a lock.
#[derive(Default)]
pub struct ManualTimeSource {
    micros: AtomicI64,
}

impl ManualTimeSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Jump to `seconds`; going backwards is ignored
    pub fn set(&self, seconds: f64) {
        self.micros
            .fetch_max(crate::utils::seconds_to_micros(seconds), Ordering::SeqCst);
    }

    /// Move forward by `seconds`
    pub fn advance(&self, seconds: f64) {
        self.micros
            .fetch_add(crate::utils::seconds_to_micros(seconds.max(0.0)), Ordering::SeqCst);
    }
}

impl TimeSource for ManualTimeSource {
    fn now(&self) -> f64 {
        crate::utils::micros_to_seconds(self.micros.load(Ordering::SeqCst))
    }
}

/// Transport state of a scheduler and its clock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Stopped,
    Playing,
    Paused,
}

struct Anchors {
    state: SchedulerState,

    /// Output clock time captured at the last start/seek
    clock: f64,

    /// Media time corresponding to `clock`
    media: f64,

    /// Media time frozen by pause
    frozen: f64,
}

/// Anchor-based media clock
pub struct MediaClock {
    source: Arc<dyn TimeSource>,
    anchors: Mutex<Anchors>,
}

impl MediaClock {
    pub fn new(source: Arc<dyn TimeSource>) -> Self {
        Self {
            source,
            anchors: Mutex::new(Anchors {
                state: SchedulerState::Stopped,
                clock: 0.0,
                media: 0.0,
                frozen: 0.0,
            }),
        }
    }

    /// Start running from `media_time`
    ///
    /// Returns `false`, leaving the anchors untouched, when already playing.
    pub fn start(&self, media_time: f64) -> bool {
        let mut anchors = self.anchors.lock();
        if anchors.state == SchedulerState::Playing {
            return false;
        }
        anchors.clock = self.source.now();
        anchors.media = media_time;
        anchors.state = SchedulerState::Playing;
        true
    }

    /// Freeze the current media time
    pub fn pause(&self) {
        let mut anchors = self.anchors.lock();
        if anchors.state == SchedulerState::Playing {
            anchors.frozen = anchors.media + (self.source.now() - anchors.clock);
            anchors.state = SchedulerState::Paused;
        }
    }

    /// Stop and reset the anchors
    pub fn stop(&self) {
        let mut anchors = self.anchors.lock();
        anchors.state = SchedulerState::Stopped;
        anchors.clock = 0.0;
        anchors.media = 0.0;
        anchors.frozen = 0.0;
    }

    /// Re-anchor at `media_time` without changing the transport state
    pub fn seek(&self, media_time: f64) {
        let mut anchors = self.anchors.lock();
        anchors.clock = self.source.now();
        anchors.media = media_time;
        anchors.frozen = media_time;
    }

    /// Current media time: 0 when stopped, frozen when paused
    pub fn current_time(&self) -> f64 {
        let anchors = self.anchors.lock();
        match anchors.state {
            SchedulerState::Stopped => 0.0,
            SchedulerState::Paused => anchors.frozen,
            SchedulerState::Playing => anchors.media + (self.source.now() - anchors.clock),
        }
    }

    /// Output clock time at which `media_time` is presented
    pub fn output_time(&self, media_time: f64) -> f64 {
        let anchors = self.anchors.lock();
        media_time - anchors.media + anchors.clock
    }

    pub fn state(&self) -> SchedulerState {
        self.anchors.lock().state
    }

    /// Current (clock, media) anchor pair
    pub fn anchors(&self) -> (f64, f64) {
        let anchors = self.anchors.lock();
        (anchors.clock, anchors.media)
    }

    /// Current output clock time
    pub fn now(&self) -> f64 {
        self.source.now()
    }
}
