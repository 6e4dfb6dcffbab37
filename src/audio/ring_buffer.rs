//! Lock-free audio ring between the scheduler and the render thread
//!
//! A single-producer/single-consumer ring of interleaved `f32` samples.
//! The scheduler owns the [`RingWriter`], the real-time output callback
//! owns the [`RingReader`]. Neither side ever blocks on the other: control
//! (play/pause, flush) crosses over atomics only.
//!
//! Only the consumer may discard queued samples, so a flush is a request.
//! The writer bumps a flush epoch and stops writing; the reader drops
//! everything it holds on its next render and acknowledges the epoch,
//! after which the writer resumes. No sample written before a flush is
//! ever rendered after it.

use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::fmt;
use std::sync::Arc;

/// State shared by both ends
struct Shared {
    channels: usize,
    capacity_frames: usize,
    playing: AtomicBool,
    flush_epoch: AtomicU64,
    flush_ack: AtomicU64,
    frames_rendered: AtomicU64,
    underruns: AtomicU64,

    /// Samples pushed by the writer
    written: AtomicU64,

    /// Samples popped or dropped by the reader
    consumed: AtomicU64,
}

impl Shared {
    fn occupied_frames(&self) -> usize {
        let consumed = self.consumed.load(Ordering::Acquire);
        let written = self.written.load(Ordering::Acquire);
        (written.saturating_sub(consumed) as usize) / self.channels
    }
}

/// Constructor for a writer/reader pair
pub struct AudioRing;

impl AudioRing {
    /// Ring holding `capacity_frames` frames of `channels` interleaved samples
    pub fn new(channels: u16, capacity_frames: usize) -> (RingWriter, RingReader) {
        let channels = channels.max(1) as usize;
        let capacity_frames = capacity_frames.max(1);
        let (producer, consumer) = HeapRb::<f32>::new(capacity_frames * channels).split();

        let shared = Arc::new(Shared {
            channels,
            capacity_frames,
            playing: AtomicBool::new(false),
            flush_epoch: AtomicU64::new(0),
            flush_ack: AtomicU64::new(0),
            frames_rendered: AtomicU64::new(0),
            underruns: AtomicU64::new(0),
            written: AtomicU64::new(0),
            consumed: AtomicU64::new(0),
        });

        (
            RingWriter {
                producer,
                shared: Arc::clone(&shared),
            },
            RingReader {
                consumer,
                shared,
                seen_epoch: 0,
            },
        )
    }
}

/// Producer end, owned by the scheduler
pub struct RingWriter {
    producer: HeapProd<f32>,
    shared: Arc<Shared>,
}

impl RingWriter {
    pub fn channels(&self) -> usize {
        self.shared.channels
    }

    pub fn capacity_frames(&self) -> usize {
        self.shared.capacity_frames
    }

    /// Whether a flush has not been acknowledged by the reader yet
    pub fn flush_pending(&self) -> bool {
        self.shared.flush_ack.load(Ordering::Acquire) != self.shared.flush_epoch.load(Ordering::Relaxed)
    }

    /// Ask the reader to drop everything queued
    pub fn request_flush(&self) {
        self.shared.flush_epoch.fetch_add(1, Ordering::Release);
    }

    /// Whether the reader holds nothing and owes no flush acknowledgement
    pub fn is_drained(&self) -> bool {
        !self.flush_pending() && self.shared.occupied_frames() == 0
    }

    /// Frames that can be written now
    pub fn vacant_frames(&self) -> usize {
        if self.flush_pending() {
            return 0;
        }
        self.shared.capacity_frames - self.shared.occupied_frames()
    }

    /// Frames queued and not yet rendered
    pub fn queued_frames(&self) -> usize {
        if self.flush_pending() {
            return 0;
        }
        self.shared.occupied_frames()
    }

    /// Write whole interleaved frames; returns the number of frames written
    pub fn write(&mut self, interleaved: &[f32]) -> usize {
        let frames = (interleaved.len() / self.shared.channels).min(self.vacant_frames());
        if frames == 0 {
            return 0;
        }
        let written = self.producer.push_slice(&interleaved[..frames * self.shared.channels]);
        self.shared.written.fetch_add(written as u64, Ordering::Release);
        written / self.shared.channels
    }

    /// Set the play/pause flag read by the consumer
    pub fn set_playing(&self, playing: bool) {
        self.shared.playing.store(playing, Ordering::Release);
    }

    pub fn is_playing(&self) -> bool {
        self.shared.playing.load(Ordering::Acquire)
    }

    /// Frames the reader has rendered from the ring
    pub fn frames_rendered(&self) -> u64 {
        self.shared.frames_rendered.load(Ordering::Relaxed)
    }

    /// Render calls that ran out of data while playing
    pub fn underruns(&self) -> u64 {
        self.shared.underruns.load(Ordering::Relaxed)
    }
}

/// Consumer end, owned by the real-time render callback
pub struct RingReader {
    consumer: HeapCons<f32>,
    shared: Arc<Shared>,
    seen_epoch: u64,
}

impl fmt::Debug for RingReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingReader")
            .field("channels", &self.shared.channels)
            .field("capacity_frames", &self.shared.capacity_frames)
            .field("available_frames", &self.available_frames())
            .field("seen_epoch", &self.seen_epoch)
            .finish()
    }
}

impl RingReader {
    pub fn channels(&self) -> usize {
        self.shared.channels
    }

    /// Fill `out` with interleaved samples
    ///
    /// Outputs silence while paused and pads with silence when starved.
    /// Returns the number of frames taken from the ring. Never blocks.
    pub fn render(&mut self, out: &mut [f32]) -> usize {
        let epoch = self.shared.flush_epoch.load(Ordering::Acquire);
        if epoch != self.seen_epoch {
            let dropped = self.consumer.clear();
            self.shared.consumed.fetch_add(dropped as u64, Ordering::Release);
            self.seen_epoch = epoch;
            self.shared.flush_ack.store(epoch, Ordering::Release);
        }

        if !self.shared.playing.load(Ordering::Acquire) {
            out.fill(0.0);
            return 0;
        }

        let wanted = out.len() - out.len() % self.shared.channels;
        let popped = self.consumer.pop_slice(&mut out[..wanted]);
        self.shared.consumed.fetch_add(popped as u64, Ordering::Release);
        out[popped..].fill(0.0);

        if popped < wanted {
            self.shared.underruns.fetch_add(1, Ordering::Relaxed);
        }
        let frames = popped / self.shared.channels;
        self.shared.frames_rendered.fetch_add(frames as u64, Ordering::Relaxed);
        frames
    }

    /// Frames available to render
    pub fn available_frames(&self) -> usize {
        self.shared.occupied_frames()
    }
}
