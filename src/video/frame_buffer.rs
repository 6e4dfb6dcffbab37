//! Per-track lookahead frame buffer
//!
//! Decodes video ahead of the playhead, stores frames in the shared
//! [`FrameCache`] under this buffer's owner id and answers "frame at time T"
//! queries from a small sorted index of the presentation times it has
//! buffered.
//!
//! At most one buffering operation runs per buffer. A `seek_to` arriving
//! while another operation is in flight queues behind it; a `buffer_more`
//! arriving while one is in flight is dropped. Operations are never
//! cancelled midway, so decoder state is never torn.

use crate::decoder::{CodecConfig, DecoderPool, Demuxer, EncodedSample, PooledDecoder, TrackKind, VideoCodecConfig};
use crate::utils::config::VideoConfig;
use crate::utils::error::{Result, TrackSyncError};
use crate::utils::{micros_to_seconds, seconds_to_micros};
use crate::video::{FrameCache, VideoFrame};
use log::{debug, trace, warn};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

const END_EPSILON: f64 = 1e-6;

/// Frame buffer tuning
#[derive(Debug, Clone, PartialEq)]
pub struct FrameBufferOptions {
    /// Seconds to decode ahead of the requested position
    pub buffer_ahead: f64,

    /// Maximum number of presentation times tracked locally
    pub max_window_frames: usize,

    /// Duration assumed when the track reports none
    pub fallback_duration: f64,
}

impl Default for FrameBufferOptions {
    fn default() -> Self {
        Self::from_config(&VideoConfig::default())
    }
}

impl FrameBufferOptions {
    pub fn from_config(config: &VideoConfig) -> Self {
        Self {
            buffer_ahead: config.buffer_ahead,
            max_window_frames: config.max_window_frames.max(1),
            fallback_duration: config.fallback_duration,
        }
    }
}

/// Buffering state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameBufferState {
    /// Nothing buffered
    Idle,

    /// A buffering operation is in flight
    Buffering,

    /// Frames are available and more can be decoded
    Ready,

    /// Decoded through the end of the track
    Ended,
}

/// Buffering statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FrameBufferStats {
    /// Frames produced by the decoder
    pub frames_decoded: u64,

    /// Samples whose frame was already cached
    pub cache_hits: u64,

    /// Delta samples dropped while the decoder was not ready
    pub samples_skipped: u64,

    /// Samples that failed to decode
    pub decode_errors: u64,

    /// Decoders (re)created through the pool
    pub decoders_created: u64,
}

#[derive(Default)]
struct StatCounters {
    frames_decoded: AtomicU64,
    cache_hits: AtomicU64,
    samples_skipped: AtomicU64,
    decode_errors: AtomicU64,
    decoders_created: AtomicU64,
}

/// Local buffering window
struct Window {
    /// Buffered presentation times in microseconds, ascending
    pts: VecDeque<i64>,
    buffer_start: f64,
    buffer_end: f64,
    state: FrameBufferState,
}

impl Window {
    fn reset(&mut self, time: f64) {
        self.pts.clear();
        self.buffer_start = time;
        self.buffer_end = time;
    }

    /// Index of the entry serving `time`
    fn resolve(&self, time: f64) -> Option<i64> {
        let target = seconds_to_micros(time);
        let after = self.pts.partition_point(|&pts| pts <= target);
        match after {
            0 => self.pts.front().copied(),
            n => self.pts.get(n - 1).copied(),
        }
    }
}

/// Decoder state, owned by whichever operation holds the lock
struct DecodeContext {
    decoder: Option<PooledDecoder<VideoFrame>>,

    /// Decoder has produced a frame since its last reset
    ready: bool,
}

/// How a decode pass ended
enum Pass {
    Completed,
    Aborted,
    Destroyed,
}

/// Lookahead frame buffer for one video track
pub struct FrameBuffer {
    track_id: u32,
    owner: u64,
    duration: f64,
    codec: VideoCodecConfig,
    options: FrameBufferOptions,
    demuxer: Arc<dyn Demuxer>,
    pool: Arc<DecoderPool<VideoFrame>>,
    cache: Arc<FrameCache>,

    /// Operation lock; its FIFO wait queue serialises seeks
    op: tokio::sync::Mutex<DecodeContext>,

    window: Mutex<Window>,
    destroyed: AtomicBool,
    stats: StatCounters,
}

impl FrameBuffer {
    /// Create a buffer for `track_id`
    ///
    /// Fails with `InvalidTrack` when the demuxer has no such video track.
    pub fn new(
        track_id: u32,
        demuxer: Arc<dyn Demuxer>,
        pool: Arc<DecoderPool<VideoFrame>>,
        cache: Arc<FrameCache>,
        options: FrameBufferOptions,
    ) -> Result<Self> {
        let track = demuxer
            .tracks()
            .into_iter()
            .find(|t| t.track_id == track_id && t.kind == TrackKind::Video)
            .ok_or(TrackSyncError::InvalidTrack(track_id))?;

        let codec = demuxer.video_config().ok_or_else(|| {
            TrackSyncError::NoTracks(format!("track {} has no video decoder configuration", track_id))
        })?;

        let duration = match track.duration {
            Some(d) if d > 0.0 && d.is_finite() => d,
            _ => {
                debug!(
                    "Track {} reports no duration, assuming {}s",
                    track_id, options.fallback_duration
                );
                options.fallback_duration
            }
        };

        let owner = cache.next_owner_id();
        debug!("Frame buffer for track {} created with owner id {}", track_id, owner);

        Ok(Self {
            track_id,
            owner,
            duration,
            codec,
            options,
            demuxer,
            pool,
            cache,
            op: tokio::sync::Mutex::new(DecodeContext { decoder: None, ready: false }),
            window: Mutex::new(Window {
                pts: VecDeque::new(),
                buffer_start: 0.0,
                buffer_end: 0.0,
                state: FrameBufferState::Idle,
            }),
            destroyed: AtomicBool::new(false),
            stats: StatCounters::default(),
        })
    }

    /// Seek to `time` and decode through `time + buffer_ahead`
    ///
    /// Waits for any in-flight operation to finish first.
    pub async fn seek_to(&self, time: f64) -> Result<()> {
        if self.is_destroyed() {
            return Err(TrackSyncError::Destroyed);
        }
        let mut ctx = self.op.lock().await;
        if self.is_destroyed() {
            return Err(TrackSyncError::Destroyed);
        }
        self.seek_locked(&mut ctx, time).await
    }

    /// Extend the buffered window by `buffer_ahead` seconds
    ///
    /// No-op when an operation is already in flight or the buffer has ended.
    pub async fn buffer_more(&self) -> Result<()> {
        if self.is_destroyed() {
            return Ok(());
        }
        let Ok(mut ctx) = self.op.try_lock() else {
            trace!("Track {}: buffering already in flight", self.track_id);
            return Ok(());
        };

        let (state, from) = {
            let window = self.window.lock();
            (window.state, window.buffer_end)
        };

        match state {
            FrameBufferState::Ended => Ok(()),
            FrameBufferState::Idle => {
                let start = self.window.lock().buffer_start;
                self.seek_locked(&mut ctx, start).await
            }
            _ => {
                let to = (from + self.options.buffer_ahead).min(self.duration);
                self.window.lock().state = FrameBufferState::Buffering;
                trace!("Track {}: buffering {:.3}..{:.3}", self.track_id, from, to);
                match self.decode_range(&mut ctx, from, to).await {
                    Ok(pass) => {
                        self.finish(pass, to);
                        Ok(())
                    }
                    Err(e) => {
                        self.settle_failed();
                        Err(e)
                    }
                }
            }
        }
    }

    async fn seek_locked(&self, ctx: &mut DecodeContext, time: f64) -> Result<()> {
        let time = time.clamp(0.0, self.duration);
        {
            let mut window = self.window.lock();
            window.reset(time);
            window.state = FrameBufferState::Buffering;
        }
        self.reset_decoder(ctx);

        let keyframe = self.demuxer.keyframe_before(self.track_id, time).await;
        if self.is_destroyed() {
            return Ok(());
        }
        let from = match keyframe {
            Ok(Some(sample)) => sample.timestamp.min(time),
            Ok(None) => time,
            Err(e) => {
                self.settle_failed();
                return Err(e);
            }
        };
        let to = (time + self.options.buffer_ahead).min(self.duration);
        debug!(
            "Track {}: seek to {:.3}, decoding {:.3}..{:.3}",
            self.track_id, time, from, to
        );

        match self.decode_range(ctx, from, to).await {
            Ok(pass) => {
                self.finish(pass, to);
                Ok(())
            }
            Err(e) => {
                self.settle_failed();
                Err(e)
            }
        }
    }

    /// Decode every sample in `[from, to)` into the cache
    async fn decode_range(&self, ctx: &mut DecodeContext, from: f64, to: f64) -> Result<Pass> {
        let samples = self.demuxer.samples(self.track_id, from, to).await?;

        for sample in samples {
            if self.is_destroyed() {
                return Ok(Pass::Destroyed);
            }

            if self.cache.has(self.owner, sample.timestamp) {
                self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
                self.record(&sample);
                continue;
            }

            if !ctx.ready && !sample.is_keyframe {
                self.stats.samples_skipped.fetch_add(1, Ordering::Relaxed);
                trace!(
                    "Track {}: decoder not ready, dropping delta frame at {:.3}",
                    self.track_id,
                    sample.timestamp
                );
                continue;
            }

            let Some(decoder) = self.ensure_decoder(ctx) else {
                return Ok(Pass::Aborted);
            };

            let decoded = decoder.decode(&sample).await;
            if self.is_destroyed() {
                return Ok(Pass::Destroyed);
            }
            let closed = matches!(decoded, Err(TrackSyncError::DecoderClosed)) || decoder.is_closed();

            match decoded {
                Ok(frame) => {
                    ctx.ready = true;
                    self.stats.frames_decoded.fetch_add(1, Ordering::Relaxed);
                    self.cache.put(self.owner, sample.timestamp, frame);
                    self.record(&sample);
                }
                Err(_) if closed => {
                    warn!(
                        "Track {}: decoder closed at {:.3}, recreating",
                        self.track_id, sample.timestamp
                    );
                    ctx.decoder = None;
                    ctx.ready = false;
                    if self.ensure_decoder(ctx).is_none() {
                        return Ok(Pass::Aborted);
                    }
                }
                Err(e) => {
                    self.stats.decode_errors.fetch_add(1, Ordering::Relaxed);
                    if sample.is_keyframe {
                        ctx.ready = false;
                    }
                    debug!(
                        "Track {}: skipping undecodable sample at {:.3}: {}",
                        self.track_id, sample.timestamp, e
                    );
                }
            }
        }

        Ok(Pass::Completed)
    }

    /// Open decoder, recreating it through the pool when missing or closed
    fn ensure_decoder<'a>(&self, ctx: &'a mut DecodeContext) -> Option<&'a mut PooledDecoder<VideoFrame>> {
        if ctx.decoder.as_ref().is_some_and(|d| !d.is_closed()) {
            return ctx.decoder.as_mut();
        }

        ctx.decoder = None;
        ctx.ready = false;

        let mut decoder = match self.pool.acquire() {
            Ok(decoder) => decoder,
            Err(e) => {
                warn!("Track {}: could not create decoder: {}", self.track_id, e);
                return None;
            }
        };
        if let Err(e) = decoder.configure(&CodecConfig::Video(self.codec.clone())) {
            warn!("Track {}: could not configure decoder: {}", self.track_id, e);
            return None;
        }

        self.stats.decoders_created.fetch_add(1, Ordering::Relaxed);
        ctx.decoder = Some(decoder);
        ctx.decoder.as_mut()
    }

    fn reset_decoder(&self, ctx: &mut DecodeContext) {
        ctx.ready = false;
        if let Some(decoder) = ctx.decoder.as_mut() {
            if let Err(e) = decoder.reset() {
                debug!("Track {}: decoder reset failed, dropping it: {}", self.track_id, e);
                ctx.decoder = None;
            }
        }
    }

    /// Track a buffered sample in the local window
    fn record(&self, sample: &EncodedSample) {
        let pts = seconds_to_micros(sample.timestamp);
        let mut window = self.window.lock();

        match window.pts.back() {
            Some(&last) if last == pts => {}
            Some(&last) if last > pts => {
                let at = window.pts.partition_point(|&p| p < pts);
                if window.pts.get(at) != Some(&pts) {
                    window.pts.insert(at, pts);
                }
            }
            _ => window.pts.push_back(pts),
        }

        while window.pts.len() > self.options.max_window_frames {
            if let Some(oldest) = window.pts.pop_front() {
                self.cache.remove(self.owner, micros_to_seconds(oldest));
            }
        }

        if let Some(&front) = window.pts.front() {
            window.buffer_start = micros_to_seconds(front);
        }
        window.buffer_end = window.buffer_end.max(sample.end().min(self.duration));
    }

    /// Leave `Buffering` after a pass that failed before decoding anything new
    fn settle_failed(&self) {
        let mut window = self.window.lock();
        if window.state == FrameBufferState::Buffering {
            window.state = if window.pts.is_empty() {
                FrameBufferState::Idle
            } else {
                FrameBufferState::Ready
            };
        }
    }

    fn finish(&self, pass: Pass, to: f64) {
        let mut window = self.window.lock();
        match pass {
            Pass::Completed => window.buffer_end = window.buffer_end.max(to),
            Pass::Aborted => debug!(
                "Track {}: buffering aborted at {:.3}, will retry",
                self.track_id, window.buffer_end
            ),
            Pass::Destroyed => return,
        }

        window.state = if window.pts.is_empty() {
            FrameBufferState::Idle
        } else if window.buffer_end >= self.duration - END_EPSILON {
            FrameBufferState::Ended
        } else {
            FrameBufferState::Ready
        };
        if window.buffer_start > window.buffer_end {
            window.buffer_start = window.buffer_end;
        }
    }

    /// Owned clone of the frame presented at `time`
    ///
    /// Returns the buffered frame with the largest presentation time not
    /// after `time`, or the first buffered frame when `time` precedes the
    /// window. `None` means "not available yet", including when the cache
    /// evicted the frame.
    pub fn get_frame(&self, time: f64) -> Option<VideoFrame> {
        let pts = self.window.lock().resolve(time)?;
        self.cache.get(self.owner, micros_to_seconds(pts))
    }

    /// Presentation time of the frame `get_frame(time)` would return
    ///
    /// Borrows the cached frame without cloning it.
    pub fn frame_timestamp(&self, time: f64) -> Option<f64> {
        let pts = self.window.lock().resolve(time)?;
        self.cache.peek(self.owner, micros_to_seconds(pts), |frame| frame.timestamp())
    }

    /// Whether `time` is inside the buffered window and its start is still cached
    pub fn is_buffered_at(&self, time: f64) -> bool {
        let window = self.window.lock();
        let Some(&front) = window.pts.front() else {
            return false;
        };
        time >= window.buffer_start
            && time < window.buffer_end
            && self.cache.has(self.owner, micros_to_seconds(front))
    }

    /// Release every cached frame and the decoder
    ///
    /// Waits for an in-flight operation, which stops at its next suspension
    /// point. Terminal.
    pub async fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut ctx = self.op.lock().await;
        if let Some(mut decoder) = ctx.decoder.take() {
            decoder.close();
        }
        ctx.ready = false;

        let removed = self.cache.remove_track(self.owner);
        let mut window = self.window.lock();
        window.reset(0.0);
        window.state = FrameBufferState::Idle;
        debug!("Track {}: frame buffer destroyed, released {} frames", self.track_id, removed);
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> FrameBufferState {
        self.window.lock().state
    }

    pub fn buffer_start(&self) -> f64 {
        self.window.lock().buffer_start
    }

    pub fn buffer_end(&self) -> f64 {
        self.window.lock().buffer_end
    }

    /// Number of frames in the local window
    pub fn frame_count(&self) -> usize {
        self.window.lock().pts.len()
    }

    /// Track duration, or the fallback when the track has none
    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn track_id(&self) -> u32 {
        self.track_id
    }

    /// Owner id of this buffer's cache entries
    pub fn owner_id(&self) -> u64 {
        self.owner
    }

    pub fn stats(&self) -> FrameBufferStats {
        FrameBufferStats {
            frames_decoded: self.stats.frames_decoded.load(Ordering::Relaxed),
            cache_hits: self.stats.cache_hits.load(Ordering::Relaxed),
            samples_skipped: self.stats.samples_skipped.load(Ordering::Relaxed),
            decode_errors: self.stats.decode_errors.load(Ordering::Relaxed),
            decoders_created: self.stats.decoders_created.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::synthetic::{
        DecoderFaults, SyntheticClip, SyntheticDemuxer, SyntheticVideoDecoderFactory, VIDEO_TRACK_ID,
    };
    use proptest::prelude::*;

    struct Fixture {
        buffer: FrameBuffer,
        cache: Arc<FrameCache>,
        faults: Arc<DecoderFaults>,
        demuxer: Arc<SyntheticDemuxer>,
    }

    fn fixture(clip: SyntheticClip, options: FrameBufferOptions, capacity: usize) -> Fixture {
        let faults = DecoderFaults::new();
        let factory = Arc::new(SyntheticVideoDecoderFactory::new(Arc::clone(&faults)));
        let pool: Arc<DecoderPool<VideoFrame>> = Arc::new(DecoderPool::new(factory, 2));
        let cache = Arc::new(FrameCache::new(capacity));
        let synthetic = Arc::new(SyntheticDemuxer::new(clip));
        let demuxer: Arc<dyn Demuxer> = synthetic.clone();
        let buffer =
            FrameBuffer::new(VIDEO_TRACK_ID, demuxer, pool, Arc::clone(&cache), options).unwrap();
        Fixture {
            buffer,
            cache,
            faults,
            demuxer: synthetic,
        }
    }

    fn options(buffer_ahead: f64) -> FrameBufferOptions {
        FrameBufferOptions {
            buffer_ahead,
            ..FrameBufferOptions::default()
        }
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[tokio::test]
    async fn test_seek_near_end_clamps_and_ends() {
        let f = fixture(SyntheticClip::video_only(10.0, 30.0, 30), options(2.0), 1000);

        f.buffer.seek_to(8.0).await.unwrap();

        assert!(approx(f.buffer.buffer_end(), 10.0));
        assert_eq!(f.buffer.state(), FrameBufferState::Ended);
        assert!(f.buffer.buffer_start() <= f.buffer.buffer_end());
    }

    #[tokio::test]
    async fn test_get_frame_resolves_latest_not_after() {
        let f = fixture(SyntheticClip::video_only(10.0, 10.0, 10), options(2.0), 1000);
        f.buffer.seek_to(1.25).await.unwrap();

        assert_eq!(f.buffer.state(), FrameBufferState::Ready);
        let frame = f.buffer.get_frame(1.25).unwrap();
        assert!(approx(frame.timestamp(), 1.2));
        assert!(approx(f.buffer.frame_timestamp(2.05).unwrap(), 2.0));

        // Before the window: first buffered frame (the keyframe at 1.0).
        assert!(approx(f.buffer.frame_timestamp(0.2).unwrap(), 1.0));
        assert!(f.buffer.is_buffered_at(1.5));
        assert!(!f.buffer.is_buffered_at(3.5));
    }

    #[tokio::test]
    async fn test_cached_samples_skip_decoding() {
        let f = fixture(SyntheticClip::video_only(10.0, 10.0, 10), options(1.0), 1000);
        f.buffer.seek_to(0.0).await.unwrap();
        let decoded = f.faults.decode_calls();
        assert_eq!(decoded, 10);

        f.buffer.seek_to(0.0).await.unwrap();
        assert_eq!(f.faults.decode_calls(), decoded);
        assert_eq!(f.buffer.stats().cache_hits, 10);
        assert_eq!(f.buffer.frame_count(), 10);
    }

    #[tokio::test]
    async fn test_failed_keyframe_skips_until_next_keyframe() {
        let f = fixture(SyntheticClip::video_only(10.0, 10.0, 10), options(2.0), 1000);
        f.faults.fail_at(1.0);

        f.buffer.seek_to(0.5).await.unwrap();

        let stats = f.buffer.stats();
        assert_eq!(stats.decode_errors, 1);
        assert_eq!(stats.samples_skipped, 9);
        assert!(approx(f.buffer.frame_timestamp(1.5).unwrap(), 0.9));
        assert!(approx(f.buffer.frame_timestamp(2.0).unwrap(), 2.0));
    }

    #[tokio::test]
    async fn test_closed_decoder_is_recreated() {
        let f = fixture(SyntheticClip::video_only(10.0, 10.0, 5), options(1.0), 1000);
        f.faults.close_after(3);

        f.buffer.seek_to(0.0).await.unwrap();

        assert_eq!(f.faults.created(), 2);
        assert_eq!(f.buffer.stats().decoders_created, 2);
        // 0.2 closed the decoder, 0.3 and 0.4 wait for the keyframe at 0.5.
        assert!(approx(f.buffer.frame_timestamp(0.35).unwrap(), 0.1));
        assert!(approx(f.buffer.frame_timestamp(0.55).unwrap(), 0.5));
        assert_eq!(f.buffer.state(), FrameBufferState::Ready);
    }

    #[tokio::test]
    async fn test_failed_recreation_aborts_silently_and_retries() {
        let f = fixture(SyntheticClip::video_only(10.0, 10.0, 5), options(1.0), 1000);
        f.buffer.seek_to(0.0).await.unwrap();
        assert_eq!(f.faults.decode_calls(), 10);

        f.faults.close_after(12);
        f.faults.set_fail_create(true);
        f.buffer.buffer_more().await.unwrap();

        assert_eq!(f.buffer.state(), FrameBufferState::Ready);
        assert!(approx(f.buffer.buffer_end(), 1.1));
        assert!(f.buffer.is_buffered_at(1.05));

        f.faults.set_fail_create(false);
        f.buffer.buffer_more().await.unwrap();
        assert!(approx(f.buffer.buffer_end(), 2.1));
        assert!(approx(f.buffer.frame_timestamp(1.4).unwrap(), 1.0));
        assert!(approx(f.buffer.frame_timestamp(1.6).unwrap(), 1.6));
    }

    #[tokio::test]
    async fn test_buffer_more_is_dropped_while_seek_in_flight() {
        let f = fixture(SyntheticClip::video_only(10.0, 10.0, 10), options(2.0), 1000);

        let (seek, more) = tokio::join!(f.buffer.seek_to(0.0), f.buffer.buffer_more());
        seek.unwrap();
        more.unwrap();

        assert!(approx(f.buffer.buffer_end(), 2.0));
    }

    #[tokio::test]
    async fn test_concurrent_seeks_queue_in_order() {
        let f = fixture(SyntheticClip::video_only(10.0, 10.0, 10), options(1.0), 1000);

        let (first, second) = tokio::join!(f.buffer.seek_to(1.0), f.buffer.seek_to(5.0));
        first.unwrap();
        second.unwrap();

        assert!(f.buffer.is_buffered_at(5.5));
        assert!(approx(f.buffer.buffer_start(), 5.0));
        assert!(approx(f.buffer.buffer_end(), 6.0));
    }

    #[tokio::test]
    async fn test_window_is_capped() {
        let opts = FrameBufferOptions {
            buffer_ahead: 2.0,
            max_window_frames: 20,
            fallback_duration: 3600.0,
        };
        let f = fixture(SyntheticClip::video_only(10.0, 30.0, 30), opts, 1000);

        f.buffer.seek_to(0.0).await.unwrap();

        assert_eq!(f.buffer.frame_count(), 20);
        assert_eq!(f.cache.len(), 20);
        assert!(f.buffer.buffer_start() > 1.0);
        assert!(f.buffer.buffer_start() <= f.buffer.buffer_end());
    }

    #[tokio::test]
    async fn test_eviction_is_detected() {
        let f = fixture(SyntheticClip::video_only(10.0, 30.0, 30), options(2.0), 10);
        f.buffer.seek_to(0.0).await.unwrap();

        let start = f.buffer.buffer_start();
        assert!(!f.buffer.is_buffered_at(start));
        assert!(f.buffer.get_frame(start).is_none());
        assert!(f.buffer.get_frame(1.99).is_some());
    }

    #[tokio::test]
    async fn test_destroy_releases_cache_entries() {
        let f = fixture(SyntheticClip::video_only(10.0, 10.0, 10), options(1.0), 1000);
        f.buffer.seek_to(0.0).await.unwrap();
        assert_eq!(f.cache.len(), 10);

        f.buffer.destroy().await;

        assert!(f.cache.is_empty());
        assert_eq!(f.buffer.frame_count(), 0);
        assert!(matches!(f.buffer.seek_to(0.0).await, Err(TrackSyncError::Destroyed)));
        f.buffer.buffer_more().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_read_leaves_buffer_idle() {
        let f = fixture(SyntheticClip::default(), options(1.0), 1000);
        f.demuxer.destroy();

        assert!(f.buffer.seek_to(2.0).await.is_err());
        assert_eq!(f.buffer.state(), FrameBufferState::Idle);
        assert_eq!(f.buffer.frame_count(), 0);
        assert!(f.buffer.get_frame(2.0).is_none());
    }

    #[tokio::test]
    async fn test_unknown_track_is_rejected() {
        let faults = DecoderFaults::new();
        let pool: Arc<DecoderPool<VideoFrame>> = Arc::new(DecoderPool::new(
            Arc::new(SyntheticVideoDecoderFactory::new(faults)),
            1,
        ));
        let demuxer: Arc<dyn Demuxer> = Arc::new(SyntheticDemuxer::new(SyntheticClip::default()));
        let result = FrameBuffer::new(99, demuxer, pool, Arc::new(FrameCache::new(10)), options(1.0));
        assert!(matches!(result, Err(TrackSyncError::InvalidTrack(99))));
    }

    #[tokio::test]
    async fn test_duration_less_track_uses_fallback() {
        let clip = SyntheticClip {
            duration: None,
            recorded: 5.0,
            audio: None,
            ..SyntheticClip::default()
        };
        let f = fixture(clip, options(2.0), 1000);
        assert_eq!(f.buffer.duration(), 3600.0);

        f.buffer.seek_to(4.0).await.unwrap();
        assert_eq!(f.buffer.state(), FrameBufferState::Ready);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn prop_window_stays_monotonic(
            ops in prop::collection::vec((any::<bool>(), 0.0f64..10.0), 1..8),
            probe in 0.0f64..1.0,
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();

            runtime.block_on(async {
                let f = fixture(SyntheticClip::video_only(10.0, 10.0, 5), options(1.5), 10_000);
                for (seek, time) in ops {
                    if seek {
                        f.buffer.seek_to(time).await.unwrap();
                    } else {
                        f.buffer.buffer_more().await.unwrap();
                    }

                    let (start, end) = (f.buffer.buffer_start(), f.buffer.buffer_end());
                    prop_assert!(start <= end);

                    if f.buffer.frame_count() > 0 && end > start {
                        let t = start + (end - start) * probe;
                        let frame = f.buffer.get_frame(t);
                        prop_assert!(frame.is_some());
                        prop_assert!(frame.unwrap().timestamp() <= t + 1e-9);
                    }
                }
                Ok::<(), TestCaseError>(())
            })?;
        }
    }
}
