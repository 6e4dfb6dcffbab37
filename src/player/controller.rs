//! Track player implementation for tracksync
//!
//! This module provides the [`TrackPlayer`] that orchestrates one clip's
//! playback: the video frame buffer, audio decoding and the audio
//! scheduler, driven by an external tick from the render loop.
//!
//! `tick` itself never waits. Buffering it triggers runs as background
//! tasks, at most one video and one audio task per track at a time, and
//! `settle` waits for them.

use crate::audio::{AudioData, SchedulerState};
use crate::decoder::{AudioCodecConfig, CodecConfig, Demuxer, PooledDecoder, TrackKind};
use crate::player::state::{StateChangeEvent, StateNotifier, StateSubscription};
use crate::player::{PlaybackState, PlayerDeps, TrackPlayerOptions, TrackStatus};
use crate::utils::error::{Result, TrackSyncError};
use crate::utils::seconds_to_micros;
use crate::video::{FrameBuffer, FrameBufferState, VideoFrame};
use log::{debug, info, trace, warn};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;

const TIME_EPSILON: f64 = 1e-6;

/// Audio stream selected at load
struct AudioTrack {
    track_id: u32,
    codec: AudioCodecConfig,
}

/// Media opened by `load`; fixed for the player's lifetime
struct Media {
    video: Option<Arc<FrameBuffer>>,
    audio: Option<AudioTrack>,
    duration: f64,
}

struct AudioDecodeContext {
    decoder: Option<PooledDecoder<AudioData>>,
}

/// Decoded audio for one window
struct AudioWindow {
    chunks: Vec<AudioData>,
    /// End of the last sample read; the next window starts here
    end: f64,
}

#[derive(Debug, Default)]
struct Playhead {
    /// Position while the scheduler clock is not authoritative
    position: f64,

    /// Audio decoded and handed to the scheduler up to here
    audio_until: f64,

    /// Whether the next audio window must start at a chunk boundary
    align_audio: bool,

    /// Initial audio window decoded by `prepare_to_play`
    preroll: Vec<AudioData>,

    /// Presentation time of the last frame handed out, in microseconds
    last_frame: Option<i64>,

    /// State to return to once the seek in flight completes
    seek_origin: Option<PlaybackState>,
}

#[derive(Default)]
struct BackgroundTasks {
    video: Option<JoinHandle<()>>,
    audio: Option<JoinHandle<()>>,
}

impl BackgroundTasks {
    fn running(task: &Option<JoinHandle<()>>) -> bool {
        task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

/// State shared with background buffering tasks
struct Shared {
    slot: usize,
    demuxer: Arc<dyn Demuxer>,
    deps: PlayerDeps,
    options: TrackPlayerOptions,
    notifier: StateNotifier,
    media: OnceCell<Media>,
    playhead: Mutex<Playhead>,

    /// Serialises audio decoding
    audio: tokio::sync::Mutex<AudioDecodeContext>,

    /// Bumped by every repositioning; results from older passes are dropped
    generation: AtomicU64,
    destroyed: AtomicBool,
}

/// Playback orchestrator for one track
pub struct TrackPlayer {
    shared: Arc<Shared>,
    tasks: Mutex<BackgroundTasks>,
}

fn invalid(operation: &'static str, state: PlaybackState) -> TrackSyncError {
    TrackSyncError::InvalidState {
        operation,
        state: state.to_string(),
    }
}

impl TrackPlayer {
    /// Create a player for the clip behind `demuxer`
    ///
    /// Nothing is read until [`load`](Self::load).
    pub fn new(
        track_slot: usize,
        demuxer: Arc<dyn Demuxer>,
        deps: PlayerDeps,
        options: TrackPlayerOptions,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                slot: track_slot,
                demuxer,
                deps,
                options,
                notifier: StateNotifier::new(track_slot),
                media: OnceCell::new(),
                playhead: Mutex::new(Playhead::default()),
                audio: tokio::sync::Mutex::new(AudioDecodeContext { decoder: None }),
                generation: AtomicU64::new(0),
                destroyed: AtomicBool::new(false),
            }),
            tasks: Mutex::new(BackgroundTasks::default()),
        }
    }

    /// Open the clip's tracks and buffer video from the start
    ///
    /// Fails with `NoTracks` when the clip has neither video nor audio.
    pub async fn load(&self) -> Result<()> {
        self.check_alive()?;
        let s = &self.shared;
        s.notifier
            .transition(&[PlaybackState::Idle], PlaybackState::Loading)
            .map_err(|state| invalid("load", state))?;

        let media = match self.open_media().await {
            Ok(media) => media,
            Err(e) => {
                if !s.is_destroyed() {
                    s.notifier.set(PlaybackState::Idle);
                }
                return Err(e);
            }
        };

        info!(
            "Track {} loaded: {:.3}s, video: {}, audio: {}",
            s.slot,
            media.duration,
            media.video.is_some(),
            media.audio.is_some()
        );
        if s.media.set(media).is_err() {
            return Err(crate::internal_error!("track {} loaded twice", s.slot));
        }
        s.notifier.set(PlaybackState::Ready);
        Ok(())
    }

    async fn open_media(&self) -> Result<Media> {
        let s = &self.shared;
        let video_track = s.demuxer.track_of(TrackKind::Video);
        let audio_track = s.demuxer.track_of(TrackKind::Audio);
        if video_track.is_none() && audio_track.is_none() {
            return Err(TrackSyncError::NoTracks(format!(
                "clip in slot {} has neither video nor audio",
                s.slot
            )));
        }

        let audio = audio_track.as_ref().and_then(|track| match s.demuxer.audio_config() {
            Some(codec) => Some(AudioTrack {
                track_id: track.track_id,
                codec,
            }),
            None => {
                warn!("Track {}: audio stream has no decoder configuration, ignoring it", s.slot);
                None
            }
        });

        let video = match video_track {
            Some(track) => Some(Arc::new(FrameBuffer::new(
                track.track_id,
                Arc::clone(&s.demuxer),
                Arc::clone(&s.deps.video_pool),
                Arc::clone(&s.deps.cache),
                s.options.video.clone(),
            )?)),
            None => None,
        };

        let audio_duration = audio_track
            .and_then(|t| t.duration)
            .filter(|d| d.is_finite() && *d > 0.0);
        let duration = match (video.as_ref().map(|v| v.duration()), audio_duration) {
            (Some(v), Some(a)) => v.max(a),
            (Some(v), None) => v,
            (None, Some(a)) => a,
            (None, None) => s.options.video.fallback_duration,
        };

        if let Some(video) = &video {
            if let Err(e) = video.seek_to(0.0).await {
                video.destroy().await;
                return Err(e);
            }
        }
        self.check_alive()?;

        Ok(Media {
            video,
            audio,
            duration,
        })
    }

    /// Position video and audio at `time` without starting playback
    ///
    /// Decodes the initial audio window `[time, time + audio_buffer_ahead)`
    /// for [`start_audio`](Self::start_audio) to schedule.
    pub async fn prepare_to_play(&self, time: f64) -> Result<()> {
        self.check_alive()?;
        let s = &self.shared;
        let media = s.media("prepare")?;
        let origin = s
            .notifier
            .transition(
                &[PlaybackState::Ready, PlaybackState::Paused, PlaybackState::Ended],
                PlaybackState::Loading,
            )
            .map_err(|state| invalid("prepare", state))?;

        let generation = s.reposition();
        match self.prepare(media, time, generation).await {
            Ok(()) => {
                s.notifier.set(PlaybackState::Ready);
                Ok(())
            }
            Err(e) => {
                if !s.is_destroyed() {
                    s.notifier.set(origin);
                }
                Err(e)
            }
        }
    }

    async fn prepare(&self, media: &Media, time: f64, generation: u64) -> Result<()> {
        let s = &self.shared;
        let time = time.clamp(0.0, media.duration);
        debug!("Track {}: preparing to play from {:.3}", s.slot, time);

        if let Some(video) = &media.video {
            video.seek_to(time).await?;
        }
        self.check_alive()?;

        {
            let mut playhead = s.playhead.lock();
            // An ended track's clock is still running; start_audio re-anchors it.
            if s.deps.scheduler.state() == SchedulerState::Playing {
                s.deps.scheduler.pause();
            }
            s.deps.scheduler.seek(time);
            playhead.position = time;
            playhead.audio_until = time;
            playhead.align_audio = true;
            playhead.preroll.clear();
            playhead.last_frame = None;
        }

        let to = (time + s.options.audio_buffer_ahead).min(media.duration);
        let window = s.decode_audio(media, time, to, true).await?;
        self.check_alive()?;

        let mut playhead = s.playhead.lock();
        if s.generation.load(Ordering::SeqCst) == generation {
            playhead.preroll = window.chunks;
            playhead.audio_until = window.end;
            playhead.align_audio = false;
        }
        Ok(())
    }

    /// Start the scheduler and hand it the prepared audio
    ///
    /// No-op while already playing.
    pub fn start_audio(&self) -> Result<()> {
        self.check_alive()?;
        let s = &self.shared;
        match s.notifier.get() {
            PlaybackState::Playing => return Ok(()),
            PlaybackState::Ready => {}
            state => return Err(invalid("start audio", state)),
        }

        {
            let mut playhead = s.playhead.lock();
            s.deps.scheduler.play(playhead.position);
            for chunk in playhead.preroll.drain(..) {
                s.deps.scheduler.schedule(&chunk, chunk.timestamp);
            }
        }
        s.deps.scheduler.pump();

        s.notifier
            .transition(&[PlaybackState::Ready], PlaybackState::Playing)
            .map_err(|state| invalid("start audio", state))?;
        Ok(())
    }

    /// Prepare at `time` and start playing
    ///
    /// Calling it while already playing changes nothing.
    pub async fn play(&self, time: f64) -> Result<()> {
        self.check_alive()?;
        if self.state() == PlaybackState::Playing {
            return Ok(());
        }
        self.prepare_to_play(time).await?;
        self.start_audio()
    }

    /// Pause, freezing the media time
    pub fn pause(&self) -> Result<()> {
        self.check_alive()?;
        let s = &self.shared;
        match s.notifier.get() {
            PlaybackState::Playing => {}
            PlaybackState::Paused => return Ok(()),
            state => return Err(invalid("pause", state)),
        }

        s.deps.scheduler.pause();
        s.playhead.lock().position = s.deps.scheduler.current_time();
        s.notifier
            .transition(&[PlaybackState::Playing], PlaybackState::Paused)
            .map_err(|state| invalid("pause", state))?;
        Ok(())
    }

    /// Stop playback, discarding scheduled audio
    pub fn stop(&self) -> Result<()> {
        self.check_alive()?;
        let s = &self.shared;
        if s.notifier.get() == PlaybackState::Idle {
            return Ok(());
        }

        s.reposition();
        {
            let mut playhead = s.playhead.lock();
            s.deps.scheduler.stop();
            *playhead = Playhead::default();
        }
        s.notifier.set(PlaybackState::Ready);
        Ok(())
    }

    /// Reposition to `time`
    ///
    /// Playing and paused tracks come back in the state they left; a seek
    /// from ready or ended lands in ready. A seek arriving while another is
    /// in flight queues behind it and its result wins.
    pub async fn seek(&self, time: f64) -> Result<()> {
        self.check_alive()?;
        let s = &self.shared;
        let media = s.media("seek")?;

        let origin = {
            let mut playhead = s.playhead.lock();
            let origin = match s.notifier.get() {
                PlaybackState::Playing => PlaybackState::Playing,
                PlaybackState::Paused => PlaybackState::Paused,
                PlaybackState::Ready | PlaybackState::Ended => PlaybackState::Ready,
                PlaybackState::Seeking => playhead.seek_origin.unwrap_or(PlaybackState::Ready),
                state => return Err(invalid("seek", state)),
            };
            playhead.seek_origin = Some(origin);
            playhead.position = time.clamp(0.0, media.duration);
            origin
        };
        let generation = s.reposition();
        s.notifier.set(PlaybackState::Seeking);

        let result = self.seek_inner(media, time, origin, generation).await;
        if s.is_destroyed() || s.generation.load(Ordering::SeqCst) != generation {
            return result;
        }
        s.playhead.lock().seek_origin = None;
        s.notifier.set(origin);
        result
    }

    async fn seek_inner(
        &self,
        media: &Media,
        time: f64,
        origin: PlaybackState,
        generation: u64,
    ) -> Result<()> {
        let s = &self.shared;
        let time = time.clamp(0.0, media.duration);
        debug!("Track {}: seek to {:.3} ({})", s.slot, time, origin);

        if let Some(video) = &media.video {
            video.seek_to(time).await?;
        }
        self.check_alive()?;
        if s.generation.load(Ordering::SeqCst) != generation {
            trace!("Track {}: seek to {:.3} superseded", s.slot, time);
            return Ok(());
        }

        {
            let mut playhead = s.playhead.lock();
            s.deps.scheduler.seek(time);
            playhead.position = time;
            playhead.audio_until = time;
            playhead.align_audio = true;
            playhead.preroll.clear();
            playhead.last_frame = None;
        }

        if origin == PlaybackState::Playing {
            let to = (time + s.options.audio_buffer_ahead).min(media.duration);
            let window = s.decode_audio(media, time, to, true).await?;
            self.check_alive()?;
            s.commit_audio(window, generation);
            s.deps.scheduler.pump();
        }
        Ok(())
    }

    /// Advance buffering for render clock `clock`
    ///
    /// No-op unless playing. Marks the track ended once `clock` reaches the
    /// duration; otherwise refills video when less than half the lookahead
    /// remains buffered, extends the audio window, and moves queued audio
    /// to the output.
    pub fn tick(&self, clock: f64, buffer_video: bool) {
        let s = &self.shared;
        if s.is_destroyed() || s.notifier.get() != PlaybackState::Playing {
            return;
        }
        let Some(media) = s.media.get() else {
            return;
        };

        if media.duration > 0.0 && clock >= media.duration {
            if s.notifier
                .transition(&[PlaybackState::Playing], PlaybackState::Ended)
                .is_ok()
            {
                debug!("Track {}: ended at {:.3}", s.slot, clock);
            }
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let mut tasks = self.tasks.lock();
                if buffer_video {
                    self.tick_video(&handle, &mut tasks, media, clock);
                }
                self.tick_audio(&handle, &mut tasks, media, clock);
            }
            Err(_) => trace!("Track {}: tick outside a runtime, not buffering", s.slot),
        }

        s.deps.scheduler.pump();
    }

    fn tick_video(
        &self,
        handle: &tokio::runtime::Handle,
        tasks: &mut BackgroundTasks,
        media: &Media,
        clock: f64,
    ) {
        let Some(video) = &media.video else {
            return;
        };
        if BackgroundTasks::running(&tasks.video) {
            return;
        }

        let slot = self.shared.slot;
        let start = video.buffer_start();
        let end = video.buffer_end();
        let outside = clock + TIME_EPSILON < start
            || (clock > end && video.state() != FrameBufferState::Ended);

        if outside {
            // The playhead left the window (loop restart, stall); rebuild it.
            let video = Arc::clone(video);
            tasks.video = Some(handle.spawn(async move {
                if let Err(e) = video.seek_to(clock).await {
                    debug!("Track {}: video rebuffer at {:.3} failed: {}", slot, clock, e);
                }
            }));
            return;
        }

        let low_water = clock + self.shared.options.video.buffer_ahead / 2.0;
        if video.state() != FrameBufferState::Ended && end < low_water {
            trace!("Track {}: video buffered to {:.3}, refilling", slot, end);
            let video = Arc::clone(video);
            tasks.video = Some(handle.spawn(async move {
                if let Err(e) = video.buffer_more().await {
                    debug!("Track {}: video buffering failed: {}", slot, e);
                }
            }));
        }
    }

    fn tick_audio(
        &self,
        handle: &tokio::runtime::Handle,
        tasks: &mut BackgroundTasks,
        media: &Media,
        clock: f64,
    ) {
        let s = &self.shared;
        if media.audio.is_none() || BackgroundTasks::running(&tasks.audio) {
            return;
        }

        let ahead = s.options.audio_buffer_ahead;
        let (from, align) = {
            let playhead = s.playhead.lock();
            (playhead.audio_until, playhead.align_audio)
        };
        let to = (clock + ahead).min(media.duration);
        if from >= media.duration - TIME_EPSILON || from >= clock + ahead / 2.0 {
            return;
        }

        // Audio that fell behind the playhead is not worth decoding.
        let start = from.max(clock);
        let align = align || start > from;
        let shared = Arc::clone(&self.shared);
        let generation = s.generation.load(Ordering::SeqCst);
        tasks.audio = Some(handle.spawn(async move {
            shared.extend_audio(start, to, align, generation).await;
        }));
    }

    /// Re-anchor at `time` for a seamless loop restart
    ///
    /// Synchronous: the clock and the audio scheduler move at once, and
    /// the next ticks refill whatever is not already buffered.
    pub fn reset_for_loop(&self, time: f64) {
        let s = &self.shared;
        if s.is_destroyed() {
            return;
        }
        let Some(media) = s.media.get() else {
            return;
        };
        let state = s.notifier.get();
        if !matches!(
            state,
            PlaybackState::Playing | PlaybackState::Ended | PlaybackState::Paused
        ) {
            trace!("Track {}: loop reset ignored while {}", s.slot, state);
            return;
        }

        let time = time.clamp(0.0, media.duration);
        s.reposition();
        {
            let mut playhead = s.playhead.lock();
            s.deps.scheduler.seek(time);
            if state == PlaybackState::Ended && s.deps.scheduler.state() != SchedulerState::Playing {
                s.deps.scheduler.play(time);
            }
            playhead.position = time;
            playhead.audio_until = time;
            playhead.align_audio = true;
            playhead.preroll.clear();
            playhead.last_frame = None;
        }

        if state == PlaybackState::Ended
            && s.notifier
                .transition(&[PlaybackState::Ended], PlaybackState::Playing)
                .is_err()
        {
            debug!("Track {}: left Ended before the loop restart", s.slot);
        }
        trace!("Track {}: loop restart at {:.3}", s.slot, time);
    }

    /// Frame to show at `time`, as an owned handle
    ///
    /// `None` past the end, and while the frame is not buffered.
    pub fn get_frame_at(&self, time: f64) -> Option<VideoFrame> {
        let video = self.video_at(time)?;
        let frame = video.get_frame(time)?;
        self.shared.playhead.lock().last_frame = Some(seconds_to_micros(frame.timestamp()));
        Some(frame)
    }

    /// Presentation time of the frame [`get_frame_at`](Self::get_frame_at)
    /// would return, without cloning it
    pub fn get_frame_timestamp(&self, time: f64) -> Option<f64> {
        self.video_at(time)?.frame_timestamp(time)
    }

    /// Frame to show at `time` when it differs from the last one handed out
    pub fn get_frame_if_changed(&self, time: f64) -> Option<VideoFrame> {
        let timestamp = self.get_frame_timestamp(time)?;
        if self.shared.playhead.lock().last_frame == Some(seconds_to_micros(timestamp)) {
            return None;
        }
        self.get_frame_at(time)
    }

    fn video_at(&self, time: f64) -> Option<&Arc<FrameBuffer>> {
        let s = &self.shared;
        if s.is_destroyed() {
            return None;
        }
        let media = s.media.get()?;
        if time >= media.duration {
            return None;
        }
        media.video.as_ref()
    }

    /// Authoritative media time of this track
    pub fn current_time(&self) -> f64 {
        let s = &self.shared;
        let duration = self.duration();
        match s.notifier.get() {
            PlaybackState::Playing | PlaybackState::Paused | PlaybackState::Ended => {
                s.deps.scheduler.current_time().clamp(0.0, duration)
            }
            _ => s.playhead.lock().position,
        }
    }

    /// Track duration; 0 until loaded
    pub fn duration(&self) -> f64 {
        self.shared.media.get().map(|m| m.duration).unwrap_or(0.0)
    }

    pub fn state(&self) -> PlaybackState {
        self.shared.notifier.get()
    }

    pub fn track_slot(&self) -> usize {
        self.shared.slot
    }

    pub fn is_destroyed(&self) -> bool {
        self.shared.is_destroyed()
    }

    /// The video frame buffer, once loaded
    pub fn frame_buffer(&self) -> Option<Arc<FrameBuffer>> {
        self.shared.media.get().and_then(|m| m.video.clone())
    }

    /// Call `callback` on every state change until the subscription drops
    pub fn on_state_change<F>(&self, callback: F) -> StateSubscription
    where
        F: Fn(&StateChangeEvent) + Send + Sync + 'static,
    {
        self.shared.notifier.subscribe(callback)
    }

    /// Status snapshot
    pub fn status(&self) -> TrackStatus {
        let s = &self.shared;
        let video = self.frame_buffer();
        TrackStatus {
            slot: s.slot,
            state: self.state(),
            current_time: self.current_time(),
            duration: self.duration(),
            buffer_start: video.as_ref().map(|v| v.buffer_start()).unwrap_or(0.0),
            buffer_end: video.as_ref().map(|v| v.buffer_end()).unwrap_or(0.0),
            buffered_frames: video.as_ref().map(|v| v.frame_count()).unwrap_or(0),
            frames_decoded: video.as_ref().map(|v| v.stats().frames_decoded).unwrap_or(0),
            queued_audio_frames: s.deps.scheduler.queued_frames(),
            audio_scheduled_until: s.playhead.lock().audio_until,
        }
    }

    /// Wait for background buffering started by `tick`
    pub async fn settle(&self) {
        let (video, audio) = {
            let mut tasks = self.tasks.lock();
            (tasks.video.take(), tasks.audio.take())
        };
        for task in [video, audio].into_iter().flatten() {
            if let Err(e) = task.await {
                warn!("Track {}: background task failed: {}", self.shared.slot, e);
            }
        }
    }

    /// Release every resource held for this track
    ///
    /// Terminal: afterwards operations fail with `Destroyed` and `tick`
    /// does nothing.
    pub async fn destroy(&self) {
        let s = &self.shared;
        if s.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        s.reposition();
        self.settle().await;

        if let Some(video) = s.media.get().and_then(|m| m.video.as_ref()) {
            video.destroy().await;
        }
        s.deps.scheduler.stop();
        if let Some(mut decoder) = s.audio.lock().await.decoder.take() {
            decoder.close();
        }
        s.demuxer.destroy();

        s.notifier.clear();
        s.notifier.set(PlaybackState::Idle);
        info!("Track {} destroyed", s.slot);
    }

    fn check_alive(&self) -> Result<()> {
        if self.shared.is_destroyed() {
            return Err(TrackSyncError::Destroyed);
        }
        Ok(())
    }
}

impl Shared {
    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    fn media(&self, operation: &'static str) -> Result<&Media> {
        self.media
            .get()
            .ok_or_else(|| invalid(operation, self.notifier.get()))
    }

    /// Invalidate in-flight audio results; returns the new generation
    fn reposition(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    async fn extend_audio(&self, from: f64, to: f64, align: bool, generation: u64) {
        let Some(media) = self.media.get() else {
            return;
        };
        match self.decode_audio(media, from, to, align).await {
            Ok(window) => {
                self.commit_audio(window, generation);
            }
            Err(TrackSyncError::Destroyed) => {}
            Err(e) => debug!("Track {}: audio buffering failed: {}", self.slot, e),
        }
    }

    /// Schedule a decoded window unless the track moved since it was requested
    fn commit_audio(&self, window: AudioWindow, generation: u64) {
        let mut playhead = self.playhead.lock();
        if self.generation.load(Ordering::SeqCst) != generation
            || self.deps.scheduler.state() != SchedulerState::Playing
        {
            trace!("Track {}: dropping stale audio window", self.slot);
            return;
        }
        for chunk in &window.chunks {
            self.deps.scheduler.schedule(chunk, chunk.timestamp);
        }
        playhead.audio_until = playhead.audio_until.max(window.end);
        playhead.align_audio = false;
    }

    /// Decode audio samples in `[from, to)`
    ///
    /// With `align` the window starts at the chunk covering `from`.
    async fn decode_audio(
        &self,
        media: &Media,
        from: f64,
        to: f64,
        align: bool,
    ) -> Result<AudioWindow> {
        let Some(track) = &media.audio else {
            return Ok(AudioWindow { chunks: Vec::new(), end: to });
        };
        if to <= from {
            return Ok(AudioWindow { chunks: Vec::new(), end: from });
        }

        let mut ctx = self.audio.lock().await;
        if self.is_destroyed() {
            return Err(TrackSyncError::Destroyed);
        }

        let mut start = from;
        if align {
            if let Some(sample) = self.demuxer.keyframe_before(track.track_id, from).await? {
                if sample.end() > from + TIME_EPSILON {
                    start = sample.timestamp.min(from);
                }
            }
        }

        let samples = self.demuxer.samples(track.track_id, start, to).await?;
        let mut end = samples.last().map(|s| s.end()).unwrap_or(to);
        let mut chunks = Vec::with_capacity(samples.len());

        for sample in samples {
            if self.is_destroyed() {
                return Err(TrackSyncError::Destroyed);
            }
            // Without a decoder the window stops here; the next tick resumes at this sample.
            let Some(decoder) = self.ensure_audio_decoder(&mut ctx, track) else {
                end = sample.timestamp;
                break;
            };

            let decoded = decoder.decode(&sample).await;
            let closed = matches!(decoded, Err(TrackSyncError::DecoderClosed)) || decoder.is_closed();
            match decoded {
                Ok(chunk) => chunks.push(chunk),
                Err(_) if closed => {
                    debug!(
                        "Track {}: audio decoder closed at {:.3}, recreating on next pass",
                        self.slot, sample.timestamp
                    );
                    ctx.decoder = None;
                    end = sample.timestamp;
                    break;
                }
                Err(e) => trace!(
                    "Track {}: skipping audio sample at {:.3}: {}",
                    self.slot,
                    sample.timestamp,
                    e
                ),
            }
        }

        Ok(AudioWindow { chunks, end })
    }

    fn ensure_audio_decoder<'a>(
        &self,
        ctx: &'a mut AudioDecodeContext,
        track: &AudioTrack,
    ) -> Option<&'a mut PooledDecoder<AudioData>> {
        if ctx.decoder.as_ref().is_some_and(|d| !d.is_closed()) {
            return ctx.decoder.as_mut();
        }
        ctx.decoder = None;

        let mut decoder = match self.deps.audio_pool.acquire() {
            Ok(decoder) => decoder,
            Err(e) => {
                warn!("Track {}: could not create audio decoder: {}", self.slot, e);
                return None;
            }
        };
        if let Err(e) = decoder.configure(&CodecConfig::Audio(track.codec.clone())) {
            warn!("Track {}: could not configure audio decoder: {}", self.slot, e);
            return None;
        }
        ctx.decoder = Some(decoder);
        ctx.decoder.as_mut()
    }
}
