//! Multi-track playback session
//!
//! Up to [`MAX_TRACKS`] clips play side by side, sharing one frame cache
//! and one pool each of video and audio decoders. Every track has its own
//! audio scheduler; the caller drives the output side returned by
//! [`PlaybackSession::add_track`].

use crate::audio::{create_scheduler, AudioData, AudioSink, TimeSource};
use crate::decoder::{DecoderFactory, DecoderPool, Demuxer, PoolStats};
use crate::player::{PlaybackState, PlayerDeps, TrackPlayer, TrackPlayerOptions, TrackStatus};
use crate::utils::config::Config;
use crate::utils::error::{Result, TrackSyncError};
use crate::video::{CacheStats, FrameCache, VideoFrame};
use log::{debug, info};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Number of track slots in a session
pub const MAX_TRACKS: usize = 4;

/// Session snapshot for status reporting
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatus {
    pub current_time: f64,
    pub duration: f64,
    pub loop_region: Option<(f64, f64)>,
    pub tracks: Vec<TrackStatus>,
    pub cache: CacheStats,
    pub video_decoders: PoolStats,
    pub audio_decoders: PoolStats,
}

/// Tracks playing together against one render clock
pub struct PlaybackSession {
    config: Config,
    options: TrackPlayerOptions,
    cache: Arc<FrameCache>,
    video_pool: Arc<DecoderPool<VideoFrame>>,
    audio_pool: Arc<DecoderPool<AudioData>>,
    time_source: Arc<dyn TimeSource>,
    tracks: Mutex<Vec<Option<Arc<TrackPlayer>>>>,
    loop_region: Mutex<Option<(f64, f64)>>,

    /// Whether the user asked for playback; tracks that ended stay ended
    playing: AtomicBool,
    destroyed: AtomicBool,
}

impl PlaybackSession {
    pub fn new(
        config: &Config,
        cache: Arc<FrameCache>,
        video_factory: Arc<dyn DecoderFactory<VideoFrame>>,
        audio_factory: Arc<dyn DecoderFactory<AudioData>>,
        time_source: Arc<dyn TimeSource>,
    ) -> Result<Self> {
        config.validate()?;
        let max_pooled = config.decoder.max_pooled;

        Ok(Self {
            config: config.clone(),
            options: TrackPlayerOptions::from_config(config),
            cache,
            video_pool: Arc::new(DecoderPool::new(video_factory, max_pooled)),
            audio_pool: Arc::new(DecoderPool::new(audio_factory, max_pooled)),
            time_source,
            tracks: Mutex::new(vec![None; MAX_TRACKS]),
            loop_region: Mutex::new(None),
            playing: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
        })
    }

    /// Load the clip behind `demuxer` into `slot`
    ///
    /// A track already in the slot is destroyed first. Returns the output
    /// side of the track's audio scheduler.
    pub async fn add_track(&self, slot: usize, demuxer: Arc<dyn Demuxer>) -> Result<Option<AudioSink>> {
        self.check_alive()?;
        if slot >= MAX_TRACKS {
            return Err(TrackSyncError::InvalidTrack(slot as u32));
        }
        self.remove_track(slot).await?;

        let (scheduler, sink) = create_scheduler(&self.config.audio, Arc::clone(&self.time_source));
        let deps = PlayerDeps {
            cache: Arc::clone(&self.cache),
            video_pool: Arc::clone(&self.video_pool),
            audio_pool: Arc::clone(&self.audio_pool),
            scheduler,
        };
        let player = Arc::new(TrackPlayer::new(slot, demuxer, deps, self.options.clone()));

        if let Err(e) = player.load().await {
            player.destroy().await;
            return Err(e);
        }

        info!("Slot {} loaded ({:.3}s)", slot, player.duration());
        self.tracks.lock()[slot] = Some(player);
        Ok(sink)
    }

    /// Destroy the track in `slot`, releasing its cached frames
    ///
    /// Returns whether a track was there.
    pub async fn remove_track(&self, slot: usize) -> Result<bool> {
        if slot >= MAX_TRACKS {
            return Err(TrackSyncError::InvalidTrack(slot as u32));
        }
        let player = self.tracks.lock()[slot].take();
        match player {
            Some(player) => {
                player.destroy().await;
                debug!("Slot {} cleared", slot);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn track(&self, slot: usize) -> Option<Arc<TrackPlayer>> {
        self.tracks.lock().get(slot).cloned().flatten()
    }

    fn players(&self) -> Vec<Arc<TrackPlayer>> {
        self.tracks.lock().iter().flatten().cloned().collect()
    }

    /// Start every track at `time`
    ///
    /// All tracks are prepared first and then started back to back so
    /// their clocks anchor together.
    pub async fn play(&self, time: f64) -> Result<()> {
        self.check_alive()?;
        let players = self.players();
        if players.is_empty() {
            return Err(TrackSyncError::NoTracks("session has no tracks".to_string()));
        }

        let mut starting = Vec::new();
        for player in players {
            if player.state() == PlaybackState::Playing || time >= player.duration() {
                continue;
            }
            player.prepare_to_play(time).await?;
            starting.push(player);
        }
        for player in &starting {
            player.start_audio()?;
        }

        self.playing.store(true, Ordering::SeqCst);
        debug!("Session playing from {:.3} ({} tracks started)", time, starting.len());
        Ok(())
    }

    pub fn pause(&self) -> Result<()> {
        self.check_alive()?;
        for player in self.players() {
            if player.state() == PlaybackState::Playing {
                player.pause()?;
            }
        }
        self.playing.store(false, Ordering::SeqCst);
        Ok(())
    }

    pub fn stop(&self) -> Result<()> {
        self.check_alive()?;
        for player in self.players() {
            player.stop()?;
        }
        self.playing.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Seek every track to `time`
    ///
    /// While the session plays, tracks that had ended resume when `time`
    /// falls inside them.
    pub async fn seek(&self, time: f64) -> Result<()> {
        self.check_alive()?;
        let players = self.players();
        for player in &players {
            player.seek(time).await?;
        }

        if self.playing.load(Ordering::SeqCst) {
            let mut starting = Vec::new();
            for player in players {
                if player.state() == PlaybackState::Ready && time < player.duration() {
                    player.prepare_to_play(time).await?;
                    starting.push(player);
                }
            }
            for player in &starting {
                player.start_audio()?;
            }
        }
        Ok(())
    }

    /// Drive every track for render clock `clock`
    ///
    /// Reaching the end of the loop region restarts all tracks at its start.
    pub fn tick(&self, clock: f64) {
        if self.destroyed.load(Ordering::SeqCst) {
            return;
        }
        let players = self.players();

        if let Some((start, end)) = *self.loop_region.lock() {
            let end = end.min(self.duration());
            if self.playing.load(Ordering::SeqCst) && clock >= end {
                debug!("Loop end {:.3} reached, restarting at {:.3}", end, start);
                for player in &players {
                    if start < player.duration() {
                        player.reset_for_loop(start);
                    }
                }
                return;
            }
        }

        for player in &players {
            player.tick(clock, true);
        }
    }

    /// Loop playback over `[start, end)`, or stop looping with `None`
    pub fn set_loop(&self, region: Option<(f64, f64)>) -> Result<()> {
        if let Some((start, end)) = region {
            if !(start.is_finite() && end.is_finite()) || start < 0.0 || end <= start {
                return Err(TrackSyncError::InvalidInput(format!(
                    "invalid loop region {:.3}..{:.3}",
                    start, end
                )));
            }
        }
        *self.loop_region.lock() = region;
        Ok(())
    }

    pub fn loop_region(&self) -> Option<(f64, f64)> {
        *self.loop_region.lock()
    }

    /// Length of the longest track
    pub fn duration(&self) -> f64 {
        self.players()
            .iter()
            .map(|p| p.duration())
            .fold(0.0, f64::max)
    }

    /// Session time: the furthest track position
    pub fn current_time(&self) -> f64 {
        self.players()
            .iter()
            .map(|p| p.current_time())
            .fold(0.0, f64::max)
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    /// Wait for background buffering on every track
    pub async fn settle(&self) {
        for player in self.players() {
            player.settle().await;
        }
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            current_time: self.current_time(),
            duration: self.duration(),
            loop_region: self.loop_region(),
            tracks: self.players().iter().map(|p| p.status()).collect(),
            cache: self.cache.stats(),
            video_decoders: self.video_pool.stats(),
            audio_decoders: self.audio_pool.stats(),
        }
    }

    /// Tear down every track and the decoder pools
    pub async fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        let players: Vec<Arc<TrackPlayer>> = self.tracks.lock().iter_mut().filter_map(Option::take).collect();
        for player in players {
            player.destroy().await;
        }
        self.video_pool.clear();
        self.audio_pool.clear();
        self.playing.store(false, Ordering::SeqCst);
        info!("Session destroyed");
    }

    fn check_alive(&self) -> Result<()> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(TrackSyncError::Destroyed);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::ManualTimeSource;
    use crate::decoder::synthetic::{
        DecoderFaults, SyntheticAudioDecoderFactory, SyntheticClip, SyntheticDemuxer,
        SyntheticVideoDecoderFactory,
    };
    use crate::utils::config::SchedulerStrategy;

    fn session() -> (PlaybackSession, Arc<FrameCache>, Arc<ManualTimeSource>) {
        let mut config = Config::default();
        config.audio.strategy = SchedulerStrategy::Discrete;
        config.video.buffer_ahead = 1.0;
        config.audio.buffer_ahead = 0.25;

        let faults = DecoderFaults::new();
        let cache = Arc::new(FrameCache::new(2000));
        let time = ManualTimeSource::new();
        let session = PlaybackSession::new(
            &config,
            Arc::clone(&cache),
            Arc::new(SyntheticVideoDecoderFactory::new(Arc::clone(&faults))),
            Arc::new(SyntheticAudioDecoderFactory::new(faults, 220.0)),
            time.clone(),
        )
        .unwrap();
        (session, cache, time)
    }

    fn demuxer(duration: f64) -> Arc<dyn Demuxer> {
        Arc::new(SyntheticDemuxer::new(SyntheticClip {
            duration: Some(duration),
            recorded: duration,
            ..SyntheticClip::default()
        }))
    }

    #[tokio::test]
    async fn test_slot_out_of_range_is_rejected() {
        let (session, _, _) = session();
        let result = session.add_track(MAX_TRACKS, demuxer(1.0)).await;
        assert!(matches!(result, Err(TrackSyncError::InvalidTrack(4))));
        assert!(session.track(MAX_TRACKS).is_none());
    }

    #[tokio::test]
    async fn test_shorter_track_ends_first() {
        let (session, _, _) = session();
        assert!(session.add_track(0, demuxer(3.0)).await.unwrap().is_some());
        session.add_track(1, demuxer(5.0)).await.unwrap();
        assert_eq!(session.duration(), 5.0);

        session.play(0.0).await.unwrap();
        session.tick(3.0);

        assert_eq!(session.track(0).unwrap().state(), PlaybackState::Ended);
        assert_eq!(session.track(1).unwrap().state(), PlaybackState::Playing);
    }

    #[tokio::test]
    async fn test_tracks_anchor_together() {
        let (session, _, time) = session();
        session.add_track(0, demuxer(5.0)).await.unwrap();
        session.add_track(2, demuxer(5.0)).await.unwrap();
        time.set(3.0);

        session.play(1.0).await.unwrap();
        time.advance(0.5);

        let a = session.track(0).unwrap().current_time();
        let b = session.track(2).unwrap().current_time();
        assert!((a - 1.5).abs() < 1e-6);
        assert!((a - b).abs() < 1e-9);
        assert!((session.current_time() - 1.5).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_loop_region_restarts_every_track() {
        let (session, _, time) = session();
        session.add_track(0, demuxer(5.0)).await.unwrap();
        session.add_track(1, demuxer(1.5)).await.unwrap();
        session.set_loop(Some((1.0, 2.0))).unwrap();
        session.play(1.0).await.unwrap();

        time.advance(1.0);
        session.tick(session.current_time());
        assert!((session.track(0).unwrap().current_time() - 1.0).abs() < 1e-6);

        time.advance(0.6);
        session.tick(session.current_time());
        assert_eq!(session.track(1).unwrap().state(), PlaybackState::Ended);

        time.advance(0.5);
        session.tick(session.current_time());
        assert_eq!(session.track(1).unwrap().state(), PlaybackState::Playing);
        assert!((session.track(1).unwrap().current_time() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_invalid_loop_region() {
        let (session, _, _) = session();
        assert!(session.set_loop(Some((2.0, 1.0))).is_err());
        assert!(session.set_loop(Some((-1.0, 1.0))).is_err());
        session.set_loop(Some((0.0, 1.0))).unwrap();
        session.set_loop(None).unwrap();
        assert_eq!(session.loop_region(), None);
    }

    #[tokio::test]
    async fn test_remove_track_releases_only_its_frames() {
        let (session, cache, _) = session();
        session.add_track(0, demuxer(5.0)).await.unwrap();
        let after_first = cache.len();
        session.add_track(1, demuxer(5.0)).await.unwrap();
        assert_eq!(cache.len(), after_first * 2);

        assert!(session.remove_track(0).await.unwrap());
        assert!(!session.remove_track(0).await.unwrap());

        assert_eq!(cache.len(), after_first);
        assert!(session.track(0).is_none());
    }

    #[tokio::test]
    async fn test_seek_while_playing_resumes_ended_tracks() {
        let (session, _, _) = session();
        session.add_track(0, demuxer(2.0)).await.unwrap();
        session.add_track(1, demuxer(5.0)).await.unwrap();
        session.play(0.0).await.unwrap();
        session.tick(2.5);
        assert_eq!(session.track(0).unwrap().state(), PlaybackState::Ended);

        session.seek(1.0).await.unwrap();

        for slot in [0, 1] {
            let player = session.track(slot).unwrap();
            assert_eq!(player.state(), PlaybackState::Playing);
            assert!((player.current_time() - 1.0).abs() < 1e-6);
        }
    }

    #[tokio::test]
    async fn test_destroy_tears_everything_down() {
        let (session, cache, _) = session();
        session.add_track(0, demuxer(5.0)).await.unwrap();
        session.play(0.0).await.unwrap();

        session.destroy().await;

        assert!(cache.is_empty());
        assert!(session.track(0).is_none());
        assert_eq!(session.status().video_decoders.idle, 0);
        assert!(matches!(session.play(0.0).await, Err(TrackSyncError::Destroyed)));
    }
}
