//! Integration tests for video buffering
//!
//! These tests verify buffering behavior under pressure:
//! - Decoder loss and failed recreation
//! - Eviction by other tracks sharing the cache
//! - Clips reporting no duration
//! - Seeks queueing behind each other
//! - Track removal

use anyhow::Result;
use std::sync::Arc;
use tracksync::decoder::synthetic::{SyntheticClip, SyntheticDemuxer, VIDEO_TRACK_ID};
use tracksync::utils::SchedulerStrategy;
use tracksync::{PlaybackState, TrackSyncError};
use tracksync_integration_tests::{clip, RecordingDemuxer, SessionHarness};

fn video_clip(duration: f64) -> Arc<SyntheticDemuxer> {
    Arc::new(SyntheticDemuxer::new(SyntheticClip::video_only(duration, 30.0, 30)))
}

#[tokio::test]
async fn test_recovers_from_decoder_loss() -> Result<()> {
    let mut h = SessionHarness::new(SchedulerStrategy::RingBuffer, 300);
    let player = h.add(0, video_clip(10.0)).await?;
    h.session.play(0.0).await?;

    let created = h.faults.created();
    h.faults.close_after(h.faults.decode_calls() + 5);

    h.time.set(0.6);
    h.session.tick(0.6);
    h.session.settle().await;

    // Frames after the loss wait for the next keyframe.
    assert!(h.faults.created() > created);
    let shown = player.get_frame_timestamp(1.5).expect("frame before the loss");
    assert!((shown - 1.1).abs() < 1e-6);

    h.time.set(1.6);
    h.session.tick(1.6);
    h.session.settle().await;
    assert!(player.get_frame_at(2.5).is_some());
    assert_eq!(player.state(), PlaybackState::Playing);
    Ok(())
}

#[tokio::test]
async fn test_failed_recreation_retries_on_next_tick() -> Result<()> {
    let mut h = SessionHarness::new(SchedulerStrategy::RingBuffer, 300);
    let player = h.add(0, video_clip(10.0)).await?;
    h.session.play(0.0).await?;

    h.faults.set_fail_create(true);
    h.faults.close_after(h.faults.decode_calls() + 1);

    h.time.set(0.6);
    h.session.tick(0.6);
    h.session.settle().await;

    let status = player.status();
    assert!((status.buffer_end - 1.0).abs() < 1e-6);
    assert_eq!(player.state(), PlaybackState::Playing);

    h.faults.set_fail_create(false);
    h.session.tick(0.6);
    h.session.settle().await;
    assert!(player.status().buffer_end > 1.5);
    Ok(())
}

#[tokio::test]
async fn test_other_tracks_evict_shared_frames() -> Result<()> {
    let mut h = SessionHarness::new(SchedulerStrategy::RingBuffer, 40);
    let first = h.add(0, video_clip(10.0)).await?;
    let second = h.add(1, video_clip(10.0)).await?;

    assert_eq!(h.cache.len(), 40);
    let buffer = first.frame_buffer().expect("video track");
    assert!(!buffer.is_buffered_at(0.5));
    assert!(first.get_frame_at(0.1).is_none());
    assert!(second.get_frame_at(0.1).is_some());

    first.seek(0.0).await?;
    assert_eq!(first.state(), PlaybackState::Ready);
    assert!(first.get_frame_at(0.1).is_some());
    assert!(h.cache.stats().evictions >= 40);
    Ok(())
}

#[tokio::test]
async fn test_clip_without_duration_uses_fallback() -> Result<()> {
    let mut h = SessionHarness::new(SchedulerStrategy::RingBuffer, 300);
    let live = SyntheticClip {
        duration: None,
        recorded: 2.0,
        ..SyntheticClip::default()
    };
    let player = h.add(0, Arc::new(SyntheticDemuxer::new(live))).await?;
    assert_eq!(player.duration(), 3600.0);

    h.session.play(0.0).await?;
    h.time.set(2.5);
    h.session.tick(2.5);
    h.session.settle().await;
    assert_eq!(player.state(), PlaybackState::Playing);
    Ok(())
}

#[tokio::test]
async fn test_queued_seeks_apply_in_order() -> Result<()> {
    let mut h = SessionHarness::new(SchedulerStrategy::RingBuffer, 300);
    let demuxer = RecordingDemuxer::new(clip(10.0));
    let player = h.add(0, demuxer.clone()).await?;
    let before = demuxer.requests().len();

    let (a, b) = tokio::join!(player.seek(2.0), player.seek(6.0));
    a?;
    b?;

    assert_eq!(player.state(), PlaybackState::Ready);
    assert_eq!(player.current_time(), 6.0);
    let starts: Vec<f64> = demuxer.requests()[before..]
        .iter()
        .filter(|(track, _, _)| *track == VIDEO_TRACK_ID)
        .map(|(_, start, _)| *start)
        .collect();
    assert_eq!(starts, vec![2.0, 6.0]);
    assert!(player.get_frame_at(6.5).is_some());
    Ok(())
}

#[tokio::test]
async fn test_removed_track_releases_everything() -> Result<()> {
    let mut h = SessionHarness::new(SchedulerStrategy::Discrete, 300);
    let demuxer = RecordingDemuxer::new(clip(10.0));
    let player = h.add(0, demuxer.clone()).await?;
    assert!(!h.cache.is_empty());

    assert!(h.session.remove_track(0).await?);
    assert!(demuxer.is_destroyed());
    assert!(h.cache.is_empty());
    assert!(h.session.track(0).is_none());

    let err = player.play(0.0).await.unwrap_err();
    assert!(matches!(err, TrackSyncError::Destroyed));
    assert_eq!(player.state(), PlaybackState::Idle);
    Ok(())
}
