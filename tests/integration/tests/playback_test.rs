//! Integration tests for session playback
//!
//! These tests drive a session on a manual clock the way a render loop
//! would: advance time, tick, wait for background buffering.

use anyhow::Result;
use std::sync::Arc;
use tracksync::decoder::synthetic::SyntheticDemuxer;
use tracksync::utils::SchedulerStrategy;
use tracksync::PlaybackState;
use tracksync_integration_tests::{clip, record_states, tone, SessionHarness};

const STEP: f64 = 1.0 / 60.0;

#[tokio::test]
async fn test_track_ends_once() -> Result<()> {
    let mut h = SessionHarness::new(SchedulerStrategy::RingBuffer, 300);
    let player = h.add(0, Arc::new(SyntheticDemuxer::new(clip(5.0)))).await?;
    let (_subscription, seen) = record_states(&player);

    h.session.play(0.0).await?;
    h.time.set(5.0);
    h.session.tick(5.0);
    assert_eq!(player.state(), PlaybackState::Ended);

    h.time.set(5.1);
    h.session.tick(5.1);
    h.session.settle().await;

    assert_eq!(
        *seen.lock(),
        vec![
            PlaybackState::Loading,
            PlaybackState::Ready,
            PlaybackState::Playing,
            PlaybackState::Ended
        ]
    );
    Ok(())
}

#[tokio::test]
async fn test_play_while_playing_changes_nothing() -> Result<()> {
    let mut h = SessionHarness::new(SchedulerStrategy::RingBuffer, 300);
    let player = h.add(0, Arc::new(SyntheticDemuxer::new(clip(10.0)))).await?;
    let (_subscription, seen) = record_states(&player);

    h.session.play(0.0).await?;
    h.time.set(0.75);
    let before = player.current_time();

    h.session.play(0.0).await?;

    assert!((before - 0.75).abs() < 1e-9);
    assert_eq!(player.current_time(), before);
    let playing = seen.lock().iter().filter(|s| **s == PlaybackState::Playing).count();
    assert_eq!(playing, 1);
    Ok(())
}

#[tokio::test]
async fn test_seek_discards_stale_ring_audio() -> Result<()> {
    let mut h = SessionHarness::new(SchedulerStrategy::RingBuffer, 300);
    h.add(0, Arc::new(SyntheticDemuxer::new(clip(10.0)))).await?;

    h.session.play(0.0).await?;
    let block = h.render(480);
    assert!(block.iter().any(|s| *s != 0.0));

    h.time.set(0.5);
    h.session.seek(4.0).await?;

    // The reader acknowledges the flush before anything new is written.
    let flushed = h.render(480);
    assert!(flushed.iter().all(|s| *s == 0.0));

    h.session.tick(h.session.current_time());
    let block = h.render(480);
    assert!((block[0] - tone(330.0, 48000, 4.0)).abs() < 1e-3);
    assert!((block[2] - tone(330.0, 48000, 4.0 + 1.0 / 48000.0)).abs() < 1e-3);
    Ok(())
}

#[tokio::test]
async fn test_seek_discards_stale_discrete_audio() -> Result<()> {
    let mut h = SessionHarness::new(SchedulerStrategy::Discrete, 300);
    h.add(0, Arc::new(SyntheticDemuxer::new(clip(10.0)))).await?;

    h.session.play(0.0).await?;
    let block = h.render(480);
    assert!(block.iter().any(|s| *s != 0.0));

    h.time.set(0.5);
    h.session.seek(3.0).await?;

    let block = h.render(480);
    assert!((block[0] - tone(330.0, 48000, 3.0)).abs() < 1e-3);
    assert!((block[200] - tone(330.0, 48000, 3.0 + 100.0 / 48000.0)).abs() < 1e-3);
    Ok(())
}

#[tokio::test]
async fn test_pause_freezes_time_until_resumed() -> Result<()> {
    let mut h = SessionHarness::new(SchedulerStrategy::Discrete, 300);
    let player = h.add(0, Arc::new(SyntheticDemuxer::new(clip(10.0)))).await?;

    h.session.play(0.0).await?;
    h.time.set(1.0);
    h.session.tick(1.0);
    h.session.settle().await;

    h.session.pause()?;
    assert_eq!(player.state(), PlaybackState::Paused);
    h.time.set(3.0);
    assert!((h.session.current_time() - 1.0).abs() < 1e-9);

    h.session.play(h.session.current_time()).await?;
    assert_eq!(player.state(), PlaybackState::Playing);
    h.time.set(3.5);
    assert!((h.session.current_time() - 1.5).abs() < 1e-9);
    Ok(())
}

#[tokio::test]
async fn test_loop_region_keeps_time_in_bounds() -> Result<()> {
    let mut h = SessionHarness::new(SchedulerStrategy::RingBuffer, 300);
    let first = h.add(0, Arc::new(SyntheticDemuxer::new(clip(4.0)))).await?;
    let second = h.add(1, Arc::new(SyntheticDemuxer::new(clip(4.0)))).await?;
    h.session.set_loop(Some((1.0, 2.0)))?;
    h.session.play(0.0).await?;

    let mut previous = 0.0;
    let mut restarts = 0;
    for _ in 0..(3.5 / STEP) as usize {
        h.time.advance(STEP);
        let clock = h.session.current_time();
        assert!(clock <= 2.0 + STEP + 1e-6, "time {:.3} ran past the loop end", clock);
        if clock < previous {
            restarts += 1;
        }
        if restarts > 0 {
            assert!(clock >= 1.0 - 1e-6, "time {:.3} left the loop region", clock);
        }
        previous = clock;

        h.session.tick(clock);
        h.session.settle().await;
    }

    assert!(restarts >= 2);
    assert_eq!(first.state(), PlaybackState::Playing);
    assert_eq!(second.state(), PlaybackState::Playing);

    // The next ticks rebuild video at the restarted playhead.
    for _ in 0..2 {
        h.session.tick(h.session.current_time());
        h.session.settle().await;
    }
    let now = h.session.current_time();
    assert!(first.get_frame_at(now).is_some());
    assert!(second.get_frame_at(now).is_some());
    Ok(())
}

#[tokio::test]
async fn test_dropped_subscription_stops_events() -> Result<()> {
    let mut h = SessionHarness::new(SchedulerStrategy::RingBuffer, 300);
    let player = h.add(0, Arc::new(SyntheticDemuxer::new(clip(10.0)))).await?;
    let (subscription, seen) = record_states(&player);

    h.session.play(0.0).await?;
    drop(subscription);
    h.session.pause()?;

    assert_eq!(player.state(), PlaybackState::Paused);
    assert_eq!(seen.lock().last(), Some(&PlaybackState::Playing));
    assert!(!seen.lock().contains(&PlaybackState::Paused));
    Ok(())
}
