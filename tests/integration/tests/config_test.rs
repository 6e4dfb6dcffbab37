//! Integration tests for configuration files

use anyhow::Result;
use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracksync::audio::ManualTimeSource;
use tracksync::decoder::synthetic::{
    DecoderFaults, SyntheticAudioDecoderFactory, SyntheticDemuxer, SyntheticVideoDecoderFactory,
};
use tracksync::utils::SchedulerStrategy;
use tracksync::{AudioSink, Config, FrameCache, PlaybackSession, TrackSyncError};
use tracksync_integration_tests::{clip, SessionHarness};

#[tokio::test]
async fn test_partial_file_drives_session() -> Result<()> {
    let mut file = NamedTempFile::new()?;
    writeln!(
        file,
        r#"
[cache]
capacity = 50

[audio]
strategy = "discrete"
buffer_ahead = 0.25
"#
    )?;

    let config = Config::load_from(file.path())?;
    assert_eq!(config.cache.capacity, 50);
    assert_eq!(config.audio.strategy, SchedulerStrategy::Discrete);
    assert_eq!(config.video.buffer_ahead, 2.0);
    assert_eq!(config.audio.sample_rate, 48000);

    let mut h = SessionHarness::with_config(&config);
    let player = h.add(0, Arc::new(SyntheticDemuxer::new(clip(10.0)))).await?;

    assert_eq!(h.cache.capacity(), 50);
    assert!(matches!(h.sinks.as_slice(), [AudioSink::Discrete(_)]));
    assert_eq!(h.cache.len(), 50);
    assert!((player.status().buffer_end - 2.0).abs() < 1e-6);
    Ok(())
}

#[test]
fn test_saved_file_loads_back() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("nested").join("config.toml");

    let mut config = Config::default();
    config.video.buffer_ahead = 1.5;
    config.audio.channels = 1;
    config.general.log_level = "debug".to_string();
    config.save_to(&path)?;

    assert_eq!(Config::load_from(&path)?, config);
    Ok(())
}

#[test]
fn test_invalid_file_is_rejected() -> Result<()> {
    let mut file = NamedTempFile::new()?;
    writeln!(file, "[audio]\nchannels = 0")?;

    let err = Config::load_from(file.path()).unwrap_err();
    assert!(matches!(err, TrackSyncError::Config(_)));
    Ok(())
}

#[test]
fn test_session_rejects_empty_cache() {
    let mut config = Config::default();
    config.cache.capacity = 0;
    let faults = DecoderFaults::new();

    let result = PlaybackSession::new(
        &config,
        Arc::new(FrameCache::new(10)),
        Arc::new(SyntheticVideoDecoderFactory::new(Arc::clone(&faults))),
        Arc::new(SyntheticAudioDecoderFactory::new(faults, 440.0)),
        ManualTimeSource::new(),
    );
    assert!(matches!(result, Err(TrackSyncError::Config(_))));
}

#[test]
fn test_environment_overrides() -> Result<()> {
    let mut config = Config::default();
    config.apply_env_overrides_with(|key| match key {
        "TRACKSYNC_CACHE_CAPACITY" => Some("120".to_string()),
        "TRACKSYNC_AUDIO_BUFFER_AHEAD" => Some("0.5".to_string()),
        _ => None,
    })?;
    assert_eq!(config.cache.capacity, 120);
    assert_eq!(config.audio.buffer_ahead, 0.5);
    assert_eq!(config.video.buffer_ahead, 2.0);

    let err = config
        .apply_env_overrides_with(|key| (key == "TRACKSYNC_CACHE_CAPACITY").then(|| "many".to_string()))
        .unwrap_err();
    assert!(matches!(err, TrackSyncError::Config(_)));
    Ok(())
}
