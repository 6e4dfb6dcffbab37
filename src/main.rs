use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use crossbeam::channel;
use env_logger::Env;
use log::{debug, info};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracksync::audio::{AudioSink, SystemTimeSource, TimeSource};
use tracksync::decoder::synthetic::{
    DecoderFaults, SyntheticAudio, SyntheticAudioDecoderFactory, SyntheticClip, SyntheticDemuxer,
    SyntheticVideoDecoderFactory,
};
use tracksync::player::{PlaybackSession, PlaybackState, MAX_TRACKS};
use tracksync::utils::{format_timecode, load_config, SchedulerStrategy};
use tracksync::{Config, FrameCache};

/// tracksync-sim - plays a synthetic multi-track session and reports buffering
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (defaults to the system and user config files)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Number of tracks to play
    #[arg(short, long, default_value = "4", value_parser = clap::value_parser!(u8).range(1..=MAX_TRACKS as i64))]
    tracks: u8,

    /// Wall-clock seconds to run
    #[arg(short, long, default_value = "5")]
    seconds: f64,

    /// Audio scheduling strategy (overrides the config file)
    #[arg(long, value_enum)]
    strategy: Option<Strategy>,

    /// Loop region start in seconds
    #[arg(long, requires = "loop_end")]
    loop_start: Option<f64>,

    /// Loop region end in seconds
    #[arg(long, requires = "loop_start")]
    loop_end: Option<f64>,

    /// Print the final session status as JSON
    #[arg(long)]
    json: bool,

    /// Play track 0 on the default audio device
    #[cfg(feature = "cpal-output")]
    #[arg(long)]
    device: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Strategy {
    Ring,
    Discrete,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load_from(path).with_context(|| format!("loading {:?}", path))?,
        None => load_config().context("loading configuration")?,
    };

    let log_level = if args.debug { "debug" } else { config.general.log_level.as_str() };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_timestamp_millis()
        .init();

    info!("Starting tracksync-sim v{}", env!("CARGO_PKG_VERSION"));
    if let Some(strategy) = args.strategy {
        config.audio.strategy = match strategy {
            Strategy::Ring => SchedulerStrategy::RingBuffer,
            Strategy::Discrete => SchedulerStrategy::Discrete,
        };
    }
    debug!("Configuration: {:?}", config);

    let time_source: Arc<dyn TimeSource> = Arc::new(SystemTimeSource::new());
    let faults = DecoderFaults::new();
    let session = PlaybackSession::new(
        &config,
        FrameCache::global(),
        Arc::new(SyntheticVideoDecoderFactory::new(Arc::clone(&faults))),
        Arc::new(SyntheticAudioDecoderFactory::new(faults, 440.0)),
        Arc::clone(&time_source),
    )?;

    let mut sinks = Vec::new();
    for slot in 0..args.tracks as usize {
        let clip = SyntheticClip {
            duration: Some(3.0 + slot as f64),
            recorded: 3.0 + slot as f64,
            audio: Some(SyntheticAudio {
                sample_rate: if slot % 2 == 0 { 48000 } else { 44100 },
                ..SyntheticAudio::default()
            }),
            ..SyntheticClip::default()
        };
        let sink = session
            .add_track(slot, Arc::new(SyntheticDemuxer::new(clip)))
            .await
            .with_context(|| format!("loading track {}", slot))?;
        if let Some(sink) = sink {
            sinks.push(sink);
        }
    }

    for slot in 0..args.tracks as usize {
        if let Some(player) = session.track(slot) {
            player
                .on_state_change(|event| {
                    info!("Track {}: {} -> {}", event.track_slot, event.previous, event.current)
                })
                .detach();
        }
    }

    if let (Some(start), Some(end)) = (args.loop_start, args.loop_end) {
        session.set_loop(Some((start, end)))?;
        info!("Looping {}..{}", format_timecode(start), format_timecode(end));
    }

    #[cfg(feature = "cpal-output")]
    let _device = if args.device {
        open_device(&config, &mut sinks)?
    } else {
        None
    };

    let (shutdown_tx, shutdown_rx) = channel::bounded::<()>(1);
    let consumer = spawn_consumer(sinks, &config, Arc::clone(&time_source), shutdown_rx);

    session.play(0.0).await?;
    run(&session, &config, &args).await;

    let _ = shutdown_tx.send(());
    let rendered = consumer
        .join()
        .map_err(|_| anyhow::anyhow!("audio consumer thread panicked"))?;
    session.settle().await;

    let status = session.status();
    info!(
        "Rendered {} audible audio frames; cache {} hits / {} misses / {} evictions",
        rendered, status.cache.hits, status.cache.misses, status.cache.evictions
    );
    if args.json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    }

    session.destroy().await;
    FrameCache::shutdown_global();
    Ok(())
}

/// Tick the session at the configured rate until time runs out
async fn run(session: &PlaybackSession, config: &Config, args: &Args) {
    let period = Duration::from_secs_f64(1.0 / config.general.tick_rate_hz as f64);
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let deadline = tokio::time::Instant::now() + Duration::from_secs_f64(args.seconds.max(0.0));
    let mut last_report = tokio::time::Instant::now();

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::time::sleep_until(deadline) => break,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }

        let clock = session.current_time();
        session.tick(clock);

        if last_report.elapsed() >= Duration::from_secs(1) {
            last_report = tokio::time::Instant::now();
            report(session);
        }

        let status = session.status();
        if session.loop_region().is_none()
            && status.tracks.iter().all(|t| t.state == PlaybackState::Ended)
        {
            info!("All tracks ended at {}", format_timecode(status.current_time));
            break;
        }
    }
}

fn report(session: &PlaybackSession) {
    let status = session.status();
    info!(
        "{} / {} - cache {} frames",
        format_timecode(status.current_time),
        format_timecode(status.duration),
        status.cache.entry_count
    );
    for track in &status.tracks {
        info!(
            "  track {}: {} at {:.3}, video {:.3}..{:.3} ({} frames), audio scheduled to {:.3}, {} frames queued",
            track.slot,
            track.state,
            track.current_time,
            track.buffer_start,
            track.buffer_end,
            track.buffered_frames,
            track.audio_scheduled_until,
            track.queued_audio_frames
        );
    }
}

/// Drain every audio sink in 10 ms blocks on a dedicated thread
///
/// Stands in for an audio device; returns how many frames carried sound.
fn spawn_consumer(
    mut sinks: Vec<AudioSink>,
    config: &Config,
    time_source: Arc<dyn TimeSource>,
    shutdown: channel::Receiver<()>,
) -> thread::JoinHandle<u64> {
    let channels = config.audio.channels.max(1) as usize;
    let block_frames = (config.audio.sample_rate / 100).max(1) as usize;

    thread::spawn(move || {
        let ticker = channel::tick(Duration::from_millis(10));
        let mut block = vec![0.0f32; block_frames * channels];
        let mut audible = 0u64;

        loop {
            channel::select! {
                recv(shutdown) -> _ => break,
                recv(ticker) -> _ => {
                    let now = time_source.now();
                    for sink in &mut sinks {
                        audible += sink.render(&mut block, now) as u64;
                    }
                }
            }
        }
        audible
    })
}

#[cfg(feature = "cpal-output")]
fn open_device(config: &Config, sinks: &mut Vec<AudioSink>) -> Result<Option<tracksync::audio::CpalOutput>> {
    let position = sinks.iter().position(|s| matches!(s, AudioSink::Ring(_)));
    let Some(position) = position else {
        log::warn!("Device output needs the ring strategy; staying silent");
        return Ok(None);
    };
    match sinks.remove(position) {
        AudioSink::Ring(reader) => {
            let output = tracksync::audio::CpalOutput::open(&config.audio, reader)?;
            info!("Playing track 0 on '{}'", output.device_name());
            Ok(Some(output))
        }
        AudioSink::Discrete(_) => Ok(None),
    }
}
