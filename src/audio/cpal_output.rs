//! Device output through cpal
//!
//! Opens the default output device and drains a [`RingReader`] from the
//! cpal data callback. The callback only touches the lock-free reader.

use super::ring_buffer::RingReader;
use crate::utils::config::AudioConfig;
use crate::utils::error::{IntoSyncError, Result, TrackSyncError};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use log::{error, info};

/// Running output stream
///
/// Dropping it stops playback.
pub struct CpalOutput {
    stream: cpal::Stream,
    device_name: String,
}

impl CpalOutput {
    /// Start rendering `reader` on the default output device
    pub fn open(config: &AudioConfig, mut reader: RingReader) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| TrackSyncError::Audio("No default output device found".to_string()))?;
        let device_name = device.name().unwrap_or_else(|_| "unknown".to_string());

        let stream_config = StreamConfig {
            channels: config.channels,
            sample_rate: SampleRate(config.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let stream = device
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    reader.render(data);
                },
                |err| {
                    error!("Audio stream error: {}", err);
                },
                None,
            )
            .audio_err("Failed to create audio stream")?;

        stream.play().audio_err("Failed to start audio stream")?;
        info!(
            "Audio output on '{}': {} Hz, {} channels",
            device_name, config.sample_rate, config.channels
        );

        Ok(Self { stream, device_name })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Suspend the device stream
    pub fn suspend(&self) -> Result<()> {
        self.stream.pause().audio_err("Failed to pause audio stream")
    }

    /// Resume a suspended device stream
    pub fn resume(&self) -> Result<()> {
        self.stream.play().audio_err("Failed to resume audio stream")
    }
}
