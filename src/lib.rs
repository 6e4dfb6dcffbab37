//! tracksync - multi-track audio/video playback core
//!
//! Decoded video lives in one process-wide LRU [`FrameCache`] shared by every
//! track. Each track keeps a [`FrameBuffer`] decoding ahead of the playhead,
//! and an [`AudioScheduler`] whose clock is the track's authoritative media
//! time. A [`TrackPlayer`] ties the two together behind a tick-driven state
//! machine; a [`PlaybackSession`] runs up to four of them side by side.
//!
//! Container parsing and codecs stay outside: they plug in through the
//! [`Demuxer`], [`Decoder`] and [`DecoderFactory`] traits.

pub mod audio;
pub mod decoder;
pub mod player;
pub mod utils;
pub mod video;

pub use audio::{create_scheduler, AudioData, AudioScheduler, AudioSink, SchedulerState, TimeSource};
pub use decoder::{Decoder, DecoderFactory, DecoderPool, Demuxer, EncodedSample};
pub use player::{PlaybackSession, PlaybackState, StateSubscription, TrackPlayer};
pub use utils::config::Config;
pub use utils::error::{Result, TrackSyncError};
pub use video::{FrameBuffer, FrameCache, VideoFrame};
