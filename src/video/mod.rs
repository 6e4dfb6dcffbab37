//! Video module for tracksync
//!
//! This module keeps decoded video ahead of playback:
//! - Frame handles with explicit release
//! - The shared, size-bounded LRU frame cache
//! - Per-track lookahead buffers that decode into that cache

mod frame;
mod frame_buffer;
mod frame_cache;

pub use frame::{CpuFrame, FrameData, FrameResource, VideoFrame};
pub use frame_buffer::{FrameBuffer, FrameBufferOptions, FrameBufferState, FrameBufferStats};
pub use frame_cache::{CacheStats, FrameCache, FrameKey, DEFAULT_CACHE_CAPACITY};
