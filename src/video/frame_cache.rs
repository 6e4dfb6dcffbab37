//! Shared frame cache with LRU eviction
//!
//! One cache is shared by every frame buffer in the process.
//! Key format: (owner id, presentation time in microseconds) -> VideoFrame
//!
//! The cache owns the frames it holds. `get` hands out an independent clone,
//! `peek` lends the original to a closure without cloning. Every frame that
//! leaves the cache (replacement, eviction, removal, clear) is closed exactly
//! once, so memory is bounded by `capacity x average frame size`.

use crate::utils::config::CacheConfig;
use crate::utils::seconds_to_micros;
use crate::video::VideoFrame;
use log::{debug, trace, warn};
use lru::LruCache;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde::Serialize;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Capacity of the lazily created process-wide cache
pub const DEFAULT_CACHE_CAPACITY: usize = 300;

static GLOBAL_CACHE: Lazy<Mutex<Option<Arc<FrameCache>>>> = Lazy::new(|| Mutex::new(None));

/// Cache key: which buffer owns the frame and when it is presented
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameKey {
    /// Owning frame buffer
    pub owner: u64,

    /// Presentation time quantised to microseconds
    pub pts_us: i64,
}

impl FrameKey {
    /// Build a key from a presentation time in seconds
    pub fn new(owner: u64, timestamp: f64) -> Self {
        Self {
            owner,
            pts_us: seconds_to_micros(timestamp),
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Number of cached frames
    pub entry_count: usize,
    /// Successful `get`/`peek` lookups
    pub hits: u64,
    /// Failed `get`/`peek` lookups, including failed clones
    pub misses: u64,
    /// Entries pushed out by capacity pressure
    pub evictions: u64,
    /// Frame resources released by the cache
    pub releases: u64,
}

/// Shared LRU frame cache
///
/// Thread-safe; share it as `Arc<FrameCache>`.
pub struct FrameCache {
    entries: Mutex<LruCache<FrameKey, VideoFrame>>,
    capacity: usize,
    next_owner: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    releases: AtomicU64,
}

impl FrameCache {
    /// Create a cache holding at most `capacity` frames
    pub fn new(capacity: usize) -> Self {
        let capacity = match NonZeroUsize::new(capacity) {
            Some(capacity) => capacity,
            None => {
                warn!("Frame cache capacity 0 requested, using 1");
                NonZeroUsize::MIN
            }
        };

        debug!("FrameCache created: capacity={}", capacity);

        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            capacity: capacity.get(),
            next_owner: AtomicU64::new(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            releases: AtomicU64::new(0),
        }
    }

    /// Create a cache from configuration
    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.capacity)
    }

    /// Process-wide default cache, created on first use
    pub fn global() -> Arc<FrameCache> {
        let mut global = GLOBAL_CACHE.lock();
        Arc::clone(global.get_or_insert_with(|| Arc::new(FrameCache::new(DEFAULT_CACHE_CAPACITY))))
    }

    /// Release every frame in the process-wide cache and forget it
    ///
    /// Handles already obtained from [`FrameCache::global`] stay valid but
    /// are detached; the next call to `global` creates a fresh cache.
    pub fn shutdown_global() {
        if let Some(cache) = GLOBAL_CACHE.lock().take() {
            cache.clear();
            debug!("Global frame cache torn down");
        }
    }

    /// Allocate a fresh owner id for a frame buffer
    pub fn next_owner_id(&self) -> u64 {
        self.next_owner.fetch_add(1, Ordering::Relaxed)
    }

    /// Get an owned clone of a cached frame
    ///
    /// Promotes the entry to most recently used. If cloning fails the entry
    /// is dropped from the cache and the lookup counts as a miss.
    pub fn get(&self, owner: u64, timestamp: f64) -> Option<VideoFrame> {
        let key = FrameKey::new(owner, timestamp);
        let mut entries = self.entries.lock();

        let cloned = match entries.get(&key) {
            Some(frame) => frame.try_clone(),
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                trace!("Cache miss: {}:{}", owner, key.pts_us);
                return None;
            }
        };

        match cloned {
            Ok(frame) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(frame)
            }
            Err(e) => {
                warn!("Dropping cached frame {}:{} after failed clone: {}", owner, key.pts_us, e);
                if let Some(mut frame) = entries.pop(&key) {
                    self.release(&mut frame);
                }
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Lend a cached frame to `f` without cloning
    ///
    /// Counts as an access for recency. `f` runs under the cache lock and
    /// must not call back into the cache.
    pub fn peek<R, F>(&self, owner: u64, timestamp: f64, f: F) -> Option<R>
    where
        F: FnOnce(&VideoFrame) -> R,
    {
        let key = FrameKey::new(owner, timestamp);
        let mut entries = self.entries.lock();
        match entries.get(&key) {
            Some(frame) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(f(frame))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Check if a frame is cached (without updating LRU order)
    pub fn has(&self, owner: u64, timestamp: f64) -> bool {
        self.entries.lock().contains(&FrameKey::new(owner, timestamp))
    }

    /// Insert a frame, taking ownership
    ///
    /// An existing entry under the same key is replaced and released; least
    /// recently used entries are evicted until the cache is within capacity.
    pub fn put(&self, owner: u64, timestamp: f64, frame: VideoFrame) {
        let key = FrameKey::new(owner, timestamp);
        let mut entries = self.entries.lock();

        if let Some((old_key, mut old)) = entries.push(key, frame) {
            if old_key != key {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                trace!("LRU evicted frame {}:{}", old_key.owner, old_key.pts_us);
            }
            self.release(&mut old);
        }
    }

    /// Remove and release one entry; returns whether it existed
    pub fn remove(&self, owner: u64, timestamp: f64) -> bool {
        let key = FrameKey::new(owner, timestamp);
        match self.entries.lock().pop(&key) {
            Some(mut frame) => {
                self.release(&mut frame);
                true
            }
            None => false,
        }
    }

    /// Remove and release every entry belonging to `owner`
    pub fn remove_track(&self, owner: u64) -> usize {
        let mut entries = self.entries.lock();

        let to_remove: Vec<FrameKey> = entries
            .iter()
            .filter(|(key, _)| key.owner == owner)
            .map(|(key, _)| *key)
            .collect();

        for key in &to_remove {
            if let Some(mut frame) = entries.pop(key) {
                self.release(&mut frame);
            }
        }

        debug!("Removed {} cached frames for owner {}", to_remove.len(), owner);
        to_remove.len()
    }

    /// Release every entry
    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        let mut count = 0usize;
        while let Some((_, mut frame)) = entries.pop_lru() {
            self.release(&mut frame);
            count += 1;
        }
        debug!("Cleared frame cache ({} frames)", count);
    }

    /// Number of cached frames
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of frames
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entry_count: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
        }
    }

    fn release(&self, frame: &mut VideoFrame) {
        if !frame.is_closed() {
            frame.close();
            self.releases.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl Drop for FrameCache {
    fn drop(&mut self) {
        self.clear();
    }
}
