//! Integration tests for the shared frame cache
//!
//! These tests verify the cache contract seen from outside the crate:
//! - Capacity bound and LRU eviction order
//! - Every frame put is released exactly once
//! - Owner isolation and borrow-only access

use tracksync::FrameCache;
use tracksync_integration_tests::FrameFactory;

#[test]
fn test_capacity_two_scenario() {
    let frames = FrameFactory::default();
    let cache = FrameCache::new(2);

    cache.put(0, 0.0, frames.frame(0.0));
    cache.put(0, 0.1, frames.frame(0.1));
    cache.put(0, 0.2, frames.frame(0.2));

    assert_eq!(cache.len(), 2);
    assert_eq!(frames.releases(), 1);
    assert!(cache.has(0, 0.1));
    assert!(cache.has(0, 0.2));
    assert!(!cache.has(0, 0.0));
}

#[test]
fn test_get_promotes_recency() {
    let frames = FrameFactory::default();
    let cache = FrameCache::new(2);
    cache.put(0, 1.0, frames.frame(1.0));
    cache.put(0, 2.0, frames.frame(2.0));

    let clone = cache.get(0, 1.0).expect("frame A is cached");
    assert_eq!(clone.timestamp(), 1.0);
    drop(clone);
    assert_eq!(frames.releases(), 1);

    cache.put(0, 3.0, frames.frame(3.0));

    assert!(cache.has(0, 1.0));
    assert!(!cache.has(0, 2.0));
    assert!(cache.has(0, 3.0));
    assert_eq!(frames.releases(), 2);
}

#[test]
fn test_every_put_is_released_once() {
    let frames = FrameFactory::default();
    let cache = FrameCache::new(5);
    let mut seed = 0x2545_f491_u64;
    let mut puts = 0;

    for _ in 0..500 {
        seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        let owner = (seed >> 60) % 3;
        let timestamp = ((seed >> 33) % 12) as f64 / 30.0;
        cache.put(owner, timestamp, frames.frame(timestamp));
        puts += 1;
        assert!(cache.len() <= 5);
    }

    let before_clear = frames.releases();
    assert_eq!(before_clear + cache.len(), puts);
    cache.clear();
    assert_eq!(frames.releases(), puts);
    assert!(cache.is_empty());
}

#[test]
fn test_owners_are_isolated() {
    let frames = FrameFactory::default();
    let cache = FrameCache::new(10);
    let a = cache.next_owner_id();
    let b = cache.next_owner_id();
    assert_ne!(a, b);

    for i in 0..3 {
        let t = i as f64 / 30.0;
        cache.put(a, t, frames.frame(t));
        cache.put(b, t, frames.frame(t));
    }

    assert_eq!(cache.remove_track(a), 3);
    assert_eq!(cache.len(), 3);
    assert!(cache.has(b, 0.0));
    assert!(!cache.has(a, 0.0));
    assert_eq!(frames.releases(), 3);
}

#[test]
fn test_peek_borrows_without_cloning() {
    let frames = FrameFactory::default();
    let cache = FrameCache::new(2);
    cache.put(0, 0.5, frames.frame(0.5));
    cache.put(0, 0.6, frames.frame(0.6));

    let timestamp = cache.peek(0, 0.5, |frame| frame.timestamp());
    assert_eq!(timestamp, Some(0.5));
    assert_eq!(frames.releases(), 0);

    // The peek counted as an access, so 0.6 is now least recent.
    cache.put(0, 0.7, frames.frame(0.7));
    assert!(cache.has(0, 0.5));
    assert!(!cache.has(0, 0.6));
}
