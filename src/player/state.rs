//! Playback state tracking and change notification
//!
//! Each track player owns a [`StateNotifier`]. Setting the state to the
//! value it already has is silent, so subscribers never see a duplicate
//! transition. Callbacks run outside the subscriber lock and may
//! subscribe or unsubscribe from inside a callback.

use crate::player::PlaybackState;
use log::trace;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::{Arc, Weak};

/// State change event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StateChangeEvent {
    /// Slot of the track that changed
    pub track_slot: usize,

    /// State before the transition
    pub previous: PlaybackState,

    /// State after the transition
    pub current: PlaybackState,
}

type Callback = Arc<dyn Fn(&StateChangeEvent) + Send + Sync>;

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    callbacks: Vec<(u64, Callback)>,
}

/// Current playback state plus its subscribers
pub struct StateNotifier {
    track_slot: usize,
    state: Mutex<PlaybackState>,
    subscribers: Arc<Mutex<Subscribers>>,
}

impl StateNotifier {
    pub fn new(track_slot: usize) -> Self {
        Self {
            track_slot,
            state: Mutex::new(PlaybackState::Idle),
            subscribers: Arc::new(Mutex::new(Subscribers::default())),
        }
    }

    pub fn get(&self) -> PlaybackState {
        *self.state.lock()
    }

    /// Move to `next`; returns whether the state changed
    pub fn set(&self, next: PlaybackState) -> bool {
        let previous = {
            let mut state = self.state.lock();
            if *state == next {
                return false;
            }
            std::mem::replace(&mut *state, next)
        };
        self.notify(previous, next);
        true
    }

    /// Move to `next` only when the current state is one of `from`
    ///
    /// Returns the state found, as `Err` when it was not allowed.
    pub fn transition(
        &self,
        from: &[PlaybackState],
        next: PlaybackState,
    ) -> std::result::Result<PlaybackState, PlaybackState> {
        let previous = {
            let mut state = self.state.lock();
            if !from.contains(&*state) {
                return Err(*state);
            }
            std::mem::replace(&mut *state, next)
        };
        if previous != next {
            self.notify(previous, next);
        }
        Ok(previous)
    }

    fn notify(&self, previous: PlaybackState, next: PlaybackState) {
        trace!("Track {}: {:?} -> {:?}", self.track_slot, previous, next);
        let event = StateChangeEvent {
            track_slot: self.track_slot,
            previous,
            current: next,
        };

        let callbacks: Vec<Callback> = self
            .subscribers
            .lock()
            .callbacks
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for callback in callbacks {
            callback(&event);
        }
    }

    /// Register `callback` for every future transition
    pub fn subscribe<F>(&self, callback: F) -> StateSubscription
    where
        F: Fn(&StateChangeEvent) + Send + Sync + 'static,
    {
        let mut subscribers = self.subscribers.lock();
        let id = subscribers.next_id;
        subscribers.next_id += 1;
        subscribers.callbacks.push((id, Arc::new(callback)));

        StateSubscription {
            id,
            subscribers: Arc::downgrade(&self.subscribers),
        }
    }

    /// Drop every subscriber
    pub fn clear(&self) {
        self.subscribers.lock().callbacks.clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().callbacks.len()
    }
}

/// Handle to a state change callback
///
/// Dropping the handle unsubscribes.
#[must_use = "dropping the subscription unsubscribes immediately"]
pub struct StateSubscription {
    id: u64,
    subscribers: Weak<Mutex<Subscribers>>,
}

impl StateSubscription {
    /// Remove the callback now
    pub fn unsubscribe(self) {
        drop(self);
    }

    /// Keep the callback registered for the notifier's whole lifetime
    pub fn detach(self) {
        std::mem::forget(self);
    }
}

impl Drop for StateSubscription {
    fn drop(&mut self) {
        if let Some(subscribers) = self.subscribers.upgrade() {
            subscribers.lock().callbacks.retain(|(id, _)| *id != self.id);
        }
    }
}
