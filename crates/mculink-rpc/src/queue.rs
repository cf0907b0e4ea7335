use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, PoisonError};

use crate::error::{LinkError, Result};
use crate::sync::lock;

/// Capacity-bounded FIFO shared by many producers and one consumer.
///
/// `put` blocks while the queue is full. Once [`RequestQueue::disable`] has
/// been called the queue is terminal: `put` fails with
/// [`LinkError::LinkClosed`] and the consumer sees no more items.
pub struct RequestQueue<T> {
    inner: Mutex<QueueState<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

struct QueueState<T> {
    items: VecDeque<T>,
    enabled: bool,
}

impl<T> RequestQueue<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity),
                enabled: true,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    /// Append an item, blocking while the queue is full.
    pub fn put(&self, item: T) -> Result<()> {
        let state = lock(&self.inner);
        let mut state = self
            .not_full
            .wait_while(state, |s| s.enabled && s.items.len() >= self.capacity)
            .unwrap_or_else(PoisonError::into_inner);
        if !state.enabled {
            return Err(LinkError::LinkClosed);
        }
        state.items.push_back(item);
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Remove the oldest item, blocking while the queue is empty.
    ///
    /// Returns `None` once the queue is disabled, or as soon as
    /// `keep_running` returns false after a wake-up.
    pub fn take_while(&self, keep_running: impl Fn() -> bool) -> Option<T> {
        let state = lock(&self.inner);
        let mut state = self
            .not_empty
            .wait_while(state, |s| s.enabled && s.items.is_empty() && keep_running())
            .unwrap_or_else(PoisonError::into_inner);
        if !state.enabled || !keep_running() {
            return None;
        }
        let item = state.items.pop_front();
        drop(state);
        self.not_full.notify_one();
        item
    }

    /// Wake a blocked consumer so it re-checks its shutdown condition.
    pub fn wake_consumers(&self) {
        let _guard = lock(&self.inner);
        self.not_empty.notify_all();
    }

    /// Disable the queue and return the items that were never taken.
    ///
    /// Blocked producers fail with `LinkClosed`; blocked consumers return `None`.
    pub fn disable(&self) -> Vec<T> {
        let mut state = lock(&self.inner);
        state.enabled = false;
        let drained = state.items.drain(..).collect();
        drop(state);
        self.not_empty.notify_all();
        self.not_full.notify_all();
        drained
    }

    pub fn is_enabled(&self) -> bool {
        lock(&self.inner).enabled
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
