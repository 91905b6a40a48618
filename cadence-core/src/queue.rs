//! Bounded thread-safe FIFO used for both packet and frame queues.
//!
//! Blocking waits are chopped into short condvar timeouts so a caller
//! can re-check a liveness predicate between intervals; a full queue must
//! never wedge shutdown when nothing is draining it.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// How long a blocked push/pop sleeps before re-checking liveness.
pub const WAIT_SLICE: Duration = Duration::from_millis(10);

/// Fixed-capacity FIFO, safe for any number of producers and consumers.
pub struct BoundedQueue<T> {
    items: Mutex<VecDeque<T>>,
    capacity: usize,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be non-zero");
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Snapshot of the current occupancy.
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.lock().len() >= self.capacity
    }

    /// Blocking push. Waits while the queue is full, re-checking
    /// `keep_waiting` every [`WAIT_SLICE`]. Returns `false` (dropping the
    /// item) once the predicate goes false.
    pub fn push_while(&self, item: T, keep_waiting: impl Fn() -> bool) -> bool {
        let mut items = self.items.lock();
        while items.len() >= self.capacity {
            if !keep_waiting() {
                return false;
            }
            self.not_full.wait_for(&mut items, WAIT_SLICE);
        }
        items.push_back(item);
        self.not_empty.notify_one();
        true
    }

    /// Blocking pop. Waits while empty; returns `None` once
    /// `keep_waiting` goes false.
    pub fn pop_while(&self, keep_waiting: impl Fn() -> bool) -> Option<T> {
        let mut items = self.items.lock();
        loop {
            if let Some(item) = items.pop_front() {
                self.not_full.notify_one();
                return Some(item);
            }
            if !keep_waiting() {
                return None;
            }
            self.not_empty.wait_for(&mut items, WAIT_SLICE);
        }
    }

    /// Non-blocking pop.
    pub fn try_pop(&self) -> Option<T> {
        let item = self.items.lock().pop_front();
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    /// Atomically discard everything and wake blocked pushers.
    pub fn clear(&self) {
        let mut items = self.items.lock();
        items.clear();
        self.not_full.notify_all();
    }
}

impl<T: Clone> BoundedQueue<T> {
    /// Blocking peek: waits while empty and returns a clone of the front
    /// item without removing it. Used by consumers that want to recycle
    /// the same frame while the pipeline is stalled.
    pub fn peek_while(&self, keep_waiting: impl Fn() -> bool) -> Option<T> {
        let mut items = self.items.lock();
        loop {
            if let Some(item) = items.front() {
                return Some(item.clone());
            }
            if !keep_waiting() {
                return None;
            }
            self.not_empty.wait_for(&mut items, WAIT_SLICE);
        }
    }
}
