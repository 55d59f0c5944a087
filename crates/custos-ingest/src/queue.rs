//! The bounded FIFO buffer between producers and the flush scheduler.
//!
//! `BoundedQueue` provides its own internal synchronization: producers use
//! timed or non-blocking offers, the flush path drains in FIFO order, and
//! waiting producers are woken whenever a drain or clear frees space.
//! Rejected offers hand the item back to the caller so the backpressure
//! policy can decide what happens to it next.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// A capacity-bounded, internally synchronized FIFO queue.
pub struct BoundedQueue<T> {
    capacity: usize,
    inner: Mutex<VecDeque<T>>,
    space_available: Condvar,
}

impl<T> BoundedQueue<T> {
    /// Create a queue holding at most `capacity` items.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            space_available: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Append `item`, waiting up to `timeout` for space.
    ///
    /// Returns the item back on timeout so the caller can retry, drop, or
    /// escalate without cloning.
    pub fn offer(&self, item: T, timeout: Duration) -> Result<(), T> {
        let deadline = Instant::now() + timeout;
        let mut queue = self.inner.lock();
        while queue.len() >= self.capacity {
            if self.space_available.wait_until(&mut queue, deadline).timed_out() {
                if queue.len() < self.capacity {
                    break;
                }
                return Err(item);
            }
        }
        queue.push_back(item);
        Ok(())
    }

    /// Append `item` only if space is available right now.
    pub fn try_offer(&self, item: T) -> Result<(), T> {
        let mut queue = self.inner.lock();
        if queue.len() >= self.capacity {
            return Err(item);
        }
        queue.push_back(item);
        Ok(())
    }

    /// Remove and return up to `max` items from the head, preserving FIFO
    /// order, and wake any producers blocked on space.
    pub fn drain(&self, max: usize) -> Vec<T> {
        let mut queue = self.inner.lock();
        let count = max.min(queue.len());
        let batch: Vec<T> = queue.drain(..count).collect();
        drop(queue);
        if count > 0 {
            self.space_available.notify_all();
        }
        batch
    }

    /// Discard everything, returning how many items were removed.
    pub fn clear(&self) -> usize {
        let mut queue = self.inner.lock();
        let removed = queue.len();
        queue.clear();
        drop(queue);
        if removed > 0 {
            self.space_available.notify_all();
        }
        removed
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
