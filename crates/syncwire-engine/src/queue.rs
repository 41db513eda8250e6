//! Bounded, closable FIFO connecting pipeline stages.
//!
//! Closing is a one-way, idempotent signal. Producers blocked in `push`
//! wake up and get their item back un-enqueued; consumers drain whatever
//! is already buffered before observing end-of-stream. This is what makes
//! cancellation win races against in-flight blocking operations: flipping
//! run state alone cannot wake a parked stage, closing its queues can.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

struct Inner<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Bounded FIFO with close semantics. All methods take `&self`; the queue
/// is shared across stages behind an `Arc`.
pub struct ClosableQueue<T> {
    inner: Mutex<Inner<T>>,
    not_full: Condvar,
    not_empty: Condvar,
    capacity: usize,
}

impl<T> ClosableQueue<T> {
    /// `capacity` must be positive.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be positive");
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            capacity,
        }
    }

    /// Enqueue `item`, blocking while the queue is full. If the queue is
    /// or becomes closed before the item fits, the item comes back in
    /// `Err` so the producer knows it was never delivered.
    pub fn push(&self, item: T) -> Result<(), T> {
        let mut inner = self.inner.lock();
        loop {
            if inner.closed {
                return Err(item);
            }
            if inner.items.len() < self.capacity {
                inner.items.push_back(item);
                self.not_empty.notify_one();
                return Ok(());
            }
            self.not_full.wait(&mut inner);
        }
    }

    /// Dequeue the next item, waiting up to `timeout`. `None` means either
    /// the timeout elapsed or the queue is closed and drained; check
    /// [`Self::is_done`] to tell them apart.
    pub fn poll(&self, timeout: Duration) -> Option<T> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(item) = inner.items.pop_front() {
                self.not_full.notify_one();
                return Some(item);
            }
            if inner.closed {
                return None;
            }
            if self.not_empty.wait_for(&mut inner, timeout).timed_out() {
                return inner.items.pop_front();
            }
        }
    }

    /// Close the queue. Idempotent; wakes every parked producer and
    /// consumer.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        if inner.closed {
            return;
        }
        inner.closed = true;
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Closed and fully drained: nothing more will ever come out.
    #[must_use]
    pub fn is_done(&self) -> bool {
        let inner = self.inner.lock();
        inner.closed && inner.items.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }
}
