//! Blocking bounded FIFO used for stage edges and the prefetch buffer.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

struct Inner<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Thread-safe FIFO with capacity-based back-pressure.
///
/// `push` blocks while the queue is full; `pop` blocks while it is empty.
/// Stream end is modeled as the closed state: after [`BoundedQueue::close`],
/// `pop` drains the remaining items and then returns `None`, and `push`
/// returns the rejected item. There are no sentinel values.
pub struct BoundedQueue<T> {
    inner: Mutex<Inner<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

impl<T> BoundedQueue<T> {
    /// Creates a queue with the given capacity (clamped to at least 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner { items: VecDeque::new(), closed: false }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity: capacity.max(1),
        }
    }

    /// Pushes an item, blocking while the queue is full.
    ///
    /// Returns the item back if the queue is (or becomes) closed.
    pub fn push(&self, item: T) -> Result<(), T> {
        let mut inner = self.inner.lock();
        while inner.items.len() >= self.capacity && !inner.closed {
            self.not_full.wait(&mut inner);
        }
        if inner.closed {
            return Err(item);
        }
        inner.items.push_back(item);
        drop(inner);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Pops the oldest item, blocking while the queue is empty.
    ///
    /// Returns `None` once the queue is closed and drained.
    pub fn pop(&self) -> Option<T> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(item) = inner.items.pop_front() {
                drop(inner);
                self.not_full.notify_one();
                return Some(item);
            }
            if inner.closed {
                return None;
            }
            self.not_empty.wait(&mut inner);
        }
    }

    /// Pops without blocking; `None` when empty (closed or not).
    pub fn try_pop(&self) -> Option<T> {
        let mut inner = self.inner.lock();
        let item = inner.items.pop_front();
        if item.is_some() {
            drop(inner);
            self.not_full.notify_one();
        }
        item
    }

    /// Number of queued items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    /// True when no items are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }

    /// Maximum number of queued items.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Marks the stream as ended, waking every blocked producer and consumer.
    ///
    /// Items already queued remain poppable.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        drop(inner);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// True once [`BoundedQueue::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Removes and drops all queued items.
    pub fn drain(&self) {
        let mut inner = self.inner.lock();
        inner.items.clear();
        drop(inner);
        self.not_full.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_fifo_order() {
        let queue = BoundedQueue::new(8);
        for i in 0..5 {
            queue.push(i).unwrap();
        }
        for i in 0..5 {
            assert_eq!(queue.pop(), Some(i));
        }
    }

    #[test]
    fn test_pop_on_closed_empty_returns_none() {
        let queue: BoundedQueue<u32> = BoundedQueue::new(4);
        queue.close();
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_close_drains_remaining_items() {
        let queue = BoundedQueue::new(4);
        queue.push(1).unwrap();
        queue.push(2).unwrap();
        queue.close();
        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.pop(), Some(2));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_push_after_close_rejected() {
        let queue = BoundedQueue::new(4);
        queue.close();
        assert_eq!(queue.push(7), Err(7));
    }

    #[test]
    fn test_backpressure_blocks_producer() {
        let queue = Arc::new(BoundedQueue::new(2));
        queue.push(0).unwrap();
        queue.push(1).unwrap();

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.push(2))
        };

        // The producer should be blocked on the full queue.
        thread::sleep(Duration::from_millis(50));
        assert_eq!(queue.len(), 2);
        assert!(!producer.is_finished());

        assert_eq!(queue.pop(), Some(0));
        producer.join().unwrap().unwrap();
        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.pop(), Some(2));
    }

    #[test]
    fn test_capacity_never_exceeded() {
        let queue = Arc::new(BoundedQueue::new(4));
        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for i in 0..100 {
                    if queue.push(i).is_err() {
                        break;
                    }
                }
                queue.close();
            })
        };

        let mut seen = 0;
        loop {
            assert!(queue.len() <= 4);
            match queue.pop() {
                Some(_) => seen += 1,
                None => break,
            }
        }
        assert_eq!(seen, 100);
        producer.join().unwrap();
    }

    #[test]
    fn test_close_unblocks_consumer() {
        let queue: Arc<BoundedQueue<u32>> = Arc::new(BoundedQueue::new(4));
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.pop())
        };
        thread::sleep(Duration::from_millis(50));
        queue.close();
        assert_eq!(consumer.join().unwrap(), None);
    }

    #[test]
    fn test_try_pop() {
        let queue = BoundedQueue::new(4);
        assert_eq!(queue.try_pop(), None);
        queue.push(9).unwrap();
        assert_eq!(queue.try_pop(), Some(9));
    }
}
