//! Transmit queue shared between the host-side producer and the cyclic
//! consumer.
//!
//! The producer (network glue) enqueues from an ordinary thread; the
//! handler dequeues inside the real-time cycle. Every critical section is
//! O(1) and the handler never holds the lock across a transport call.
//! Frames are `Bytes`, so ownership moves through the queue without
//! copying.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use bytes::Bytes;

use crate::error::{Error, Result};

#[derive(Debug)]
struct Inner {
    frames: VecDeque<Bytes>,
    /// Producer-pause flag. Cleared when the queue drains to half capacity
    /// or when an enqueue lands in an empty queue.
    active: bool,
}

/// Bounded FIFO of outbound Ethernet frames.
#[derive(Debug)]
pub struct TransmitQueue {
    inner: Mutex<Inner>,
    capacity: usize,
}

impl TransmitQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                frames: VecDeque::with_capacity(capacity),
                active: true,
            }),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // the queue holds plain data, a poisoned lock is still consistent
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append a frame at the tail.
    ///
    /// On overflow the frame is dropped (drop-newest policy, the safer
    /// default for a real-time consumer) and the producer-pause flag is
    /// set.
    pub fn enqueue(&self, frame: Bytes) -> Result<()> {
        let mut inner = self.lock();
        if inner.frames.len() >= self.capacity {
            inner.active = false;
            return Err(Error::QueueOverflow);
        }
        let was_empty = inner.frames.is_empty();
        inner.frames.push_back(frame);
        if was_empty {
            inner.active = true;
        }
        Ok(())
    }

    /// Pop the head frame. Never blocks; the handler calls this only when
    /// no frame is in flight.
    pub fn dequeue(&self) -> Option<Bytes> {
        let mut inner = self.lock();
        let frame = inner.frames.pop_front();
        if !inner.active && inner.frames.len() <= self.capacity / 2 {
            inner.active = true;
        }
        frame
    }

    /// Discard all queued frames; returns how many were dropped.
    pub fn flush(&self) -> usize {
        let mut inner = self.lock();
        let dropped = inner.frames.len();
        inner.frames.clear();
        inner.active = true;
        dropped
    }

    pub fn len(&self) -> usize {
        self.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().frames.is_empty()
    }

    /// Whether the producer may keep delivering frames.
    pub fn is_active(&self) -> bool {
        self.lock().active
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(tag: u8) -> Bytes {
        Bytes::from(vec![tag; 8])
    }

    #[test]
    fn test_fifo_order() {
        let queue = TransmitQueue::new(8);
        for tag in 0..5u8 {
            queue.enqueue(frame(tag)).unwrap();
        }
        for tag in 0..5u8 {
            assert_eq!(queue.dequeue().unwrap()[0], tag);
        }
        assert!(queue.dequeue().is_none());
    }

    #[test]
    fn test_overflow_drops_newest_and_pauses() {
        let queue = TransmitQueue::new(2);
        queue.enqueue(frame(0)).unwrap();
        queue.enqueue(frame(1)).unwrap();
        assert!(matches!(queue.enqueue(frame(2)), Err(Error::QueueOverflow)));
        assert!(!queue.is_active());
        assert_eq!(queue.len(), 2);
        // the survivors are the oldest two
        assert_eq!(queue.dequeue().unwrap()[0], 0);
    }

    #[test]
    fn test_drain_to_half_resumes_producer() {
        let queue = TransmitQueue::new(4);
        for tag in 0..4u8 {
            queue.enqueue(frame(tag)).unwrap();
        }
        let _ = queue.enqueue(frame(9));
        assert!(!queue.is_active());
        queue.dequeue();
        assert!(!queue.is_active());
        queue.dequeue();
        assert!(queue.is_active());
    }

    #[test]
    fn test_enqueue_into_empty_clears_pause() {
        let queue = TransmitQueue::new(1);
        queue.enqueue(frame(0)).unwrap();
        let _ = queue.enqueue(frame(1));
        assert!(!queue.is_active());
        queue.dequeue();
        // capacity 1 drains straight to empty, then a new enqueue resumes
        queue.enqueue(frame(2)).unwrap();
        assert!(queue.is_active());
    }

    #[test]
    fn test_flush_reports_dropped_count() {
        let queue = TransmitQueue::new(8);
        for tag in 0..3u8 {
            queue.enqueue(frame(tag)).unwrap();
        }
        assert_eq!(queue.flush(), 3);
        assert!(queue.is_empty());
        assert!(queue.is_active());
    }
}
