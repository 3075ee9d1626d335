//! Bounded FIFO of recent output per decoder.

use std::collections::VecDeque;

/// Records kept per decoder.
pub const MAX_OUTPUT: usize = 200;

/// Fixed-capacity buffer that drops the oldest entry when full.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T: Clone> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        RingBuffer {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append, evicting the oldest entry if at capacity. Returns the evicted entry.
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.len() >= self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    /// Copy of the most recent `limit` entries, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<T> {
        let skip = self.items.len().saturating_sub(limit);
        self.items.iter().skip(skip).cloned().collect()
    }

    pub fn latest(&self) -> Option<&T> {
        self.items.back()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

impl<T: Clone> Default for RingBuffer<T> {
    fn default() -> Self {
        RingBuffer::new(MAX_OUTPUT)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keeps_most_recent_200() {
        let mut ring = RingBuffer::default();
        for i in 0..250u32 {
            ring.push(i);
        }
        assert_eq!(ring.len(), MAX_OUTPUT);

        let out = ring.recent(200);
        assert_eq!(out.len(), 200);
        assert_eq!(out[0], 50);
        assert_eq!(out[199], 249);
        assert!(out.windows(2).all(|w| w[0] + 1 == w[1]));
    }

    #[test]
    fn test_never_exceeds_capacity() {
        let mut ring = RingBuffer::new(3);
        for i in 0..10 {
            ring.push(i);
            assert!(ring.len() <= 3);
        }
    }

    #[test]
    fn test_push_returns_evicted() {
        let mut ring = RingBuffer::new(2);
        assert_eq!(ring.push('a'), None);
        assert_eq!(ring.push('b'), None);
        assert_eq!(ring.push('c'), Some('a'));
    }

    #[test]
    fn test_recent_limit() {
        let mut ring = RingBuffer::new(10);
        for i in 0..5 {
            ring.push(i);
        }
        assert_eq!(ring.recent(2), vec![3, 4]);
        assert_eq!(ring.recent(50), vec![0, 1, 2, 3, 4]);
        assert!(ring.recent(0).is_empty());
    }

    #[test]
    fn test_recent_is_a_copy() {
        let mut ring = RingBuffer::new(4);
        ring.push(String::from("a"));
        let snapshot = ring.recent(4);
        ring.push(String::from("b"));
        ring.clear();
        assert_eq!(snapshot, vec!["a".to_string()]);
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let mut ring = RingBuffer::new(0);
        ring.push(1);
        ring.push(2);
        assert_eq!(ring.capacity(), 1);
        assert_eq!(ring.latest(), Some(&2));
    }
}
