use parking_lot::Mutex;
use std::{collections::VecDeque, sync::Arc};

/// Bounded multi-producer queue where only the newest pending entries matter.
///
/// [`push`](Self::push) never blocks and never fails: when the queue is full the oldest
/// entry is evicted. Consumers normally call [`drain_latest`](Self::drain_latest), which
/// empties the queue and keeps only the most recent value.
#[derive(Debug)]
pub struct LatestWinsQueue<T> {
    inner: Arc<Mutex<VecDeque<T>>>,
    capacity: usize,
}

impl<T> Clone for LatestWinsQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            capacity: self.capacity,
        }
    }
}

impl<T> LatestWinsQueue<T> {
    /// Create a queue holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Push `value`, evicting the oldest entry when full. Returns `true` if an entry was evicted.
    pub fn push(&self, value: T) -> bool {
        let mut queue = self.inner.lock();
        let mut evicted = false;
        while queue.len() >= self.capacity {
            queue.pop_front();
            evicted = true;
        }
        queue.push_back(value);
        evicted
    }

    /// Take every pending entry, oldest first.
    pub fn drain(&self) -> Vec<T> {
        self.inner.lock().drain(..).collect()
    }

    /// Take every pending entry and return only the newest.
    pub fn drain_latest(&self) -> Option<T> {
        let mut queue = self.inner.lock();
        let latest = queue.pop_back();
        queue.clear();
        latest
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_evicts_oldest_when_full() {
        let queue = LatestWinsQueue::new(4);

        let evictions = (1..=5).map(|alert| queue.push(alert)).collect::<Vec<_>>();

        assert_eq!(evictions, vec![false, false, false, false, true]);
        assert_eq!(queue.len(), 4);
        assert_eq!(queue.drain(), vec![2, 3, 4, 5]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_drain_latest_yields_newest_and_empties() {
        struct TestCase {
            capacity: usize,
            pushes: Vec<u32>,
            expected: Option<u32>,
        }

        let tests = vec![
            TestCase {
                // TC0: empty queue
                capacity: 3,
                pushes: vec![],
                expected: None,
            },
            TestCase {
                // TC1: fewer pushes than capacity
                capacity: 3,
                pushes: vec![1, 2],
                expected: Some(2),
            },
            TestCase {
                // TC2: overflowing pushes
                capacity: 3,
                pushes: vec![1, 2, 3, 4, 5, 6, 7],
                expected: Some(7),
            },
            TestCase {
                // TC3: zero capacity is treated as one
                capacity: 0,
                pushes: vec![9, 10],
                expected: Some(10),
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let queue = LatestWinsQueue::new(test.capacity);
            for value in test.pushes {
                queue.push(value);
            }
            assert_eq!(queue.drain_latest(), test.expected, "TC{} failed", index);
            assert!(queue.is_empty(), "TC{} failed", index);
        }
    }

    #[tokio::test]
    async fn test_producer_and_consumer_share_queue() {
        let queue = LatestWinsQueue::new(10);
        let producer = queue.clone();

        tokio::spawn(async move {
            for value in 0..100 {
                producer.push(value);
            }
        })
        .await
        .unwrap();

        assert_eq!(queue.len(), 10);
        assert_eq!(queue.drain_latest(), Some(99));
    }
}
