//! Bounded job queues feeding the two worker stages.
//!
//! [`FifoQueue`] carries recordings in arrival order. [`PriorityQueue`] carries
//! image jobs ordered by ascending priority, with [`QueueEntry::Shutdown`]
//! sorting after every piece of work so a stopping worker drains first.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_channel::{Receiver, Sender, TrySendError};
use tokio::sync::Notify;

use crate::error::QueueError;

/// Bounded multi-producer FIFO queue that never blocks the producer.
#[derive(Debug)]
pub struct FifoQueue<T> {
    sender: Sender<T>,
    receiver: Receiver<T>,
    capacity: usize,
}

impl<T> Clone for FifoQueue<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            receiver: self.receiver.clone(),
            capacity: self.capacity,
        }
    }
}

impl<T> FifoQueue<T> {
    pub fn bounded(capacity: usize) -> Self {
        let (sender, receiver) = async_channel::bounded(capacity);
        Self {
            sender,
            receiver,
            capacity,
        }
    }

    /// Enqueues `item`, or fails immediately when the queue is full or closed.
    pub fn try_push(&self, item: T) -> Result<(), QueueError> {
        self.sender.try_send(item).map_err(|err| match err {
            TrySendError::Full(_) => QueueError::Full {
                capacity: self.capacity,
            },
            TrySendError::Closed(_) => QueueError::Closed,
        })
    }

    /// Waits for the next item. `None` once the queue is closed and empty.
    pub async fn pop(&self) -> Option<T> {
        self.receiver.recv().await.ok()
    }

    /// Rejects further pushes. Items already queued stay poppable.
    pub fn close(&self) -> bool {
        self.sender.close()
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// An entry of the [`PriorityQueue`].
#[derive(Debug)]
pub enum QueueEntry<T> {
    Work {
        priority: u32,
        seq: u64,
        payload: T,
    },
    Shutdown,
}

// `BinaryHeap` pops the greatest entry: lower priority numbers are greater,
// ties go to the earlier `seq`, and `Shutdown` is the least of all.
impl<T> Ord for QueueEntry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (QueueEntry::Shutdown, QueueEntry::Shutdown) => Ordering::Equal,
            (QueueEntry::Shutdown, QueueEntry::Work { .. }) => Ordering::Less,
            (QueueEntry::Work { .. }, QueueEntry::Shutdown) => Ordering::Greater,
            (
                QueueEntry::Work {
                    priority: a,
                    seq: seq_a,
                    ..
                },
                QueueEntry::Work {
                    priority: b,
                    seq: seq_b,
                    ..
                },
            ) => b.cmp(a).then_with(|| seq_b.cmp(seq_a)),
        }
    }
}

impl<T> PartialOrd for QueueEntry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> PartialEq for QueueEntry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T> Eq for QueueEntry<T> {}

#[derive(Debug)]
struct Heap<T> {
    entries: BinaryHeap<QueueEntry<T>>,
    next_seq: u64,
}

/// Bounded priority queue for a single consumer.
#[derive(Debug)]
pub struct PriorityQueue<T> {
    heap: Mutex<Heap<T>>,
    available: Notify,
    space: Notify,
    capacity: usize,
}

impl<T> PriorityQueue<T> {
    pub fn bounded(capacity: usize) -> Self {
        Self {
            heap: Mutex::new(Heap {
                entries: BinaryHeap::new(),
                next_seq: 0,
            }),
            available: Notify::new(),
            space: Notify::new(),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Heap<T>> {
        self.heap.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueues work, or fails immediately when the queue is at capacity.
    pub fn try_push(&self, priority: u32, payload: T) -> Result<(), QueueError> {
        let mut heap = self.lock();
        if heap.entries.len() >= self.capacity {
            return Err(QueueError::Full {
                capacity: self.capacity,
            });
        }
        let seq = heap.next_seq;
        heap.next_seq += 1;
        heap.entries.push(QueueEntry::Work {
            priority,
            seq,
            payload,
        });
        drop(heap);
        self.available.notify_one();
        Ok(())
    }

    /// Enqueues work, waiting for the consumer to make room if needed.
    pub async fn push(&self, priority: u32, payload: T) {
        let mut payload = Some(payload);
        loop {
            let space = self.space.notified();
            {
                let mut heap = self.lock();
                if heap.entries.len() < self.capacity {
                    let seq = heap.next_seq;
                    heap.next_seq += 1;
                    if let Some(payload) = payload.take() {
                        heap.entries.push(QueueEntry::Work {
                            priority,
                            seq,
                            payload,
                        });
                    }
                    drop(heap);
                    self.available.notify_one();
                    return;
                }
            }
            space.await;
        }
    }

    /// Enqueues the shutdown marker. It ignores capacity and is popped only
    /// after all work currently queued.
    pub fn shutdown(&self) {
        self.lock().entries.push(QueueEntry::Shutdown);
        self.available.notify_one();
    }

    /// Waits for the highest-priority entry.
    pub async fn pop(&self) -> QueueEntry<T> {
        loop {
            let available = self.available.notified();
            if let Some(entry) = self.lock().entries.pop() {
                self.space.notify_one();
                return entry;
            }
            available.await;
        }
    }

    /// Number of queued entries, the shutdown marker included.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
