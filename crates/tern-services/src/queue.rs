//! Outduct queue storage.
//!
//! The three priority queues of an outduct live behind `OutductQueues` so the
//! scheduler can run against any backing store that offers atomic
//! enqueue/dequeue per tier. `MemoryQueues` is the in-process implementation.

use std::collections::VecDeque;

use parking_lot::Mutex;

use tern_core::{BundleId, Priority};

/// Queue entry: just enough to schedule and throttle without touching the
/// bundle record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuedBundle {
    pub id: BundleId,
    pub length: u64,
    pub ordinal: u8,
}

pub trait OutductQueues: Send + Sync {
    /// Append to a tier. Expedited entries are kept in descending ordinal
    /// order, FIFO among equal ordinals; other tiers are plain FIFO.
    fn enqueue(&self, tier: Priority, entry: QueuedBundle);

    /// Put an entry back at the head of its tier (failed transmission).
    fn requeue(&self, tier: Priority, entry: QueuedBundle);

    fn dequeue(&self, tier: Priority) -> Option<QueuedBundle>;

    fn peek(&self, tier: Priority) -> Option<QueuedBundle>;

    /// Remove a bundle wherever it is queued.
    fn remove(&self, id: BundleId) -> Option<(Priority, QueuedBundle)>;

    fn len(&self, tier: Priority) -> usize;

    fn is_empty(&self) -> bool {
        Priority::ALL.iter().all(|t| self.len(*t) == 0)
    }
}

#[derive(Debug, Default)]
pub struct MemoryQueues {
    tiers: Mutex<[VecDeque<QueuedBundle>; 3]>,
}

impl MemoryQueues {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OutductQueues for MemoryQueues {
    fn enqueue(&self, tier: Priority, entry: QueuedBundle) {
        let mut tiers = self.tiers.lock();
        let queue = &mut tiers[tier.index()];
        if tier == Priority::Expedited {
            let at = queue
                .iter()
                .position(|q| q.ordinal < entry.ordinal)
                .unwrap_or(queue.len());
            queue.insert(at, entry);
        } else {
            queue.push_back(entry);
        }
    }

    fn requeue(&self, tier: Priority, entry: QueuedBundle) {
        self.tiers.lock()[tier.index()].push_front(entry);
    }

    fn dequeue(&self, tier: Priority) -> Option<QueuedBundle> {
        self.tiers.lock()[tier.index()].pop_front()
    }

    fn peek(&self, tier: Priority) -> Option<QueuedBundle> {
        self.tiers.lock()[tier.index()].front().copied()
    }

    fn remove(&self, id: BundleId) -> Option<(Priority, QueuedBundle)> {
        let mut tiers = self.tiers.lock();
        for tier in Priority::ALL {
            let queue = &mut tiers[tier.index()];
            if let Some(pos) = queue.iter().position(|q| q.id == id) {
                return queue.remove(pos).map(|entry| (tier, entry));
            }
        }
        None
    }

    fn len(&self, tier: Priority) -> usize {
        self.tiers.lock()[tier.index()].len()
    }
}
