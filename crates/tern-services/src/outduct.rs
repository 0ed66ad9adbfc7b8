//! Outducts — named egress channels with three priority queues.
//!
//! An outduct owns:
//!   - the tier queues (behind `OutductQueues`)
//!   - the weighted tier scheduler
//!   - a binary semaphore given on every enqueue and ended to stop its CLO
//!   - a transmission throttle
//!   - admission accounting for queued bytes
//!
//! Exactly one convergence-layer output task may drain an outduct at a time.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use tern_core::{BinarySemaphore, EndToken, Priority, SemTake};

use crate::queue::{MemoryQueues, OutductQueues, QueuedBundle};
use crate::scheduler::TierScheduler;
use crate::throttle::Throttle;

/// (protocol name, duct name).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DuctId {
    pub protocol: String,
    pub name: String,
}

impl DuctId {
    pub fn new(protocol: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for DuctId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.protocol, self.name)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OutductSettings {
    /// Bytes/sec. 0 = protocol default, applied when the CLO starts.
    pub nominal_rate: u64,
    /// Admission limit. 0 = unlimited.
    pub max_queued_bytes: u64,
}

/// Result of a blocking dequeue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dequeued {
    Bundle(Priority, QueuedBundle),
    Shutdown,
}

pub struct Outduct {
    id: DuctId,
    settings: OutductSettings,
    queues: Arc<dyn OutductQueues>,
    scheduler: Mutex<TierScheduler>,
    semaphore: BinarySemaphore,
    throttle: tokio::sync::Mutex<Throttle>,
    queued_bytes: AtomicU64,
    space: Notify,
    clo_running: AtomicBool,
}

impl fmt::Debug for Outduct {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Outduct")
            .field("id", &self.id)
            .field("queued_bytes", &self.queued_bytes())
            .field("ended", &self.is_ended())
            .finish()
    }
}

impl Outduct {
    pub fn new(id: DuctId, settings: OutductSettings) -> Self {
        Self::with_queues(id, settings, Arc::new(MemoryQueues::new()))
    }

    pub fn with_queues(
        id: DuctId,
        settings: OutductSettings,
        queues: Arc<dyn OutductQueues>,
    ) -> Self {
        let rate = settings.nominal_rate;
        Self {
            id,
            settings,
            queues,
            scheduler: Mutex::new(TierScheduler::new()),
            semaphore: BinarySemaphore::new(),
            throttle: tokio::sync::Mutex::new(Throttle::new(rate)),
            queued_bytes: AtomicU64::new(0),
            space: Notify::new(),
            clo_running: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &DuctId {
        &self.id
    }

    pub fn settings(&self) -> OutductSettings {
        self.settings
    }

    pub fn throttle(&self) -> &tokio::sync::Mutex<Throttle> {
        &self.throttle
    }

    pub fn queued_bytes(&self) -> u64 {
        self.queued_bytes.load(Ordering::Acquire)
    }

    pub fn len(&self, tier: Priority) -> usize {
        self.queues.len(tier)
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    // ── Admission ────────────────────────────────────────────────────────────

    /// Reserve room for `length` bytes. Always succeeds on an unlimited duct;
    /// an oversized bundle is admitted into an otherwise empty duct so it
    /// cannot be refused forever.
    pub fn try_reserve(&self, length: u64) -> bool {
        let limit = self.settings.max_queued_bytes;
        if limit == 0 {
            self.queued_bytes.fetch_add(length, Ordering::AcqRel);
            return true;
        }
        self.queued_bytes
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |queued| {
                if queued == 0 || queued + length <= limit {
                    Some(queued + length)
                } else {
                    None
                }
            })
            .is_ok()
    }

    /// Wait until `length` bytes can be reserved. Returns false if `cancel`
    /// ends first; nothing is reserved in that case.
    pub async fn reserve(&self, length: u64, cancel: &EndToken) -> bool {
        loop {
            let mut space = std::pin::pin!(self.space.notified());
            space.as_mut().enable();
            if cancel.is_ended() {
                return false;
            }
            if self.try_reserve(length) {
                return true;
            }
            tokio::select! {
                _ = space => {}
                _ = cancel.ended() => return false,
            }
        }
    }

    fn release_space(&self, length: u64) {
        let _ = self
            .queued_bytes
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |q| {
                Some(q.saturating_sub(length))
            });
        self.space.notify_waiters();
    }

    // ── Queueing ─────────────────────────────────────────────────────────────

    /// Queue a bundle whose bytes were already reserved.
    pub fn enqueue(&self, tier: Priority, entry: QueuedBundle) {
        self.queues.enqueue(tier, entry);
        tracing::debug!(duct = %self.id, bundle = %entry.id, ?tier, bytes = entry.length, "bundle queued");
        self.semaphore.give();
    }

    /// Return a bundle whose transmission was abandoned to the head of its
    /// tier, re-reserving its bytes.
    pub fn requeue(&self, tier: Priority, entry: QueuedBundle) {
        self.queued_bytes.fetch_add(entry.length, Ordering::AcqRel);
        self.queues.requeue(tier, entry);
        self.semaphore.give();
    }

    /// Take the next bundle per the weighted tier policy, if any.
    pub fn try_dequeue(&self) -> Option<(Priority, QueuedBundle)> {
        let entry = {
            let mut scheduler = self.scheduler.lock();
            let nonempty = Priority::ALL.map(|t| self.queues.len(t) > 0);
            let tier = scheduler.select(nonempty)?;
            self.queues.dequeue(tier).map(|e| (tier, e))
        };
        if let Some((_, e)) = entry {
            self.release_space(e.length);
        }
        entry
    }

    /// Block until a bundle is available or the duct is ended.
    pub async fn dequeue(&self) -> Dequeued {
        loop {
            if self.semaphore.is_ended() {
                return Dequeued::Shutdown;
            }
            if let Some((tier, entry)) = self.try_dequeue() {
                return Dequeued::Bundle(tier, entry);
            }
            if self.semaphore.take().await == SemTake::Ended {
                return Dequeued::Shutdown;
            }
        }
    }

    /// Pull a queued bundle out. None if it is not queued here (already
    /// dequeued, or never was).
    pub fn remove(&self, id: tern_core::BundleId) -> Option<(Priority, QueuedBundle)> {
        let removed = self.queues.remove(id);
        if let Some((_, e)) = removed {
            self.release_space(e.length);
        }
        removed
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    /// End the duct semaphore: the CLO's dequeue returns `Shutdown`.
    pub fn shutdown(&self) {
        self.semaphore.end();
    }

    pub fn is_ended(&self) -> bool {
        self.semaphore.is_ended()
    }

    /// Re-arm a duct after a managed stop so a new CLO can attach.
    pub fn restart(&self) {
        self.semaphore.unend();
        if !self.queues.is_empty() {
            self.semaphore.give();
        }
    }

    pub fn end_token(&self) -> EndToken {
        self.semaphore.end_token()
    }

    /// Claim the duct for a CLO task. False if one is already draining it.
    pub fn claim_clo(&self) -> bool {
        self.clo_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn release_clo(&self) {
        self.clo_running.store(false, Ordering::Release);
    }
}
