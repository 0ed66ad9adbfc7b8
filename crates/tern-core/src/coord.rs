//! Coordination primitives shared by the agent, the session API and the
//! convergence-layer daemons.
//!
//! Two building blocks:
//!   EndToken        — tri-state Active → Ending → Ended with a wake primitive.
//!                     Every interruptible wait in the stack selects on one.
//!   BinarySemaphore — take/give semaphore with a terminal "ended" state
//!                     distinct from available/unavailable.
//!
//! Waiters always register interest (`Notified::enable`) before checking
//! state, so a give or end racing with a take is never lost.

use std::pin::pin;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

// ── EndToken ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EndState {
    Active = 0,
    /// Shutdown requested; holders are still unwinding.
    Ending = 1,
    /// Shutdown complete.
    Ended = 2,
}

impl EndState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => EndState::Active,
            1 => EndState::Ending,
            _ => EndState::Ended,
        }
    }
}

#[derive(Debug)]
struct EndInner {
    state: AtomicU8,
    notify: Notify,
}

/// Shared cancellation token. Cloning shares the same state.
#[derive(Debug, Clone)]
pub struct EndToken {
    inner: Arc<EndInner>,
}

impl Default for EndToken {
    fn default() -> Self {
        Self::new()
    }
}

impl EndToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(EndInner {
                state: AtomicU8::new(EndState::Active as u8),
                notify: Notify::new(),
            }),
        }
    }

    pub fn state(&self) -> EndState {
        EndState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    /// Request shutdown. Returns true for the call that performed the
    /// Active → Ending transition.
    pub fn end(&self) -> bool {
        let first = self
            .inner
            .state
            .compare_exchange(
                EndState::Active as u8,
                EndState::Ending as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        self.inner.notify.notify_waiters();
        first
    }

    /// Mark shutdown complete.
    pub fn finish(&self) {
        self.inner
            .state
            .store(EndState::Ended as u8, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    /// True once shutdown has been requested (Ending or Ended).
    pub fn is_ended(&self) -> bool {
        self.state() != EndState::Active
    }

    /// Return to Active. Used when a duct is restarted after a managed stop.
    pub fn unend(&self) {
        self.inner
            .state
            .store(EndState::Active as u8, Ordering::Release);
    }

    /// Resolves once shutdown has been requested.
    pub async fn ended(&self) {
        loop {
            let mut notified = pin!(self.inner.notify.notified());
            notified.as_mut().enable();
            if self.is_ended() {
                return;
            }
            notified.await;
        }
    }
}

// ── BinarySemaphore ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemTake {
    Taken,
    Ended,
}

/// Binary semaphore with a terminal "ended" state.
///
/// `give` on an already-available semaphore is idempotent. Once ended,
/// every pending and future `take` returns `SemTake::Ended` until `unend`.
#[derive(Debug)]
pub struct BinarySemaphore {
    available: AtomicBool,
    end: EndToken,
    notify: Notify,
}

impl Default for BinarySemaphore {
    fn default() -> Self {
        Self::new()
    }
}

impl BinarySemaphore {
    /// Created unavailable.
    pub fn new() -> Self {
        Self {
            available: AtomicBool::new(false),
            end: EndToken::new(),
            notify: Notify::new(),
        }
    }

    pub async fn take(&self) -> SemTake {
        loop {
            let mut notified = pin!(self.notify.notified());
            notified.as_mut().enable();
            if self.end.is_ended() {
                return SemTake::Ended;
            }
            if self.available.swap(false, Ordering::AcqRel) {
                return SemTake::Taken;
            }
            notified.await;
        }
    }

    /// Non-blocking take.
    pub fn try_take(&self) -> bool {
        !self.end.is_ended() && self.available.swap(false, Ordering::AcqRel)
    }

    pub fn give(&self) {
        self.available.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn end(&self) {
        self.end.end();
        self.notify.notify_waiters();
    }

    pub fn is_ended(&self) -> bool {
        self.end.is_ended()
    }

    pub fn unend(&self) {
        self.end.unend();
    }

    /// Token that flips when this semaphore is ended. Lets other actors
    /// select on the same shutdown condition.
    pub fn end_token(&self) -> EndToken {
        self.end.clone()
    }
}
