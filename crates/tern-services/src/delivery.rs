//! Delivery channel — per-SAP queue of inbound payloads.
//!
//! Arrival order is preserved; nothing is reordered by priority on the way
//! in. A receiver waits for the first of: an arrival, an interrupt, the SAP
//! closing, or its deadline. Interrupts only wake receivers that are already
//! waiting; an interrupt with nobody blocked is lost.

use std::collections::VecDeque;
use std::pin::pin;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use tern_core::{EndToken, Eid, ObjectStore, Timestamp, Zco};

use crate::error::BpError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub adu: Zco,
    pub source: Eid,
    pub creation: Timestamp,
    pub ack_requested: bool,
    pub admin_record: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    PayloadPresent(Payload),
    ReceptionTimedOut,
    ReceptionInterrupted,
}

impl Delivery {
    pub fn payload(&self) -> Option<&Payload> {
        match self {
            Delivery::PayloadPresent(p) => Some(p),
            _ => None,
        }
    }

    /// Finish with a delivery. With `release_adu` the ADU reference is
    /// dropped here; otherwise ownership of that reference passes to the
    /// caller, who gets the handle back.
    pub fn release(self, store: &dyn ObjectStore, release_adu: bool) -> Option<Zco> {
        let Delivery::PayloadPresent(payload) = self else {
            return None;
        };
        if !release_adu {
            return Some(payload.adu);
        }
        if let Err(e) = store.release(payload.adu) {
            tracing::warn!(zco = %payload.adu, error = %e, "delivery release failed");
        }
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveTimeout {
    /// Return immediately.
    Poll,
    After(Duration),
    Forever,
}

impl ReceiveTimeout {
    /// Classic convention: 0 polls, negative waits forever.
    pub fn from_secs(secs: i64) -> Self {
        match secs {
            0 => ReceiveTimeout::Poll,
            s if s < 0 => ReceiveTimeout::Forever,
            s => ReceiveTimeout::After(Duration::from_secs(s.unsigned_abs())),
        }
    }

    fn deadline(self) -> Option<Instant> {
        match self {
            ReceiveTimeout::After(d) => Some(Instant::now() + d),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct DeliveryChannel {
    eid: Eid,
    queue: Mutex<VecDeque<Payload>>,
    arrival: Notify,
    interrupt: Notify,
    closed: EndToken,
}

impl DeliveryChannel {
    pub fn new(eid: Eid) -> Self {
        Self {
            eid,
            queue: Mutex::new(VecDeque::new()),
            arrival: Notify::new(),
            interrupt: Notify::new(),
            closed: EndToken::new(),
        }
    }

    pub fn eid(&self) -> &Eid {
        &self.eid
    }

    /// Queue an arrival. Hands the payload back if the channel is closed.
    pub fn push(&self, payload: Payload) -> Result<(), Payload> {
        {
            let mut queue = self.queue.lock();
            if self.closed.is_ended() {
                return Err(payload);
            }
            queue.push_back(payload);
        }
        self.arrival.notify_waiters();
        Ok(())
    }

    pub async fn receive(&self, timeout: ReceiveTimeout) -> Result<Delivery, BpError> {
        if self.closed.is_ended() {
            return Err(BpError::SapClosed(self.eid.clone()));
        }

        let mut interrupted = pin!(self.interrupt.notified());
        interrupted.as_mut().enable();
        let deadline = timeout.deadline();

        loop {
            let mut arrived = pin!(self.arrival.notified());
            arrived.as_mut().enable();

            if let Some(payload) = self.queue.lock().pop_front() {
                return Ok(Delivery::PayloadPresent(payload));
            }
            if self.closed.is_ended() {
                return Ok(Delivery::ReceptionInterrupted);
            }
            if timeout == ReceiveTimeout::Poll {
                return Ok(Delivery::ReceptionTimedOut);
            }

            let expiry = async {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                _ = &mut arrived => {}
                _ = &mut interrupted => return Ok(Delivery::ReceptionInterrupted),
                _ = self.closed.ended() => return Ok(Delivery::ReceptionInterrupted),
                _ = expiry => return Ok(Delivery::ReceptionTimedOut),
            }
        }
    }

    /// Wake every receiver currently blocked on this channel.
    pub fn interrupt(&self) {
        self.interrupt.notify_waiters();
    }

    /// Close the channel and hand back whatever was never received.
    pub fn close(&self) -> Vec<Payload> {
        let pending: Vec<Payload> = {
            let mut queue = self.queue.lock();
            self.closed.end();
            queue.drain(..).collect()
        };
        self.closed.finish();
        pending
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_ended()
    }

    /// Ends when the channel is closed.
    pub fn close_token(&self) -> EndToken {
        self.closed.clone()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
