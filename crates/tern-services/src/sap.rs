//! Service access points: an application's open endpoint.

use std::sync::Arc;

use tern_core::{EndToken, Eid, Zco};

use crate::agent::Agent;
use crate::delivery::{Delivery, DeliveryChannel, ReceiveTimeout};
use crate::error::BpError;

/// Handle to an open endpoint. Clones share the same delivery channel, so
/// one task may block in `receive` while another interrupts or closes it.
#[derive(Clone)]
pub struct Sap {
    channel: Arc<DeliveryChannel>,
    agent: Agent,
}

impl std::fmt::Debug for Sap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sap")
            .field("eid", self.channel.eid())
            .field("closed", &self.channel.is_closed())
            .finish()
    }
}

impl Sap {
    pub(crate) fn new(channel: Arc<DeliveryChannel>, agent: Agent) -> Self {
        Self { channel, agent }
    }

    pub fn eid(&self) -> &Eid {
        self.channel.eid()
    }

    pub async fn receive(&self, timeout: ReceiveTimeout) -> Result<Delivery, BpError> {
        self.channel.receive(timeout).await
    }

    pub fn interrupt(&self) {
        self.channel.interrupt();
    }

    /// Close the endpoint. Blocked receivers see `ReceptionInterrupted`,
    /// undelivered ADUs are released and the eid may be opened again.
    pub fn close(&self) {
        if !self.channel.is_closed() {
            self.agent.close_endpoint(&self.channel);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.channel.is_closed()
    }

    /// Payloads waiting to be received.
    pub fn pending(&self) -> usize {
        self.channel.len()
    }

    pub fn release_delivery(&self, delivery: Delivery, release_adu: bool) -> Option<Zco> {
        delivery.release(self.agent.store().as_ref(), release_adu)
    }

    pub(crate) fn close_token(&self) -> EndToken {
        self.channel.close_token()
    }
}
