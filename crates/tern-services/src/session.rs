//! Application session API.
//!
//! `Bp` is an application's attachment to the local agent. Through it the
//! application opens endpoints, hands ADUs to the agent for transmission,
//! tracks or cancels the resulting bundles, and closes endpoints.
//!
//! Outcome convention: a send that the agent could not take *right now*
//! (no capacity, unparsable endpoint id) is `SendOutcome::NotAccepted`, not
//! an error. `BpError` is reserved for failures that retrying will not fix.

use std::sync::atomic::{AtomicBool, Ordering};

use tern_core::{BundleId, CustodySwitch, Eid, ExtendedCos, Priority, SrrFlags, Zco};

use crate::agent::Agent;
use crate::bundles::BundleRecord;
use crate::delivery::Payload;
use crate::error::BpError;
use crate::queue::QueuedBundle;
use crate::sap::Sap;
use crate::tracking::BundleList;

/// One day, the conventional default bundle lifetime.
pub const DEFAULT_LIFESPAN: u64 = 86_400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SendMode {
    /// Wait for outduct capacity.
    #[default]
    Blocking,
    /// Return `NotAccepted(NoCapacity)` instead of waiting.
    NonBlocking,
}

#[derive(Debug, Clone)]
pub struct SendRequest {
    pub mode: SendMode,
    pub dest: String,
    /// None reports to the sending endpoint.
    pub report_to: Option<String>,
    /// Seconds. 0 never expires.
    pub lifespan: u64,
    pub priority: Priority,
    pub custody: CustodySwitch,
    pub srr: SrrFlags,
    pub ack_requested: bool,
    pub ecos: Option<ExtendedCos>,
    /// On acceptance the caller's reference to this object passes to the
    /// bundle.
    pub adu: Zco,
}

impl SendRequest {
    pub fn new(dest: impl Into<String>, adu: Zco) -> Self {
        Self {
            mode: SendMode::Blocking,
            dest: dest.into(),
            report_to: None,
            lifespan: DEFAULT_LIFESPAN,
            priority: Priority::Standard,
            custody: CustodySwitch::None,
            srr: SrrFlags::empty(),
            ack_requested: false,
            ecos: None,
            adu,
        }
    }

    pub fn non_blocking(mut self) -> Self {
        self.mode = SendMode::NonBlocking;
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn lifespan(mut self, secs: u64) -> Self {
        self.lifespan = secs;
        self
    }

    pub fn ecos(mut self, ecos: ExtendedCos) -> Self {
        self.ecos = Some(ecos);
        self
    }
}

/// Why a send was not accepted. Both reasons report the same status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    NoCapacity,
    MalformedEid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Accepted(BundleId),
    NotAccepted(Rejection),
}

impl SendOutcome {
    /// 1 accepted, 0 not accepted.
    pub fn status(&self) -> i32 {
        match self {
            SendOutcome::Accepted(_) => 1,
            SendOutcome::NotAccepted(_) => 0,
        }
    }

    pub fn bundle(&self) -> Option<BundleId> {
        match self {
            SendOutcome::Accepted(id) => Some(*id),
            SendOutcome::NotAccepted(_) => None,
        }
    }
}

pub struct Bp {
    agent: Agent,
    attached: AtomicBool,
}

impl std::fmt::Debug for Bp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bp")
            .field("attached", &self.is_attached())
            .finish()
    }
}

impl Bp {
    pub fn new(agent: Agent) -> Self {
        Self {
            agent,
            attached: AtomicBool::new(false),
        }
    }

    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    /// Attach to the local agent. Idempotent.
    pub fn attach(&self) -> Result<(), BpError> {
        if !self.agent.is_started() {
            return Err(BpError::AttachFailure);
        }
        self.attached.store(true, Ordering::Release);
        Ok(())
    }

    /// Idempotent.
    pub fn detach(&self) {
        self.attached.store(false, Ordering::Release);
    }

    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire)
    }

    fn ensure_attached(&self) -> Result<(), BpError> {
        if self.is_attached() && self.agent.is_started() {
            Ok(())
        } else {
            Err(BpError::NotAttached)
        }
    }

    pub fn open(&self, eid: &str) -> Result<Sap, BpError> {
        self.ensure_attached()?;
        let eid = Eid::parse(eid)?;
        let channel = self.agent.open_endpoint(eid.clone())?;
        tracing::debug!(%eid, "SAP opened");
        Ok(Sap::new(channel, self.agent.clone()))
    }

    pub fn close(&self, sap: &Sap) {
        sap.close();
    }

    /// Hand an ADU to the agent for transmission to `request.dest`.
    ///
    /// The ADU must be non-empty and its length must fit the 32-bit frame
    /// length of the convergence layer; a zero-length frame is a keepalive.
    /// A bundle for a local endpoint is delivered at once and never enters
    /// the bundle table, so its id cannot be tracked or cancelled.
    pub async fn send(&self, sap: &Sap, request: SendRequest) -> Result<SendOutcome, BpError> {
        self.ensure_attached()?;
        if sap.is_closed() {
            return Err(BpError::SapClosed(sap.eid().clone()));
        }
        let ecos = request.ecos.unwrap_or_default();
        if !ecos.is_valid() {
            return Err(BpError::InvalidOrdinal(ecos.ordinal));
        }

        let Ok(dest) = Eid::parse(&request.dest) else {
            tracing::debug!(dest = %request.dest, "malformed destination eid");
            return Ok(SendOutcome::NotAccepted(Rejection::MalformedEid));
        };
        let report_to = match request.report_to.as_deref() {
            None => sap.eid().clone(),
            Some(text) => match Eid::parse(text) {
                Ok(eid) => eid,
                Err(_) => return Ok(SendOutcome::NotAccepted(Rejection::MalformedEid)),
            },
        };
        let length = self.agent.store().length(request.adu)?;
        if length == 0 {
            return Err(BpError::EmptyAdu);
        }
        if length > u64::from(u32::MAX) {
            return Err(BpError::AduTooLarge(length));
        }

        // Local destination: straight to the endpoint, no outduct involved.
        if self.agent.endpoint(&dest).is_some() {
            let id = self.agent.bundles().next_id();
            let payload = Payload {
                adu: request.adu,
                source: sap.eid().clone(),
                creation: self.agent.next_timestamp(),
                ack_requested: request.ack_requested,
                admin_record: false,
            };
            self.agent.deliver(&dest, payload);
            tracing::debug!(bundle = %id, eid = %dest, bytes = length, "bundle delivered locally");
            return Ok(SendOutcome::Accepted(id));
        }

        let outduct = self.agent.route(&dest)?;
        match request.mode {
            SendMode::NonBlocking => {
                if !outduct.try_reserve(length) {
                    return Ok(SendOutcome::NotAccepted(Rejection::NoCapacity));
                }
            }
            SendMode::Blocking => {
                if !outduct.reserve(length, &sap.close_token()).await {
                    return Err(BpError::SapClosed(sap.eid().clone()));
                }
            }
        }

        let id = self.agent.bundles().next_id();
        self.agent.bundles().insert(BundleRecord {
            id,
            source: sap.eid().clone(),
            dest,
            report_to,
            priority: request.priority,
            ecos,
            custody: request.custody,
            srr: request.srr,
            ack_requested: request.ack_requested,
            admin_record: false,
            created: self.agent.next_timestamp(),
            lifespan: request.lifespan,
            adu: request.adu,
            length,
            duct: Some(outduct.id().clone()),
        });
        outduct.enqueue(
            request.priority,
            QueuedBundle {
                id,
                length,
                ordinal: ecos.ordinal,
            },
        );
        Ok(SendOutcome::Accepted(id))
    }

    /// Link a live bundle into an application list. The link is cleared
    /// automatically when the bundle is destroyed.
    pub fn track(&self, bundle: BundleId, list: &BundleList) -> Result<(), BpError> {
        if !self.agent.bundles().contains(bundle) {
            return Err(BpError::UnknownBundle(bundle));
        }
        self.agent.bundles().tracking().track(bundle, list);
        Ok(())
    }

    pub fn untrack(&self, bundle: BundleId, list: &BundleList) {
        self.agent.bundles().tracking().untrack(bundle, list);
    }

    /// Best-effort cancellation. A bundle that was already handed to its
    /// convergence layer, or no longer exists, is left alone.
    pub fn cancel(&self, bundle: BundleId) -> Result<(), BpError> {
        self.ensure_attached()?;
        let Some(record) = self.agent.bundles().get(bundle) else {
            return Ok(());
        };
        let Some(duct) = record.duct else {
            return Ok(());
        };
        let outduct = self.agent.outduct(&duct.protocol, &duct.name)?;
        if outduct.remove(bundle).is_some() {
            self.agent.bundles().destroy(bundle);
            tracing::debug!(%bundle, duct = %duct, "bundle cancelled");
        }
        Ok(())
    }
}
