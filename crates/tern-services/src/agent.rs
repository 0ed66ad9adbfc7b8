//! Local bundle agent — the shared state every session and CLO task works
//! against: the object store, live bundles, open endpoints, outducts and
//! the forwarding table.
//!
//! `Agent` is a cheap handle; clones share one agent.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use tern_core::config::TernConfig;
use tern_core::{Eid, Priority, SharedStore, Timestamp, TimestampClock};

use crate::bundles::{BundleRecord, BundleTable};
use crate::delivery::{DeliveryChannel, Payload};
use crate::error::BpError;
use crate::outduct::{DuctId, Outduct, OutductSettings};
use crate::queue::QueuedBundle;
use crate::routes::RouteTable;

struct AgentInner {
    local_eid: Eid,
    started: AtomicBool,
    store: SharedStore,
    bundles: BundleTable,
    endpoints: DashMap<Eid, Arc<DeliveryChannel>>,
    outducts: DashMap<DuctId, Arc<Outduct>>,
    routes: RouteTable,
    clock: TimestampClock,
}

#[derive(Clone)]
pub struct Agent {
    inner: Arc<AgentInner>,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("local_eid", &self.inner.local_eid)
            .field("started", &self.is_started())
            .field("bundles", &self.inner.bundles.len())
            .finish()
    }
}

impl Agent {
    pub fn new(local_eid: Eid, store: SharedStore) -> Self {
        Self {
            inner: Arc::new(AgentInner {
                local_eid,
                started: AtomicBool::new(false),
                bundles: BundleTable::new(store.clone()),
                store,
                endpoints: DashMap::new(),
                outducts: DashMap::new(),
                routes: RouteTable::new(),
                clock: TimestampClock::new(),
            }),
        }
    }

    /// Build an agent with the outducts and routes named in `config`.
    pub fn from_config(config: &TernConfig, store: SharedStore) -> Result<Self, BpError> {
        let agent = Self::new(Eid::parse(&config.node.local_eid)?, store);
        for duct in &config.outducts {
            agent.add_outduct(
                DuctId::new(&duct.protocol, &duct.name),
                OutductSettings {
                    nominal_rate: duct.nominal_rate,
                    max_queued_bytes: duct.max_queued_bytes,
                },
            );
        }
        for route in &config.routes {
            let duct = DuctId::new(&route.protocol, &route.duct);
            if !agent.inner.outducts.contains_key(&duct) {
                return Err(BpError::UnknownDuct {
                    protocol: duct.protocol,
                    name: duct.name,
                });
            }
            agent.add_route(&route.prefix, duct);
        }
        Ok(agent)
    }

    pub fn local_eid(&self) -> &Eid {
        &self.inner.local_eid
    }

    pub fn store(&self) -> &SharedStore {
        &self.inner.store
    }

    pub fn bundles(&self) -> &BundleTable {
        &self.inner.bundles
    }

    pub fn routes(&self) -> &RouteTable {
        &self.inner.routes
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    pub fn start(&self) {
        if !self.inner.started.swap(true, Ordering::AcqRel) {
            tracing::info!(eid = %self.inner.local_eid, "bundle agent started");
        }
    }

    /// Stop accepting sessions, end every outduct and close every endpoint.
    pub fn stop(&self) {
        if !self.inner.started.swap(false, Ordering::AcqRel) {
            return;
        }
        for duct in self.inner.outducts.iter() {
            duct.shutdown();
        }
        let open: Vec<Arc<DeliveryChannel>> =
            self.inner.endpoints.iter().map(|e| e.value().clone()).collect();
        for channel in open {
            self.close_endpoint(&channel);
        }
        tracing::info!(eid = %self.inner.local_eid, "bundle agent stopped");
    }

    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::Acquire)
    }

    // ── Outducts and routes ──────────────────────────────────────────────────

    /// Register an outduct, or return the existing one with the same id.
    pub fn add_outduct(&self, id: DuctId, settings: OutductSettings) -> Arc<Outduct> {
        self.inner
            .outducts
            .entry(id.clone())
            .or_insert_with(|| {
                tracing::debug!(duct = %id, rate = settings.nominal_rate, "outduct added");
                Arc::new(Outduct::new(id, settings))
            })
            .clone()
    }

    pub fn outduct(&self, protocol: &str, name: &str) -> Result<Arc<Outduct>, BpError> {
        self.inner
            .outducts
            .get(&DuctId::new(protocol, name))
            .map(|d| d.clone())
            .ok_or_else(|| BpError::UnknownDuct {
                protocol: protocol.to_string(),
                name: name.to_string(),
            })
    }

    pub fn outducts(&self) -> Vec<Arc<Outduct>> {
        self.inner.outducts.iter().map(|d| d.value().clone()).collect()
    }

    pub fn add_route(&self, prefix: &str, duct: DuctId) {
        self.inner.routes.add(prefix, duct);
    }

    pub(crate) fn route(&self, dest: &Eid) -> Result<Arc<Outduct>, BpError> {
        let id = self
            .inner
            .routes
            .lookup(dest)
            .ok_or_else(|| BpError::NoRoute(dest.clone()))?;
        self.outduct(&id.protocol, &id.name)
    }

    // ── Endpoints ────────────────────────────────────────────────────────────

    pub(crate) fn open_endpoint(&self, eid: Eid) -> Result<Arc<DeliveryChannel>, BpError> {
        match self.inner.endpoints.entry(eid.clone()) {
            Entry::Occupied(mut existing) => {
                if !existing.get().is_closed() {
                    return Err(BpError::AlreadyOpen(eid));
                }
                let channel = Arc::new(DeliveryChannel::new(eid));
                existing.insert(channel.clone());
                Ok(channel)
            }
            Entry::Vacant(slot) => {
                let channel = Arc::new(DeliveryChannel::new(eid));
                slot.insert(channel.clone());
                Ok(channel)
            }
        }
    }

    /// Close a delivery channel, free its endpoint and release every ADU
    /// that was never received.
    pub(crate) fn close_endpoint(&self, channel: &Arc<DeliveryChannel>) {
        self.inner
            .endpoints
            .remove_if(channel.eid(), |_, live| Arc::ptr_eq(live, channel));
        let pending = channel.close();
        for payload in &pending {
            self.release_adu(payload);
        }
        tracing::debug!(eid = %channel.eid(), released = pending.len(), "endpoint closed");
    }

    pub(crate) fn endpoint(&self, eid: &Eid) -> Option<Arc<DeliveryChannel>> {
        self.inner
            .endpoints
            .get(eid)
            .filter(|c| !c.is_closed())
            .map(|c| c.clone())
    }

    /// Hand a payload to the endpoint open for `dest`. Returns false, with
    /// the ADU released, when nobody is listening.
    pub fn deliver(&self, dest: &Eid, payload: Payload) -> bool {
        let Some(channel) = self.endpoint(dest) else {
            tracing::debug!(eid = %dest, "no endpoint for delivery, dropping");
            self.release_adu(&payload);
            return false;
        };
        match channel.push(payload) {
            Ok(()) => true,
            Err(payload) => {
                self.release_adu(&payload);
                false
            }
        }
    }

    fn release_adu(&self, payload: &Payload) {
        if let Err(e) = self.inner.store.release(payload.adu) {
            tracing::warn!(zco = %payload.adu, error = %e, "ADU release failed");
        }
    }

    // ── Bundle lifecycle ─────────────────────────────────────────────────────

    pub(crate) fn next_timestamp(&self) -> Timestamp {
        self.inner.clock.next()
    }

    /// Look up a dequeued bundle and mark it in flight. Returns None when the
    /// bundle no longer exists or has outlived its lifespan; an expired
    /// bundle is destroyed here.
    pub fn claim_for_transmission(&self, entry: &QueuedBundle) -> Option<BundleRecord> {
        let record = {
            let mut live = self.inner.bundles.get_mut(entry.id)?;
            live.duct = None;
            live.clone()
        };
        if record.is_expired(Timestamp::now_seconds()) {
            tracing::debug!(bundle = %record.id, "bundle expired before transmission");
            self.inner.bundles.destroy(record.id);
            return None;
        }
        Some(record)
    }

    /// Bundle fully written to the convergence layer.
    pub fn complete_transmission(&self, record: &BundleRecord) {
        self.inner.bundles.destroy(record.id);
    }

    /// Transmission abandoned: put the bundle back at the head of its tier so
    /// a restarted CLO sends it first.
    pub fn requeue_after_failure(&self, outduct: &Outduct, tier: Priority, entry: QueuedBundle) {
        if let Some(mut live) = self.inner.bundles.get_mut(entry.id) {
            live.duct = Some(outduct.id().clone());
        } else {
            return;
        }
        outduct.requeue(tier, entry);
        tracing::debug!(duct = %outduct.id(), bundle = %entry.id, "bundle requeued");
    }
}
