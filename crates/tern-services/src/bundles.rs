//! Bundle records held by the local agent between acceptance and
//! transmission.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::one::RefMut;
use dashmap::DashMap;

use tern_core::{
    BundleId, CustodySwitch, Eid, ExtendedCos, ObjectStore, Priority, SrrFlags, Timestamp, Zco,
};

use crate::outduct::DuctId;
use crate::tracking::TrackingRegistry;

#[derive(Debug, Clone)]
pub struct BundleRecord {
    pub id: BundleId,
    pub source: Eid,
    pub dest: Eid,
    pub report_to: Eid,
    pub priority: Priority,
    pub ecos: ExtendedCos,
    pub custody: CustodySwitch,
    pub srr: SrrFlags,
    pub ack_requested: bool,
    pub admin_record: bool,
    pub created: Timestamp,
    /// Seconds.
    pub lifespan: u64,
    pub adu: Zco,
    pub length: u64,
    /// Outduct the bundle is queued on, if any.
    pub duct: Option<DuctId>,
}

impl BundleRecord {
    pub fn expires_at(&self) -> u64 {
        self.created.seconds.saturating_add(self.lifespan)
    }

    pub fn is_expired(&self, now_seconds: u64) -> bool {
        self.lifespan > 0 && now_seconds >= self.expires_at()
    }
}

/// All live bundles. Destroying a record releases its ADU reference and
/// clears every tracking link to it.
pub struct BundleTable {
    records: DashMap<BundleId, BundleRecord>,
    next_id: AtomicU64,
    tracking: TrackingRegistry,
    store: Arc<dyn ObjectStore>,
}

impl BundleTable {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            records: DashMap::new(),
            next_id: AtomicU64::new(1),
            tracking: TrackingRegistry::new(),
            store,
        }
    }

    pub fn next_id(&self) -> BundleId {
        BundleId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn insert(&self, record: BundleRecord) {
        self.records.insert(record.id, record);
    }

    pub fn get(&self, id: BundleId) -> Option<BundleRecord> {
        self.records.get(&id).map(|r| r.clone())
    }

    pub(crate) fn get_mut(&self, id: BundleId) -> Option<RefMut<'_, BundleId, BundleRecord>> {
        self.records.get_mut(&id)
    }

    pub fn contains(&self, id: BundleId) -> bool {
        self.records.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn tracking(&self) -> &TrackingRegistry {
        &self.tracking
    }

    /// Remove a bundle for good. Returns false if it was already gone.
    pub fn destroy(&self, id: BundleId) -> bool {
        let Some((_, record)) = self.records.remove(&id) else {
            return false;
        };
        if let Err(e) = self.store.release(record.adu) {
            tracing::warn!(bundle = %id, zco = %record.adu, error = %e, "ADU release failed");
        }
        self.tracking.on_destroy(id);
        tracing::trace!(bundle = %id, "bundle destroyed");
        true
    }
}
