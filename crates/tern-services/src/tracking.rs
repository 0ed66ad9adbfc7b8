//! Application-owned bundle lists and the weak back-links into them.
//!
//! An application may track a bundle in any number of its own lists. The
//! agent keeps only weak references, so dropping a list never keeps it alive
//! from the agent side, and destroying a bundle removes it from every live
//! list that still tracks it.

use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::Mutex;

use tern_core::BundleId;

type ListInner = Mutex<Vec<BundleId>>;

/// A list of bundle ids owned by the application. Clones share the list.
#[derive(Debug, Clone, Default)]
pub struct BundleList {
    inner: Arc<ListInner>,
}

impl BundleList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ids(&self) -> Vec<BundleId> {
        self.inner.lock().clone()
    }

    pub fn contains(&self, id: BundleId) -> bool {
        self.inner.lock().contains(&id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push(&self, id: BundleId) {
        let mut ids = self.inner.lock();
        if !ids.contains(&id) {
            ids.push(id);
        }
    }

    fn remove(&self, id: BundleId) {
        self.inner.lock().retain(|b| *b != id);
    }

    fn downgrade(&self) -> Weak<ListInner> {
        Arc::downgrade(&self.inner)
    }

    fn is(&self, other: &Weak<ListInner>) -> bool {
        Weak::ptr_eq(&Arc::downgrade(&self.inner), other)
    }
}

/// Bundle id → weak references to every list tracking it.
#[derive(Debug, Default)]
pub struct TrackingRegistry {
    links: DashMap<BundleId, Vec<Weak<ListInner>>>,
}

impl TrackingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&self, id: BundleId, list: &BundleList) {
        let mut links = self.links.entry(id).or_default();
        if !links.iter().any(|w| list.is(w)) {
            links.push(list.downgrade());
        }
        list.push(id);
    }

    pub fn untrack(&self, id: BundleId, list: &BundleList) {
        if let Some(mut links) = self.links.get_mut(&id) {
            links.retain(|w| !list.is(w));
        }
        self.links.remove_if(&id, |_, links| links.is_empty());
        list.remove(id);
    }

    /// Bundle destroyed: clear it from every list that is still alive.
    pub fn on_destroy(&self, id: BundleId) {
        let Some((_, links)) = self.links.remove(&id) else {
            return;
        };
        for weak in links {
            if let Some(inner) = weak.upgrade() {
                inner.lock().retain(|b| *b != id);
            }
        }
    }

    pub fn is_tracked(&self, id: BundleId) -> bool {
        self.links.contains_key(&id)
    }
}
