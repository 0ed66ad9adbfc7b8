//! Destination → outduct forwarding table. Longest matching eid prefix wins.

use parking_lot::RwLock;

use tern_core::Eid;

use crate::outduct::DuctId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub prefix: String,
    pub duct: DuctId,
}

#[derive(Debug, Default)]
pub struct RouteTable {
    routes: RwLock<Vec<Route>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the route for `prefix`.
    pub fn add(&self, prefix: impl Into<String>, duct: DuctId) {
        let prefix = prefix.into();
        let mut routes = self.routes.write();
        match routes.iter_mut().find(|r| r.prefix == prefix) {
            Some(existing) => existing.duct = duct,
            None => routes.push(Route { prefix, duct }),
        }
    }

    pub fn remove(&self, prefix: &str) -> bool {
        let mut routes = self.routes.write();
        let before = routes.len();
        routes.retain(|r| r.prefix != prefix);
        routes.len() != before
    }

    pub fn lookup(&self, dest: &Eid) -> Option<DuctId> {
        let dest = dest.as_str();
        self.routes
            .read()
            .iter()
            .filter(|r| dest.starts_with(r.prefix.as_str()))
            .max_by_key(|r| r.prefix.len())
            .map(|r| r.duct.clone())
    }

    pub fn len(&self) -> usize {
        self.routes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
