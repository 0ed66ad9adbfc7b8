//! In-memory object store.
//!
//! Stands in for the durable store inside one process. Objects are `Bytes`,
//! so handing out byte ranges never copies the whole ADU, and every object
//! carries a reference count so leaked deliveries stay visible.

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use tern_core::{ObjectStore, StoreError, Zco};

#[derive(Debug)]
struct StoredObject {
    data: Bytes,
    refs: usize,
}

#[derive(Debug)]
pub struct MemoryStore {
    objects: DashMap<Zco, StoredObject>,
    next_id: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            objects: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Objects still alive (for leak checks).
    pub fn live_objects(&self) -> usize {
        self.objects.len()
    }

    /// Total payload bytes held.
    pub fn live_bytes(&self) -> u64 {
        self.objects.iter().map(|o| o.data.len() as u64).sum()
    }

    /// Whole contents of an object. Cheap: clones the `Bytes` handle.
    pub fn contents(&self, zco: Zco) -> Option<Bytes> {
        self.objects.get(&zco).map(|o| o.data.clone())
    }
}

impl ObjectStore for MemoryStore {
    fn create(&self, data: Bytes) -> Zco {
        let zco = Zco(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.objects.insert(zco, StoredObject { data, refs: 1 });
        tracing::trace!(%zco, "object created");
        zco
    }

    fn length(&self, zco: Zco) -> Result<u64, StoreError> {
        self.objects
            .get(&zco)
            .map(|o| o.data.len() as u64)
            .ok_or(StoreError::UnknownObject(zco))
    }

    fn read(&self, zco: Zco, offset: u64, buf: &mut [u8]) -> Result<usize, StoreError> {
        let obj = self
            .objects
            .get(&zco)
            .ok_or(StoreError::UnknownObject(zco))?;
        let length = obj.data.len() as u64;
        if offset > length {
            return Err(StoreError::OffsetOutOfRange {
                zco,
                offset,
                length,
            });
        }
        let start = offset as usize;
        let n = buf.len().min(obj.data.len() - start);
        buf[..n].copy_from_slice(&obj.data[start..start + n]);
        Ok(n)
    }

    fn add_ref(&self, zco: Zco) -> Result<(), StoreError> {
        let mut obj = self
            .objects
            .get_mut(&zco)
            .ok_or(StoreError::UnknownObject(zco))?;
        obj.refs += 1;
        Ok(())
    }

    fn release(&self, zco: Zco) -> Result<(), StoreError> {
        match self.objects.entry(zco) {
            Entry::Vacant(_) => Err(StoreError::UnknownObject(zco)),
            Entry::Occupied(mut entry) => {
                entry.get_mut().refs -= 1;
                if entry.get().refs == 0 {
                    entry.remove();
                    tracing::trace!(%zco, "object destroyed");
                }
                Ok(())
            }
        }
    }

    fn ref_count(&self, zco: Zco) -> usize {
        self.objects.get(&zco).map(|o| o.refs).unwrap_or(0)
    }
}
