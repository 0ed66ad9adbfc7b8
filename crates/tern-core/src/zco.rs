//! Durable object store contract.
//!
//! ADUs live in a store shared by every cooperating process. The engine only
//! ever holds opaque zero-copy handles (`Zco`) and reads them in bounded
//! chunks; it never assumes it owns the object. Objects are reference
//! counted and destroyed when the last reference is released.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Zero-copy object handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Zco(pub u64);

impl fmt::Display for Zco {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "zco#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("no such object: {0}")]
    UnknownObject(Zco),
    #[error("read offset {offset} beyond end of {zco} ({length} bytes)")]
    OffsetOutOfRange { zco: Zco, offset: u64, length: u64 },
}

/// What the engine requires from the durable object store.
pub trait ObjectStore: Send + Sync {
    /// Store `data` as a new object holding one reference.
    fn create(&self, data: Bytes) -> Zco;

    fn length(&self, zco: Zco) -> Result<u64, StoreError>;

    /// Copy up to `buf.len()` bytes starting at `offset`. Returns the number
    /// of bytes copied; zero at end of object.
    fn read(&self, zco: Zco, offset: u64, buf: &mut [u8]) -> Result<usize, StoreError>;

    fn add_ref(&self, zco: Zco) -> Result<(), StoreError>;

    /// Drop one reference, destroying the object when none remain.
    fn release(&self, zco: Zco) -> Result<(), StoreError>;

    /// Outstanding references; zero once the object is gone.
    fn ref_count(&self, zco: Zco) -> usize;
}

pub type SharedStore = Arc<dyn ObjectStore>;

/// Sequential bounded reader over one object.
pub struct ZcoReader<'a> {
    store: &'a dyn ObjectStore,
    zco: Zco,
    offset: u64,
    length: u64,
}

impl<'a> ZcoReader<'a> {
    pub fn new(store: &'a dyn ObjectStore, zco: Zco) -> Result<Self, StoreError> {
        let length = store.length(zco)?;
        Ok(Self {
            store,
            zco,
            offset: 0,
            length,
        })
    }

    pub fn remaining(&self) -> u64 {
        self.length - self.offset
    }

    /// Fill at most `buf.len()` bytes. Zero means the object is exhausted.
    pub fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, StoreError> {
        if self.remaining() == 0 {
            return Ok(0);
        }
        let n = self.store.read(self.zco, self.offset, buf)?;
        self.offset += n as u64;
        Ok(n)
    }
}
