//! Session API errors.
//!
//! Only permanent failures live here. "Not accepted right now", timeouts and
//! interrupts are ordinary outcomes and are returned as values.

use tern_core::{BundleId, Eid, EidError, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum BpError {
    #[error("local bundle agent is not running")]
    AttachFailure,
    #[error("not attached to the local bundle agent")]
    NotAttached,
    #[error("endpoint {0} already has an open SAP")]
    AlreadyOpen(Eid),
    #[error("malformed endpoint id: {0}")]
    MalformedEid(#[from] EidError),
    #[error("SAP for {0} is closed")]
    SapClosed(Eid),
    #[error("no route to {0}")]
    NoRoute(Eid),
    #[error("no such {protocol} duct: {name}")]
    UnknownDuct { protocol: String, name: String },
    #[error("CLO task is already started for duct {0}")]
    CloAlreadyRunning(String),
    #[error("extended COS ordinal {0} out of range (0..=254)")]
    InvalidOrdinal(u8),
    #[error("ADU is empty")]
    EmptyAdu,
    #[error("ADU of {0} bytes does not fit a 32-bit frame length")]
    AduTooLarge(u64),
    #[error("no such bundle: {0}")]
    UnknownBundle(BundleId),
    #[error("object store: {0}")]
    Store(#[from] StoreError),
}

impl BpError {
    /// Numeric status in the classic session API convention.
    pub fn status(&self) -> i32 {
        -1
    }
}
