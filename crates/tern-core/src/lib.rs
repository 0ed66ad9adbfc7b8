//! tern-core — shared types, framing, and coordination primitives.
//! All other tern crates depend on this one.

pub mod bundle;
pub mod config;
pub mod coord;
pub mod eid;
pub mod wire;
pub mod zco;

pub use bundle::{
    BundleId, CosFlags, CustodySwitch, ExtendedCos, Priority, SrrFlags, Timestamp, TimestampClock,
};
pub use coord::{BinarySemaphore, EndState, EndToken, SemTake};
pub use eid::{Eid, EidError};
pub use zco::{ObjectStore, SharedStore, StoreError, Zco, ZcoReader};
