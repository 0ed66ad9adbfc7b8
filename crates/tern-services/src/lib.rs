//! tern-services — the local bundle agent: session API, outduct queues and
//! scheduling, throttling, delivery channels and bundle tracking.

pub mod agent;
pub mod bundles;
pub mod delivery;
pub mod error;
pub mod object_store;
pub mod outduct;
pub mod queue;
pub mod routes;
pub mod sap;
pub mod scheduler;
pub mod session;
pub mod throttle;
pub mod tracking;

pub use agent::Agent;
pub use bundles::{BundleRecord, BundleTable};
pub use delivery::{Delivery, DeliveryChannel, Payload, ReceiveTimeout};
pub use error::BpError;
pub use object_store::MemoryStore;
pub use outduct::{Dequeued, DuctId, Outduct, OutductSettings};
pub use queue::{MemoryQueues, OutductQueues, QueuedBundle};
pub use routes::RouteTable;
pub use sap::Sap;
pub use scheduler::TierScheduler;
pub use session::{Bp, Rejection, SendMode, SendOutcome, SendRequest};
pub use throttle::Throttle;
pub use tracking::{BundleList, TrackingRegistry};
