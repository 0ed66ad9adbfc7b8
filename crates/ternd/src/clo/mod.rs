//! stcp convergence-layer output: one outduct, one TCP connection.

pub mod connection;
pub mod engine;
pub mod keepalive;
pub mod remote;

pub use connection::{CloState, Connector, SharedConnection, TcpConnector};
pub use engine::{CloReport, ExitReason, OutputEngine};
pub use keepalive::{Keepalive, KeepaliveExit};
pub use remote::RemoteAddr;
