//! Convergence-layer output errors.

use tern_core::StoreError;
use tern_services::BpError;

#[derive(Debug, thiserror::Error)]
pub enum CloError {
    /// Bad duct name, unresolvable host, unknown duct. Fatal at startup.
    #[error("configuration: {0}")]
    Configuration(String),
    /// I/O failure or short write on the active connection.
    #[error("transport: {0}")]
    Transport(#[from] std::io::Error),
    #[error(transparent)]
    Bp(#[from] BpError),
}

impl From<StoreError> for CloError {
    fn from(e: StoreError) -> Self {
        CloError::Bp(BpError::Store(e))
    }
}
