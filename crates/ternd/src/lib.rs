//! ternd — convergence-layer output daemons for the tern bundle agent.

pub mod clo;
pub mod error;

use tern_core::config::StcpConfig;
use tern_services::Agent;

pub use clo::{CloReport, CloState, ExitReason, OutputEngine, RemoteAddr, TcpConnector};
pub use error::CloError;

/// Drain the stcp outduct `duct_name` onto a TCP connection to the host and
/// port it names. Returns once the duct is ended.
pub async fn run_stcpclo(
    agent: &Agent,
    duct_name: &str,
    config: &StcpConfig,
) -> Result<CloReport, CloError> {
    let outduct = agent
        .outduct("stcp", duct_name)
        .map_err(|e| CloError::Configuration(e.to_string()))?;
    let remote = RemoteAddr::parse(duct_name, config.default_port)?;
    let addr = remote.resolve().await?;
    tracing::debug!(duct = %outduct.id(), %addr, "remote induct resolved");

    OutputEngine::new(agent.clone(), outduct, TcpConnector::new(addr), config)
        .run()
        .await
}
