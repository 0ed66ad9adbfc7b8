//! stcpclo — stcp convergence-layer output daemon.
//!
//! Usage: stcpclo <remote host name>[:<port number>]
//!
//! The agent and its `MemoryStore` are in-process stand-ins: no other
//! process can enqueue to them, so a lone daemon only sends keepalives.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};

use tern_core::config::TernConfig;
use tern_services::{Agent, Bp, MemoryStore, Outduct};
use ternd::{run_stcpclo, CloReport};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let Some(duct_name) = std::env::args().nth(1) else {
        println!("Usage: stcpclo <remote host name>[:<port number>]");
        return ExitCode::SUCCESS;
    };

    match run(&duct_name).await {
        Ok(report) => {
            tracing::info!(
                bundles = report.bundles_sent,
                bytes = report.bytes_sent,
                reason = ?report.reason,
                "stcpclo exiting"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("stcpclo failed: {e:#}");
            eprintln!("stcpclo: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(duct_name: &str) -> Result<CloReport> {
    if let Err(e) = TernConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = TernConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        TernConfig::default()
    });

    let agent = Agent::from_config(&config, Arc::new(MemoryStore::new()))
        .context("can't build bundle agent")?;
    agent.start();
    Bp::new(agent.clone())
        .attach()
        .context("stcpclo can't attach to BP")?;

    let outduct = agent
        .outduct("stcp", duct_name)
        .with_context(|| format!("no such stcp duct: {duct_name}"))?;
    tokio::spawn(shutdown_on_signal(outduct));

    run_stcpclo(&agent, duct_name, &config.stcp)
        .await
        .context("stcpclo stopped")
}

/// SIGTERM and ctrl-c end the duct; the engine notices on its next dequeue.
async fn shutdown_on_signal(outduct: Arc<Outduct>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "can't install SIGTERM handler");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await.ok();

    tracing::info!(duct = %outduct.id(), "shutdown signal received");
    outduct.shutdown();
}
