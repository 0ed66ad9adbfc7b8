//! Output engine — drains one outduct onto one stream connection.
//!
//! Loop: blocking dequeue, frame, transmit, yield. Ending the duct's
//! semaphore (signal, keepalive failure, transmission failure) makes the
//! dequeue return `Shutdown`; the engine then stops the keepalive actor,
//! closes the connection once and returns. Its state (see `CloState`) can
//! be watched through `OutputEngine::state` while it runs.

use std::sync::Arc;

use tern_core::config::StcpConfig;
use tern_core::{EndToken, Priority};
use tokio::sync::watch;

use tern_services::{Agent, BpError, BundleRecord, Dequeued, Outduct, QueuedBundle};

use super::connection::{CloState, Connector, SharedConnection};
use super::keepalive::{Keepalive, KeepaliveExit};
use crate::error::CloError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The duct was ended from outside.
    Shutdown,
    /// A bundle or keepalive write failed.
    ConnectionLost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloReport {
    pub bundles_sent: u64,
    pub bytes_sent: u64,
    pub reason: ExitReason,
}

pub struct OutputEngine<C: Connector> {
    agent: Agent,
    outduct: Arc<Outduct>,
    connection: Arc<SharedConnection<C>>,
    config: StcpConfig,
}

impl<C: Connector> OutputEngine<C> {
    pub fn new(agent: Agent, outduct: Arc<Outduct>, connector: C, config: &StcpConfig) -> Self {
        Self {
            agent,
            outduct,
            connection: Arc::new(SharedConnection::new(connector)),
            config: config.clone(),
        }
    }

    pub fn connection(&self) -> Arc<SharedConnection<C>> {
        self.connection.clone()
    }

    /// Follows the engine through `run`: Disconnected until a writer
    /// connects, ShuttingDown once the duct ends, Ended when `run` returns.
    pub fn state(&self) -> watch::Receiver<CloState> {
        self.connection.subscribe()
    }

    /// Run until the duct is ended. Fails only if another engine already
    /// drains this duct.
    pub async fn run(self) -> Result<CloReport, CloError> {
        if !self.outduct.claim_clo() {
            return Err(BpError::CloAlreadyRunning(self.outduct.id().to_string()).into());
        }
        let report = self.drive().await;
        self.outduct.release_clo();
        Ok(report)
    }

    async fn drive(&self) -> CloReport {
        let duct = self.outduct.id().clone();
        let rate = match self.outduct.settings().nominal_rate {
            0 => self.config.effective_rate(),
            r => r,
        };
        let chunk = {
            let mut throttle = self.outduct.throttle().lock().await;
            throttle.set_rate(rate);
            self.config.buffer_size.max(1).min(throttle.burst() as usize)
        };
        let mut buf = vec![0u8; chunk];

        let stop = EndToken::new();
        let keepalive = tokio::spawn(
            Keepalive::new(
                self.connection.clone(),
                self.outduct.clone(),
                self.config.keepalive_period,
                stop.clone(),
            )
            .run(),
        );

        tracing::info!(%duct, rate, "stcpclo is running");
        let mut report = CloReport {
            bundles_sent: 0,
            bytes_sent: 0,
            reason: ExitReason::Shutdown,
        };

        loop {
            let (tier, entry) = match self.outduct.dequeue().await {
                Dequeued::Shutdown => break,
                Dequeued::Bundle(tier, entry) => (tier, entry),
            };
            let Some(record) = self.agent.claim_for_transmission(&entry) else {
                continue;
            };
            match self.transmit(&record, &mut buf).await {
                Ok(()) => {
                    report.bundles_sent += 1;
                    report.bytes_sent += record.length;
                    self.agent.complete_transmission(&record);
                    tracing::debug!(%duct, bundle = %record.id, bytes = record.length, "bundle sent");
                }
                Err(e) => {
                    tracing::warn!(%duct, bundle = %record.id, error = %e, "transmission failed, ending duct");
                    report.reason = ExitReason::ConnectionLost;
                    self.abandon(tier, entry, &record, &e);
                    self.outduct.shutdown();
                }
            }
            tokio::task::yield_now().await;
        }

        self.connection.set_state(CloState::ShuttingDown);
        stop.end();
        match keepalive.await {
            Ok(KeepaliveExit::ConnectionLost) => report.reason = ExitReason::ConnectionLost,
            Ok(KeepaliveExit::Stopped) => {}
            Err(e) => tracing::error!(%duct, error = %e, "keepalive task failed"),
        }
        self.connection.close().await;
        self.connection.set_state(CloState::Ended);
        tracing::info!(%duct, sent = report.bundles_sent, reason = ?report.reason, "stcpclo duct has ended");
        report
    }

    async fn transmit(&self, record: &BundleRecord, buf: &mut [u8]) -> Result<(), CloError> {
        // Sessions refuse ADUs this long, so no queued bundle gets here.
        let length =
            u32::try_from(record.length).map_err(|_| BpError::AduTooLarge(record.length))?;
        self.connection
            .send_bundle(
                self.agent.store().as_ref(),
                record.adu,
                length,
                self.outduct.throttle(),
                buf,
            )
            .await
    }

    /// A bundle whose ADU is gone or cannot be framed is dropped; anything
    /// else goes back to the head of its tier for the next engine.
    fn abandon(&self, tier: Priority, entry: QueuedBundle, record: &BundleRecord, e: &CloError) {
        if matches!(e, CloError::Bp(BpError::Store(_) | BpError::AduTooLarge(_))) {
            self.agent.bundles().destroy(record.id);
        } else {
            self.agent.requeue_after_failure(&self.outduct, tier, entry);
        }
    }
}
