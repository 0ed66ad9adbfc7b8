//! Keepalive actor.
//!
//! Ticks once a second. After `period` idle ticks it writes a zero-length
//! frame through the shared connection; the very first tick probes right
//! away. Bundle traffic restarts the idle count, and a tick that finds a
//! bundle mid-write skips its heartbeat. A failed heartbeat ends the duct,
//! which stops the output engine too.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};

use tern_core::EndToken;
use tern_services::Outduct;

use super::connection::{Connector, SharedConnection};

const TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepaliveExit {
    Stopped,
    ConnectionLost,
}

pub struct Keepalive<C: Connector> {
    connection: Arc<SharedConnection<C>>,
    outduct: Arc<Outduct>,
    period: u64,
    stop: EndToken,
}

impl<C: Connector> Keepalive<C> {
    pub fn new(
        connection: Arc<SharedConnection<C>>,
        outduct: Arc<Outduct>,
        period: u32,
        stop: EndToken,
    ) -> Self {
        Self {
            connection,
            outduct,
            period: u64::from(period.max(1)),
            stop,
        }
    }

    pub async fn run(self) -> KeepaliveExit {
        let mut ticker = interval_at(Instant::now() + TICK, TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut idle = self.period;
        // Counted from zero so a bundle sent before the first tick is seen.
        let mut seen = 0;

        loop {
            tokio::select! {
                biased;
                _ = self.stop.ended() => return KeepaliveExit::Stopped,
                _ = ticker.tick() => {}
            }

            let activity = self.connection.activity();
            if activity != seen {
                seen = activity;
                idle = 0;
                continue;
            }
            idle += 1;
            if idle < self.period {
                continue;
            }
            idle = 0;

            match self.connection.try_send_keepalive().await {
                None => tracing::trace!(duct = %self.outduct.id(), "bundle in flight, keepalive skipped"),
                Some(Ok(())) => tracing::trace!(duct = %self.outduct.id(), "keepalive sent"),
                Some(Err(e)) => {
                    tracing::warn!(duct = %self.outduct.id(), error = %e, "keepalive failed, ending duct");
                    self.outduct.shutdown();
                    return KeepaliveExit::ConnectionLost;
                }
            }
        }
    }
}
