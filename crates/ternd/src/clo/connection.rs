//! The one transport connection of an stcp output daemon.
//!
//! The output engine and the keepalive actor both write through
//! `SharedConnection`, which owns the stream behind a single async mutex: a
//! heartbeat can never land in the middle of a bundle frame. The stream is
//! opened lazily by whichever writer needs it first and torn down on the
//! first I/O error. The connection also publishes the daemon's lifecycle
//! state on a `watch` channel.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use zerocopy::AsBytes;

use tern_core::wire::FrameHeader;
use tern_core::{ObjectStore, Zco, ZcoReader};
use tern_services::Throttle;

use crate::error::CloError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloState {
    Disconnected,
    Connected,
    ShuttingDown,
    Ended,
}

/// Opens the byte stream to the remote induct.
pub trait Connector: Send + Sync + 'static {
    type Stream: AsyncWrite + Unpin + Send + 'static;

    fn connect(&self) -> impl Future<Output = io::Result<Self::Stream>> + Send;
}

#[derive(Debug, Clone, Copy)]
pub struct TcpConnector {
    addr: SocketAddr,
}

impl TcpConnector {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }
}

impl Connector for TcpConnector {
    type Stream = TcpStream;

    fn connect(&self) -> impl Future<Output = io::Result<TcpStream>> + Send {
        let addr = self.addr;
        async move {
            let stream = TcpStream::connect(addr).await?;
            stream.set_nodelay(true)?;
            Ok(stream)
        }
    }
}

pub struct SharedConnection<C: Connector> {
    connector: C,
    stream: Mutex<Option<C::Stream>>,
    connected: AtomicBool,
    state: watch::Sender<CloState>,
    /// Bundles fully written; the keepalive actor watches it for traffic.
    activity: AtomicU64,
}

impl<C: Connector> SharedConnection<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            stream: Mutex::new(None),
            connected: AtomicBool::new(false),
            state: watch::Sender::new(CloState::Disconnected),
            activity: AtomicU64::new(0),
        }
    }

    /// Advisory only: the answer may be stale by the time it is used.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn state(&self) -> CloState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<CloState> {
        self.state.subscribe()
    }

    /// Shutdown and end are one-way; connect and teardown only move between
    /// the two running states.
    pub(crate) fn set_state(&self, next: CloState) {
        self.state.send_if_modified(|current| {
            let allowed = match (*current, next) {
                (CloState::Disconnected, CloState::Connected)
                | (CloState::Connected, CloState::Disconnected) => true,
                (CloState::Ended, _) => false,
                (_, CloState::ShuttingDown) => *current != CloState::ShuttingDown,
                (_, CloState::Ended) => true,
                _ => false,
            };
            if allowed {
                *current = next;
            }
            allowed
        });
    }

    pub fn activity(&self) -> u64 {
        self.activity.load(Ordering::Acquire)
    }

    async fn ensure<'a>(&self, slot: &'a mut Option<C::Stream>) -> io::Result<&'a mut C::Stream> {
        if slot.is_none() {
            *slot = Some(self.connector.connect().await?);
            self.connected.store(true, Ordering::Release);
            self.set_state(CloState::Connected);
            tracing::debug!("connection established");
        }
        slot.as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no connection"))
    }

    async fn teardown(&self, slot: &mut Option<C::Stream>) -> bool {
        let Some(mut stream) = slot.take() else {
            return false;
        };
        let _ = stream.shutdown().await;
        drop(stream);
        self.connected.store(false, Ordering::Release);
        self.set_state(CloState::Disconnected);
        tracing::debug!("connection closed");
        true
    }

    /// Write one bundle frame: length prefix, then the ADU in chunks of at
    /// most `buf.len()` bytes, each admitted by the throttle first. On any
    /// failure the connection is torn down before returning.
    pub async fn send_bundle(
        &self,
        store: &dyn ObjectStore,
        adu: Zco,
        length: u32,
        throttle: &Mutex<Throttle>,
        buf: &mut [u8],
    ) -> Result<(), CloError> {
        let mut slot = self.stream.lock().await;
        let result = match self.ensure(&mut slot).await {
            Ok(stream) => write_bundle(stream, store, adu, length, throttle, buf).await,
            Err(e) => Err(e.into()),
        };
        match result {
            Ok(()) => {
                self.activity.fetch_add(1, Ordering::AcqRel);
                Ok(())
            }
            Err(e) => {
                self.teardown(&mut slot).await;
                Err(e)
            }
        }
    }

    /// Send a zero-length frame unless a bundle is being written right now.
    /// None means the connection was busy.
    pub async fn try_send_keepalive(&self) -> Option<Result<(), CloError>> {
        let mut slot = self.stream.try_lock().ok()?;
        let result = match self.ensure(&mut slot).await {
            Ok(stream) => write_keepalive(stream).await,
            Err(e) => Err(e),
        };
        if result.is_err() {
            self.teardown(&mut slot).await;
        }
        Some(result.map_err(CloError::from))
    }

    /// Close the connection if one is open. Returns whether it was.
    pub async fn close(&self) -> bool {
        let mut slot = self.stream.lock().await;
        self.teardown(&mut slot).await
    }
}

async fn write_bundle<S: AsyncWrite + Unpin>(
    stream: &mut S,
    store: &dyn ObjectStore,
    adu: Zco,
    length: u32,
    throttle: &Mutex<Throttle>,
    buf: &mut [u8],
) -> Result<(), CloError> {
    stream.write_all(FrameHeader::new(length).as_bytes()).await?;

    let mut reader = ZcoReader::new(store, adu)?;
    let mut sent: u64 = 0;
    while sent < u64::from(length) {
        let n = reader.read_chunk(buf)?;
        if n == 0 {
            break;
        }
        throttle.lock().await.acquire(n as u64).await;
        stream.write_all(&buf[..n]).await?;
        sent += n as u64;
    }
    if sent < u64::from(length) {
        return Err(CloError::Transport(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("short bundle: {sent} of {length} bytes"),
        )));
    }
    stream.flush().await?;
    Ok(())
}

async fn write_keepalive<S: AsyncWrite + Unpin>(stream: &mut S) -> io::Result<()> {
    stream.write_all(FrameHeader::keepalive().as_bytes()).await?;
    stream.flush().await
}
