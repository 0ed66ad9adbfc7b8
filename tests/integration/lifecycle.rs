use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use tokio::io::{AsyncWrite, DuplexStream};
use tokio::sync::watch;

use tern_core::wire::FrameReader;
use tern_core::Priority;
use tern_services::SendRequest;
use ternd::clo::Connector;
use ternd::{CloState, ExitReason, OutputEngine};

use crate::*;

/// Holds `poll_shutdown` until opened, so the engine lingers in teardown.
#[derive(Default)]
struct Gate {
    open: AtomicBool,
    waker: Mutex<Option<Waker>>,
}

impl Gate {
    fn open(&self) {
        self.open.store(true, Ordering::SeqCst);
        if let Some(waker) = self.waker.lock().unwrap().take() {
            waker.wake();
        }
    }
}

struct GatedStream {
    inner: DuplexStream,
    gate: Arc<Gate>,
}

impl AsyncWrite for GatedStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if !self.gate.open.load(Ordering::SeqCst) {
            *self.gate.waker.lock().unwrap() = Some(cx.waker().clone());
            if !self.gate.open.load(Ordering::SeqCst) {
                return Poll::Pending;
            }
        }
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

struct GatedConnector {
    stream: Mutex<Option<GatedStream>>,
}

impl Connector for GatedConnector {
    type Stream = GatedStream;

    fn connect(&self) -> impl Future<Output = io::Result<GatedStream>> + Send {
        let stream = self.stream.lock().unwrap().take();
        async move { stream.ok_or_else(|| io::Error::new(io::ErrorKind::ConnectionRefused, "used")) }
    }
}

async fn reach(states: &mut watch::Receiver<CloState>, want: CloState) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while *states.borrow_and_update() != want {
            states.changed().await.expect("engine dropped its state");
        }
    })
    .await
    .unwrap_or_else(|_| panic!("engine never reached {want:?}"));
}

#[tokio::test]
async fn engine_state_follows_connect_and_shutdown() {
    let node = Node::unlimited();
    node.bp
        .send(
            &node.sap,
            SendRequest::new(REMOTE_EID, node.adu(b"hello")).priority(Priority::Bulk),
        )
        .await
        .unwrap();

    let (client, server) = tokio::io::duplex(1 << 16);
    let gate = Arc::new(Gate::default());
    let connector = GatedConnector {
        stream: Mutex::new(Some(GatedStream {
            inner: client,
            gate: gate.clone(),
        })),
    };
    let engine = OutputEngine::new(
        node.agent.clone(),
        node.outduct.clone(),
        connector,
        &stcp(100_000_000, 60),
    );
    let mut states = engine.state();
    assert_eq!(*states.borrow(), CloState::Disconnected);
    let handle = tokio::spawn(engine.run());

    let mut frames = FrameReader::new(server);
    assert_eq!(&frames.next_bundle().await.unwrap().unwrap()[..], b"hello");
    reach(&mut states, CloState::Connected).await;

    node.outduct.shutdown();
    reach(&mut states, CloState::ShuttingDown).await;
    tokio::task::yield_now().await;
    assert!(!handle.is_finished(), "close is held open by the gate");

    gate.open();
    let report = handle.await.unwrap().unwrap();
    assert_eq!(report.reason, ExitReason::Shutdown);
    assert_eq!(report.bundles_sent, 1);
    assert_eq!(*states.borrow(), CloState::Ended);
}

#[tokio::test]
async fn refused_engine_never_leaves_disconnected() {
    let node = Node::unlimited();
    assert!(node.outduct.claim_clo());

    let (connector, _servers) = DuplexConnector::new();
    let engine = OutputEngine::new(
        node.agent.clone(),
        node.outduct.clone(),
        connector,
        &stcp(100_000_000, 60),
    );
    let states = engine.state();
    assert!(engine.run().await.is_err());
    assert_eq!(*states.borrow(), CloState::Disconnected);
    node.outduct.release_clo();
}
