use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::time::{timeout_at, Instant};

use tern_core::wire::{read_frame, Frame};
use tern_services::SendRequest;
use ternd::{ExitReason, OutputEngine};

use crate::*;

const PERIOD: u32 = 3;

/// Scenario C: an idle link carries exactly one heartbeat per period.
#[tokio::test(start_paused = true)]
async fn one_heartbeat_per_idle_period() {
    let node = Node::unlimited();
    let (connector, mut servers) = DuplexConnector::new();
    let start = Instant::now();
    let handle = tokio::spawn(
        OutputEngine::new(
            node.agent.clone(),
            node.outduct.clone(),
            connector,
            &stcp(100_000_000, PERIOD),
        )
        .run(),
    );

    let window = start + Duration::from_secs(2 * u64::from(PERIOD)) + Duration::from_millis(500);
    let mut server = timeout_at(window, servers.recv())
        .await
        .expect("first keepalive should open the connection")
        .unwrap();

    let mut beats = Vec::new();
    while let Ok(frame) = timeout_at(window, read_frame(&mut server)).await {
        assert_eq!(frame.unwrap(), Some(Frame::Keepalive));
        beats.push(start.elapsed());
    }

    assert_eq!(beats.len(), 2, "heartbeats at {beats:?}");
    assert_eq!(beats[1] - beats[0], Duration::from_secs(u64::from(PERIOD)));

    node.outduct.shutdown();
    let report = handle.await.unwrap().unwrap();
    assert_eq!(report.reason, ExitReason::Shutdown);
}

/// Bundle traffic counts as liveness: no heartbeat while bundles flow.
#[tokio::test(start_paused = true)]
async fn traffic_defers_the_heartbeat() {
    let node = Node::unlimited();
    let (connector, mut servers) = DuplexConnector::new();
    let handle = tokio::spawn(
        OutputEngine::new(
            node.agent.clone(),
            node.outduct.clone(),
            connector,
            &stcp(100_000_000, PERIOD),
        )
        .run(),
    );

    // One bundle a second for six seconds, starting before the first tick.
    let sender = {
        let node_bp = node.bp.clone();
        let sap = node.sap.clone();
        let store = node.store.clone();
        tokio::spawn(async move {
            for i in 0..6u8 {
                let adu = store.create(bytes::Bytes::from(vec![i; 16]));
                node_bp
                    .send(&sap, SendRequest::new(REMOTE_EID, adu))
                    .await
                    .unwrap();
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        })
    };

    let mut frames = tern_core::wire::FrameReader::new(servers.recv().await.unwrap());
    for _ in 0..6 {
        frames.next_bundle().await.unwrap().unwrap();
    }
    sender.await.unwrap();
    assert_eq!(frames.keepalives(), 0);

    node.outduct.shutdown();
    handle.await.unwrap().unwrap();
}

/// A heartbeat that cannot be written ends the duct and stops the engine.
#[tokio::test(start_paused = true)]
async fn failed_heartbeat_ends_the_duct() {
    let node = Node::unlimited();
    let connector = FailingConnector::new(0);
    let connects = connector.connects.clone();
    let drops = connector.drops.clone();

    let report = tokio::time::timeout(
        Duration::from_secs(30),
        OutputEngine::new(
            node.agent.clone(),
            node.outduct.clone(),
            connector,
            &stcp(100_000_000, PERIOD),
        )
        .run(),
    )
    .await
    .expect("engine should stop on its own")
    .unwrap();

    assert_eq!(report.reason, ExitReason::ConnectionLost);
    assert!(node.outduct.is_ended());
    assert_eq!(connects.load(Ordering::SeqCst), 1);
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}
