use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;

use tern_core::wire::FrameReader;
use tern_core::Priority;
use tern_services::{BpError, DuctId, OutductSettings, SendRequest};
use ternd::{run_stcpclo, CloError, ExitReason, OutputEngine};

use crate::*;

/// Scenario D: a write failure mid-bundle stops the engine and the
/// keepalive actor, and the connection is closed exactly once.
#[tokio::test(start_paused = true)]
async fn write_failure_stops_everything_cleanly() {
    let node = Node::unlimited();
    let body = vec![7u8; 1_000];
    let adu = node.adu(&body);
    let id = node
        .bp
        .send(&node.sap, SendRequest::new(REMOTE_EID, adu))
        .await
        .unwrap()
        .bundle()
        .unwrap();

    // Header plus part of the payload gets through.
    let connector = FailingConnector::new(100);
    let connects = connector.connects.clone();
    let drops = connector.drops.clone();

    let report = tokio::time::timeout(
        Duration::from_secs(30),
        OutputEngine::new(
            node.agent.clone(),
            node.outduct.clone(),
            connector,
            &stcp(100_000_000, 15),
        )
        .run(),
    )
    .await
    .expect("engine should stop on its own")
    .unwrap();

    assert_eq!(report.reason, ExitReason::ConnectionLost);
    assert_eq!(report.bundles_sent, 0);
    assert!(node.outduct.is_ended());
    assert_eq!(connects.load(Ordering::SeqCst), 1);
    assert_eq!(drops.load(Ordering::SeqCst), 1);

    // Not lost: back at the head of its tier for the next engine.
    assert!(node.agent.bundles().contains(id));
    assert_eq!(node.outduct.len(Priority::Standard), 1);
    assert_eq!(node.store.ref_count(adu), 1);
}

#[tokio::test]
async fn restarted_engine_sends_the_requeued_bundle() {
    let node = Node::unlimited();
    node.bp
        .send(&node.sap, SendRequest::new(REMOTE_EID, node.adu(b"survivor")))
        .await
        .unwrap();

    let report = OutputEngine::new(
        node.agent.clone(),
        node.outduct.clone(),
        FailingConnector::new(2),
        &stcp(100_000_000, 15),
    )
    .run()
    .await
    .unwrap();
    assert_eq!(report.reason, ExitReason::ConnectionLost);

    node.outduct.restart();
    let (connector, mut servers) = DuplexConnector::new();
    let handle = tokio::spawn(
        OutputEngine::new(
            node.agent.clone(),
            node.outduct.clone(),
            connector,
            &stcp(100_000_000, 15),
        )
        .run(),
    );
    let mut frames = FrameReader::new(servers.recv().await.unwrap());
    assert_eq!(&frames.next_bundle().await.unwrap().unwrap()[..], b"survivor");

    node.outduct.shutdown();
    assert_eq!(handle.await.unwrap().unwrap().bundles_sent, 1);
    assert_eq!(node.store.live_objects(), 0);
}

#[tokio::test]
async fn second_engine_on_a_duct_is_refused() {
    let node = Node::unlimited();
    let (connector, _servers) = DuplexConnector::new();
    let first = tokio::spawn(
        OutputEngine::new(
            node.agent.clone(),
            node.outduct.clone(),
            connector,
            &stcp(100_000_000, 15),
        )
        .run(),
    );
    // Let the first engine claim the duct.
    while node.outduct.claim_clo() {
        node.outduct.release_clo();
        tokio::task::yield_now().await;
    }

    let (connector, _servers2) = DuplexConnector::new();
    let second = OutputEngine::new(
        node.agent.clone(),
        node.outduct.clone(),
        connector,
        &stcp(100_000_000, 15),
    )
    .run()
    .await;
    assert!(matches!(
        second,
        Err(CloError::Bp(BpError::CloAlreadyRunning(_)))
    ));

    node.outduct.shutdown();
    first.await.unwrap().unwrap();
}

#[tokio::test]
async fn unknown_duct_is_a_configuration_error() {
    let node = Node::unlimited();
    let err = run_stcpclo(&node.agent, "nowhere.example", &stcp(0, 15))
        .await
        .unwrap_err();
    assert!(matches!(err, CloError::Configuration(_)));
}

/// Real TCP on loopback, through the same entry point the daemon uses.
#[tokio::test]
async fn bundles_reach_a_tcp_listener() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let duct = format!("127.0.0.1:{}", listener.local_addr()?.port());

    let node = Node::unlimited();
    node.agent.add_outduct(DuctId::new("stcp", &duct), OutductSettings::default());
    node.agent.add_route("ipn:3.", DuctId::new("stcp", &duct));
    for body in [&b"first"[..], &b"second"[..]] {
        node.bp
            .send(&node.sap, SendRequest::new("ipn:3.1", node.adu(body)))
            .await?;
    }

    let engine = {
        let agent = node.agent.clone();
        let duct = duct.clone();
        tokio::spawn(async move { run_stcpclo(&agent, &duct, &stcp(0, 15)).await })
    };

    let (socket, _) = tokio::time::timeout(Duration::from_secs(5), listener.accept())
        .await
        .context("engine never connected")??;
    let mut frames = FrameReader::new(socket);
    for expected in [&b"first"[..], &b"second"[..]] {
        let bundle = frames.next_bundle().await?.context("stream ended early")?;
        assert_eq!(&bundle[..], expected);
    }

    node.agent.outduct("stcp", &duct)?.shutdown();
    let report = engine.await??;
    assert_eq!(report.bundles_sent, 2);
    assert_eq!(report.reason, ExitReason::Shutdown);
    // Engine closed its end.
    assert!(frames.next_bundle().await?.is_none());
    Ok(())
}
