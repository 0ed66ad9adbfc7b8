use std::time::Duration;

use tern_core::{ObjectStore, Priority};
use tern_services::{
    BpError, BundleList, Delivery, OutductSettings, ReceiveTimeout, Rejection, SendOutcome,
    SendRequest,
};

use crate::*;

fn limited(max_queued_bytes: u64) -> Node {
    Node::new(OutductSettings {
        nominal_rate: 0,
        max_queued_bytes,
    })
}

#[tokio::test]
async fn non_blocking_rejection_leaves_queues_alone() {
    let node = limited(10);
    let first = node.adu(b"12345678");
    let outcome = node
        .bp
        .send(&node.sap, SendRequest::new(REMOTE_EID, first).non_blocking())
        .await
        .unwrap();
    assert_eq!(outcome.status(), 1);

    let second = node.adu(b"87654321");
    let outcome = node
        .bp
        .send(&node.sap, SendRequest::new(REMOTE_EID, second).non_blocking())
        .await
        .unwrap();
    assert_eq!(outcome, SendOutcome::NotAccepted(Rejection::NoCapacity));
    assert_eq!(outcome.status(), 0);

    assert_eq!(node.outduct.len(Priority::Standard), 1);
    assert_eq!(node.outduct.queued_bytes(), 8);
    assert_eq!(node.agent.bundles().len(), 1);
    assert_eq!(node.store.ref_count(second), 1);
}

#[tokio::test]
async fn blocking_send_waits_for_room() {
    let node = limited(10);
    node.bp
        .send(&node.sap, SendRequest::new(REMOTE_EID, node.adu(b"12345678")))
        .await
        .unwrap();

    let waiting = {
        let bp = node.bp.clone();
        let sap = node.sap.clone();
        let adu = node.adu(b"abcdefgh");
        tokio::spawn(async move { bp.send(&sap, SendRequest::new(REMOTE_EID, adu)).await })
    };
    tokio::task::yield_now().await;
    assert!(!waiting.is_finished());

    // Draining the duct makes room.
    node.outduct.try_dequeue().unwrap();
    let outcome = tokio::time::timeout(Duration::from_secs(1), waiting)
        .await
        .expect("send should proceed once there is room")
        .unwrap()
        .unwrap();
    assert_eq!(outcome.status(), 1);
    assert_eq!(node.outduct.len(Priority::Standard), 1);
}

#[tokio::test]
async fn closing_the_sap_releases_a_blocked_send() {
    let node = limited(4);
    node.bp
        .send(&node.sap, SendRequest::new(REMOTE_EID, node.adu(b"full")))
        .await
        .unwrap();

    let adu = node.adu(b"more");
    let waiting = {
        let bp = node.bp.clone();
        let sap = node.sap.clone();
        tokio::spawn(async move { bp.send(&sap, SendRequest::new(REMOTE_EID, adu)).await })
    };
    tokio::task::yield_now().await;
    node.sap.close();

    let result = tokio::time::timeout(Duration::from_secs(1), waiting)
        .await
        .expect("close should wake the sender")
        .unwrap();
    assert!(matches!(result, Err(BpError::SapClosed(_))));
    // Caller keeps its reference; nothing was queued.
    assert_eq!(node.store.ref_count(adu), 1);
    assert_eq!(node.outduct.len(Priority::Standard), 1);
}

#[tokio::test]
async fn malformed_eids_are_not_accepted() {
    let node = Node::unlimited();
    let adu = node.adu(b"x");
    let outcome = node
        .bp
        .send(&node.sap, SendRequest::new("ipn:not-a-node", adu))
        .await
        .unwrap();
    assert_eq!(outcome, SendOutcome::NotAccepted(Rejection::MalformedEid));

    let mut request = SendRequest::new(REMOTE_EID, adu);
    request.report_to = Some("missing-scheme".into());
    let outcome = node.bp.send(&node.sap, request).await.unwrap();
    assert_eq!(outcome, SendOutcome::NotAccepted(Rejection::MalformedEid));
    assert!(node.agent.bundles().is_empty());
}

#[tokio::test]
async fn poll_returns_timed_out_immediately() {
    let node = Node::unlimited();
    let got = tokio::time::timeout(
        Duration::from_millis(100),
        node.sap.receive(ReceiveTimeout::from_secs(0)),
    )
    .await
    .expect("poll must not block")
    .unwrap();
    assert_eq!(got, Delivery::ReceptionTimedOut);
}

#[tokio::test(start_paused = true)]
async fn bounded_receive_times_out() {
    let node = Node::unlimited();
    let got = node.sap.receive(ReceiveTimeout::from_secs(2)).await.unwrap();
    assert_eq!(got, Delivery::ReceptionTimedOut);
}

#[tokio::test]
async fn interrupt_wakes_a_blocked_receive_only_once() {
    let node = Node::unlimited();
    let receiver = {
        let sap = node.sap.clone();
        tokio::spawn(async move { sap.receive(ReceiveTimeout::Forever).await })
    };
    // An interrupt with nobody waiting is lost, so keep poking until the
    // receiver has registered and returned.
    while !receiver.is_finished() {
        tokio::task::yield_now().await;
        node.sap.interrupt();
        tokio::task::yield_now().await;
    }
    let got = tokio::time::timeout(Duration::from_secs(1), receiver)
        .await
        .expect("interrupt should wake the receiver")
        .unwrap()
        .unwrap();
    assert_eq!(got, Delivery::ReceptionInterrupted);

    // Not sticky: the SAP works normally afterwards.
    node.sap.interrupt();
    let got = node.sap.receive(ReceiveTimeout::Poll).await.unwrap();
    assert_eq!(got, Delivery::ReceptionTimedOut);
}

#[tokio::test]
async fn close_interrupts_receivers_and_frees_the_endpoint() {
    let node = Node::unlimited();
    let receiver = {
        let sap = node.sap.clone();
        tokio::spawn(async move { sap.receive(ReceiveTimeout::Forever).await })
    };
    tokio::task::yield_now().await;
    node.bp.close(&node.sap);

    let got = receiver.await.unwrap().unwrap();
    assert_eq!(got, Delivery::ReceptionInterrupted);
    assert!(matches!(
        node.sap.receive(ReceiveTimeout::Poll).await,
        Err(BpError::SapClosed(_))
    ));

    let reopened = node.bp.open(LOCAL_EID).unwrap();
    assert!(!reopened.is_closed());
}

#[tokio::test]
async fn local_deliveries_arrive_in_order_and_release_cleanly() {
    let node = Node::unlimited();
    let inbox = node.bp.open("ipn:1.7").unwrap();

    let priorities = [Priority::Bulk, Priority::Expedited, Priority::Standard];
    for (i, priority) in priorities.into_iter().enumerate() {
        let request = SendRequest::new("ipn:1.7", node.adu(&[i as u8; 4])).priority(priority);
        node.bp.send(&node.sap, request).await.unwrap();
    }
    assert_eq!(inbox.pending(), 3);

    // Arrival order, not priority order.
    let mut kept = None;
    for i in 0..3u8 {
        let delivery = inbox.receive(ReceiveTimeout::Poll).await.unwrap();
        let payload = delivery.payload().cloned().expect("payload");
        assert_eq!(payload.source.as_str(), LOCAL_EID);
        assert_eq!(&node.store.contents(payload.adu).unwrap()[..], &[i; 4]);
        // Keep the last ADU, release the rest.
        let keep = i == 2;
        if let Some(zco) = inbox.release_delivery(delivery, !keep) {
            kept = Some(zco);
        }
    }

    let kept = kept.expect("last ADU handed back");
    assert_eq!(node.store.live_objects(), 1);
    assert_eq!(node.store.live_bytes(), 4);
    node.store.release(kept).unwrap();
    assert_eq!(node.store.live_objects(), 0);
}

#[tokio::test]
async fn unreleased_deliveries_are_visible_as_live_objects() {
    let node = Node::unlimited();
    let inbox = node.bp.open("ipn:1.7").unwrap();
    node.bp
        .send(&node.sap, SendRequest::new("ipn:1.7", node.adu(b"leak")))
        .await
        .unwrap();

    let delivery = inbox.receive(ReceiveTimeout::Poll).await.unwrap();
    let adu = delivery.payload().unwrap().adu;
    drop(delivery);
    assert_eq!(node.store.ref_count(adu), 1, "dropping a delivery does not release it");
    assert_eq!(node.store.live_bytes(), 4);
}

#[tokio::test]
async fn tracking_clears_when_a_bundle_is_cancelled() {
    let node = Node::unlimited();
    let mine = BundleList::new();
    let audit = BundleList::new();

    let mut ids = Vec::new();
    for body in [&b"a"[..], &b"b"[..], &b"c"[..]] {
        let id = node
            .bp
            .send(&node.sap, SendRequest::new(REMOTE_EID, node.adu(body)))
            .await
            .unwrap()
            .bundle()
            .unwrap();
        node.bp.track(id, &mine).unwrap();
        ids.push(id);
    }
    node.bp.track(ids[1], &audit).unwrap();

    node.bp.cancel(ids[1]).unwrap();
    assert_eq!(mine.ids(), vec![ids[0], ids[2]]);
    assert!(audit.is_empty());
    assert_eq!(node.outduct.len(Priority::Standard), 2);

    node.bp.untrack(ids[0], &mine);
    assert_eq!(mine.ids(), vec![ids[2]]);
    // Untracking does not touch the bundle.
    assert!(node.agent.bundles().contains(ids[0]));
}

#[tokio::test]
async fn detached_session_cannot_send() {
    let node = Node::unlimited();
    node.bp.detach();
    let adu = node.adu(b"x");
    assert!(matches!(
        node.bp.send(&node.sap, SendRequest::new(REMOTE_EID, adu)).await,
        Err(BpError::NotAttached)
    ));
    node.bp.attach().unwrap();
    assert_eq!(
        node.bp
            .send(&node.sap, SendRequest::new(REMOTE_EID, adu))
            .await
            .unwrap()
            .status(),
        1
    );
}
