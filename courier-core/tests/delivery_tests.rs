// ABOUTME: Integration tests for OutboundQueue
// ABOUTME: Covers offline queueing, reconnect ordering, failure handling and drain exclusion

mod common;

use common::MockTransport;
use courier_core::OutboundQueue;
use std::sync::Arc;
use std::time::Duration;

fn queue_for(transport: &Arc<MockTransport>) -> Arc<OutboundQueue> {
    Arc::new(OutboundQueue::new(transport.clone()))
}

#[tokio::test]
async fn test_connected_send_is_immediate() {
    let transport = MockTransport::new("mock:");
    let queue = queue_for(&transport);

    queue.send("mock:1", "hello").await;

    assert_eq!(transport.sent(), vec![("mock:1".to_string(), "hello".to_string())]);
    assert_eq!(queue.pending(), 0);
}

#[tokio::test]
async fn test_offline_messages_wait_for_reconnect() {
    let transport = MockTransport::offline("mock:");
    let queue = queue_for(&transport);

    queue.send("mock:1", "a").await;
    queue.send("mock:2", "b").await;
    assert!(transport.sent().is_empty());
    assert_eq!(queue.pending(), 2);

    transport.set_connected(true);
    let sent = queue.mark_connected().await;

    assert_eq!(sent, 2);
    assert_eq!(transport.sent_texts(), vec!["a", "b"]);
    assert_eq!(queue.pending(), 0);
}

#[tokio::test]
async fn test_order_preserved_across_disconnect() {
    let transport = MockTransport::new("mock:");
    let queue = queue_for(&transport);

    queue.send("mock:1", "first").await;
    transport.set_connected(false);
    queue.mark_disconnected();
    queue.send("mock:1", "second").await;
    queue.send("mock:1", "third").await;
    assert_eq!(transport.sent_texts(), vec!["first"]);

    transport.set_connected(true);
    queue.mark_connected().await;
    assert_eq!(transport.sent_texts(), vec!["first", "second", "third"]);
}

#[tokio::test]
async fn test_failed_direct_send_is_queued_not_surfaced() {
    let transport = MockTransport::new("mock:");
    let queue = queue_for(&transport);

    transport.fail_next(1, false);
    queue.send("mock:1", "a").await;
    assert_eq!(queue.pending(), 1);
    assert!(transport.sent().is_empty());

    // A later send queues behind the waiting item and drains both in order
    queue.send("mock:1", "b").await;
    assert_eq!(transport.sent_texts(), vec!["a", "b"]);
    assert_eq!(queue.pending(), 0);
}

#[tokio::test]
async fn test_drain_failure_while_connected_drops_item() {
    let transport = MockTransport::offline("mock:");
    let queue = queue_for(&transport);
    queue.send("mock:1", "a").await;
    queue.send("mock:1", "b").await;

    transport.set_connected(true);
    transport.fail_next(1, false);
    let sent = queue.mark_connected().await;

    assert_eq!(sent, 1);
    assert_eq!(transport.sent_texts(), vec!["b"]);
    assert_eq!(queue.pending(), 0);
}

#[tokio::test]
async fn test_drain_failure_while_offline_keeps_item_at_head() {
    let transport = MockTransport::offline("mock:");
    let queue = queue_for(&transport);
    queue.send("mock:1", "a").await;
    queue.send("mock:1", "b").await;

    transport.set_connected(true);
    transport.fail_next(1, true);
    let sent = queue.mark_connected().await;
    assert_eq!(sent, 0);
    assert_eq!(queue.pending(), 2);

    transport.set_connected(true);
    let sent = queue.mark_connected().await;
    assert_eq!(sent, 2);
    assert_eq!(transport.sent_texts(), vec!["a", "b"]);
}

#[tokio::test]
async fn test_concurrent_flush_returns_immediately() {
    let transport = MockTransport::offline("mock:");
    let queue = queue_for(&transport);
    queue.send("mock:1", "a").await;
    queue.send("mock:1", "b").await;

    transport.set_connected(true);
    transport.hold_sends();
    let draining = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.mark_connected().await })
    };
    transport.wait_for_held_send().await;

    // A second drain does nothing while the first holds the queue
    assert_eq!(queue.flush().await, 0);

    // Enqueue is not blocked by the running drain
    tokio::time::timeout(Duration::from_secs(1), queue.send("mock:1", "c"))
        .await
        .expect("send must not wait for the drain");

    transport.release();
    let total = draining.await.unwrap();
    assert_eq!(total, 3);
    assert_eq!(transport.sent_texts(), vec!["a", "b", "c"]);
    assert_eq!(queue.pending(), 0);
}

#[tokio::test]
async fn test_mark_disconnected_stops_direct_sends() {
    let transport = MockTransport::new("mock:");
    let queue = queue_for(&transport);
    queue.mark_disconnected();
    assert!(!queue.is_connected());

    queue.send("mock:1", "later").await;
    assert!(transport.sent().is_empty());
    assert_eq!(queue.pending(), 1);
}

#[tokio::test]
async fn test_transport_reporting_unreachable_holds_later_sends() {
    let transport = MockTransport::new("mock:");
    let queue = queue_for(&transport);

    // The send fails and the transport flags itself offline; the queue was never told
    transport.fail_next(1, true);
    queue.send("mock:1", "a").await;
    queue.send("mock:1", "b").await;
    assert!(queue.is_connected());
    assert!(transport.sent().is_empty());
    assert_eq!(queue.pending(), 2);

    transport.set_connected(true);
    assert_eq!(queue.mark_connected().await, 2);
    assert_eq!(transport.sent_texts(), vec!["a", "b"]);
}
