use std::time::{Duration, Instant};

use crate::events::ChatEvent;
use crate::manager::{MAX_RETRY_COUNT, Priority, QueuedMessage};

use super::common::TestNode;

/// Requeuing a failed delivery past `MAX_RETRY_COUNT` gives up and reports
/// failure instead of retrying forever.
#[tokio::test]
async fn requeue_past_max_retry_count_reports_failure() {
    let node = TestNode::new("user-a", std::env::temp_dir()).await;
    let mut events = node.events.subscribe();

    // No connection and nothing queued yet for "user-b": send() below queues
    // it, then we manually drive requeue_for_retry to simulate exhausted
    // delivery attempts without waiting on real connect-retry timers.
    let message_id = node.manager.send("user-b", b"hi".to_vec(), Priority::Normal).await;

    for attempt in 0..=MAX_RETRY_COUNT {
        node.manager
            .requeue_for_retry(
                "user-b",
                QueuedMessage {
                    priority: Priority::Normal,
                    message_id,
                    data: b"hi".to_vec(),
                    enqueue_time: Instant::now(),
                    retry_count: attempt,
                },
                "simulated failure".into(),
            )
            .await;
    }

    let failed = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if let Ok(ChatEvent::MessageFailed { local_sequence, .. }) = events.recv().await {
                return local_sequence;
            }
        }
    })
    .await
    .expect("MessageFailed was never emitted");

    assert_eq!(failed, message_id);
}

/// A brand-new peer is refused once the pool is at capacity, while an
/// existing peer already in the pool may still reconnect.
#[tokio::test]
async fn new_peer_refused_at_pool_capacity() {
    let node = TestNode::new("user-a", std::env::temp_dir()).await;
    for i in 0..crate::manager::MAX_POOL_CAPACITY {
        let peer_id = format!("peer-{i}");
        // Unreachable address: fire-and-forget, we only care about pool
        // bookkeeping, not whether the connect attempt itself succeeds.
        let _ = node
            .manager
            .connect_to_peer(peer_id, "127.0.0.1:1".parse().unwrap())
            .await;
    }

    let result = node
        .manager
        .connect_to_peer("one-too-many".to_string(), "127.0.0.1:1".parse().unwrap())
        .await;
    assert!(matches!(result, Err(crate::error::Error::CapacityExceeded(_))));
}
