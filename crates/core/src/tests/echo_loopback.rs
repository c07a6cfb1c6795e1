use std::time::Duration;

use crate::echo::ECHO_PEER_ID;
use crate::events::ChatEvent;

use super::common::{TestNode, settle};

/// Sending to the reserved echo peer never touches the connection manager
/// and comes back through the normal inbound event path as `Echo: <text>`.
#[tokio::test]
async fn echo_reply_round_trips_through_event_bus() {
    let node = TestNode::new("user-a", std::env::temp_dir()).await;
    let mut events = node.events.subscribe();

    let sent = node.messages.send_text(ECHO_PEER_ID, "ping").await;
    assert!(sent.is_some(), "echo sends are persisted as outbound messages");
    assert_eq!(node.manager.active_count(), 0, "echo never opens a real connection");

    let reply = tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            if let Ok(ChatEvent::MessageReceived { peer_id, payload }) = events.recv().await
                && peer_id == ECHO_PEER_ID
            {
                return String::from_utf8(payload).unwrap();
            }
        }
    })
    .await
    .expect("echo reply did not arrive in time");

    assert_eq!(reply, "Echo: ping");

    settle().await;
    let history = node.store.load_messages("user-a", ECHO_PEER_ID).await;
    assert!(history.len() >= 2, "expected the outbound ping and the echo reply, got {history:?}");
}

#[tokio::test]
async fn blank_text_is_not_sent_even_to_echo() {
    let node = TestNode::new("user-a", std::env::temp_dir()).await;
    let sent = node.messages.send_text(ECHO_PEER_ID, "   ").await;
    assert!(sent.is_none());
}
