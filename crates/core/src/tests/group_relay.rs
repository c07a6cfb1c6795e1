use crate::data::Message;

use super::common::{TestNode, connect_pair, settle};

/// The group owner relays a message it received from one member to the
/// rest, preserving id/from/content/timestamp and only swapping
/// `to_user_id` per target; sender and owner are excluded from relay.
#[tokio::test]
async fn owner_relays_received_message_to_other_members_only() {
    let owner = TestNode::new("user-owner", std::env::temp_dir()).await;
    let target = TestNode::new("user-t", std::env::temp_dir()).await;
    connect_pair(&owner, "user-t", &target, "user-owner").await;

    owner.groups.register_group(
        "group-1".into(),
        vec!["user-s".into(), "user-owner".into(), "user-t".into()],
        Some("user-owner".into()),
    );

    // Simulate the message the owner just received from "user-s".
    let mut original = Message::new_text(
        "msg-1".into(),
        "user-s".into(),
        "user-owner".into(),
        "hi from s".into(),
        1_700_000_000_000,
    );
    original.is_group = true;
    original.group_id = Some("group-1".into());

    let relay_targets = owner.groups.get_relay_targets("group-1", "user-owner", "user-s", "user-owner");
    assert_eq!(relay_targets, vec!["user-t".to_string()]);

    owner.messages.relay_group_text(&original, &relay_targets).await;
    settle().await;

    let relayed = target.store.load_messages("user-t", "group-1").await;
    assert_eq!(relayed.len(), 1);
    assert_eq!(relayed[0].id, "msg-1");
    assert_eq!(relayed[0].content, "hi from s");
    assert_eq!(relayed[0].timestamp_ms, 1_700_000_000_000);
    // from_user_id is preserved as the original sender, not the owner.
    assert_eq!(relayed[0].from_user_id, "user-s");
}

/// End-to-end: a member's group text arrives over the wire at the owner,
/// which relays it to the remaining member automatically, with no manual
/// `relay_group_text` call from the test.
#[tokio::test]
async fn owner_auto_relays_inbound_group_text() {
    let owner = TestNode::new("user-owner", std::env::temp_dir()).await;
    let sender = TestNode::new("user-s", std::env::temp_dir()).await;
    let target = TestNode::new("user-t", std::env::temp_dir()).await;

    connect_pair(&sender, "user-owner", &owner, "user-s").await;
    connect_pair(&owner, "user-t", &target, "user-owner").await;

    owner.groups.register_group(
        "group-1".into(),
        vec!["user-s".into(), "user-owner".into(), "user-t".into()],
        Some("user-owner".into()),
    );

    sender
        .messages
        .send_group_text("group-1", &["user-owner".to_string()], "hi from s")
        .await;
    settle().await;

    let relayed = target.store.load_messages("user-t", "group-1").await;
    assert_eq!(relayed.len(), 1);
    assert_eq!(relayed[0].content, "hi from s");
    assert_eq!(relayed[0].from_user_id, "user-s");
}
