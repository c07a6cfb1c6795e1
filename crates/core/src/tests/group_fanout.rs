use super::common::{TestNode, connect_pair, settle};

/// `send_group_text` shares one message id across every recipient, and each
/// recipient persists it under its own session with the owner as sender.
#[tokio::test]
async fn group_send_fans_out_one_message_id_to_every_member() {
    let owner = TestNode::new("user-owner", std::env::temp_dir()).await;
    let member_b = TestNode::new("user-b", std::env::temp_dir()).await;
    let member_c = TestNode::new("user-c", std::env::temp_dir()).await;

    connect_pair(&owner, "user-b", &member_b, "user-owner").await;
    connect_pair(&owner, "user-c", &member_c, "user-owner").await;

    let members = vec!["user-b".to_string(), "user-c".to_string()];
    let message_id = owner.messages.send_group_text("group-1", &members, "hello everyone").await;
    settle().await;

    // Group messages are bucketed by group id, not by the individual sender.
    let b_messages = member_b.store.load_messages("user-b", "group-1").await;
    let c_messages = member_c.store.load_messages("user-c", "group-1").await;

    assert_eq!(b_messages.len(), 1);
    assert_eq!(c_messages.len(), 1);
    assert_eq!(b_messages[0].id, message_id);
    assert_eq!(c_messages[0].id, message_id);
    assert_eq!(b_messages[0].content, "hello everyone");
    assert_eq!(c_messages[0].content, "hello everyone");
    assert!(b_messages[0].is_group);
    assert_eq!(b_messages[0].group_id.as_deref(), Some("group-1"));
}
