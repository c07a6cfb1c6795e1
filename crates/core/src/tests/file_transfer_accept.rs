use crate::data::MessageKind;

use super::common::{TestNode, connect_pair, settle};

/// A file announced then chunked over a real connection is auto-accepted,
/// reassembled on disk, and shows up in the recipient's chat history.
#[tokio::test]
async fn auto_accepted_file_transfer_is_reassembled_and_recorded() {
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    let a = TestNode::new("user-a", dir_a.path().to_path_buf()).await;
    let b = TestNode::new("user-b", dir_b.path().to_path_buf()).await;
    connect_pair(&a, "user-b", &b, "user-a").await;

    let contents = b"some file bytes, nothing fancy".to_vec();
    let transfer_id = a
        .transfers
        .send_file("user-b", "notes.txt", "text/plain", &contents)
        .await
        .unwrap();
    assert!(!transfer_id.is_empty());

    settle().await;

    let written = dir_b.path().join("notes.txt");
    let on_disk = tokio::fs::read(&written).await.expect("file was not written");
    assert_eq!(on_disk, contents);

    let history = b.store.load_messages("user-b", "user-a").await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].kind, MessageKind::File);
    let attachment = history[0].attachment.as_ref().expect("message should carry an attachment");
    assert_eq!(attachment.local_path, written.to_str().unwrap());
    assert_eq!(attachment.name, "notes.txt");
    assert_eq!(attachment.size_bytes, contents.len() as u64);
    assert_eq!(attachment.mime_type, "text/plain");
}

/// Files above the cap are rejected synchronously, without opening a
/// connection or sending anything.
#[tokio::test]
async fn oversized_file_is_rejected_before_sending() {
    let a = TestNode::new("user-a", std::env::temp_dir()).await;
    let oversized = vec![0u8; (crate::file_transfer::MAX_FILE_SIZE + 1) as usize];
    let result = a.transfers.send_file("user-b", "huge.bin", "application/octet-stream", &oversized).await;
    assert!(result.is_err());
}
