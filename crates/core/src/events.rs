use tokio::sync::broadcast;

use crate::connection::ConnectionState;

/// Capacity of the broadcast channel backing [`ChatEventBus`]. Slow
/// subscribers lag rather than block publishers.
const EVENT_CHANNEL_CAPACITY: usize = 128;

#[derive(Debug, Clone)]
pub enum ChatEvent {
    PeerDiscovered { peer_id: String },
    PeerHeartbeat { peer_id: String },
    PeerOffline { peer_id: String },

    StateChanged {
        peer_id: String,
        new_state: ConnectionState,
        reason: String,
    },
    MessageReceived {
        peer_id: String,
        payload: Vec<u8>,
    },
    MessageSent {
        peer_id: String,
        local_sequence: u64,
    },
    MessageFailed {
        peer_id: String,
        local_sequence: u64,
        reason: String,
    },
    ConnectionError {
        peer_id: String,
        reason: String,
    },

    MessageCreated {
        message_id: String,
        kind: MessageKind,
    },
    IncomingTransferRequested {
        transfer_id: String,
        from_user_id: String,
        file_name: String,
    },
    TransferCompleted {
        transfer_id: String,
        local_path: String,
    },
    TransferFailed {
        transfer_id: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    Image,
    File,
}

/// Many-to-many event propagation for the connection → manager → service
/// chain, replacing the source's signal/slot observer pattern with a
/// broadcast channel per node.
#[derive(Clone)]
pub struct ChatEventBus {
    tx: broadcast::Sender<ChatEvent>,
}

impl Default for ChatEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatEventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn emit(&self, event: ChatEvent) {
        // No subscribers is a normal state (e.g. headless operation); ignore.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.tx.subscribe()
    }
}
