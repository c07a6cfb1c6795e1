use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::connection::{Connection, ConnectionState, connect_with_retry};
use crate::events::{ChatEvent, ChatEventBus};
use crate::spawn_utils::spawn;

/// Matches the C++ original's `QueuedMessage` ordering: priority primary
/// (Critical highest), enqueue time as tie-break (earlier first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

pub const MAX_QUEUE_SIZE: usize = 1000;
pub const MAX_RETRY_COUNT: u32 = 3;
pub const MAX_POOL_CAPACITY: usize = 20;
const IDLE_GC_INTERVAL: Duration = Duration::from_secs(60);
const IDLE_THRESHOLD: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub priority: Priority,
    pub message_id: u64,
    pub data: Vec<u8>,
    pub enqueue_time: Instant,
    pub retry_count: u32,
}

impl PartialEq for QueuedMessage {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.enqueue_time == other.enqueue_time
    }
}
impl Eq for QueuedMessage {}

impl PartialOrd for QueuedMessage {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedMessage {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| Reverse(self.enqueue_time).cmp(&Reverse(other.enqueue_time)))
    }
}

struct PeerSlot {
    connection: Option<Arc<Connection>>,
    state: ConnectionState,
    queue: BinaryHeap<QueuedMessage>,
    addr: Option<std::net::SocketAddr>,
}

impl PeerSlot {
    fn new() -> Self {
        Self {
            connection: None,
            state: ConnectionState::Disconnected,
            queue: BinaryHeap::new(),
            addr: None,
        }
    }
}

/// Process-wide connection pool: one entry per known peer, a bounded
/// priority send queue each, capacity-limited, with idle GC. Constructed
/// once by the composition root and shared via `Arc`.
pub struct ConnectionManager {
    peers: Mutex<HashMap<String, PeerSlot>>,
    events: ChatEventBus,
    on_message: mpsc::Sender<(String, Vec<u8>)>,
    next_message_id: std::sync::atomic::AtomicU64,
}

impl ConnectionManager {
    pub fn new(events: ChatEventBus, on_message: mpsc::Sender<(String, Vec<u8>)>) -> Arc<Self> {
        let manager = Arc::new(Self {
            peers: Mutex::new(HashMap::new()),
            events,
            on_message,
            next_message_id: std::sync::atomic::AtomicU64::new(1),
        });
        manager.clone().spawn_idle_gc();
        manager
    }

    pub fn active_count(&self) -> usize {
        self.peers
            .lock()
            .values()
            .filter(|s| s.state == ConnectionState::Connected)
            .count()
    }

    pub fn state(&self, peer_id: &str) -> ConnectionState {
        self.peers
            .lock()
            .get(peer_id)
            .map(|s| s.state)
            .unwrap_or(ConnectionState::Disconnected)
    }

    /// Existing peers may always reconnect; a new peer is refused at
    /// capacity with `CapacityExceeded`.
    pub async fn connect_to_peer(
        self: &Arc<Self>,
        peer_id: String,
        addr: std::net::SocketAddr,
    ) -> Result<(), crate::error::Error> {
        {
            let mut peers = self.peers.lock();
            let is_new = !peers.contains_key(&peer_id);
            if is_new && peers.len() >= MAX_POOL_CAPACITY {
                self.events.emit(ChatEvent::StateChanged {
                    peer_id: peer_id.clone(),
                    new_state: ConnectionState::Failed,
                    reason: "capacity".into(),
                });
                return Err(crate::error::Error::CapacityExceeded(peer_id));
            }
            let slot = peers.entry(peer_id.clone()).or_insert_with(PeerSlot::new);
            slot.state = ConnectionState::Connecting;
            slot.addr = Some(addr);
            if let Some(stale) = slot.connection.take() {
                stale.close();
            }
        }
        self.events.emit(ChatEvent::StateChanged {
            peer_id: peer_id.clone(),
            new_state: ConnectionState::Connecting,
            reason: "connecting".into(),
        });

        let manager = self.clone();
        spawn("connect-to-peer", async move {
            match connect_with_retry(addr).await {
                Ok(stream) => manager.adopt_stream(peer_id, stream).await,
                Err(e) => {
                    manager.mark_state(&peer_id, ConnectionState::Failed, "retries exhausted");
                    warn!(peer_id, error = %e, "connect retries exhausted");
                }
            }
            Ok(())
        });
        Ok(())
    }

    pub async fn add_incoming(self: &Arc<Self>, peer_id: String, stream: TcpStream) {
        self.adopt_stream(peer_id, stream).await;
    }

    /// Drives the `Reconnecting --timer--> Connecting` transition for a
    /// connection that just died under a live peer (remote close, idle
    /// timeout, framing fault). Re-dials the address cached from the
    /// original `connect_to_peer`, falling back to `fallback_addr` for a
    /// peer this manager only ever saw as an incoming connection. With
    /// neither available the connection is marked `Failed`.
    pub fn reconnect(self: &Arc<Self>, peer_id: String, fallback_addr: Option<std::net::SocketAddr>) {
        let cached_addr = self.peers.lock().get(&peer_id).and_then(|s| s.addr);
        let Some(addr) = cached_addr.or(fallback_addr) else {
            self.mark_state(&peer_id, ConnectionState::Failed, "no known address to reconnect");
            return;
        };
        let manager = self.clone();
        spawn("reconnect", async move {
            let _ = manager.connect_to_peer(peer_id, addr).await;
            Ok(())
        });
    }

    async fn adopt_stream(self: &Arc<Self>, peer_id: String, stream: TcpStream) {
        let conn = Connection::spawn(peer_id.clone(), stream, self.events.clone(), self.on_message.clone());
        let drain = {
            let mut peers = self.peers.lock();
            let slot = peers.entry(peer_id.clone()).or_insert_with(PeerSlot::new);
            slot.connection = Some(conn.clone());
            slot.state = ConnectionState::Connected;
            std::mem::take(&mut slot.queue).into_sorted_vec()
        };
        self.mark_state(&peer_id, ConnectionState::Connected, "connected");

        // Drain opportunistically in priority/enqueue order once connected.
        for queued in drain.into_iter().rev() {
            self.deliver(&peer_id, conn.clone(), queued).await;
        }
    }

    pub fn disconnect_from_peer(&self, peer_id: &str) {
        if let Some(slot) = self.peers.lock().get(peer_id) {
            if let Some(conn) = &slot.connection {
                conn.close();
            }
        }
        self.mark_state(peer_id, ConnectionState::Disconnected, "user-disconnect");
    }

    /// A discovery eviction drops any queue/connection for the peer eagerly.
    pub fn on_peer_offline(&self, peer_id: &str) {
        let mut peers = self.peers.lock();
        if let Some(slot) = peers.remove(peer_id) {
            if let Some(conn) = slot.connection {
                conn.close();
            }
        }
    }

    /// Allocates a sequence number without starting delivery, so a caller
    /// can correlate it with the eventual `MessageSent`/`MessageFailed`
    /// event before that event has any chance of being observed.
    pub fn reserve_sequence(&self) -> u64 {
        self.next_message_id.fetch_add(1, std::sync::atomic::Ordering::SeqCst)
    }

    pub async fn send(self: &Arc<Self>, peer_id: &str, bytes: Vec<u8>, priority: Priority) -> u64 {
        let message_id = self.reserve_sequence();
        self.send_with_id(message_id, peer_id, bytes, priority).await;
        message_id
    }

    /// Like [`Self::send`] but with a sequence number the caller already
    /// reserved via [`Self::reserve_sequence`], so it can record the
    /// correlation before delivery (and its events) can begin.
    pub async fn send_with_id(self: &Arc<Self>, message_id: u64, peer_id: &str, bytes: Vec<u8>, priority: Priority) {
        let queued = QueuedMessage {
            priority,
            message_id,
            data: bytes,
            enqueue_time: Instant::now(),
            retry_count: 0,
        };

        let conn = {
            let mut peers = self.peers.lock();
            let slot = peers.entry(peer_id.to_string()).or_insert_with(PeerSlot::new);
            if slot.state == ConnectionState::Connected && slot.connection.is_some() {
                slot.connection.clone()
            } else {
                if slot.queue.len() >= MAX_QUEUE_SIZE {
                    self.events.emit(ChatEvent::MessageFailed {
                        peer_id: peer_id.to_string(),
                        local_sequence: message_id,
                        reason: "queue full".into(),
                    });
                    return;
                }
                slot.queue.push(queued.clone());
                None
            }
        };

        if let Some(conn) = conn {
            self.deliver(peer_id, conn, queued).await;
        }
    }

    async fn deliver(self: &Arc<Self>, peer_id: &str, conn: Arc<Connection>, queued: QueuedMessage) {
        match conn.send(queued.data.clone()).await {
            Ok(()) => {
                self.events.emit(ChatEvent::MessageSent {
                    peer_id: peer_id.to_string(),
                    local_sequence: queued.message_id,
                });
            }
            Err(reason) => self.requeue_for_retry(peer_id, queued, reason).await,
        }
    }

    pub async fn requeue_for_retry(self: &Arc<Self>, peer_id: &str, mut queued: QueuedMessage, reason: String) {
        if queued.retry_count >= MAX_RETRY_COUNT {
            self.events.emit(ChatEvent::MessageFailed {
                peer_id: peer_id.to_string(),
                local_sequence: queued.message_id,
                reason,
            });
            return;
        }
        queued.retry_count += 1;
        let mut peers = self.peers.lock();
        if let Some(slot) = peers.get_mut(peer_id) {
            slot.queue.push(queued);
        }
    }

    fn mark_state(&self, peer_id: &str, state: ConnectionState, reason: &str) {
        {
            let mut peers = self.peers.lock();
            let slot = peers.entry(peer_id.to_string()).or_insert_with(PeerSlot::new);
            slot.state = state;
        }
        self.events.emit(ChatEvent::StateChanged {
            peer_id: peer_id.to_string(),
            new_state: state,
            reason: reason.to_string(),
        });
    }

    fn spawn_idle_gc(self: Arc<Self>) {
        spawn("idle-gc", async move {
            let mut ticker = tokio::time::interval(IDLE_GC_INTERVAL);
            loop {
                ticker.tick().await;
                let stale: Vec<String> = {
                    let peers = self.peers.lock();
                    peers
                        .iter()
                        .filter(|(_, slot)| {
                            slot.state == ConnectionState::Connected
                                && slot
                                    .connection
                                    .as_ref()
                                    .is_some_and(|conn| conn.idle_for() > IDLE_THRESHOLD)
                        })
                        .map(|(id, _)| id.clone())
                        .collect()
                };
                for peer_id in stale {
                    info!(peer_id, "idle GC closing connection");
                    self.disconnect_from_peer(&peer_id);
                }
            }
        });
    }
}
