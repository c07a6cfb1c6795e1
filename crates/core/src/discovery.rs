use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chat_wire::{DiscoveryKind, DiscoveryMessage, PeerInfo};
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use crate::config::Identity;
use crate::events::{ChatEvent, ChatEventBus};
use crate::iface::NetworkInterfaceCache;
use crate::spawn_utils::spawn;

pub const DEFAULT_DISCOVERY_PORT: u16 = 45678;
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const SWEEP_INTERVAL: Duration = Duration::from_secs(10);
const EVICTION_THRESHOLD: Duration = Duration::from_secs(30);

struct KnownPeer {
    info: PeerInfo,
    last_seen: Instant,
}

/// UDP broadcast discovery: periodic heartbeat/announce, timeout eviction,
/// self-origination filtering via the interface cache, a loopback mode for
/// local testing that intentionally defeats that filter.
pub struct DiscoveryService {
    identity: Identity,
    tcp_port: u16,
    discovery_port: u16,
    loopback: bool,
    iface_cache: Arc<NetworkInterfaceCache>,
    events: ChatEventBus,
    peers: Mutex<HashMap<String, KnownPeer>>,
    cancel: CancellationToken,
    socket: Arc<UdpSocket>,
}

impl DiscoveryService {
    pub async fn bind(
        identity: Identity,
        tcp_port: u16,
        discovery_port: u16,
        loopback: bool,
        iface_cache: Arc<NetworkInterfaceCache>,
        events: ChatEventBus,
    ) -> anyhow::Result<Arc<Self>> {
        let socket = bind_broadcast_socket(discovery_port)?;
        Ok(Arc::new(Self {
            identity,
            tcp_port,
            discovery_port,
            loopback,
            iface_cache,
            events,
            peers: Mutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
            socket: Arc::new(socket),
        }))
    }

    /// The receiver overrides `ip_address` with the packet's source address,
    /// so what we advertise here only needs to carry our listening port.
    fn peer_info(&self) -> PeerInfo {
        PeerInfo {
            user_id: self.identity.local_user_id.clone(),
            user_name: self.identity.user_name.clone(),
            ip_address: String::new(),
            port: self.tcp_port,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            os_type: std::env::consts::OS.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    async fn broadcast(&self, kind: DiscoveryKind) -> anyhow::Result<()> {
        let msg = DiscoveryMessage {
            kind,
            peer: self.peer_info(),
        };
        let bytes = msg.encode()?;
        let dest: SocketAddr = format!("255.255.255.255:{}", self.discovery_port).parse()?;
        self.socket.send_to(&bytes, dest).await?;
        Ok(())
    }

    pub fn start(self: &Arc<Self>) {
        let this = self.clone();
        spawn("discovery-announce", async move {
            this.broadcast(DiscoveryKind::Announce).await?;
            Ok(())
        });

        let this = self.clone();
        spawn("discovery-heartbeat", async move {
            let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
            loop {
                tokio::select! {
                    _ = this.cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = this.broadcast(DiscoveryKind::Heartbeat).await {
                            warn!(error = %e, "discovery heartbeat broadcast failed");
                        }
                    }
                }
            }
            Ok(())
        });

        let this = self.clone();
        spawn("discovery-sweep", async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                tokio::select! {
                    _ = this.cancel.cancelled() => break,
                    _ = ticker.tick() => this.sweep(),
                }
            }
            Ok(())
        });

        let this = self.clone();
        spawn("discovery-recv", async move {
            let mut buf = [0u8; 2048];
            loop {
                tokio::select! {
                    _ = this.cancel.cancelled() => break,
                    res = this.socket.recv_from(&mut buf) => {
                        match res {
                            Ok((n, from)) => this.on_datagram(&buf[..n], from.ip()),
                            Err(e) => warn!(error = %e, "discovery recv failed"),
                        }
                    }
                }
            }
            Ok(())
        });
    }

    fn on_datagram(&self, buf: &[u8], from: std::net::IpAddr) {
        if self.iface_cache.is_local_address(&from) && !self.loopback {
            trace!(%from, "dropping self-originated discovery datagram");
            return;
        }
        let msg = match DiscoveryMessage::decode(buf) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(error = %e, "malformed discovery datagram");
                return;
            }
        };
        if msg.peer.user_id == self.identity.local_user_id && !self.loopback {
            return;
        }

        let mut peer_info = msg.peer;
        // Trust the packet's source address over whatever the peer advertised.
        peer_info.ip_address = from.to_string();

        let peer_id = peer_info.user_id.clone();
        match msg.kind {
            chat_wire::DiscoveryKind::Goodbye => {
                self.peers.lock().remove(&peer_id);
                self.events.emit(ChatEvent::PeerOffline { peer_id });
            }
            _ => {
                let is_new = {
                    let mut peers = self.peers.lock();
                    let existed = peers.contains_key(&peer_id);
                    peers.insert(
                        peer_id.clone(),
                        KnownPeer {
                            info: peer_info,
                            last_seen: Instant::now(),
                        },
                    );
                    !existed
                };
                if is_new {
                    self.events.emit(ChatEvent::PeerDiscovered { peer_id });
                } else {
                    self.events.emit(ChatEvent::PeerHeartbeat { peer_id });
                }
            }
        }
    }

    fn sweep(&self) {
        let expired: Vec<String> = {
            let peers = self.peers.lock();
            peers
                .iter()
                .filter(|(_, p)| p.last_seen.elapsed() > EVICTION_THRESHOLD)
                .map(|(id, _)| id.clone())
                .collect()
        };
        for peer_id in expired {
            self.peers.lock().remove(&peer_id);
            self.events.emit(ChatEvent::PeerOffline { peer_id });
        }
    }

    /// Reverse lookup used by the TCP accept loop to resolve a freshly
    /// accepted socket's remote IP to a known discovery identity.
    pub fn peer_id_for_addr(&self, ip: &std::net::IpAddr) -> Option<String> {
        self.peers
            .lock()
            .iter()
            .find(|(_, p)| p.info.ip_address == ip.to_string())
            .map(|(id, _)| id.clone())
    }

    pub fn known_peer(&self, peer_id: &str) -> Option<(String, u16)> {
        self.peers
            .lock()
            .get(peer_id)
            .map(|p| (p.info.ip_address.clone(), p.info.port))
    }

    pub async fn stop(&self) {
        let _ = self.broadcast(DiscoveryKind::Goodbye).await;
        self.cancel.cancel();
        self.peers.lock().clear();
    }
}

fn bind_broadcast_socket(port: u16) -> anyhow::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.set_broadcast(true)?;
    socket.set_nonblocking(true)?;
    let addr: SocketAddr = format!("0.0.0.0:{port}").parse()?;
    socket.bind(&addr.into())?;
    Ok(UdpSocket::from_std(socket.into())?)
}
