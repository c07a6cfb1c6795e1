use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use network_interface::{NetworkInterface, NetworkInterfaceConfig};
use tracing::warn;

use crate::spawn_utils::spawn;

const REFRESH_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Default, Clone)]
struct CacheData {
    addresses: Vec<IpAddr>,
    interfaces: Vec<String>,
}

/// Local-interface cache: non-loopback, up-and-running interfaces and their
/// non-link-local addresses, refreshed periodically behind an `ArcSwap` so
/// readers never observe a torn update or block on a writer mid-refresh.
pub struct NetworkInterfaceCache {
    data: ArcSwap<CacheData>,
}

impl NetworkInterfaceCache {
    pub fn new() -> Arc<Self> {
        let cache = Arc::new(Self {
            data: ArcSwap::from_pointee(Self::collect()),
        });
        cache.clone().spawn_refresh();
        cache
    }

    pub fn is_local_address(&self, addr: &IpAddr) -> bool {
        self.data.load().addresses.iter().any(|a| a == addr)
    }

    pub fn local_addresses(&self) -> Vec<IpAddr> {
        self.data.load().addresses.clone()
    }

    pub fn active_interfaces(&self) -> Vec<String> {
        self.data.load().interfaces.clone()
    }

    fn collect() -> CacheData {
        match NetworkInterface::show() {
            Ok(ifaces) => {
                let mut addresses = Vec::new();
                let mut interfaces = Vec::new();
                for iface in ifaces {
                    let usable: Vec<IpAddr> = iface
                        .addr
                        .iter()
                        .map(|a| a.ip())
                        .filter(|ip| !ip.is_loopback() && !is_link_local(ip))
                        .collect();
                    if usable.is_empty() {
                        continue;
                    }
                    interfaces.push(iface.name.clone());
                    addresses.extend(usable);
                }
                CacheData { addresses, interfaces }
            }
            Err(e) => {
                warn!(error = %e, "failed to enumerate network interfaces");
                CacheData::default()
            }
        }
    }

    fn spawn_refresh(self: Arc<Self>) {
        spawn("iface-refresh", async move {
            let mut ticker = tokio::time::interval(REFRESH_INTERVAL);
            loop {
                ticker.tick().await;
                self.data.store(Arc::new(Self::collect()));
            }
        });
    }
}

fn is_link_local(addr: &IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => v4.is_link_local(),
        IpAddr::V6(v6) => (v6.segments()[0] & 0xffc0) == 0xfe80,
    }
}
