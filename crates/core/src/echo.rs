use rand::Rng;
use tokio::sync::mpsc;

use crate::spawn_utils::spawn;

/// Reserved id routing `send_text` to the loopback simulator instead of the
/// connection manager.
pub const ECHO_PEER_ID: &str = "echo_bot_local";

/// After a random 500-1500ms delay, delivers `Echo: <original>` back through
/// the normal inbound path. Preserved from the original implementation's
/// echo-loopback peer as an explicit, single-threaded simulator.
pub struct EchoSimulator {
    inbound_tx: mpsc::Sender<(String, String)>,
}

impl EchoSimulator {
    pub fn spawn(inbound_tx: mpsc::Sender<(String, String)>) -> Self {
        Self { inbound_tx }
    }

    pub fn echo(&self, original: String) {
        let tx = self.inbound_tx.clone();
        spawn("echo-simulator", async move {
            let delay_ms = rand::rng().random_range(500..=1500);
            tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
            let _ = tx.send((ECHO_PEER_ID.to_string(), format!("Echo: {original}"))).await;
            Ok(())
        });
    }
}
