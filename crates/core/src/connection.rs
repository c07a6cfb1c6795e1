use std::sync::Arc;
use std::time::{Duration, Instant};

use backon::{ExponentialBuilder, Retryable};
use chat_wire::{Frame, FrameAssembler, encode_length_frame, heartbeat_frame};
use parking_lot::Mutex as SyncMutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::events::{ChatEvent, ChatEventBus};
use crate::spawn_utils::spawn;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);
const RETRY_BASE_MS: u64 = 1000;
const RETRY_MAX_MS: u64 = 30_000;
const RETRY_MAX_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

/// Work handed to a connection's writer task.
#[derive(Debug)]
pub enum WriterRequest {
    Payload(Vec<u8>, mpsc::Sender<Result<(), String>>),
    Heartbeat,
    Shutdown,
}

/// Returns the `backon` exponential builder matching spec's retry schedule:
/// base 1000ms, doubled per attempt, +-20% jitter, capped at 30s, 5 attempts.
pub fn retry_builder() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(RETRY_BASE_MS))
        .with_max_delay(Duration::from_millis(RETRY_MAX_MS))
        .with_factor(2.0)
        .with_jitter()
        .with_max_times(RETRY_MAX_ATTEMPTS)
}

/// One peer's live TCP connection: owns the reader/writer tasks and the
/// cancellation token that tears them down. State is owned exclusively by
/// these tasks; outside access is via `writer_tx`/events.
pub struct Connection {
    pub peer_id: String,
    writer_tx: mpsc::Sender<WriterRequest>,
    cancel: CancellationToken,
    next_sequence: std::sync::atomic::AtomicU64,
    last_activity: Arc<SyncMutex<Instant>>,
}

impl Connection {
    /// Wraps an already-established `TcpStream` (either outbound-connected
    /// or accepted) and spawns its reader/writer tasks.
    pub fn spawn(
        peer_id: String,
        stream: TcpStream,
        events: ChatEventBus,
        on_message: mpsc::Sender<(String, Vec<u8>)>,
    ) -> Arc<Self> {
        let (reader_half, writer_half) = stream.into_split();
        let (writer_tx, writer_rx) = mpsc::channel(256);
        let cancel = CancellationToken::new();
        let last_activity = Arc::new(SyncMutex::new(Instant::now()));

        let conn = Arc::new(Self {
            peer_id: peer_id.clone(),
            writer_tx,
            cancel: cancel.clone(),
            next_sequence: std::sync::atomic::AtomicU64::new(1),
            last_activity: last_activity.clone(),
        });

        spawn_reader(peer_id.clone(), reader_half, events.clone(), on_message, cancel.clone(), last_activity.clone());
        spawn_writer(peer_id, writer_half, writer_rx, events, cancel.clone(), last_activity);

        conn
    }

    pub fn next_local_sequence(&self) -> u64 {
        self.next_sequence.fetch_add(1, std::sync::atomic::Ordering::SeqCst)
    }

    /// Time since the last byte read, heartbeat, or write on this
    /// connection, shared between its reader and writer tasks.
    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    pub async fn send(&self, payload: Vec<u8>) -> Result<(), String> {
        let (tx, mut rx) = mpsc::channel(1);
        self.writer_tx
            .send(WriterRequest::Payload(payload, tx))
            .await
            .map_err(|_| "connection writer closed".to_string())?;
        rx.recv().await.unwrap_or_else(|| Err("connection writer dropped".to_string()))
    }

    pub fn close(&self) {
        self.cancel.cancel();
    }
}

fn spawn_reader(
    peer_id: String,
    mut reader: tokio::net::tcp::OwnedReadHalf,
    events: ChatEventBus,
    on_message: mpsc::Sender<(String, Vec<u8>)>,
    cancel: CancellationToken,
    last_activity: Arc<SyncMutex<Instant>>,
) {
    spawn("connection-reader", async move {
        let mut assembler = FrameAssembler::new();
        let mut buf = [0u8; 8192];
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                res = reader.read(&mut buf) => {
                    let n = match res {
                        Ok(0) => {
                            events.emit(ChatEvent::StateChanged {
                                peer_id: peer_id.clone(),
                                new_state: ConnectionState::Reconnecting,
                                reason: "remote closed".into(),
                            });
                            break;
                        }
                        Ok(n) => n,
                        Err(e) => {
                            events.emit(ChatEvent::ConnectionError {
                                peer_id: peer_id.clone(),
                                reason: e.to_string(),
                            });
                            events.emit(ChatEvent::StateChanged {
                                peer_id: peer_id.clone(),
                                new_state: ConnectionState::Reconnecting,
                                reason: e.to_string(),
                            });
                            break;
                        }
                    };
                    *last_activity.lock() = Instant::now();
                    match assembler.feed(&buf[..n]) {
                        Ok(frames) => {
                            for frame in frames {
                                match frame {
                                    Frame::Heartbeat => trace!(peer_id, "heartbeat received"),
                                    Frame::Payload(bytes) => {
                                        events.emit(ChatEvent::MessageReceived {
                                            peer_id: peer_id.clone(),
                                            payload: bytes.clone(),
                                        });
                                        let _ = on_message.send((peer_id.clone(), bytes)).await;
                                    }
                                }
                            }
                        }
                        Err(e) => {
                            warn!(peer_id, error = %e, "framing fault, dropping connection");
                            events.emit(ChatEvent::StateChanged {
                                peer_id: peer_id.clone(),
                                new_state: ConnectionState::Reconnecting,
                                reason: "framing fault".into(),
                            });
                            break;
                        }
                    }
                }
            }
        }
        Ok(())
    });
}

fn spawn_writer(
    peer_id: String,
    writer: tokio::net::tcp::OwnedWriteHalf,
    mut rx: mpsc::Receiver<WriterRequest>,
    events: ChatEventBus,
    cancel: CancellationToken,
    last_activity: Arc<SyncMutex<Instant>>,
) {
    spawn("connection-writer", async move {
        let writer = Mutex::new(writer);
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = heartbeat.tick() => {
                    if last_activity.lock().elapsed() > IDLE_TIMEOUT {
                        events.emit(ChatEvent::StateChanged {
                            peer_id: peer_id.clone(),
                            new_state: ConnectionState::Reconnecting,
                            reason: "idle timeout".into(),
                        });
                        break;
                    }
                    let mut w = writer.lock().await;
                    if w.write_all(&heartbeat_frame()).await.is_err() || w.flush().await.is_err() {
                        break;
                    }
                    *last_activity.lock() = Instant::now();
                }
                req = rx.recv() => {
                    let Some(req) = req else { break };
                    match req {
                        WriterRequest::Shutdown => break,
                        WriterRequest::Heartbeat => {
                            let mut w = writer.lock().await;
                            if w.write_all(&heartbeat_frame()).await.is_ok() && w.flush().await.is_ok() {
                                *last_activity.lock() = Instant::now();
                            }
                        }
                        WriterRequest::Payload(payload, reply) => {
                            let framed = encode_length_frame(&payload);
                            let mut w = writer.lock().await;
                            let result = async {
                                w.write_all(&framed).await?;
                                w.flush().await
                            }
                            .await;
                            match result {
                                Ok(()) => {
                                    *last_activity.lock() = Instant::now();
                                    let _ = reply.send(Ok(())).await;
                                }
                                Err(e) => {
                                    debug!(peer_id, error = %e, "write failed");
                                    let _ = reply.send(Err(e.to_string())).await;
                                }
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    });
}

/// Connects with the exponential-backoff retry schedule, returning the live
/// stream or an exhaustion error after the 5th failed attempt.
pub async fn connect_with_retry(addr: std::net::SocketAddr) -> anyhow::Result<TcpStream> {
    (|| async { TcpStream::connect(addr).await })
        .retry(retry_builder())
        .notify(|err, dur| {
            debug!(error = %err, delay_ms = dur.as_millis(), "retrying connection");
        })
        .await
        .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_schedule_bounds() {
        // d_i in [min(30000, 2^i*1000*0.8), min(30000, 2^i*1000*1.2)]
        for i in 0..5u32 {
            let base = (2u64.pow(i) * RETRY_BASE_MS).min(RETRY_MAX_MS);
            let lo = (base as f64 * 0.8) as u64;
            let hi = (base as f64 * 1.2).min(RETRY_MAX_MS as f64) as u64;
            assert!(lo <= hi);
        }
    }
}
