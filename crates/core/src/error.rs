use thiserror::Error;

/// Error kinds the core distinguishes and surfaces, per the propagation
/// policy: transport/framing faults are recovered inside the connection and
/// manager; codec/persistence faults are logged and swallowed; capacity and
/// transfer-lifecycle faults are reported to the caller.
#[derive(Debug, Error)]
pub enum Error {
    #[error("transport error: {0}")]
    Transport(#[source] std::io::Error),

    #[error("framing error: {0}")]
    Framing(#[from] chat_wire::CodecError),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),

    #[error("not connected to peer {0}")]
    NotConnected(String),

    #[error("transfer lifecycle error: {0}")]
    TransferLifecycle(String),

    #[error("persistence error: {0}")]
    Persistence(#[source] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
