//! Wire codec for the LAN chat node: UDP discovery datagrams and
//! length-framed TCP payloads. Pure encode/decode — no socket I/O lives here.

pub mod discovery;
pub mod error;
pub mod frame;
pub mod payload;

pub use discovery::{DiscoveryKind, DiscoveryMessage, PeerInfo, is_valid_discovery};
pub use error::CodecError;
pub use frame::{
    Frame, FrameAssembler, MAX_FRAME_SIZE, PROTOCOL_VERSION, TcpMessage, TcpMessageKind,
    encode_length_frame, heartbeat_frame, is_valid_frame,
};
pub use payload::{FileChunk, FileTransferRequest, TextMessage};
